use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

use crate::wire::message::InvEntry;

/// One `inv` message worth of block announcements, released at `ready_at`.
#[derive(Debug)]
pub(crate) struct BlockBatch {
    ready_at: Instant,
    entries: Vec<InvEntry>,
}

impl BlockBatch {
    pub(crate) fn new(entries: Vec<InvEntry>, delay: Duration) -> Self {
        Self {
            ready_at: Instant::now() + delay,
            entries,
        }
    }
}

pub(crate) fn channel() -> (Sender<BlockBatch>, BlockInventory) {
    let (tx, rx) = unbounded();
    (tx, BlockInventory { rx })
}

/// Pull side of the block-announcement queue.
///
/// Batches arrive in announcement order. Each one is held back until its
/// delay has elapsed; the wait happens on the caller's thread, never on the
/// session's reader. An empty batch is pushed after every handshake so idle
/// consumers wake up and can re-check the chain.
///
/// The queue closes when the session shuts down.
#[derive(Debug, Clone)]
pub struct BlockInventory {
    rx: Receiver<BlockBatch>,
}

impl BlockInventory {
    /// Blocks for the next batch. `None` once the session is gone.
    pub fn recv(&self) -> Option<Vec<InvEntry>> {
        let batch = self.rx.recv().ok()?;
        Some(release(batch))
    }

    /// Like [`recv`](Self::recv), but gives up after `timeout` if nothing
    /// was queued. A batch that arrived in time is always waited out.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<InvEntry>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout).map(release)
    }

    /// Takes a queued batch without waiting for one to arrive. Its delay,
    /// if any remains, is still waited out.
    pub fn try_recv(&self) -> Result<Vec<InvEntry>, TryRecvError> {
        let batch = self.rx.try_recv()?;
        Ok(release(batch))
    }
}

fn release(batch: BlockBatch) -> Vec<InvEntry> {
    let now = Instant::now();
    if batch.ready_at > now {
        thread::sleep(batch.ready_at - now);
    }
    batch.entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_delayed_and_ordered() {
        let (tx, inventory) = channel();
        let start = Instant::now();

        tx.send(BlockBatch::new(vec![InvEntry::block([1; 32])], Duration::from_millis(50)))
            .unwrap();
        tx.send(BlockBatch::new(vec![], Duration::ZERO)).unwrap();

        assert_eq!(inventory.recv(), Some(vec![InvEntry::block([1; 32])]));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(inventory.recv(), Some(vec![]));
    }

    #[test]
    fn closes_with_sender() {
        let (tx, inventory) = channel();
        drop(tx);
        assert_eq!(inventory.recv(), None);
        assert!(matches!(
            inventory.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
}
