//! One-shot signals between the connection threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

/// Creates a linked fulfill/wait pair.
pub fn oneshot<T>() -> (Fulfill<T>, Wait<T>) {
    let (tx, rx) = bounded(1);
    let fulfill = Fulfill {
        tx,
        fired: Arc::new(AtomicBool::new(false)),
    };
    (fulfill, Wait { rx })
}

/// Sending half. Only the first [`fulfill`](Fulfill::fulfill) delivers a
/// value; later calls are ignored.
#[derive(Debug)]
pub struct Fulfill<T> {
    tx: Sender<T>,
    fired: Arc<AtomicBool>,
}

impl<T> Clone for Fulfill<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            fired: Arc::clone(&self.fired),
        }
    }
}

impl<T> Fulfill<T> {
    /// Returns `false` if the signal had already been fulfilled.
    pub fn fulfill(&self, value: T) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        // The waiter may be gone already; nobody is left to tell.
        let _ = self.tx.try_send(value);
        true
    }
}

/// Receiving half.
///
/// If every [`Fulfill`] is dropped without firing, waiting returns early
/// with a disconnect instead of blocking forever.
#[derive(Debug)]
pub struct Wait<T> {
    rx: Receiver<T>,
}

impl<T> Wait<T> {
    /// Blocks until fulfilled. `None` when the fulfilling side was dropped.
    pub fn wait(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn second_fulfill_is_a_no_op() {
        let (fulfill, wait) = oneshot();
        assert!(fulfill.fulfill(1));
        assert!(!fulfill.fulfill(2));
        assert_eq!(wait.wait(), Some(1));
        assert!(matches!(
            wait.wait_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected) | Err(RecvTimeoutError::Timeout)
        ));
    }

    #[test]
    fn clones_share_the_fired_flag() {
        let (fulfill, wait) = oneshot();
        let other = fulfill.clone();
        thread::spawn(move || other.fulfill("reader")).join().unwrap();
        assert!(!fulfill.fulfill("loop"));
        assert_eq!(wait.wait(), Some("reader"));
    }

    #[test]
    fn dropped_fulfill_wakes_waiter() {
        let (fulfill, wait) = oneshot::<()>();
        drop(fulfill);
        assert_eq!(wait.wait(), None);
        assert!(matches!(
            wait.wait_timeout(Duration::from_secs(5)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
}
