use dashmap::DashMap;

use crate::wire::message::Payload;

/// Payloads we are prepared to hand out when the peer sends `getdata`,
/// keyed by inventory hash.
///
/// Shared between whoever announces data (the caller) and the reader
/// thread serving requests. Each entry is served at most once.
#[derive(Debug, Default)]
pub struct PendingGetData {
    entries: DashMap<[u8; 32], Payload>,
}

impl PendingGetData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `payload` under `hash`, replacing any previous entry.
    pub fn insert(&self, hash: [u8; 32], payload: Payload) -> Option<Payload> {
        self.entries.insert(hash, payload)
    }

    /// Removes and returns the payload for `hash`.
    pub fn take(&self, hash: &[u8; 32]) -> Option<Payload> {
        self.entries.remove(hash).map(|(_, payload)| payload)
    }

    pub fn contains(&self, hash: &[u8; 32]) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn entries_are_served_once() {
        let pending = PendingGetData::new();
        pending.insert([1; 32], Payload::Tx(vec![0xAA]));

        assert!(pending.contains(&[1; 32]));
        assert_eq!(pending.take(&[1; 32]), Some(Payload::Tx(vec![0xAA])));
        assert_eq!(pending.take(&[1; 32]), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn concurrent_producers_and_consumer() {
        let pending = Arc::new(PendingGetData::new());

        let producers: Vec<_> = (0..4u8)
            .map(|t| {
                let pending = Arc::clone(&pending);
                thread::spawn(move || {
                    for i in 0..50u8 {
                        let mut hash = [0u8; 32];
                        hash[0] = t;
                        hash[1] = i;
                        pending.insert(hash, Payload::Tx(vec![t, i]));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(pending.len(), 200);

        let mut hash = [0u8; 32];
        hash[0] = 3;
        hash[1] = 7;
        assert_eq!(pending.take(&hash), Some(Payload::Tx(vec![3, 7])));
        assert_eq!(pending.len(), 199);
    }
}
