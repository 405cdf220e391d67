//! The propagating-interest table.
//!
//! One entry per outstanding outbound Interest, keyed by its nonce.
//! The entry owns the message bytes until every remaining outbound face
//! has been served; after that the bytes are released but the nonce
//! stays behind for a couple of reaper ticks so late copies of the same
//! Interest are still recognized as loops.

use bytes::Bytes;
use std::collections::HashMap;

use crate::face::FaceId;

/// Reaper ticks a finished entry lingers for loop suppression.
const FINISHED_GRACE_TICKS: u8 = 2;

/// An outstanding outbound Interest.
pub struct PropagatingEntry {
    /// The verbatim message (with the synthesized nonce, if any);
    /// released when sending finishes.
    pub msg: Option<Bytes>,
    /// Face the Interest arrived on.
    pub from: FaceId,
    /// Faces still to send to; the pacer pops from the back.
    pub outbound: Vec<FaceId>,
    /// Prefix key of the owning interest-prefix entry.
    pub prefix_key: Bytes,
    /// Reap countdown once `msg` is gone.
    pub grace: u8,
}

/// All outstanding outbound Interests.
pub struct PropagatingTable {
    map: HashMap<Bytes, PropagatingEntry>,
}

impl PropagatingTable {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Whether a nonce identifies an in-flight (or recently finished)
    /// Interest.
    pub fn contains(&self, nonce: &[u8]) -> bool {
        self.map.contains_key(nonce)
    }

    pub fn get_mut(&mut self, nonce: &[u8]) -> Option<&mut PropagatingEntry> {
        self.map.get_mut(nonce)
    }

    /// Inserts a new entry; returns false (leaving the table unchanged)
    /// when the nonce is already present.
    pub fn insert(&mut self, nonce: Bytes, entry: PropagatingEntry) -> bool {
        if self.map.contains_key(&nonce) {
            return false;
        }
        self.map.insert(nonce, entry);
        true
    }

    /// Releases an entry's message and sending state; the nonce stays
    /// for loop suppression until the reaper retires it.
    pub fn finish(&mut self, nonce: &[u8]) -> Option<Bytes> {
        let entry = self.map.get_mut(nonce)?;
        entry.outbound.clear();
        entry.grace = FINISHED_GRACE_TICKS;
        entry.msg.take().map(|_| entry.prefix_key.clone())
    }

    /// One reaper pass over finished entries. Returns how many were
    /// retired.
    pub fn reap(&mut self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| {
            if entry.msg.is_some() {
                return true;
            }
            if entry.grace == 0 {
                return false;
            }
            entry.grace -= 1;
            true
        });
        before - self.map.len()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for PropagatingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> PropagatingEntry {
        PropagatingEntry {
            msg: Some(Bytes::from_static(b"interest-bytes")),
            from: FaceId(1),
            outbound: vec![FaceId(2), FaceId(3)],
            prefix_key: Bytes::from_static(b"prefix"),
            grace: 0,
        }
    }

    #[test]
    fn nonce_uniqueness() {
        let mut tab = PropagatingTable::new();
        let nonce = Bytes::from_static(&[1, 2, 3, 4, 5, 6]);
        assert!(tab.insert(nonce.clone(), entry()));
        assert!(!tab.insert(nonce.clone(), entry()));
        assert!(tab.contains(&nonce));
    }

    #[test]
    fn finished_entries_linger_then_reap() {
        let mut tab = PropagatingTable::new();
        let nonce = Bytes::from_static(&[9; 6]);
        tab.insert(nonce.clone(), entry());
        // Unfinished entries are never reaped.
        assert_eq!(tab.reap(), 0);
        let prefix = tab.finish(&nonce).unwrap();
        assert_eq!(&prefix[..], b"prefix");
        assert!(tab.contains(&nonce));
        // Two grace ticks, then retirement.
        assert_eq!(tab.reap(), 0);
        assert_eq!(tab.reap(), 0);
        assert_eq!(tab.reap(), 1);
        assert!(!tab.contains(&nonce));
    }

    #[test]
    fn finish_is_idempotent() {
        let mut tab = PropagatingTable::new();
        let nonce = Bytes::from_static(&[7; 6]);
        tab.insert(nonce.clone(), entry());
        assert!(tab.finish(&nonce).is_some());
        assert!(tab.finish(&nonce).is_none());
    }
}
