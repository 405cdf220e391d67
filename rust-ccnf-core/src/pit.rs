//! The interest-prefix table.
//!
//! Aggregated demand per name prefix: each entry holds an unordered set
//! of `(face-id, counter)` pairs kept as two parallel arrays. Counters
//! rise by one unit per Interest arrival and decay under the aging law:
//! geometric above one unit (about the fourth root of 1/2 per tick, so
//! four ticks per halflife), then linear down to zero, at which point
//! the pair is swap-removed.

use bytes::Bytes;
use std::collections::HashMap;

use crate::face::FaceId;

/// The counter quantum one Interest arrival contributes.
pub const INTEREST_UNIT: u32 = 5;

/// Aging ticks an entry may sit empty before it is deleted.
const MAX_IDLE_TICKS: u8 = 8;

/// Aggregated demand for one name prefix.
pub struct PrefixEntry {
    /// Components in the prefix this entry is keyed by.
    pub ncomp: usize,
    /// Parallel arrays: `counters[i]` belongs to `faces[i]`.
    pub faces: Vec<FaceId>,
    pub counters: Vec<u32>,
    /// Consecutive aging ticks with no pairs left.
    pub idle: u8,
    /// Nonces of propagating interests filed under this prefix, oldest
    /// first. This is the list the delivery path consumes from.
    pub propagating: Vec<Bytes>,
}

impl PrefixEntry {
    /// Finds the pair slot for a face, if any.
    pub fn slot(&self, face: FaceId) -> Option<usize> {
        self.faces.iter().position(|&f| f == face)
    }

    /// Adds one unit of demand from `face`, creating its pair if needed.
    pub fn bump(&mut self, face: FaceId) {
        match self.slot(face) {
            Some(i) => self.counters[i] = self.counters[i].saturating_add(INTEREST_UNIT),
            None => {
                self.faces.push(face);
                self.counters.push(INTEREST_UNIT);
            }
        }
    }
}

/// All prefix entries, keyed by the encoded component run of the prefix.
pub struct InterestPrefixTable {
    map: HashMap<Bytes, PrefixEntry>,
}

impl InterestPrefixTable {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Looks up or creates the entry for a prefix.
    pub fn seek(&mut self, key: &[u8], ncomp: usize) -> (&mut PrefixEntry, bool) {
        let mut created = false;
        let entry = self
            .map
            .entry(Bytes::copy_from_slice(key))
            .or_insert_with(|| {
                created = true;
                PrefixEntry {
                    ncomp,
                    faces: Vec::new(),
                    counters: Vec::new(),
                    idle: 0,
                    propagating: Vec::new(),
                }
            });
        (entry, created)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut PrefixEntry> {
        self.map.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// One aging pass. Returns the number of still-active pairs.
    pub fn age(&mut self) -> usize {
        let mut active = 0;
        self.map.retain(|_, entry| {
            if entry.faces.is_empty() {
                entry.idle += 1;
                return entry.idle <= MAX_IDLE_TICKS;
            }
            entry.idle = 0;
            let mut i = 0;
            while i < entry.counters.len() {
                let count = entry.counters[i];
                if count > INTEREST_UNIT {
                    // Approximately the fourth root of 1/2 per tick.
                    entry.counters[i] = (count * 5 + 3) / 6;
                } else if count > 0 {
                    entry.counters[i] = count - 1;
                } else {
                    // A zero pair is a tombstone; swap-remove it.
                    entry.faces.swap_remove(i);
                    entry.counters.swap_remove(i);
                    continue;
                }
                i += 1;
            }
            active += entry.counters.len();
            true
        });
        active
    }
}

impl Default for InterestPrefixTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"\x08\x01p";

    #[test]
    fn bump_accumulates_per_face() {
        let mut tab = InterestPrefixTable::new();
        let (entry, created) = tab.seek(KEY, 1);
        assert!(created);
        entry.bump(FaceId(1));
        entry.bump(FaceId(1));
        entry.bump(FaceId(2));
        assert_eq!(entry.counters[entry.slot(FaceId(1)).unwrap()], 2 * INTEREST_UNIT);
        assert_eq!(entry.counters[entry.slot(FaceId(2)).unwrap()], INTEREST_UNIT);
        let (_, created) = tab.seek(KEY, 1);
        assert!(!created);
    }

    #[test]
    fn halflife_decay_within_tolerance() {
        let mut tab = InterestPrefixTable::new();
        let (entry, _) = tab.seek(KEY, 1);
        for _ in 0..4 {
            entry.bump(FaceId(1));
        }
        let start = 4 * INTEREST_UNIT;
        assert_eq!(entry.counters[0], start);
        // Four geometric ticks are one halflife.
        for _ in 0..4 {
            tab.age();
        }
        let end = tab.get_mut(KEY).unwrap().counters[0];
        let target = start / 2;
        assert!(
            end.abs_diff(target) <= 1,
            "decayed to {end}, wanted about {target}"
        );
    }

    #[test]
    fn no_counter_doubles_across_a_pass() {
        let mut tab = InterestPrefixTable::new();
        let (entry, _) = tab.seek(KEY, 1);
        entry.bump(FaceId(1));
        for tick in 0..64 {
            let before = tab.get_mut(KEY).map(|e| e.counters.first().copied());
            tab.age();
            if let (Some(Some(b)), Some(e)) = (before, tab.get_mut(KEY)) {
                if let Some(&a) = e.counters.first() {
                    assert!(a < 2 * b.max(1), "tick {tick}: {b} -> {a}");
                }
            }
        }
    }

    #[test]
    fn linear_tail_then_swap_removal() {
        let mut tab = InterestPrefixTable::new();
        let (entry, _) = tab.seek(KEY, 1);
        entry.faces.push(FaceId(1));
        entry.counters.push(INTEREST_UNIT);
        // One tick per remaining unit, then one more to drop the pair.
        for _ in 0..INTEREST_UNIT {
            tab.age();
        }
        assert_eq!(tab.get_mut(KEY).unwrap().counters[0], 0);
        tab.age();
        assert!(tab.get_mut(KEY).unwrap().faces.is_empty());
    }

    #[test]
    fn idle_entries_are_deleted_after_eight_ticks() {
        let mut tab = InterestPrefixTable::new();
        tab.seek(KEY, 1);
        for _ in 0..=MAX_IDLE_TICKS {
            assert_eq!(tab.len(), 1);
            tab.age();
        }
        assert_eq!(tab.len(), 0);
    }
}
