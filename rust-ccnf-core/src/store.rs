//! The content store.
//!
//! Cached ContentObjects under three indices: a hash map over the name
//! region (through the content-body boundary) for exact lookups and
//! duplicate detection, a dense sliding window over accession numbers,
//! and a probabilistic skiplist in canonical name order for prefix
//! scans. Skiplist forward pointers are accessions resolved through the
//! window, never references, so the two structures cooperate without
//! ownership cycles.

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Range;

use rust_ccnf_common::name;
use rust_ccnf_common::packet::{ParsedContent, ParsedInterest};

use crate::face::FaceId;
use crate::sched::Handle;

/// Deepest skiplist level; per-entry depth is geometric with p=1/4.
pub const SKIPLIST_MAX_DEPTH: usize = 30;

/// Tombstone face-id used to un-block a slot in the already-sent region.
pub const FACE_TOMBSTONE: FaceId = FaceId(u32::MAX);

/// A cached ContentObject.
pub struct ContentEntry {
    /// Monotonic store identity; never reused within a run.
    pub accession: u64,
    /// The raw message bytes.
    pub msg: Bytes,
    /// Hash-key range within `msg` (name through the content boundary).
    pub key: Range<usize>,
    /// Per-component offsets plus the end boundary.
    pub comps: Vec<usize>,
    /// Offset of the 32-byte signature bits, 0 when absent.
    pub sig_bits: usize,
    /// Publisher key digest range, for selector matching.
    pub publisher: Option<Range<usize>>,
    /// Skiplist forwards; one accession per level this entry is on.
    skiplinks: Vec<u64>,
    /// Faces this content should reach. Indices below `nface_done` have
    /// already been sent (or tombstoned); the rest are still queued.
    pub faces: Vec<FaceId>,
    pub nface_done: usize,
    /// Watermark the cleaner uses to spot link faces that already got
    /// their copy in a previous pass.
    pub nface_old: usize,
    /// The armed delivery event, if any.
    pub sender: Option<Handle>,
    /// Content that arrived unsolicited; delivery is paced more gently.
    pub slow_send: bool,
}

impl ContentEntry {
    /// Number of name components.
    pub fn ncomps(&self) -> usize {
        self.comps.len() - 1
    }

    /// Encoded name components region.
    pub fn name_region(&self) -> &[u8] {
        &self.msg[self.comps[0]..self.comps[self.ncomps()]]
    }

    /// Everything past the hash key: the content body and signature.
    pub fn tail(&self) -> &[u8] {
        &self.msg[self.key.end..]
    }

    /// Adds a face to the unordered face set; returns the index at
    /// which it was found or appended.
    pub fn faces_set_insert(&mut self, id: FaceId) -> usize {
        for (i, f) in self.faces.iter().enumerate() {
            if *f == id {
                return i;
            }
        }
        self.faces.push(id);
        self.faces.len() - 1
    }
}

/// Result of offering a ContentObject to the store.
pub enum InsertOutcome {
    /// Stored under a fresh accession.
    New(u64),
    /// Byte-identical message already present.
    Duplicate(u64),
    /// Same name, different tail. The stored entry has been evicted;
    /// its delivery event, if armed, must be cancelled by the caller.
    Collision { cancel: Option<Handle> },
}

/// The store itself.
pub struct ContentStore {
    by_hash: HashMap<Bytes, u64>,
    window: Vec<Option<Box<ContentEntry>>>,
    /// Accession of `window[0]`.
    base: u64,
    /// Last assigned accession; the next entry gets `accession + 1`.
    accession: u64,
    /// Skiplist head forwards, one per level.
    head: Vec<u64>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
            window: Vec::new(),
            base: 0,
            accession: 0,
            head: Vec::new(),
        }
    }

    /// Entries currently cached.
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Accession of the window start; nothing below it is live.
    pub fn accession_base(&self) -> u64 {
        self.base
    }

    /// Last accession handed out.
    pub fn last_accession(&self) -> u64 {
        self.accession
    }

    /// Resolves an accession. Zero is the nil accession and never
    /// resolves.
    pub fn get(&self, accession: u64) -> Option<&ContentEntry> {
        if accession < self.base {
            return None;
        }
        let idx = (accession - self.base) as usize;
        self.window.get(idx)?.as_deref()
    }

    pub fn get_mut(&mut self, accession: u64) -> Option<&mut ContentEntry> {
        if accession < self.base {
            return None;
        }
        let idx = (accession - self.base) as usize;
        self.window.get_mut(idx)?.as_deref_mut()
    }

    /// Offers a parsed ContentObject to the store.
    pub fn insert(
        &mut self,
        msg: Bytes,
        pco: &ParsedContent,
        rng: &mut SmallRng,
    ) -> InsertOutcome {
        let key = msg.slice(pco.key.clone());
        if let Some(&acc) = self.by_hash.get(&key) {
            let same_tail = match self.get(acc) {
                Some(entry) => entry.tail() == &msg[pco.content_start..],
                None => panic!("content index points at missing accession {acc}"),
            };
            if same_tail {
                return InsertOutcome::Duplicate(acc);
            }
            let cancel = self.remove(acc);
            return InsertOutcome::Collision { cancel };
        }

        self.accession += 1;
        let acc = self.accession;
        let entry = Box::new(ContentEntry {
            accession: acc,
            key: pco.key.clone(),
            comps: pco.comps.clone(),
            sig_bits: pco.sig_bits,
            publisher: pco.publisher.clone(),
            skiplinks: Vec::new(),
            faces: Vec::new(),
            nface_done: 0,
            nface_old: 0,
            sender: None,
            slow_send: false,
            msg,
        });
        self.enroll(acc, entry);
        self.skiplist_insert(acc, rng);
        self.by_hash.insert(key, acc);
        InsertOutcome::New(acc)
    }

    /// Removes an entry from every index; returns its armed delivery
    /// event for the caller to cancel.
    pub fn remove(&mut self, accession: u64) -> Option<Handle> {
        if accession < self.base {
            return None;
        }
        self.skiplist_remove(accession);
        let idx = (accession - self.base) as usize;
        let entry = self.window.get_mut(idx)?.take()?;
        self.by_hash.remove(&entry.msg.slice(entry.key.clone()));
        entry.sender
    }

    /// Places an entry in the by-accession window, sliding the window
    /// forward past leading empties when it would overflow.
    fn enroll(&mut self, accession: u64, entry: Box<ContentEntry>) {
        if accession >= self.base + self.window.len() as u64 {
            let lead = self.window.iter().take_while(|s| s.is_none()).count();
            let new_window = (self.window.len() + 20) * 3 / 2;
            let mut grown: Vec<Option<Box<ContentEntry>>> = Vec::with_capacity(new_window);
            grown.extend(self.window.drain(lead..));
            grown.resize_with(new_window, || None);
            self.base += lead as u64;
            self.window = grown;
        }
        let idx = (accession - self.base) as usize;
        self.window[idx] = Some(entry);
    }

    /* ------------------------------------------------------------ *
     * Skiplist
     * ------------------------------------------------------------ */

    fn forward(&self, from: u64, level: usize) -> u64 {
        if from == 0 {
            self.head.get(level).copied().unwrap_or(0)
        } else {
            match self.get(from) {
                Some(e) => e.skiplinks.get(level).copied().unwrap_or(0),
                None => panic!("skiplist forward through missing accession {from}"),
            }
        }
    }

    fn set_forward(&mut self, from: u64, level: usize, to: u64) {
        if from == 0 {
            self.head[level] = to;
        } else {
            match self.get_mut(from) {
                Some(e) => e.skiplinks[level] = to,
                None => panic!("skiplist splice through missing accession {from}"),
            }
        }
    }

    /// Orders a live entry against a search key. Ties on the name are
    /// broken by accession so every position is unique.
    fn compare_entry(&self, accession: u64, key_name: &[u8], key_acc: u64) -> Ordering {
        let entry = match self.get(accession) {
            Some(e) => e,
            None => panic!("skiplist holds missing accession {accession}"),
        };
        match name::compare(entry.name_region(), key_name) {
            Ordering::Equal => entry.accession.cmp(&key_acc),
            other => other,
        }
    }

    /// Finds the predecessor at every level for the given key; entry 0
    /// stands for the head.
    fn find_before(&self, key_name: &[u8], key_acc: u64) -> Vec<u64> {
        let n = self.head.len();
        let mut pred = vec![0u64; n];
        let mut cur = 0u64;
        for level in (0..n).rev() {
            loop {
                let next = self.forward(cur, level);
                if next == 0 || self.compare_entry(next, key_name, key_acc) != Ordering::Less {
                    break;
                }
                cur = next;
            }
            pred[level] = cur;
        }
        pred
    }

    fn skiplist_insert(&mut self, accession: u64, rng: &mut SmallRng) {
        let mut depth = 1;
        while depth < SKIPLIST_MAX_DEPTH - 1 && (rng.gen::<u32>() & 3) == 0 {
            depth += 1;
        }
        while self.head.len() < depth {
            self.head.push(0);
        }
        let (key_msg, key_range, key_acc) = {
            let e = match self.get(accession) {
                Some(e) => e,
                None => panic!("inserting missing accession {accession}"),
            };
            (e.msg.clone(), e.comps[0]..e.comps[e.ncomps()], e.accession)
        };
        let pred = self.find_before(&key_msg[key_range], key_acc);
        let mut links = Vec::with_capacity(depth);
        for level in 0..depth {
            links.push(self.forward(pred[level], level));
        }
        if let Some(e) = self.get_mut(accession) {
            e.skiplinks = links;
        }
        for level in 0..depth {
            self.set_forward(pred[level], level, accession);
        }
    }

    fn skiplist_remove(&mut self, accession: u64) {
        let (key_msg, key_range, key_acc, depth) = match self.get(accession) {
            Some(e) => (
                e.msg.clone(),
                e.comps[0]..e.comps[e.ncomps()],
                e.accession,
                e.skiplinks.len(),
            ),
            None => return,
        };
        let pred = self.find_before(&key_msg[key_range], key_acc);
        for level in 0..depth.min(pred.len()) {
            if self.forward(pred[level], level) == accession {
                let next = self.forward(accession, level);
                self.set_forward(pred[level], level, next);
            }
        }
        if let Some(e) = self.get_mut(accession) {
            e.skiplinks.clear();
        }
    }

    /// Level-0 successor, or 0 at the end of the list.
    pub fn next(&self, accession: u64) -> u64 {
        match self.get(accession) {
            Some(e) => e.skiplinks.first().copied().unwrap_or(0),
            None => 0,
        }
    }

    /// First entry whose name is not below the Interest's prefix. The
    /// prefix is used as-is; a trailing digest-shaped component is not
    /// stripped here (only `content_matches_prefix` does that).
    pub fn first_candidate(&self, interest_msg: &[u8], pi: &ParsedInterest) -> u64 {
        let key = &interest_msg[pi.prefix_range()];
        let pred = self.find_before(key, 0);
        if pred.is_empty() {
            return 0;
        }
        self.forward(pred[0], 0)
    }

    /// Iterates every live entry mutably; the cleaner walks this.
    pub fn iter_entries_mut(&mut self) -> impl Iterator<Item = &mut ContentEntry> {
        self.window.iter_mut().filter_map(|s| s.as_deref_mut())
    }

    /// Dumps accessions in name order; test support.
    #[cfg(test)]
    fn level0_order(&self) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = self.head.first().copied().unwrap_or(0);
        while cur != 0 {
            out.push(cur);
            cur = self.next(cur);
        }
        out
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a stored entry's name matches the Interest's prefix. When the
/// content has exactly one fewer component and the last prefix component
/// has content-digest shape, the digest is treated as an optional suffix
/// and stripped before retrying.
pub fn content_matches_prefix(
    entry: &ContentEntry,
    interest_msg: &[u8],
    pi: &ParsedInterest,
) -> bool {
    let mut prefix_comps = pi.prefix_comps;
    let ncomps = entry.ncomps();
    if ncomps < prefix_comps {
        let digest_shaped = prefix_comps > 0
            && name::is_digest_shaped(pi.comps[prefix_comps] - pi.comps[prefix_comps - 1]);
        if ncomps == prefix_comps - 1 && digest_shaped {
            prefix_comps -= 1;
        } else {
            return false;
        }
    }
    let want = &interest_msg[pi.comps[0]..pi.comps[prefix_comps]];
    let got = &entry.msg[entry.comps[0]..entry.comps[prefix_comps]];
    want == got
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rust_ccnf_common::packet::{
        parse_content_object, parse_interest, ContentObjectBuilder, InterestBuilder,
    };

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(0x5eed)
    }

    fn store_one(store: &mut ContentStore, rng: &mut SmallRng, uri: &str, body: &[u8]) -> u64 {
        let msg = ContentObjectBuilder::new(uri, body).build();
        let pco = parse_content_object(&msg).unwrap();
        match store.insert(msg, &pco, rng) {
            InsertOutcome::New(acc) => acc,
            _ => panic!("expected new entry for {uri}"),
        }
    }

    #[test]
    fn accessions_are_monotonic_and_window_tracks_base() {
        let mut store = ContentStore::new();
        let mut rng = rng();
        let mut last = 0;
        for i in 0..100 {
            let acc = store_one(&mut store, &mut rng, &format!("/n/{i}"), b"body");
            assert!(acc > last);
            last = acc;
        }
        assert_eq!(store.len(), 100);
        // Every live accession sits at or above the window base.
        for acc in 1..=last {
            if let Some(e) = store.get(acc) {
                assert!(e.accession >= store.accession_base());
                assert_eq!(e.accession, acc);
            }
        }
    }

    #[test]
    fn window_slides_past_leading_empties() {
        let mut store = ContentStore::new();
        let mut rng = rng();
        let first = store_one(&mut store, &mut rng, "/w/a", b"1");
        let second = store_one(&mut store, &mut rng, "/w/b", b"2");
        store.remove(first);
        // Force several growth steps; the freed leading slot lets the
        // base advance.
        for i in 0..200 {
            store_one(&mut store, &mut rng, &format!("/w/fill/{i}"), b"x");
        }
        assert!(store.accession_base() > 0);
        assert!(store.get(first).is_none());
        assert_eq!(store.get(second).unwrap().accession, second);
    }

    #[test]
    fn skiplist_orders_by_canonical_name() {
        let mut store = ContentStore::new();
        let mut rng = rng();
        // Inserted out of order on purpose.
        let c = store_one(&mut store, &mut rng, "/c", b".");
        let ab = store_one(&mut store, &mut rng, "/a/b", b".");
        let a = store_one(&mut store, &mut rng, "/a", b".");
        let b = store_one(&mut store, &mut rng, "/b", b".");
        assert_eq!(store.level0_order(), vec![a, ab, b, c]);
    }

    #[test]
    fn skiplist_insert_then_remove_restores_head() {
        let mut store = ContentStore::new();
        let mut rng = rng();
        let a = store_one(&mut store, &mut rng, "/keep/1", b".");
        let b = store_one(&mut store, &mut rng, "/keep/2", b".");
        let head_before = store.head.clone();
        let c = store_one(&mut store, &mut rng, "/keep/15", b".");
        store.remove(c);
        // Forward pointers at every surviving level are as before.
        assert_eq!(store.head[..head_before.len()], head_before[..]);
        assert!(store.head[head_before.len()..].iter().all(|&f| f == 0));
        assert_eq!(store.level0_order(), vec![a, b]);
    }

    #[test]
    fn first_candidate_walks_prefix_matches() {
        let mut store = ContentStore::new();
        let mut rng = rng();
        store_one(&mut store, &mut rng, "/a", b".");
        let ab = store_one(&mut store, &mut rng, "/p/a", b".");
        let ac = store_one(&mut store, &mut rng, "/p/b", b".");
        store_one(&mut store, &mut rng, "/q", b".");

        let interest = InterestBuilder::new("/p").build();
        let pi = parse_interest(&interest).unwrap();
        let mut acc = store.first_candidate(&interest, &pi);
        let mut matched = Vec::new();
        while acc != 0 {
            let entry = store.get(acc).unwrap();
            if !content_matches_prefix(entry, &interest, &pi) {
                break;
            }
            matched.push(acc);
            acc = store.next(acc);
        }
        assert_eq!(matched, vec![ab, ac]);
    }

    #[test]
    fn digest_shaped_prefix_component_is_stripped() {
        let mut store = ContentStore::new();
        let mut rng = rng();
        let acc = store_one(&mut store, &mut rng, "/d/x", b".");
        // Interest for /d/x/<32-byte digest>: one component deeper than
        // the stored name, last component digest-shaped.
        let msg = InterestBuilder::new("/d/x").component(&[0xab; 32]).build();
        let pi = parse_interest(&msg).unwrap();
        let entry = store.get(acc).unwrap();
        assert!(content_matches_prefix(entry, &msg, &pi));
        // A non-digest-shaped extra component does not match.
        let msg2 = InterestBuilder::new("/d/x").component(&[1u8; 16]).build();
        let pi2 = parse_interest(&msg2).unwrap();
        assert!(!content_matches_prefix(entry, &msg2, &pi2));
    }

    #[test]
    fn duplicate_and_collision_outcomes() {
        let mut store = ContentStore::new();
        let mut rng = rng();
        let msg = ContentObjectBuilder::new("/k", b"B1").build();
        let pco = parse_content_object(&msg).unwrap();
        let acc = match store.insert(msg.clone(), &pco, &mut rng) {
            InsertOutcome::New(acc) => acc,
            _ => panic!("expected new"),
        };
        // Same bytes again: duplicate.
        match store.insert(msg, &pco, &mut rng) {
            InsertOutcome::Duplicate(d) => assert_eq!(d, acc),
            _ => panic!("expected duplicate"),
        }
        // Same name, different body: both evicted.
        let other = ContentObjectBuilder::new("/k", b"B2").build();
        let pco2 = parse_content_object(&other).unwrap();
        match store.insert(other, &pco2, &mut rng) {
            InsertOutcome::Collision { .. } => {}
            _ => panic!("expected collision"),
        }
        assert!(store.get(acc).is_none());
        assert_eq!(store.len(), 0);
    }
}
