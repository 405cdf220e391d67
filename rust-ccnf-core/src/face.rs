//! Faces and the face table.
//!
//! A face is one peer endpoint: a connected local stream client or a
//! datagram peer keyed by its socket address. Face-ids are 32-bit words
//! split into a slot index and a generation, so a stale id held by a
//! long-lived content entry identifies itself on lookup instead of
//! resolving to whatever reused the slot.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::CoreError;

/// Slot mask: face-ids reserve this many low bits for the slot index;
/// the generation lives above.
pub const MAX_FACES: u32 = (1 << 19) - 1;

/// Starting size of the slot array.
const INITIAL_SLOTS: usize = 10;

/// A face-id word. `id & MAX_FACES` is the slot; the high bits are the
/// generation current when the face was enrolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceId(pub u32);

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where bytes written to a face go.
pub enum FaceOutput {
    /// A queue drained by a writer task (stream faces), or held directly
    /// by a test. The queue is the deferred-write buffer: sends never
    /// block the engine and drain FIFO per face.
    Queue(mpsc::UnboundedSender<Bytes>),
    /// A datagram peer reached through a shared bound socket.
    Datagram {
        socket: Arc<UdpSocket>,
        addr: SocketAddr,
    },
}

/// One peer endpoint.
pub struct Face {
    pub id: FaceId,
    /// Datagram (addressed) rather than stream (connected).
    pub dgram: bool,
    /// Set the first time the peer sends a link PDU; all writes to the
    /// face are wrapped from then on.
    pub link: bool,
    /// Peer address; present iff datagram.
    pub addr: Option<SocketAddr>,
    pub out: FaceOutput,
    /// Receptions since the last reaper tick; dead datagram peers are
    /// collected when this stays zero.
    pub recvcount: u32,
    /// Accession of the last content sent in response to an Interest on
    /// this face; lets a re-ask resume one past the previous hit.
    pub cached_accession: u64,
}

impl Face {
    /// A stream face backed by a writer queue.
    pub fn stream(out: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            id: FaceId(0),
            dgram: false,
            link: false,
            addr: None,
            out: FaceOutput::Queue(out),
            recvcount: 0,
            cached_accession: 0,
        }
    }

    /// A datagram peer face.
    pub fn datagram(socket: Arc<UdpSocket>, addr: SocketAddr) -> Self {
        Self {
            id: FaceId(0),
            dgram: true,
            link: false,
            addr: Some(addr),
            out: FaceOutput::Datagram { socket, addr },
            recvcount: 0,
            cached_accession: 0,
        }
    }
}

/// Registry of live faces with stable generation-checked ids.
pub struct FaceTable {
    slots: Vec<Option<Face>>,
    gen: u32,
    rover: usize,
    by_addr: HashMap<SocketAddr, FaceId>,
}

impl FaceTable {
    pub fn new() -> Self {
        Self {
            slots: (0..INITIAL_SLOTS).map(|_| None).collect(),
            gen: 0,
            rover: 0,
            by_addr: HashMap::new(),
        }
    }

    /// Enrolls a face and assigns its id. Scans forward from the rover;
    /// wrapping to the start of the array bumps the generation so ids
    /// from the previous pass over a slot cannot be confused with the
    /// new occupant. Grows by half when full, up to the slot mask.
    pub fn enroll(&mut self, mut face: Face) -> Result<FaceId, CoreError> {
        let slot = match self.free_slot() {
            Some(slot) => slot,
            None => return Err(CoreError::FaceTableFull),
        };
        let id = FaceId(slot as u32 | self.gen);
        face.id = id;
        // A fresh face starts with no recent-content hint, even if the
        // slot previously held one.
        face.cached_accession = 0;
        if let Some(addr) = face.addr {
            self.by_addr.insert(addr, id);
        }
        self.slots[slot] = Some(face);
        self.rover = slot + 1;
        Ok(id)
    }

    fn free_slot(&mut self) -> Option<usize> {
        let n = self.slots.len();
        for i in self.rover..n {
            if self.slots[i].is_none() {
                return Some(i);
            }
        }
        for i in 0..n {
            if self.slots[i].is_none() {
                // Bump the generation only when the second pass wraps.
                self.gen = self.gen.wrapping_add(MAX_FACES + 1);
                return Some(i);
            }
        }
        let mut grown = (n + 1) * 3 / 2;
        if grown > MAX_FACES as usize {
            grown = MAX_FACES as usize;
        }
        if grown <= n {
            return None;
        }
        self.slots.resize_with(grown, || None);
        Some(n)
    }

    /// Resolves a face-id; a stale generation in a live slot fails.
    pub fn get(&self, id: FaceId) -> Option<&Face> {
        let slot = (id.0 & MAX_FACES) as usize;
        match self.slots.get(slot)?.as_ref() {
            Some(face) if face.id == id => Some(face),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: FaceId) -> Option<&mut Face> {
        let slot = (id.0 & MAX_FACES) as usize;
        match self.slots.get_mut(slot)?.as_mut() {
            Some(face) if face.id == id => Some(face),
            _ => None,
        }
    }

    /// Datagram-peer lookup by address.
    pub fn by_addr(&self, addr: &SocketAddr) -> Option<FaceId> {
        self.by_addr.get(addr).copied()
    }

    /// Removes a face. The slot is nulled; its generation will not be
    /// reused until the rover wraps past it again.
    pub fn remove(&mut self, id: FaceId) -> Option<Face> {
        let slot = (id.0 & MAX_FACES) as usize;
        let occupied = matches!(self.slots.get(slot)?, Some(face) if face.id == id);
        if !occupied {
            return None;
        }
        let face = self.slots[slot].take()?;
        if let Some(addr) = face.addr {
            self.by_addr.remove(&addr);
        }
        Some(face)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates live faces.
    pub fn iter(&self) -> impl Iterator<Item = &Face> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Face> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }

    /// Live face-ids, collected for callers that mutate while walking.
    pub fn ids(&self) -> Vec<FaceId> {
        self.iter().map(|f| f.id).collect()
    }
}

impl Default for FaceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_face() -> Face {
        let (tx, rx) = mpsc::unbounded_channel();
        // Leak the receiver side in tests that only exercise the table.
        std::mem::forget(rx);
        Face::stream(tx)
    }

    #[test]
    fn enroll_and_lookup() {
        let mut t = FaceTable::new();
        let a = t.enroll(queue_face()).unwrap();
        let b = t.enroll(queue_face()).unwrap();
        assert_ne!(a, b);
        assert_eq!(t.get(a).unwrap().id, a);
        assert_eq!(t.get(b).unwrap().id, b);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn stale_id_rejected_after_removal() {
        let mut t = FaceTable::new();
        let a = t.enroll(queue_face()).unwrap();
        assert!(t.remove(a).is_some());
        assert!(t.get(a).is_none());
        assert!(t.remove(a).is_none());
    }

    #[test]
    fn generation_guards_slot_reuse() {
        let mut t = FaceTable::new();
        // Fill the initial slot array exactly, leaving the rover at its
        // end, then free the first slot.
        let ids: Vec<FaceId> = (0..INITIAL_SLOTS)
            .map(|_| t.enroll(queue_face()).unwrap())
            .collect();
        let victim = ids[0];
        t.remove(victim);
        // The next enrollment has to wrap, landing in the freed slot
        // under a bumped generation; the dead id must stay dead.
        let replacement = t.enroll(queue_face()).unwrap();
        assert_eq!(replacement.0 & MAX_FACES, victim.0 & MAX_FACES);
        assert_ne!(replacement, victim);
        assert!(t.get(victim).is_none());
        assert_eq!(t.get(replacement).unwrap().id, replacement);
    }

    #[test]
    fn churn_keeps_ids_unique() {
        let mut t = FaceTable::new();
        let mut seen = std::collections::HashSet::new();
        for round in 0..200 {
            let id = t.enroll(queue_face()).unwrap();
            assert!(seen.insert(id), "face-id reused in round {round}");
            if round % 3 == 0 {
                t.remove(id);
            }
        }
    }
}
