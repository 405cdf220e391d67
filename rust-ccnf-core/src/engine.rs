//! The matching engine.
//!
//! Joins the face table, content store, interest-prefix table, and
//! propagating table on every arriving Interest and ContentObject, and
//! owns the timers that age, reap, and clean those tables. Everything
//! here runs on one task; methods take the current monotonic time in
//! microseconds so tests can drive the clock explicitly.

use bytes::Bytes;
use log::{debug, info, trace, warn};
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use std::io::ErrorKind;
use std::path::PathBuf;

use rust_ccnf_common::bloom;
use rust_ccnf_common::metrics::ForwarderMetrics;
use rust_ccnf_common::name::Uri;
use rust_ccnf_common::packet::{
    self, MessageKind, ParsedInterest, CONTENT_MAGIC, NONCE_LEN,
};
use rust_ccnf_common::tlv;

use crate::face::{Face, FaceId, FaceOutput, FaceTable, MAX_FACES};
use crate::pit::{InterestPrefixTable, INTEREST_UNIT};
use crate::propagating::{PropagatingEntry, PropagatingTable};
use crate::sched::{Handle, Scheduler};
use crate::store::{content_matches_prefix, ContentStore, InsertOutcome};
use crate::CoreError;

/// Interest counter halflife.
pub const INTEREST_HALFLIFE_US: u64 = 4_000_000;

/// Aging runs four times per halflife.
pub const INTEREST_AGING_US: u64 = INTEREST_HALFLIFE_US / 4;

/// Pacing quantum for content delivery to link faces.
pub const DATA_PAUSE_US: u64 = 16 * 1024;

/// Cleaner cadence: one early pass, then a long period.
const CLEAN_INITIAL_US: u64 = 1_000_000;
const CLEAN_PERIOD_US: u64 = 15_000_000;

/// What a scheduled event does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Decay interest counters.
    Age,
    /// Collect idle datagram faces and retired propagating entries.
    Reap,
    /// Weed dead face-ids out of content face lists.
    Clean,
    /// Deliver a stored ContentObject to its next queued face.
    ContentSend(u64),
    /// Send a propagating Interest to its next outbound face.
    Propagate(Bytes),
}

/// The forwarder core: all tables plus the deadline scheduler.
pub struct Forwarder {
    pub faces: FaceTable,
    pub store: ContentStore,
    pub pit: InterestPrefixTable,
    pub propagating: PropagatingTable,
    pub sched: Scheduler<EventKind>,
    pub metrics: ForwarderMetrics,
    rng: SmallRng,
    age_timer: Option<Handle>,
    reap_timer: Option<Handle>,
    /// Packet-level tracing, from CCND_DEBUG.
    debug: bool,
    /// Local socket path watched by the reaper; if the file disappears
    /// the daemon exits cleanly.
    comm_path: Option<PathBuf>,
    /// Set when the engine wants the process to exit with status 0.
    pub exiting: bool,
    downrev_grumble: u64,
}

impl Forwarder {
    pub fn new(metrics: ForwarderMetrics, debug: bool) -> Self {
        Self::with_rng(metrics, debug, SmallRng::from_entropy())
    }

    /// Construction with a caller-provided generator; tests use a
    /// seeded one.
    pub fn with_rng(metrics: ForwarderMetrics, debug: bool, rng: SmallRng) -> Self {
        let mut fw = Self {
            faces: FaceTable::new(),
            store: ContentStore::new(),
            pit: InterestPrefixTable::new(),
            propagating: PropagatingTable::new(),
            sched: Scheduler::new(),
            metrics,
            rng,
            age_timer: None,
            reap_timer: None,
            debug,
            comm_path: None,
            exiting: false,
            downrev_grumble: 1,
        };
        fw.sched.schedule(0, CLEAN_INITIAL_US, EventKind::Clean);
        fw
    }

    /// Registers the socket path whose disappearance means another
    /// daemon has taken over.
    pub fn watch_comm_path(&mut self, path: PathBuf) {
        self.comm_path = Some(path);
    }

    /* ------------------------------------------------------------ *
     * Faces
     * ------------------------------------------------------------ */

    pub fn add_face(&mut self, face: Face) -> Result<FaceId, CoreError> {
        let id = self.faces.enroll(face)?;
        self.metrics.faces.set(self.faces.len() as u64);
        Ok(id)
    }

    /// Shuts a face down. Dropping the face closes its writer queue,
    /// which ends the writer task and the connection.
    pub fn remove_face(&mut self, id: FaceId) {
        if let Some(face) = self.faces.remove(id) {
            info!("releasing face {} (slot {})", id, id.0 & MAX_FACES);
            drop(face);
            self.metrics.faces.set(self.faces.len() as u64);
        }
    }

    /// Resolves a datagram arrival to its peer face, materializing a
    /// new face on first contact.
    pub fn dgram_source(
        &mut self,
        socket: &std::sync::Arc<tokio::net::UdpSocket>,
        addr: std::net::SocketAddr,
        now_us: u64,
    ) -> Result<FaceId, CoreError> {
        if let Some(id) = self.faces.by_addr(&addr) {
            self.note_receive(id);
            return Ok(id);
        }
        let id = self.add_face(Face::datagram(socket.clone(), addr))?;
        self.note_receive(id);
        info!("accepted datagram client id={id} addr={addr}");
        self.reap_needed(now_us, INTEREST_HALFLIFE_US);
        Ok(id)
    }

    /// Counts a reception toward the face's liveness.
    pub fn note_receive(&mut self, id: FaceId) {
        if let Some(face) = self.faces.get_mut(id) {
            face.recvcount += 1;
        }
    }

    /* ------------------------------------------------------------ *
     * Message dispatch
     * ------------------------------------------------------------ */

    /// Dispatches one framed message from a face.
    pub fn process_message(&mut self, face_id: FaceId, msg: Bytes, now_us: u64) {
        self.process_message_inner(face_id, msg, now_us, true)
    }

    fn process_message_inner(&mut self, face_id: FaceId, msg: Bytes, now_us: u64, pdu_ok: bool) {
        let (kind, header) = match packet::message_kind(&msg) {
            Ok(v) => v,
            Err(e) => {
                debug!("discarding unknown message from face {face_id}: {e}");
                return;
            }
        };
        match kind {
            MessageKind::LinkPdu if pdu_ok => {
                if let Some(face) = self.faces.get_mut(face_id) {
                    if !face.link {
                        debug!("face {face_id} is link-framed");
                        face.link = true;
                    }
                }
                // Iterate the wrapped messages; pdu_ok=false forbids a
                // nested container.
                let mut pos = header.header_len;
                let end = header.total_len();
                while pos < end {
                    match tlv::read_element(&msg, pos) {
                        Ok(h) if pos + h.total_len() <= end => {
                            let inner = msg.slice(pos..pos + h.total_len());
                            pos += h.total_len();
                            self.process_message_inner(face_id, inner, now_us, false);
                        }
                        _ => {
                            debug!("malformed link PDU from face {face_id}");
                            break;
                        }
                    }
                }
            }
            MessageKind::LinkPdu => {
                debug!("nested link PDU from face {face_id} discarded");
            }
            MessageKind::Interest => self.handle_interest(face_id, msg, now_us),
            MessageKind::ContentObject => self.handle_content(face_id, msg, now_us),
        }
    }

    /* ------------------------------------------------------------ *
     * Interest path
     * ------------------------------------------------------------ */

    fn handle_interest(&mut self, face_id: FaceId, msg: Bytes, now_us: u64) {
        let pi = match packet::parse_interest(&msg) {
            Ok(pi) => pi,
            Err(e) => {
                warn!("error parsing Interest from face {face_id}: {e}");
                self.metrics.parse_errors.increment();
                return;
            }
        };
        let Some(face) = self.faces.get(face_id) else {
            return;
        };
        if face.link && pi.scope.map_or(false, |s| s < 2) {
            debug!("Interest from {face_id} out of scope - discarded");
            self.metrics.interests_dropped.increment();
            return;
        }
        if pi.has_nonce() {
            let nonce = &msg[pi.nonce_value.clone()];
            if self.propagating.contains(nonce) {
                // A looped copy. Count it, and make sure the original
                // is not sent back toward where this copy came from.
                self.metrics.interests_dropped.increment();
                if let Some(pe) = self.propagating.get_mut(nonce) {
                    pe.outbound.retain(|&f| f != face_id);
                }
                return;
            }
        }
        // The recent-content hint only helps plain "what's next" re-asks.
        if pi.orderpref > 1 || pi.prefix_comps != pi.ncomps() {
            if let Some(face) = self.faces.get_mut(face_id) {
                face.cached_accession = 0;
            }
        }
        self.metrics.interests_accepted.increment();
        if self.debug {
            trace!(
                "interest {} scope={:?} from face {face_id} ({} bytes)",
                Uri(&msg[pi.prefix_range()]),
                pi.scope,
                msg.len()
            );
        }

        {
            let (ipe, created) = self.pit.seek(&msg[pi.prefix_range()], pi.ncomps());
            ipe.bump(face_id);
            if created {
                debug!("new interest prefix {}", Uri(&msg[pi.prefix_range()]));
            }
        }
        self.metrics.prefix_entries.set(self.pit.len() as u64);

        // Candidate start: resume one past the face's previous hit when
        // the hint still matches this prefix, else the first candidate.
        let mut start = 0u64;
        let cached = self
            .faces
            .get(face_id)
            .map(|f| f.cached_accession)
            .unwrap_or(0);
        if cached != 0 {
            if let Some(face) = self.faces.get_mut(face_id) {
                face.cached_accession = 0;
            }
            if let Some(entry) = self.store.get(cached) {
                if content_matches_prefix(entry, &msg, &pi) {
                    let next = self.store.next(cached);
                    if next != 0 {
                        if let Some(e) = self.store.get(next) {
                            if content_matches_prefix(e, &msg, &pi) {
                                start = next;
                            }
                        }
                    }
                }
            }
        }
        if start == 0 {
            let c = self.store.first_candidate(&msg, &pi);
            if c != 0 {
                if let Some(e) = self.store.get(c) {
                    if content_matches_prefix(e, &msg, &pi) {
                        start = c;
                    }
                }
            }
        }

        // Walk candidates. Leftmost preference answers with the first
        // passing entry; rightmost remembers the last one.
        let mut cur = start;
        let mut hit = 0u64;
        let mut last_match = 0u64;
        while cur != 0 {
            let passes = self.content_is_unblocked(cur, &msg, &pi, face_id)
                && match self.store.get(cur) {
                    Some(e) => packet::content_matches_qualifiers(
                        &msg,
                        &pi,
                        &e.msg,
                        &e.comps,
                        e.publisher.clone(),
                    ),
                    None => false,
                };
            if passes {
                if pi.orderpref != 5 {
                    hit = cur;
                    break;
                }
                last_match = cur;
            }
            let next = self.store.next(cur);
            cur = match self.store.get(next) {
                Some(e) if next != 0 && content_matches_prefix(e, &msg, &pi) => next,
                _ => 0,
            };
        }
        if hit == 0 {
            hit = last_match;
        }

        let mut matched = false;
        if hit != 0 {
            if self.debug {
                trace!("interest matched accession {hit}");
            }
            self.match_interest_for_faceid(hit, face_id, now_us);
            if let Some(face) = self.faces.get_mut(face_id) {
                face.cached_accession = hit;
            }
            matched = true;
        }
        self.aging_needed(now_us);
        if !matched && pi.scope != Some(0) {
            self.propagate(&msg, &pi, face_id, now_us);
        }
    }

    /// Decides whether to answer an Interest with this prefix-matching
    /// content, given what has already been sent or queued to the face.
    fn content_is_unblocked(
        &mut self,
        accession: u64,
        interest_msg: &[u8],
        pi: &ParsedInterest,
        face_id: FaceId,
    ) -> bool {
        let filter = pi
            .response_filter
            .as_ref()
            .and_then(|r| bloom::validate_wire(&interest_msg[r.clone()]));
        let Some(entry) = self.store.get_mut(accession) else {
            return false;
        };
        if let Some(f) = &filter {
            if entry.sig_bits > 0
                && f.is_member(&entry.msg[entry.sig_bits..entry.sig_bits + 32])
            {
                // The asker has already seen this one.
                return false;
            }
        }
        match entry.faces.iter().position(|&f| f == face_id) {
            Some(k) if k < entry.nface_done => {
                // Already sent, but the filter allows a resend; tombstone
                // the old slot so the face can be queued again.
                entry.faces[k] = crate::store::FACE_TOMBSTONE;
                true
            }
            Some(_) => false, // already queued, don't schedule twice
            None => true,
        }
    }

    /// Consumes matching interest counters for a single face and queues
    /// the content toward it. Used on the Interest path, where the
    /// asker's own propagating interests must not be cancelled.
    fn match_interest_for_faceid(&mut self, accession: u64, face_id: FaceId, now_us: u64) {
        let (msg, comps) = match self.store.get(accession) {
            Some(e) => (e.msg.clone(), e.comps.clone()),
            None => return,
        };
        let c0 = comps[0];
        for ci in (0..comps.len()).rev() {
            let Some(ipe) = self.pit.get_mut(&msg[c0..comps[ci]]) else {
                continue;
            };
            let Some(i) = ipe.slot(face_id) else {
                continue;
            };
            let mut count = ipe.counters[i];
            if count == 0 {
                continue;
            }
            if self.faces.get(face_id).is_some() {
                let fresh = match self.store.get_mut(accession) {
                    Some(e) => {
                        let k = e.faces_set_insert(face_id);
                        k >= e.nface_done
                    }
                    None => false,
                };
                if fresh {
                    // Propagating interests whose selectors also match
                    // could be cancelled here as well; left for the
                    // strategy layer.
                    count = count.saturating_sub(INTEREST_UNIT);
                }
            } else {
                count = 0;
            }
            ipe.counters[i] = count;
        }
        self.schedule_content_delivery(accession, now_us);
    }

    /// Finds and consumes interests matching newly stored content.
    /// Queues every interested face and cancels one outstanding
    /// propagating ask per match. Returns the number of matches.
    pub fn match_interests(&mut self, accession: u64, now_us: u64) -> usize {
        let (msg, comps) = match self.store.get(accession) {
            Some(e) => (e.msg.clone(), e.comps.clone()),
            None => return 0,
        };
        let c0 = comps[0];
        let mut n_matched = 0;
        let mut reap_wanted = false;
        for ci in (0..comps.len()).rev() {
            let Some(ipe) = self.pit.get_mut(&msg[c0..comps[ci]]) else {
                continue;
            };
            for i in 0..ipe.counters.len() {
                let count = ipe.counters[i];
                if count == 0 {
                    continue;
                }
                let fid = ipe.faces[i];
                if self.faces.get(fid).is_none() {
                    ipe.counters[i] = 0;
                    continue;
                }
                let fresh = match self.store.get_mut(accession) {
                    Some(e) => {
                        let k = e.faces_set_insert(fid);
                        k >= e.nface_done
                    }
                    None => false,
                };
                if fresh {
                    n_matched += 1;
                    ipe.counters[i] = count.saturating_sub(INTEREST_UNIT);
                    // Consume one outstanding ask from this face.
                    let mut found = None;
                    for (j, nonce) in ipe.propagating.iter().enumerate() {
                        if self
                            .propagating
                            .get_mut(nonce)
                            .map_or(false, |pe| pe.from == fid)
                        {
                            found = Some(j);
                            break;
                        }
                    }
                    if let Some(j) = found {
                        let nonce = ipe.propagating.remove(j);
                        self.propagating.finish(&nonce);
                        reap_wanted = true;
                    }
                }
            }
        }
        if reap_wanted {
            self.reap_needed(now_us, 0);
            self.metrics
                .propagating_entries
                .set(self.propagating.len() as u64);
        }
        if n_matched != 0 {
            self.schedule_content_delivery(accession, now_us);
        }
        n_matched
    }

    /* ------------------------------------------------------------ *
     * Content path
     * ------------------------------------------------------------ */

    fn handle_content(&mut self, face_id: FaceId, msg: Bytes, now_us: u64) {
        let pco = match packet::parse_content_object(&msg) {
            Ok(p) => p,
            Err(e) => {
                warn!("error parsing ContentObject from face {face_id}: {e}");
                self.metrics.parse_errors.increment();
                return;
            }
        };
        if pco.magic != CONTENT_MAGIC {
            self.metrics.downrev_content.increment();
            let n = self.metrics.downrev_content.value();
            if n == self.downrev_grumble {
                self.downrev_grumble *= 10;
                info!("downrev content items received: {n} (magic {})", pco.magic);
            }
        }
        if self.debug {
            trace!(
                "content {} from face {face_id} ({} bytes)",
                Uri(&msg[pco.name_range()]),
                msg.len()
            );
        }

        let outcome = self.store.insert(msg, &pco, &mut self.rng);
        match outcome {
            InsertOutcome::Duplicate(acc) => {
                self.metrics.content_dups.increment();
                debug!(
                    "received duplicate ContentObject from {face_id} (accession {acc})"
                );
                // The sender evidently has this content; move it into
                // the already-sent region so we never echo it back.
                if let Some(e) = self.store.get_mut(acc) {
                    let i = e.faces_set_insert(face_id);
                    if i >= e.nface_done {
                        e.faces[i] = e.faces[e.nface_done];
                        e.faces[e.nface_done] = face_id;
                        e.nface_done += 1;
                    }
                }
                let _ = self.match_interests(acc, now_us);
            }
            InsertOutcome::Collision { cancel } => {
                // The upper protocol has to sort this out; we keep
                // neither claimant.
                warn!("ContentObject name collision, discarding both");
                self.metrics.content_collisions.increment();
                if let Some(h) = cancel {
                    self.sched.cancel(h);
                }
            }
            InsertOutcome::New(acc) => {
                if let Some(e) = self.store.get_mut(acc) {
                    e.faces.push(face_id);
                    e.nface_done = 1;
                }
                let n = self.match_interests(acc, now_us);
                if n == 0 {
                    if let Some(e) = self.store.get_mut(acc) {
                        e.slow_send = true;
                    }
                }
            }
        }
        self.metrics.store_entries.set(self.store.len() as u64);
    }

    /* ------------------------------------------------------------ *
     * Delivery
     * ------------------------------------------------------------ */

    /// Microseconds before the next copy of a content entry goes out.
    fn choose_content_delay(&mut self, face_id: FaceId, slow: bool) -> u64 {
        let shift = if slow { 2 } else { 0 };
        match self.faces.get(face_id) {
            None => 1, // going nowhere, get it over with
            Some(f) if f.dgram => 100,
            Some(f) if f.link => {
                (self.rng.gen_range(0..DATA_PAUSE_US) + DATA_PAUSE_US / 2) << shift
            }
            Some(_) => 10, // local stream, answer quickly
        }
    }

    fn schedule_content_delivery(&mut self, accession: u64, now_us: u64) {
        let pending = match self.store.get(accession) {
            Some(e) if e.sender.is_none() && e.nface_done < e.faces.len() => {
                Some((e.faces[e.nface_done], e.slow_send))
            }
            _ => None,
        };
        if let Some((next_face, slow)) = pending {
            let delay = self.choose_content_delay(next_face, slow);
            let handle = self
                .sched
                .schedule(now_us, delay, EventKind::ContentSend(accession));
            if let Some(e) = self.store.get_mut(accession) {
                e.sender = Some(handle);
            }
        }
    }

    /// Delivery pacer: sends one copy, then re-arms for the next face.
    fn content_sender(&mut self, accession: u64, now_us: u64) {
        match self.store.get_mut(accession) {
            Some(entry) => entry.sender = None,
            None => {
                debug!("delivery event for missing accession {accession}");
                return;
            }
        }
        loop {
            let target = {
                let Some(entry) = self.store.get_mut(accession) else {
                    return;
                };
                if entry.nface_done >= entry.faces.len() {
                    return;
                }
                let t = entry.faces[entry.nface_done];
                entry.nface_done += 1;
                t
            };
            // Dead or tombstoned faces are skipped without pacing.
            if self.faces.get(target).is_none() {
                continue;
            }
            let msg = match self.store.get(accession) {
                Some(e) => e.msg.clone(),
                None => return,
            };
            self.write_face(target, msg);
            self.metrics.content_items_sent.increment();
            let remaining = match self.store.get(accession) {
                Some(e) if e.nface_done < e.faces.len() => {
                    Some((e.faces[e.nface_done], e.slow_send))
                }
                _ => None,
            };
            if let Some((next_face, slow)) = remaining {
                let delay = self.choose_content_delay(next_face, slow);
                let handle = self
                    .sched
                    .schedule(now_us, delay, EventKind::ContentSend(accession));
                if let Some(e) = self.store.get_mut(accession) {
                    e.sender = Some(handle);
                }
            }
            return;
        }
    }

    /// Writes a message to a face, wrapping it for link-framed peers.
    /// Queue faces buffer unboundedly (drained by their writer task);
    /// datagram faces drop on a would-block send.
    fn write_face(&mut self, face_id: FaceId, data: Bytes) {
        let mut dead = false;
        if let Some(face) = self.faces.get(face_id) {
            let payload = if face.link {
                packet::wrap_link_pdu(&data)
            } else {
                data
            };
            match &face.out {
                FaceOutput::Queue(tx) => {
                    if tx.send(payload).is_err() {
                        dead = true;
                    }
                }
                FaceOutput::Datagram { socket, addr } => {
                    match socket.try_send_to(&payload, *addr) {
                        Ok(n) if n == payload.len() => {}
                        Ok(_) => warn!("short datagram send on face {face_id}"),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            debug!("datagram send to face {face_id} would block; dropped");
                        }
                        Err(e) => warn!("datagram send error on face {face_id}: {e}"),
                    }
                }
            }
        }
        if dead {
            warn!("send to face {face_id} failed; shutting it down");
            self.remove_face(face_id);
        }
    }

    /* ------------------------------------------------------------ *
     * Propagation
     * ------------------------------------------------------------ */

    /// Starts propagating an Interest that found no local match.
    /// Without a routing table we forward to every face but the source,
    /// subject to scope.
    fn propagate(&mut self, msg: &Bytes, pi: &ParsedInterest, from: FaceId, now_us: u64) {
        let block_link = pi.scope == Some(1);
        let outbound: Vec<FaceId> = self
            .faces
            .iter()
            .filter(|f| f.id != from && !(block_link && f.link))
            .map(|f| f.id)
            .collect();
        if outbound.is_empty() {
            return;
        }
        let (out_msg, nonce) = if pi.has_nonce() {
            (msg.clone(), msg.slice(pi.nonce_value.clone()))
        } else {
            let nonce = self.synthesize_nonce();
            match packet::splice_nonce(msg, pi, &nonce) {
                Ok(m) => (m, Bytes::copy_from_slice(&nonce)),
                Err(e) => {
                    warn!("could not add nonce to Interest: {e}");
                    return;
                }
            }
        };
        let prefix_key = Bytes::copy_from_slice(&msg[pi.prefix_range()]);
        let entry = PropagatingEntry {
            msg: Some(out_msg),
            from,
            outbound,
            prefix_key: prefix_key.clone(),
            grace: 0,
        };
        if self.propagating.insert(nonce.clone(), entry) {
            if let Some(ipe) = self.pit.get_mut(&prefix_key) {
                ipe.propagating.push(nonce.clone());
            }
            let delay = self.rng.gen_range(0..8192u64);
            self.sched.schedule(now_us, delay, EventKind::Propagate(nonce));
            self.metrics
                .propagating_entries
                .set(self.propagating.len() as u64);
        } else {
            // Same nonce raced in; drop this copy and make sure the
            // in-flight one is not sent back toward this face.
            debug!("nonce already propagating; dropping copy from {from}");
            if let Some(pe) = self.propagating.get_mut(&nonce) {
                pe.outbound.retain(|&f| f != from);
            }
        }
    }

    /// Six bytes of shifted generator output; plenty for loop
    /// suppression.
    fn synthesize_nonce(&mut self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        for (i, b) in nonce.iter_mut().enumerate() {
            *b = (self.rng.next_u32() >> i) as u8;
        }
        nonce
    }

    /// Propagation pacer: one outbound face per firing, popped from the
    /// back of the remaining set.
    fn do_propagate(&mut self, nonce: Bytes, now_us: u64) {
        let (popped, msg, empty_after) = {
            let Some(pe) = self.propagating.get_mut(&nonce) else {
                return;
            };
            let Some(msg) = pe.msg.clone() else {
                return;
            };
            let popped = pe.outbound.pop();
            (popped, msg, pe.outbound.is_empty())
        };
        if let Some(target) = popped {
            if self.faces.get(target).is_some() {
                self.write_face(target, msg);
                self.metrics.interests_sent.increment();
            }
        }
        if empty_after {
            self.finish_propagating(&nonce);
            self.reap_needed(now_us, 0);
        } else {
            let delay = self.rng.gen_range(0..8192u64) + 500;
            self.sched.schedule(now_us, delay, EventKind::Propagate(nonce));
        }
    }

    /// Releases a propagating entry's message and unlinks it from its
    /// prefix entry; the nonce lingers until reaped.
    fn finish_propagating(&mut self, nonce: &[u8]) {
        if let Some(prefix_key) = self.propagating.finish(nonce) {
            if let Some(ipe) = self.pit.get_mut(&prefix_key) {
                ipe.propagating.retain(|n| n.as_ref() != nonce);
            }
        }
        self.metrics
            .propagating_entries
            .set(self.propagating.len() as u64);
    }

    /* ------------------------------------------------------------ *
     * Timers
     * ------------------------------------------------------------ */

    fn aging_needed(&mut self, now_us: u64) {
        if self.age_timer.is_none() {
            self.age_timer = Some(self.sched.schedule(now_us, INTEREST_AGING_US, EventKind::Age));
        }
    }

    pub fn reap_needed(&mut self, now_us: u64, delay_us: u64) {
        if self.reap_timer.is_none() {
            self.reap_timer = Some(self.sched.schedule(now_us, delay_us, EventKind::Reap));
        }
    }

    /// Evicts datagram faces that went a full reaper period without
    /// receiving anything; survivors get a two-tick grace.
    fn check_dgram_faces(&mut self) -> usize {
        let mut victims = Vec::new();
        for face in self.faces.iter_mut() {
            if face.dgram && face.addr.is_some() {
                if face.recvcount == 0 {
                    victims.push(face.id);
                } else {
                    face.recvcount = u32::from(face.recvcount > 1);
                }
            }
        }
        let count = victims.len();
        for id in victims {
            info!("reaping idle datagram face {id}");
            self.remove_face(id);
        }
        count
    }

    fn check_comm_file(&mut self) {
        if let Some(path) = &self.comm_path {
            if !path.exists() {
                info!("exiting ({} gone)", path.display());
                self.exiting = true;
            }
        }
    }

    /// Rewrites each content entry's face list in place: dead face-ids
    /// go away, link faces that already got their copy in an earlier
    /// pass go away, order is preserved and the sent watermark is
    /// recomputed.
    fn clean_store(&mut self) {
        let faces = &self.faces;
        for entry in self.store.iter_entries_mut() {
            if entry.faces.is_empty() {
                continue;
            }
            let n = entry.faces.len();
            let mut k = 0;
            let mut d = 0;
            for j in 0..n {
                let fid = entry.faces[j];
                if faces.get(fid).is_none() {
                    continue;
                }
                if j < entry.nface_old {
                    let is_link = faces.get(fid).map_or(false, |f| f.link);
                    if is_link {
                        continue;
                    }
                }
                if j < entry.nface_done {
                    d += 1;
                }
                entry.faces[k] = fid;
                k += 1;
            }
            if k < n {
                entry.faces.truncate(k);
                entry.nface_done = d;
            }
            entry.nface_old = d;
        }
    }

    /* ------------------------------------------------------------ *
     * Scheduler driving
     * ------------------------------------------------------------ */

    /// Runs every event due at `now_us`.
    pub fn run_due(&mut self, now_us: u64) {
        while let Some((handle, kind)) = self.sched.pop_due(now_us) {
            match kind {
                EventKind::Age => {
                    self.pit.age();
                    self.metrics.prefix_entries.set(self.pit.len() as u64);
                    if self.pit.is_empty() {
                        self.age_timer = None;
                    } else {
                        self.sched
                            .rearm(handle, now_us, INTEREST_AGING_US, EventKind::Age);
                    }
                }
                EventKind::Reap => {
                    self.check_dgram_faces();
                    self.propagating.reap();
                    self.metrics
                        .propagating_entries
                        .set(self.propagating.len() as u64);
                    self.check_comm_file();
                    let dgram_peers = self
                        .faces
                        .iter()
                        .filter(|f| f.dgram && f.addr.is_some())
                        .count();
                    if dgram_peers > 0 || !self.propagating.is_empty() {
                        self.sched
                            .rearm(handle, now_us, 2 * INTEREST_HALFLIFE_US, EventKind::Reap);
                    } else {
                        // nothing on the horizon, so go away
                        self.reap_timer = None;
                    }
                }
                EventKind::Clean => {
                    self.clean_store();
                    self.sched
                        .rearm(handle, now_us, CLEAN_PERIOD_US, EventKind::Clean);
                }
                EventKind::ContentSend(acc) => self.content_sender(acc, now_us),
                EventKind::Propagate(nonce) => self.do_propagate(nonce, now_us),
            }
        }
    }

    /// Microseconds until the next scheduled event.
    pub fn next_timeout(&mut self, now_us: u64) -> Option<u64> {
        self.sched.next_delay(now_us)
    }
}
