//! End-to-end forwarding scenarios, driven without sockets.
//!
//! Faces are backed by in-memory queues and the scheduler is advanced
//! with an explicit microsecond clock, so every timer fires
//! deterministically.

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::sync::mpsc;

use rust_ccnf_common::metrics::ForwarderMetrics;
use rust_ccnf_common::packet::{
    parse_interest, wrap_link_pdu, ContentObjectBuilder, InterestBuilder,
};
use rust_ccnf_core::engine::{Forwarder, INTEREST_HALFLIFE_US};
use rust_ccnf_core::face::{Face, FaceId};
use rust_ccnf_core::pit::INTEREST_UNIT;

fn forwarder(seed: u64) -> Forwarder {
    Forwarder::with_rng(ForwarderMetrics::new(), false, SmallRng::seed_from_u64(seed))
}

fn pipe_face(fw: &mut Forwarder) -> (FaceId, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = fw.add_face(Face::stream(tx)).expect("face table has room");
    (id, rx)
}

/// Runs the scheduler forward `delta` microseconds.
fn advance(fw: &mut Forwarder, now: &mut u64, delta: u64) {
    let target = *now + delta;
    loop {
        match fw.next_timeout(*now) {
            Some(d) if *now + d <= target => {
                *now += d;
                fw.run_due(*now);
            }
            _ => break,
        }
    }
    *now = target;
}

#[test]
fn s1_store_hit_is_delivered_to_the_asker() {
    let mut fw = forwarder(1);
    let mut now = 0u64;
    let (f1, mut rx1) = pipe_face(&mut fw);
    let (f2, mut rx2) = pipe_face(&mut fw);

    // Preload /a/b through f2; unsolicited content is still stored.
    let content = ContentObjectBuilder::new("/a/b", &[0x55; 48])
        .signature_bits(&[9u8; 32])
        .build();
    fw.process_message(f2, content.clone(), now);
    assert_eq!(fw.store.len(), 1);

    let interest = InterestBuilder::new("/a").scope(2).build();
    fw.process_message(f1, interest, now);

    // Local stream delivery is scheduled at 10 μs.
    advance(&mut fw, &mut now, 10);
    let got = rx1.try_recv().expect("content delivered to f1");
    assert_eq!(&got[..], &content[..]);
    assert!(rx1.try_recv().is_err(), "exactly one copy");
    assert!(rx2.try_recv().is_err(), "nothing echoed to the source");

    let entry = fw.store.get(1).expect("first accession");
    assert_eq!(entry.faces.last(), Some(&f1));
    assert_eq!(entry.nface_done, entry.faces.len());
    assert!(fw.propagating.is_empty(), "a hit does not propagate");
}

#[test]
fn s2_miss_propagates_then_content_fills() {
    let mut fw = forwarder(2);
    let mut now = 0u64;
    let (f1, mut rx1) = pipe_face(&mut fw);
    let (f2, mut rx2) = pipe_face(&mut fw);
    let (_f3, mut rx3) = pipe_face(&mut fw);

    let interest = InterestBuilder::new("/x").build();
    fw.process_message(f1, interest, now);

    // A miss files one propagating entry under a synthesized nonce,
    // with every other face still to send.
    assert_eq!(fw.propagating.len(), 1);

    // Let the pacer drain the outbound set.
    advance(&mut fw, &mut now, 30_000);
    for rx in [&mut rx2, &mut rx3] {
        let copy = rx.try_recv().expect("interest propagated");
        let pi = parse_interest(&copy).expect("valid interest");
        assert!(pi.has_nonce(), "forwarder added a nonce");
        assert_eq!(copy[pi.nonce_value.clone()].len(), 6);
    }
    assert!(rx1.try_recv().is_err(), "never sent back to the asker");

    // The fill arrives from f2 and satisfies f1's ask.
    let content = ContentObjectBuilder::new("/x/1", b"fill payload").build();
    fw.process_message(f2, content.clone(), now);
    advance(&mut fw, &mut now, 10);
    let got = rx1.try_recv().expect("data delivered to the asker");
    assert_eq!(&got[..], &content[..]);

    // The consumed propagating entry is retired by the reaper.
    advance(&mut fw, &mut now, 5 * 2 * INTEREST_HALFLIFE_US);
    assert!(fw.propagating.is_empty());
}

#[test]
fn s3_duplicate_nonce_is_dropped_and_outbound_trimmed() {
    let mut fw = forwarder(3);
    let mut now = 0u64;
    let (f1, _rx1) = pipe_face(&mut fw);
    let (f2, _rx2) = pipe_face(&mut fw);
    let (f3, _rx3) = pipe_face(&mut fw);

    let nonce = [1, 2, 3, 4, 5, 6];
    let interest = InterestBuilder::new("/loop").nonce(nonce).build();
    fw.process_message(f1, interest.clone(), now);
    assert_eq!(fw.propagating.len(), 1);
    {
        let pe = fw.propagating.get_mut(&nonce).expect("entry keyed by nonce");
        assert!(pe.outbound.contains(&f2));
        assert!(pe.outbound.contains(&f3));
    }

    // The same bytes loop back in via f2 before anything expired.
    fw.process_message(f2, interest, now);
    assert_eq!(fw.metrics.interests_dropped.value(), 1);
    assert_eq!(fw.propagating.len(), 1, "no second entry");
    let pe = fw.propagating.get_mut(&nonce).expect("original entry");
    assert!(!pe.outbound.contains(&f2), "looped face dropped from outbound");
    assert!(pe.outbound.contains(&f3));
}

#[test]
fn s4_scope_rules() {
    let mut fw = forwarder(4);
    let mut now = 0u64;
    let (f1, _rx1) = pipe_face(&mut fw);
    let (f2, mut rx2) = pipe_face(&mut fw);
    let (f3, mut rx3) = pipe_face(&mut fw);

    // Scope 0 with no local match: processed locally, never propagated.
    let local_only = InterestBuilder::new("/s0").scope(0).build();
    fw.process_message(f1, local_only, now);
    assert_eq!(fw.metrics.interests_accepted.value(), 1);
    assert!(fw.propagating.is_empty());

    // Mark f3 link-framed; the wrapped scope-1 Interest is itself
    // dropped as out-of-scope.
    let wrapped = wrap_link_pdu(&InterestBuilder::new("/viaudp").scope(1).build());
    fw.process_message(f3, wrapped, now);
    assert!(fw.faces.get(f3).expect("face lives").link);
    assert_eq!(fw.metrics.interests_accepted.value(), 1, "out-of-scope not accepted");
    assert!(fw.propagating.is_empty());

    // Scope 1 from a stream face: propagation excludes link faces.
    let scoped = InterestBuilder::new("/s1").scope(1).build();
    fw.process_message(f1, scoped, now);
    assert_eq!(fw.propagating.len(), 1);
    advance(&mut fw, &mut now, 30_000);
    assert!(rx2.try_recv().is_ok(), "stream face got the interest");
    assert!(rx3.try_recv().is_err(), "link face excluded at scope 1");
}

#[test]
fn s5_aging_halves_the_counter_per_halflife() {
    let mut fw = forwarder(5);
    let mut now = 0u64;
    let (f1, _rx1) = pipe_face(&mut fw);
    let (_f2, _rx2) = pipe_face(&mut fw);

    let interest = InterestBuilder::new("/p").scope(0).build();
    let pi = parse_interest(&interest).expect("valid");
    let prefix = interest[pi.prefix_range()].to_vec();
    for _ in 0..4 {
        fw.process_message(f1, interest.clone(), now);
    }
    {
        let ipe = fw.pit.get_mut(&prefix).expect("prefix entry");
        assert_eq!(ipe.counters[0], 4 * INTEREST_UNIT);
    }

    // One halflife is four aging ticks.
    advance(&mut fw, &mut now, INTEREST_HALFLIFE_US);
    let ipe = fw.pit.get_mut(&prefix).expect("prefix entry survives");
    let end = ipe.counters[0];
    let target = 4 * INTEREST_UNIT / 2;
    assert!(
        end.abs_diff(target) <= 1,
        "counter decayed to {end}, wanted about {target}"
    );
}

#[test]
fn s6_name_collision_evicts_both() {
    let mut fw = forwarder(6);
    let now = 0u64;
    let (f1, _rx1) = pipe_face(&mut fw);
    let (f2, _rx2) = pipe_face(&mut fw);

    let first = ContentObjectBuilder::new("/k", b"B1").build();
    fw.process_message(f1, first, now);
    assert_eq!(fw.store.len(), 1);

    let second = ContentObjectBuilder::new("/k", b"B2").build();
    fw.process_message(f2, second, now);
    assert_eq!(fw.store.len(), 0, "both claimants gone");
    assert_eq!(fw.metrics.content_collisions.value(), 1);
    assert_eq!(fw.metrics.content_dups.value(), 0, "dup counter untouched");
}

#[test]
fn duplicate_content_marks_sender_as_served() {
    let mut fw = forwarder(7);
    let mut now = 0u64;
    let (f1, mut rx1) = pipe_face(&mut fw);
    let (f2, mut rx2) = pipe_face(&mut fw);

    let content = ContentObjectBuilder::new("/dup", b"same bytes").build();
    fw.process_message(f1, content.clone(), now);
    fw.process_message(f2, content.clone(), now);
    assert_eq!(fw.metrics.content_dups.value(), 1);
    assert_eq!(fw.store.len(), 1);

    let entry = fw.store.get(1).expect("entry");
    // Both senders sit in the already-sent region.
    assert_eq!(entry.nface_done, 2);
    assert!(entry.faces[..2].contains(&f1));
    assert!(entry.faces[..2].contains(&f2));

    advance(&mut fw, &mut now, 1_000);
    assert!(rx1.try_recv().is_err(), "no echo to either sender");
    assert!(rx2.try_recv().is_err());
}

#[test]
fn repeat_ask_tombstones_and_resends() {
    let mut fw = forwarder(8);
    let mut now = 0u64;
    let (f1, mut rx1) = pipe_face(&mut fw);
    let (f2, _rx2) = pipe_face(&mut fw);

    let content = ContentObjectBuilder::new("/r/1", &[1u8; 64]).build();
    fw.process_message(f2, content.clone(), now);

    let interest = InterestBuilder::new("/r").scope(0).build();
    fw.process_message(f1, interest.clone(), now);
    advance(&mut fw, &mut now, 10);
    assert!(rx1.try_recv().is_ok(), "first delivery");

    // Without a response filter, a repeated ask un-blocks the sent slot
    // and earns a resend; the old slot becomes a tombstone.
    fw.process_message(f1, interest, now);
    advance(&mut fw, &mut now, 10);
    assert!(rx1.try_recv().is_ok(), "second delivery after tombstone");
    assert!(rx1.try_recv().is_err());
}

#[test]
fn datagram_faces_are_reaped_when_idle() {
    // Exercised through the engine's reaper directly: a datagram face
    // with no receptions across a full period goes away.
    let mut fw = forwarder(9);
    let mut now = 0u64;
    let (f1, _rx1) = pipe_face(&mut fw);

    // Keep the stream face alive; only datagram peers are collected,
    // and there are none here, so the reaper goes idle again.
    fw.reap_needed(now, 0);
    advance(&mut fw, &mut now, 3 * INTEREST_HALFLIFE_US);
    assert!(fw.faces.get(f1).is_some(), "stream faces are never reaped");
}
