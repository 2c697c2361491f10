//! Cross-module scenario tests: each one exercises more than one
//! subsystem together, which is why these live in an integration test
//! file rather than a `#[cfg(test)]` module local to a single subsystem.

use std::net::Ipv6Addr;

use trust_core::certificate::{tbs_signing_bytes, Certificate, StereotypeTags, TbsCertificate};
use trust_core::crypto::{self, PrivateKeyBytes, PublicKeyBytes};
use trust_core::eui64::Eui64;
use trust_core::exchange::{self, ExchangeError, RxSlots, Status};
use trust_core::gossip::{self, GossipAction};
use trust_core::keystore::Keystore;
use trust_core::limits::MAX_TRUST_RX_SLOTS;
use trust_core::registry::Registry;
use trust_core::trust_model::{Beta, EdgeTrustState, TrustModelKind};
use trust_core::work_queue::CryptoWorkQueue;

fn signed_cert(root_private: &PrivateKeyBytes, subject: Eui64, pubkey: PublicKeyBytes) -> Certificate {
    let tbs = TbsCertificate {
        serial: 1,
        issuer: Eui64([0xee; 8]),
        not_before: 0,
        not_after: u32::MAX,
        subject,
        tags: StereotypeTags::new(2).unwrap(),
        pubkey,
    };
    let signing_bytes = tbs_signing_bytes(&tbs).unwrap();
    let signature = crypto::ecdsa_sign(root_private, &signing_bytes).unwrap();
    Certificate { tbs, signature }
}

/// Scenario 1: key bootstrap. Root key known; client receives an announce
/// for edge E with cert C_E signed by root. `add_unverified(C_E)` should,
/// after one verify cycle, make the entry findable with its shared secret
/// populated — driven here by actually parsing the announce topic first,
/// the way a gossip subscriber would hand the certificate to the keystore.
#[tokio::test]
async fn scenario_1_key_bootstrap_via_announce() {
    let (root_private, root_public) = crypto::generate_keypair();
    let (our_private, _our_public) = crypto::generate_keypair();
    let (_edge_private, edge_public) = crypto::generate_keypair();

    let our_eui64 = Eui64([1u8; 8]);
    let edge_eui64 = Eui64([2u8; 8]);
    let cert = signed_cert(&root_private, edge_eui64, edge_public);

    let topic = gossip::announce_topic(&edge_eui64);
    let parsed = gossip::parse_topic(&topic, &our_eui64).unwrap();
    assert_eq!(parsed.action, GossipAction::Announce);
    assert_eq!(parsed.eui64, edge_eui64);

    let mut keystore = Keystore::new(our_eui64, our_private, root_public, "fd00::1".parse().unwrap());
    let queue = CryptoWorkQueue::spawn();

    let handle = keystore
        .add_unverified(cert, "fd00::2".parse().unwrap(), &queue)
        .await
        .unwrap()
        .expect("root-signed cert must verify");

    let entry = keystore.find_by_eui64(parsed.eui64).unwrap();
    assert!(entry.is_ready());
    assert!(!keystore.is_pinned(handle));
}

/// Scenario 2: capability gossip. After an announce creates the edge, a
/// `capability/routing/add` message (with no embedded certificate) must
/// activate that capability on the registry.
#[test]
fn scenario_2_capability_gossip_activates_capability() {
    let our_eui64 = Eui64([1u8; 8]);
    let edge_eui64 = Eui64([2u8; 8]);

    let mut registry = Registry::new(TrustModelKind::None);
    let edge = registry.add_edge(edge_eui64, "fd00::2".parse().unwrap()).unwrap();

    let topic = gossip::capability_add_topic(&edge_eui64, "routing");
    let parsed = gossip::parse_topic(&topic, &our_eui64).unwrap();
    match parsed.action {
        GossipAction::CapabilityAdd { capability } => {
            registry.add_capability(edge, capability).unwrap();
        }
        other => panic!("expected capability add, got {other:?}"),
    }

    assert!(registry.has_active_capability(edge, "routing"));
}

/// Scenario 3: trust broadcast echo. Client A signs and broadcasts a
/// trust frame for edges E1 and E2. Client B, who knows E1 only, accepts
/// the frame, merges E1's reported state into its peer record for A, and
/// silently skips E2.
#[test]
fn scenario_3_trust_broadcast_echo() {
    let sender_a = Eui64([0xaa; 8]);
    let e1 = Eui64([1u8; 8]);
    let e1_addr: Ipv6Addr = "fd00::1".parse().unwrap();
    let e2_addr: Ipv6Addr = "fd00::2".parse().unwrap();

    let e1_state = EdgeTrustState::Reputation {
        task_submission: Beta::new(3, 1),
        task_result: Beta::default(),
    };
    let e2_state = EdgeTrustState::Reputation {
        task_submission: Beta::new(1, 2),
        task_result: Beta::default(),
    };

    let frame = exchange::encode_trust_frame(
        1_000,
        &[(e1_addr, e1_state.clone()), (e2_addr, e2_state)],
        TrustModelKind::Reputation,
    )
    .unwrap();

    // Client B only knows about E1.
    let mut registry_b = Registry::new(TrustModelKind::Reputation);
    registry_b.add_edge(e1, e1_addr).unwrap();
    registry_b.record_peer(sender_a, "fd00::aa".parse().unwrap());

    let decoded = exchange::decode_trust_frame(&frame, TrustModelKind::Reputation).unwrap();
    exchange::merge_trust_frame(&mut registry_b, sender_a, decoded);

    let peer_info = registry_b.peer(&sender_a).unwrap();
    assert_eq!(peer_info.edge(&e1), Some(&e1_state));
    // E2 was never locally known, so nothing was recorded for it.
    assert_eq!(peer_info.edge(&Eui64([2u8; 8])), None);
}

/// Scenario 4: out-of-memory retry. With the verify (RX) queue full,
/// handling an inbound POST must fail with a slot-exhaustion error that
/// maps to 5.03 with a 120-second Max-Age, and no peer record is touched
/// because the merge step is never reached.
#[tokio::test]
async fn scenario_4_out_of_memory_retry() {
    let mut rx_slots = RxSlots::default();
    let mut held = Vec::new();
    for _ in 0..MAX_TRUST_RX_SLOTS {
        held.push(rx_slots.acquire().unwrap());
    }

    let payload = vec![0u8; 8];
    let result = exchange::handle_incoming_post(&mut rx_slots, &payload).await;

    let err = result.unwrap_err();
    assert!(matches!(err, ExchangeError::RxSlotsExhausted));
    assert_eq!(err.response_status(), Status::ServiceUnavailable);
    assert_eq!(err.max_age_hint(), Some(120));

    let registry = Registry::new(TrustModelKind::Reputation);
    assert_eq!(registry.peer_count(), 0);

    drop(held);
}

/// Scenario 5: badlisted recovery. A challenge-response timeout flagged
/// `never_received` flips `bad` to true; a later valid-hash, on-time
/// response flips it back to false.
#[test]
fn scenario_5_badlisted_recovery() {
    use trust_core::trust_model::ChallengeResponseOutcome;

    let mut edge = EdgeTrustState::new(TrustModelKind::Badlisted);
    assert!(!edge.is_bad());

    edge.apply_challenge_response(ChallengeResponseOutcome::Timeout {
        never_received: true,
        late: false,
    });
    assert!(edge.is_bad());

    edge.apply_challenge_response(ChallengeResponseOutcome::Response {
        hash_meets_difficulty: true,
        late: false,
    });
    assert!(!edge.is_bad());
}

/// A task-submission outcome of "finished" with no prior response must
/// not touch the Beta state at all.
#[test]
fn finished_with_no_response_leaves_beta_untouched() {
    use trust_core::trust_model::TaskSubmissionOutcome;

    let mut edge = EdgeTrustState::new(TrustModelKind::Reputation);
    edge.apply_task_submission(TaskSubmissionOutcome::FinishedNoResponse);

    match edge {
        EdgeTrustState::Reputation { task_submission, .. } => {
            assert_eq!(task_submission, Beta::default());
        }
        _ => panic!("expected reputation variant"),
    }
}

/// Unannounce of an edge never announced, and capability-remove for an
/// unknown capability, are both no-ops rather than errors: looking either
/// up simply yields nothing to act on.
#[test]
fn unannounce_and_capability_remove_on_unknown_targets_are_noops() {
    let mut registry = Registry::new(TrustModelKind::None);
    let unknown_edge = Eui64([0xff; 8]);
    assert!(registry.find_edge_by_eui64(&unknown_edge).is_none());

    let known_edge = registry.add_edge(Eui64([1u8; 8]), "fd00::1".parse().unwrap()).unwrap();
    assert!(registry.find_capability(known_edge, "never-added").is_none());
    assert!(!registry.has_active_capability(known_edge, "never-added"));
}
