//! CoAP-style trust exchange: periodic broadcast, point-to-point
//! request/response, and inbound verify-then-merge handling, abstracted
//! behind a transport trait so the wire layer stays out of this crate.

use std::net::Ipv6Addr;

use async_trait::async_trait;
use ciborium::value::Value;
use thiserror::Error;

use crate::certificate::Certificate;
use crate::eui64::Eui64;
use crate::limits::{MAX_TRUST_PAYLOAD_BYTES, MAX_TRUST_RX_SLOTS, MAX_TRUST_TX_SLOTS};
use crate::registry::Registry;
use crate::trust_model::{EdgeTrustState, TrustModelError, TrustModelKind};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("payload of {0} bytes exceeds the single-block cap of {1}")]
    PayloadTooLarge(usize, usize),
    #[error("no free transmit slot")]
    TxSlotsExhausted,
    #[error("no free receive slot")]
    RxSlotsExhausted,
    #[error("missing security context for this peer")]
    MissingSecurityContext,
    #[error("peer responded with an error status: {0:?}")]
    PeerError(Status),
    #[error("certificate error: {0}")]
    Certificate(#[from] crate::certificate::CertificateError),
    #[error("trust model error: {0}")]
    TrustModel(#[from] TrustModelError),
    #[error("malformed trust frame: {0}")]
    MalformedFrame(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ExchangeError {
    /// Maps a failure to the wire status (and `Max-Age` retry hint) it
    /// should carry: out-of-memory and queue-full conditions get a short
    /// retry, a missing security context gets a longer one to give the
    /// async key request time to complete.
    pub fn response_status(&self) -> Status {
        match self {
            Self::TxSlotsExhausted | Self::RxSlotsExhausted => Status::ServiceUnavailable,
            Self::MissingSecurityContext => Status::ServiceUnavailable,
            Self::PayloadTooLarge(_, _) | Self::MalformedFrame(_) | Self::Certificate(_) => Status::BadRequest,
            Self::TrustModel(_) => Status::BadRequest,
            Self::PeerError(status) => *status,
            Self::Transport(_) => Status::Internal,
        }
    }

    /// `Max-Age` hint in seconds for the mapped status: 2 minutes for
    /// exhausted slots, 5 minutes for a missing security context (the
    /// async `request_public_key` needs time to round-trip).
    pub fn max_age_hint(&self) -> Option<u32> {
        match self {
            Self::TxSlotsExhausted | Self::RxSlotsExhausted => Some(120),
            Self::MissingSecurityContext => Some(300),
            _ => self.response_status().max_age_hint(),
        }
    }
}

/// CoAP-like response statuses this exchange actually produces or
/// consumes; not a complete enumeration of the code space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Created,    // 2.01
    Content,    // 2.05
    Continue,   // 2.31
    BadRequest, // 4.00
    Internal,   // 5.00
    ServiceUnavailable, // 5.03
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Created | Status::Content | Status::Continue)
    }

    /// Suggested `Max-Age` in seconds for a non-success response, per the
    /// reason it failed.
    pub fn max_age_hint(self) -> Option<u32> {
        match self {
            Status::Internal | Status::ServiceUnavailable => Some(120),
            Status::BadRequest => Some(300),
            _ => None,
        }
    }
}

/// Confirmability, mirroring CoAP's CON/NON distinction: confirmable
/// requests expect a direct response, non-confirmable ones do not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmable {
    Con,
    Non,
}

#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    pub confirmable: Confirmable,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub payload: Vec<u8>,
}

/// Abstracts the underlying CoAP-style transport so this crate never needs
/// a concrete socket implementation.
#[async_trait]
pub trait TrustTransport: Send + Sync {
    async fn broadcast(&self, message: OutgoingMessage) -> Result<(), ExchangeError>;
    async fn request(&self, peer: [u8; 16], message: OutgoingMessage) -> Result<IncomingMessage, ExchangeError>;
    async fn respond(&self, peer: [u8; 16], status: Status, payload: Vec<u8>) -> Result<(), ExchangeError>;
}

fn enforce_payload_cap(payload: &[u8]) -> Result<(), ExchangeError> {
    if payload.len() > MAX_TRUST_PAYLOAD_BYTES {
        return Err(ExchangeError::PayloadTooLarge(payload.len(), MAX_TRUST_PAYLOAD_BYTES));
    }
    Ok(())
}

/// Tracks the bounded pool of concurrently in-flight outbound broadcasts
/// and point-to-point requests, failing fast rather than queueing.
#[derive(Default)]
pub struct TxSlots {
    in_use: usize,
}

impl TxSlots {
    pub fn acquire(&mut self) -> Result<TxGuard<'_>, ExchangeError> {
        if self.in_use >= MAX_TRUST_TX_SLOTS {
            return Err(ExchangeError::TxSlotsExhausted);
        }
        self.in_use += 1;
        Ok(TxGuard { slots: self })
    }
}

pub struct TxGuard<'a> {
    slots: &'a mut TxSlots,
}

impl Drop for TxGuard<'_> {
    fn drop(&mut self) {
        self.slots.in_use = self.slots.in_use.saturating_sub(1);
    }
}

/// Tracks the bounded pool of concurrently in-flight inbound verifications.
#[derive(Default)]
pub struct RxSlots {
    in_use: usize,
}

impl RxSlots {
    pub fn acquire(&mut self) -> Result<RxGuard<'_>, ExchangeError> {
        if self.in_use >= MAX_TRUST_RX_SLOTS {
            return Err(ExchangeError::RxSlotsExhausted);
        }
        self.in_use += 1;
        Ok(RxGuard { slots: self })
    }
}

pub struct RxGuard<'a> {
    slots: &'a mut RxSlots,
}

impl Drop for RxGuard<'_> {
    fn drop(&mut self) {
        self.slots.in_use = self.slots.in_use.saturating_sub(1);
    }
}

/// Periodically broadcasts our own certificate, non-confirmably, bounded
/// by the transmit-slot pool and the single-block payload cap.
pub async fn broadcast_certificate(
    transport: &dyn TrustTransport,
    tx_slots: &mut TxSlots,
    certificate: &Certificate,
) -> Result<(), ExchangeError> {
    let _guard = tx_slots.acquire()?;
    let payload = crate::certificate::encode_certificate(certificate)?;
    enforce_payload_cap(&payload)?;
    transport
        .broadcast(OutgoingMessage {
            confirmable: Confirmable::Non,
            payload,
        })
        .await
}

/// Sends a confirmable point-to-point request for a peer's certificate and
/// returns the decoded response.
pub async fn request_certificate(
    transport: &dyn TrustTransport,
    tx_slots: &mut TxSlots,
    peer: [u8; 16],
) -> Result<Certificate, ExchangeError> {
    let _guard = tx_slots.acquire()?;
    let response = transport
        .request(
            peer,
            OutgoingMessage {
                confirmable: Confirmable::Con,
                payload: Vec::new(),
            },
        )
        .await?;
    enforce_payload_cap(&response.payload)?;
    Ok(crate::certificate::decode_certificate(&response.payload)?)
}

/// Handles an inbound POST carrying a peer's certificate: enforces the
/// payload cap and slot budget, decodes it, and hands the caller a
/// decoded certificate to verify and merge into the keystore.
pub async fn handle_incoming_post(
    rx_slots: &mut RxSlots,
    payload: &[u8],
) -> Result<Certificate, ExchangeError> {
    let _guard = rx_slots.acquire()?;
    enforce_payload_cap(payload)?;
    Ok(crate::certificate::decode_certificate(payload)?)
}

/// One edge's reported trust state, addressed for wire transport.
pub type TrustEntry = (Ipv6Addr, EdgeTrustState);

/// Encodes `[now_secs, {addr: per-edge-state}]`, tagging each per-edge
/// state with the configured trust-model variant so a mismatched
/// receiver refuses it rather than silently misinterpreting the bytes.
pub fn encode_trust_frame(now_secs: u64, entries: &[TrustEntry], kind: TrustModelKind) -> Result<Vec<u8>, ExchangeError> {
    let mut map = Vec::with_capacity(entries.len());
    for (addr, state) in entries {
        let encoded = state.encode(kind)?;
        map.push((Value::Bytes(addr.octets().to_vec()), Value::Bytes(encoded)));
    }
    let frame = Value::Array(vec![Value::Integer(now_secs.into()), Value::Map(map)]);

    let mut out = Vec::new();
    ciborium::ser::into_writer(&frame, &mut out).map_err(|e| ExchangeError::Transport(e.to_string()))?;
    enforce_payload_cap(&out)?;
    Ok(out)
}

/// A decoded `[now_secs, {addr: state}]` trust frame, prior to merging.
pub struct DecodedTrustFrame {
    pub now_secs: u64,
    pub entries: Vec<TrustEntry>,
}

/// Decodes and validates a trust frame's shape; does not merge anything.
pub fn decode_trust_frame(bytes: &[u8], kind: TrustModelKind) -> Result<DecodedTrustFrame, ExchangeError> {
    enforce_payload_cap(bytes)?;

    let value: Value = ciborium::de::from_reader(bytes).map_err(|e| ExchangeError::MalformedFrame(e.to_string()))?;
    let items = match value {
        Value::Array(items) if items.len() == 2 => items,
        _ => return Err(ExchangeError::MalformedFrame("expected [timestamp, {addr: state}]".into())),
    };

    let now_secs = items[0]
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| ExchangeError::MalformedFrame("expected u64 timestamp".into()))?;

    let map = match &items[1] {
        Value::Map(entries) => entries,
        _ => return Err(ExchangeError::MalformedFrame("expected address map".into())),
    };

    let mut entries = Vec::with_capacity(map.len());
    for (key, value) in map {
        let addr_bytes = key
            .as_bytes()
            .ok_or_else(|| ExchangeError::MalformedFrame("expected 16-byte address key".into()))?;
        if addr_bytes.len() != 16 {
            return Err(ExchangeError::MalformedFrame("address must be 16 bytes".into()));
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(addr_bytes);

        let state_bytes = value
            .as_bytes()
            .ok_or_else(|| ExchangeError::MalformedFrame("expected per-edge state bytes".into()))?;
        let state = EdgeTrustState::decode(kind, state_bytes)?;

        entries.push((Ipv6Addr::from(octets), state));
    }

    Ok(DecodedTrustFrame { now_secs, entries })
}

/// Selects which entries a GET-triggered reply should carry: the request
/// body is either empty (full map) or exactly a 16-byte target address.
pub fn select_trust_entries(all: &[TrustEntry], request_body: &[u8]) -> Vec<TrustEntry> {
    if request_body.len() == 16 {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(request_body);
        let target = Ipv6Addr::from(octets);
        all.iter().filter(|(addr, _)| *addr == target).cloned().collect()
    } else {
        all.to_vec()
    }
}

/// Merges a decoded, already-verified trust frame into `sender`'s peer
/// record. Addresses that don't resolve to a locally known edge are
/// skipped without error.
pub fn merge_trust_frame(registry: &mut Registry, sender: Eui64, frame: DecodedTrustFrame) {
    for (addr, state) in frame.entries {
        let Some(handle) = registry.find_edge_by_address(&addr) else {
            continue;
        };
        let Ok(edge) = registry.edge(handle) else {
            continue;
        };
        let edge_eui64 = edge.eui64;
        registry.merge_peer_edge_report(sender, edge_eui64, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingTransport {
        broadcasts: Mutex<Vec<OutgoingMessage>>,
    }

    #[async_trait]
    impl TrustTransport for RecordingTransport {
        async fn broadcast(&self, message: OutgoingMessage) -> Result<(), ExchangeError> {
            self.broadcasts.lock().unwrap().push(message);
            Ok(())
        }

        async fn request(&self, _peer: [u8; 16], _message: OutgoingMessage) -> Result<IncomingMessage, ExchangeError> {
            Ok(IncomingMessage { payload: Vec::new() })
        }

        async fn respond(&self, _peer: [u8; 16], _status: Status, _payload: Vec<u8>) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    fn sample_certificate() -> Certificate {
        use crate::certificate::{StereotypeTags, TbsCertificate};
        use crate::eui64::Eui64;

        Certificate {
            tbs: TbsCertificate {
                serial: 1,
                issuer: Eui64([0; 8]),
                not_before: 0,
                not_after: 1,
                subject: Eui64([1; 8]),
                tags: StereotypeTags::new(1).unwrap(),
                pubkey: [2u8; 64],
            },
            signature: [3u8; 64],
        }
    }

    #[tokio::test]
    async fn broadcast_enforces_tx_slot_budget() {
        let transport = RecordingTransport {
            broadcasts: Mutex::new(Vec::new()),
        };
        let mut slots = TxSlots::default();
        let cert = sample_certificate();

        for _ in 0..MAX_TRUST_TX_SLOTS {
            let guard = slots.acquire().unwrap();
            std::mem::forget(guard);
        }

        let result = broadcast_certificate(&transport, &mut slots, &cert).await;
        assert!(matches!(result, Err(ExchangeError::TxSlotsExhausted)));
    }

    #[tokio::test]
    async fn rejects_oversized_incoming_payload() {
        let mut slots = RxSlots::default();
        let oversized = vec![0u8; MAX_TRUST_PAYLOAD_BYTES + 1];
        let result = handle_incoming_post(&mut slots, &oversized).await;
        assert!(matches!(result, Err(ExchangeError::PayloadTooLarge(_, _))));
    }

    #[test]
    fn non_success_statuses_carry_max_age_hints() {
        assert_eq!(Status::ServiceUnavailable.max_age_hint(), Some(120));
        assert_eq!(Status::BadRequest.max_age_hint(), Some(300));
        assert_eq!(Status::Created.max_age_hint(), None);
    }

    #[test]
    fn trust_frame_round_trips_and_rejects_variant_mismatch() {
        use crate::trust_model::Beta;

        let e1: Ipv6Addr = "fd00::1".parse().unwrap();
        let e2: Ipv6Addr = "fd00::2".parse().unwrap();
        let entries = vec![
            (
                e1,
                EdgeTrustState::Reputation {
                    task_submission: Beta::new(3, 1),
                    task_result: Beta::default(),
                },
            ),
            (
                e2,
                EdgeTrustState::Reputation {
                    task_submission: Beta::new(1, 2),
                    task_result: Beta::default(),
                },
            ),
        ];

        let encoded = encode_trust_frame(1_000, &entries, TrustModelKind::Reputation).unwrap();
        let decoded = decode_trust_frame(&encoded, TrustModelKind::Reputation).unwrap();

        assert_eq!(decoded.now_secs, 1_000);
        assert_eq!(decoded.entries.len(), 2);

        let mismatch = decode_trust_frame(&encoded, TrustModelKind::Badlisted);
        assert!(matches!(mismatch, Err(ExchangeError::TrustModel(TrustModelError::VariantMismatch { .. }))));
    }

    #[test]
    fn select_trust_entries_filters_by_target_address() {
        let e1: Ipv6Addr = "fd00::1".parse().unwrap();
        let e2: Ipv6Addr = "fd00::2".parse().unwrap();
        let entries = vec![
            (e1, EdgeTrustState::new(TrustModelKind::None)),
            (e2, EdgeTrustState::new(TrustModelKind::None)),
        ];

        let full = select_trust_entries(&entries, &[]);
        assert_eq!(full.len(), 2);

        let targeted = select_trust_entries(&entries, &e1.octets());
        assert_eq!(targeted.len(), 1);
        assert_eq!(targeted[0].0, e1);
    }

    #[test]
    fn merge_trust_frame_skips_unknown_edges_and_merges_known_ones() {
        use crate::trust_model::Beta;

        let mut registry = Registry::new(TrustModelKind::Reputation);
        let known_addr: Ipv6Addr = "fd00::1".parse().unwrap();
        let unknown_addr: Ipv6Addr = "fd00::99".parse().unwrap();
        let known_edge = Eui64([1u8; 8]);
        let sender = Eui64([0xaa; 8]);

        registry.add_edge(known_edge, known_addr).unwrap();
        registry.record_peer(sender, "fd00::aa".parse().unwrap());

        let reported_state = EdgeTrustState::Reputation {
            task_submission: Beta::new(3, 1),
            task_result: Beta::default(),
        };
        let frame = DecodedTrustFrame {
            now_secs: 1,
            entries: vec![
                (known_addr, reported_state.clone()),
                (unknown_addr, EdgeTrustState::new(TrustModelKind::Reputation)),
            ],
        };

        merge_trust_frame(&mut registry, sender, frame);

        let record = registry.peer(&sender).unwrap();
        assert_eq!(record.edge(&known_edge), Some(&reported_state));
        assert_eq!(record.edge(&Eui64([2u8; 8])), None);
    }
}
