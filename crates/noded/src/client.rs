//! Client-side trust state: the set of known edges and their capabilities,
//! this client's view of each edge's trust, and the selection policy used
//! to pick one when a capability is needed. The concrete gossip broker and
//! CoAP-style transport stay abstracted behind `trust-core`'s traits, the
//! same way `edged::server` keeps them out of this crate.

use std::net::Ipv6Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::thread_rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use trust_core::certificate::{decode_certificate, CertificateError};
use trust_core::choose::{self, ChooseError, ChooseStrategy, DEFAULT_RECONSIDER_THRESHOLD};
use trust_core::crypto::{PrivateKeyBytes, PublicKeyBytes};
use trust_core::eui64::Eui64;
use trust_core::exchange::{self, ExchangeError, TrustEntry};
use trust_core::gossip::{GossipAction, CapabilityEvent};
use trust_core::keystore::{Keystore, KeystoreError};
use trust_core::registry::{Registry, RegistryError};
use trust_core::stereotype::StereotypeTable;
use trust_core::trust_model::{
    ChallengeResponseOutcome, EdgeTrustState, TaskResultOutcome, TaskSubmissionOutcome,
    ThroughputSample, TrustModelKind, WeightTable,
};
use trust_core::work_queue::CryptoWorkQueue;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("keystore error: {0}")]
    Keystore(#[from] KeystoreError),
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
    #[error("choose error: {0}")]
    Choose(#[from] ChooseError),
    #[error("unknown edge {0}")]
    UnknownEdge(Eui64),
}

/// Owns every piece of client-side trust state for one fog-trust client:
/// known edges and their capabilities (`Registry`), verified peer
/// certificates and derived session keys (`Keystore`), device-class priors
/// (`StereotypeTable`), and the per-edge device class learned from each
/// edge's certificate, used to look a prior up.
pub struct NodeClient {
    eui64: Eui64,
    trust_model: TrustModelKind,
    choose_strategy: ChooseStrategy,
    weights: WeightTable,
    registry: Mutex<Registry>,
    // Keystore verification holds this lock across an await point (the
    // crypto work queue round-trip), which parking_lot's synchronous mutex
    // cannot do safely; tokio's async mutex is built for that.
    keystore: tokio::sync::Mutex<Keystore>,
    stereotypes: Mutex<StereotypeTable>,
    device_classes: Mutex<std::collections::HashMap<Eui64, trust_core::certificate::StereotypeTags>>,
    crypto_queue: CryptoWorkQueue,
}

impl NodeClient {
    pub fn new(
        config: &Config,
        our_private_key: PrivateKeyBytes,
        root_public_key: PublicKeyBytes,
    ) -> anyhow::Result<Self> {
        let eui64 = Eui64::parse_hex(&config.eui64).ok_or_else(|| anyhow::anyhow!("invalid eui64"))?;
        let trust_model = config.trust_model_kind()?;
        let choose_strategy = config.choose_strategy()?;

        Ok(Self {
            eui64,
            trust_model,
            choose_strategy,
            weights: WeightTable::default(),
            registry: Mutex::new(Registry::new(trust_model)),
            keystore: tokio::sync::Mutex::new(Keystore::new(eui64, our_private_key, root_public_key, config.root_address)),
            stereotypes: Mutex::new(StereotypeTable::new(trust_model)),
            device_classes: Mutex::new(std::collections::HashMap::new()),
            crypto_queue: CryptoWorkQueue::spawn(),
        })
    }

    /// Handles an announce: verifies the embedded certificate against the
    /// root, publishes it in the keystore, registers the edge, and records
    /// its device class for later stereotype lookups.
    pub async fn handle_announce(&self, address: Ipv6Addr, payload: &[u8]) -> Result<(), ClientError> {
        let cert = decode_certificate(payload)?;
        let eui64 = cert.tbs.subject;
        let tags = cert.tbs.tags;

        let verified = {
            let mut keystore = self.keystore.lock().await;
            keystore.add_unverified(cert, address, &self.crypto_queue).await?
        };

        if verified.is_none() {
            warn!(%eui64, "announce dropped: certificate signature invalid");
            return Ok(());
        }

        self.registry.lock().add_edge(eui64, address)?;
        self.device_classes.lock().insert(eui64, tags);

        let mut stereotypes = self.stereotypes.lock();
        if stereotypes.request(tags).unwrap_or(false) {
            debug!(device_class = tags.device_class, "stereotype prior requested");
        }

        info!(%eui64, %address, "edge announced");
        Ok(())
    }

    /// Handles a parsed gossip event for everything except `Announce`
    /// (which needs the raw certificate payload, handled separately).
    pub fn handle_capability_event(&self, event: &CapabilityEvent) -> Result<(), ClientError> {
        let mut registry = self.registry.lock();
        match &event.action {
            GossipAction::Announce => Ok(()),
            GossipAction::Unannounce => {
                if let Some(handle) = registry.find_edge_by_eui64(&event.eui64) {
                    registry.mark_edge_inactive(handle)?;
                }
                Ok(())
            }
            GossipAction::CapabilityAdd { capability } => {
                if let Some(handle) = registry.find_edge_by_eui64(&event.eui64) {
                    registry.add_capability(handle, capability.clone())?;
                }
                Ok(())
            }
            GossipAction::CapabilityRemove { capability } => {
                if let Some(edge_handle) = registry.find_edge_by_eui64(&event.eui64) {
                    if let Some(cap_handle) = registry.find_capability(edge_handle, capability) {
                        registry.capability_mut(cap_handle)?.active = false;
                    }
                }
                Ok(())
            }
        }
    }

    /// Computes a capability's trust value, blending the edge's direct
    /// evidence with a stereotype prior (if one is resolved) and the
    /// average reputation scalar reported for this edge across every peer
    /// we have a trust report from (`None` when no peer has reported on it
    /// yet, which falls back to local evidence only).
    fn capability_value(&self, registry: &Registry, edge_eui64: Eui64, capability: &str) -> f64 {
        let Some(edge_handle) = registry.find_edge_by_eui64(&edge_eui64) else {
            return 0.0;
        };
        let Ok(edge) = registry.edge(edge_handle) else {
            return 0.0;
        };
        let Some(cap_handle) = registry.find_capability(edge_handle, capability) else {
            return 0.0;
        };
        let Ok(cap) = registry.capability(cap_handle) else {
            return 0.0;
        };

        let stereotype = self
            .device_classes
            .lock()
            .get(&edge_eui64)
            .copied()
            .and_then(|tags| self.stereotypes.lock().find(tags).cloned());

        let peer_reputation = peer_reputation_for(registry, edge_eui64);

        cap.trust.value(&edge.trust, stereotype.as_ref(), peer_reputation, &self.weights)
    }

    /// Selects an edge offering `capability` according to the configured
    /// choose strategy, returning its address. `now_secs` drives the
    /// throughput-bad reconsideration filter shared by every strategy.
    pub fn select_edge(&self, capability: &str, now_secs: u64) -> Result<Ipv6Addr, ClientError> {
        let registry = self.registry.lock();
        let mut rng = thread_rng();

        let handle = choose::choose_edge(
            &registry,
            capability,
            self.choose_strategy,
            |handle| {
                let eui64 = registry.edge(handle).map(|e| e.eui64).unwrap_or(Eui64([0; 8]));
                self.capability_value(&registry, eui64, capability)
            },
            now_secs,
            DEFAULT_RECONSIDER_THRESHOLD,
            &mut rng,
        )?;

        Ok(registry.edge(handle)?.address)
    }

    /// Records a task-submission outcome against `edge_eui64`'s own trust
    /// state and, when a bad submission came back, against `capability`'s
    /// HMM history as `SubmissionTimedOut` — the HMM variant lives on the
    /// capability, not the edge, so it only ever sees evidence routed here.
    pub fn apply_task_submission(
        &self,
        edge_eui64: Eui64,
        capability: &str,
        outcome: TaskSubmissionOutcome,
    ) -> Result<(), ClientError> {
        let mut registry = self.registry.lock();
        let edge_handle = registry
            .find_edge_by_eui64(&edge_eui64)
            .ok_or(ClientError::UnknownEdge(edge_eui64))?;
        registry.edge_mut(edge_handle)?.trust.apply_task_submission(outcome);
        if let Some(cap_handle) = registry.find_capability(edge_handle, capability) {
            registry.capability_mut(cap_handle)?.trust.apply_task_submission(outcome);
        }
        Ok(())
    }

    /// Records a task-result outcome against `edge_eui64`'s own trust state
    /// and, when the result was anything short of success, against
    /// `capability`'s HMM history as `ResponseTimedOut`.
    pub fn apply_task_result(
        &self,
        edge_eui64: Eui64,
        capability: &str,
        outcome: TaskResultOutcome,
    ) -> Result<(), ClientError> {
        let mut registry = self.registry.lock();
        let edge_handle = registry
            .find_edge_by_eui64(&edge_eui64)
            .ok_or(ClientError::UnknownEdge(edge_eui64))?;
        registry.edge_mut(edge_handle)?.trust.apply_task_result(outcome);
        if let Some(cap_handle) = registry.find_capability(edge_handle, capability) {
            registry.capability_mut(cap_handle)?.trust.apply_task_result(outcome);
        }
        Ok(())
    }

    pub fn apply_challenge_response(&self, edge_eui64: Eui64, outcome: ChallengeResponseOutcome) -> Result<(), ClientError> {
        let mut registry = self.registry.lock();
        let handle = registry
            .find_edge_by_eui64(&edge_eui64)
            .ok_or(ClientError::UnknownEdge(edge_eui64))?;
        registry.edge_mut(handle)?.trust.apply_challenge_response(outcome);
        Ok(())
    }

    pub fn apply_result_quality(&self, edge_eui64: Eui64, capability: &str, good: bool) -> Result<(), ClientError> {
        let mut registry = self.registry.lock();
        let edge_handle = registry
            .find_edge_by_eui64(&edge_eui64)
            .ok_or(ClientError::UnknownEdge(edge_eui64))?;
        let cap_handle = registry
            .find_capability(edge_handle, capability)
            .ok_or(ClientError::UnknownEdge(edge_eui64))?;
        registry.capability_mut(cap_handle)?.trust.apply_result_quality(good);
        Ok(())
    }

    pub fn apply_throughput(
        &self,
        edge_eui64: Eui64,
        capability: &str,
        sample: ThroughputSample,
        global: &mut trust_core::trust_model::GlobalThroughputStats,
        now_secs: u64,
    ) -> Result<(), ClientError> {
        let mut registry = self.registry.lock();
        let edge_handle = registry
            .find_edge_by_eui64(&edge_eui64)
            .ok_or(ClientError::UnknownEdge(edge_eui64))?;
        let cap_handle = registry
            .find_capability(edge_handle, capability)
            .ok_or(ClientError::UnknownEdge(edge_eui64))?;
        registry
            .capability_mut(cap_handle)?
            .trust
            .apply_throughput(sample, global, now_secs);
        Ok(())
    }

    /// Builds the trust frame this client would broadcast: its own view of
    /// every known edge's trust state.
    pub fn build_trust_frame(&self, now_secs: u64) -> Result<Vec<u8>, ClientError> {
        let registry = self.registry.lock();
        let entries: Vec<TrustEntry> = registry.iter_edges().map(|e| (e.address, e.trust.clone())).collect();
        Ok(exchange::encode_trust_frame(now_secs, &entries, self.trust_model)?)
    }

    /// Decodes and merges a peer's trust broadcast into our peer records,
    /// recording the peer's address on first contact.
    pub fn receive_trust_frame(&self, sender: Eui64, sender_address: Ipv6Addr, bytes: &[u8]) -> Result<(), ClientError> {
        let frame = exchange::decode_trust_frame(bytes, self.trust_model)?;
        let mut registry = self.registry.lock();
        registry.record_peer_at(sender, sender_address, frame.now_secs);
        exchange::merge_trust_frame(&mut registry, sender, frame);
        Ok(())
    }

    /// Looks up a cached peer certificate, triggering a `request_public_key`
    /// round-trip when we don't have it cached yet.
    pub async fn ensure_peer_key(&self, addr: Ipv6Addr) -> bool {
        let mut keystore = self.keystore.lock().await;
        if keystore.find_by_address(addr).is_some() {
            return true;
        }
        keystore.request_public_key(addr).unwrap_or(false)
    }

    pub fn eui64(&self) -> Eui64 {
        self.eui64
    }
}

/// Averages the reputation scalar every peer has reported for `edge_eui64`,
/// skipping peers whose report carries no reputation signal (wrong trust
/// model variant, or no report yet). `None` when nobody has reported.
fn peer_reputation_for(registry: &Registry, edge_eui64: Eui64) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for peer in registry.iter_peers() {
        if let Some(scalar) = peer.edge(&edge_eui64).and_then(EdgeTrustState::reputation_scalar) {
            sum += scalar;
            count += 1;
        }
    }
    (count > 0).then(|| sum / count as f64)
}

pub type SharedNodeClient = Arc<NodeClient>;
