//! edged server loop: owns this edge's certificate, keystore, and the
//! announce/capability publish schedule. The concrete pub/sub broker is
//! abstracted behind [`GossipPublisher`] — wiring a real MQTT client in
//! is an integration concern outside this crate's scope.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use trust_core::certificate::{encode_certificate, Certificate, CertificateError};
use trust_core::crypto::{PrivateKeyBytes, PublicKeyBytes};
use trust_core::eui64::Eui64;
use trust_core::gossip::{
    announce_topic, capability_add_topic, unannounce_topic, CapabilityPublisher, PublishSchedule,
};
use trust_core::keystore::Keystore;
use trust_core::work_queue::CryptoWorkQueue;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Abstracts the pub/sub broker connection so this crate never depends on
/// a concrete MQTT client.
#[async_trait]
pub trait GossipPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ServerError>;
}

/// Logs what would be published instead of touching a network socket;
/// the default when no broker has been wired in yet.
pub struct LoggingPublisher;

#[async_trait]
impl GossipPublisher for LoggingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ServerError> {
        debug!(topic, bytes = payload.len(), "publish (no broker configured)");
        Ok(())
    }
}

const CAPABILITY_PUBLISH_PERIOD: Duration = Duration::from_secs(5);

pub struct Server {
    eui64: Eui64,
    address: Ipv6Addr,
    certificate: Certificate,
    our_private_key: PrivateKeyBytes,
    keystore: Mutex<Keystore>,
    crypto_queue: CryptoWorkQueue,
    capabilities: Vec<String>,
    publisher: Arc<dyn GossipPublisher>,
    announce_schedule: Mutex<PublishSchedule>,
}

impl Server {
    pub fn new(
        config: &Config,
        certificate: Certificate,
        our_private_key: PrivateKeyBytes,
        root_public_key: PublicKeyBytes,
        publisher: Arc<dyn GossipPublisher>,
    ) -> anyhow::Result<Self> {
        let eui64 = Eui64::parse_hex(&config.eui64).ok_or_else(|| anyhow::anyhow!("invalid eui64"))?;
        let keystore = Keystore::new(eui64, our_private_key, root_public_key, config.root_address);

        Ok(Self {
            eui64,
            address: config.address,
            certificate,
            our_private_key,
            keystore: Mutex::new(keystore),
            crypto_queue: CryptoWorkQueue::spawn(),
            capabilities: config.capabilities.clone(),
            publisher,
            announce_schedule: Mutex::new(PublishSchedule::new()),
        })
    }

    /// Handles an inbound `GET /key` request: signs the request body (the
    /// requester's address) with our own key and returns our certificate
    /// alongside that signature, as a `[cert || signature]` pair.
    pub async fn respond_to_key_request(&self, request_body: Vec<u8>) -> anyhow::Result<(Certificate, [u8; 64])> {
        let rx = self
            .crypto_queue
            .enqueue_sign("edged-key-response", self.our_private_key, request_body)
            .map_err(|e| anyhow::anyhow!(e))?;
        let signature = rx.await.map_err(|_| anyhow::anyhow!("crypto work queue closed"))??;
        Ok((self.certificate.clone(), signature))
    }

    /// Looks up a cached peer certificate, triggering a `request_public_key`
    /// round-trip when we don't have it yet (per keystore fail-flow).
    pub fn ensure_peer_key(&self, addr: Ipv6Addr) -> bool {
        let mut keystore = self.keystore.lock();
        if keystore.find_by_address(addr).is_some() {
            return true;
        }
        keystore.request_public_key(addr).unwrap_or(false)
    }

    /// Forces the announce cadence back to the fast interval, e.g. after
    /// connectivity to the broker is regained.
    pub fn force_fast_cadence(&self) {
        self.announce_schedule.lock().force_fast_cadence();
    }

    async fn publish_announce(&self) -> Result<(), ServerError> {
        let payload = encode_certificate(&self.certificate)?;
        self.publisher.publish(&announce_topic(&self.eui64), payload).await?;
        info!(eui64 = %self.eui64, "announced");
        Ok(())
    }

    async fn publish_unannounce(&self) -> Result<(), ServerError> {
        let mut out = Vec::new();
        let value = ciborium::value::Value::Array(vec![ciborium::value::Value::Bytes(
            self.address.octets().to_vec(),
        )]);
        ciborium::ser::into_writer(&value, &mut out).map_err(|e| ServerError::Publish(e.to_string()))?;
        self.publisher.publish(&unannounce_topic(&self.eui64), out).await?;
        info!(eui64 = %self.eui64, "unannounced");
        Ok(())
    }

    async fn publish_capability(&self, name: &str) -> Result<(), ServerError> {
        let cert_bytes = encode_certificate(&self.certificate)?;
        let value = ciborium::value::Value::Array(vec![
            ciborium::value::Value::Bool(true),
            ciborium::value::Value::Bytes(cert_bytes),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&value, &mut out).map_err(|e| ServerError::Publish(e.to_string()))?;
        self.publisher
            .publish(&capability_add_topic(&self.eui64, name), out)
            .await?;
        debug!(eui64 = %self.eui64, capability = name, "capability published");
        Ok(())
    }

    /// Runs the publisher loop: announces on its decaying cadence, then
    /// round-robins capability publishes at a short fixed period.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(eui64 = %self.eui64, address = %self.address, "edged starting");

        let mut capability_publisher = CapabilityPublisher::new(self.capabilities.clone());
        let mut ticker = interval(CAPABILITY_PUBLISH_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let now = Instant::now();
            let due = {
                let schedule = self.announce_schedule.lock();
                schedule.due(now)
            };
            if due {
                if let Err(e) = self.publish_announce().await {
                    warn!(error = %e, "announce publish failed");
                } else {
                    self.announce_schedule.lock().record_fired(now);
                }
            }

            if let Some(name) = capability_publisher.next() {
                if let Err(e) = self.publish_capability(&name.to_string()).await {
                    warn!(error = %e, "capability publish failed");
                }
            }

            ticker.tick().await;
        }
    }

    /// Publishes unannounce and suspends further capability publishing;
    /// called when the daemon is told to stop serving this edge.
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.publish_unannounce().await?;
        Ok(())
    }
}
