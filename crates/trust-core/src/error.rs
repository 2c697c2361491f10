use thiserror::Error;

use crate::{
    certificate::CertificateError, choose::ChooseError, crypto::CryptoError,
    exchange::ExchangeError, gossip::GossipError, keystore::KeystoreError,
    registry::RegistryError, stereotype::StereotypeError, trust_model::TrustModelError,
    work_queue::WorkQueueError,
};

/// Aggregated error type for call sites that do not care which subsystem failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("work queue error: {0}")]
    WorkQueue(#[from] WorkQueueError),

    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("keystore error: {0}")]
    Keystore(#[from] KeystoreError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("trust model error: {0}")]
    TrustModel(#[from] TrustModelError),

    #[error("stereotype error: {0}")]
    Stereotype(#[from] StereotypeError),

    #[error("gossip error: {0}")]
    Gossip(#[from] GossipError),

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("choose-edge error: {0}")]
    Choose(#[from] ChooseError),
}

pub type Result<T> = std::result::Result<T, Error>;
