//! Serialises sign/verify operations across every caller through a single
//! cooperative task, modelling the one hardware accelerator shared between
//! subsystems.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::crypto::{self, CryptoError, PrivateKeyBytes, PublicKeyBytes, SignatureBytes};
use crate::limits::CRYPTO_QUEUE_DEPTH;

#[derive(Debug, Error)]
pub enum WorkQueueError {
    #[error("crypto work queue is full")]
    QueueFull,
    #[error("crypto backend error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("the work queue task has shut down")]
    Closed,
}

/// Identifies the subsystem that originated a queued crypto operation, used
/// only for logging/attribution; completions are delivered directly to the
/// originator's oneshot channel rather than routed by this id.
pub type SubsystemId = &'static str;

struct SignItem {
    subsystem: SubsystemId,
    private_key: PrivateKeyBytes,
    message: Vec<u8>,
    reply: oneshot::Sender<Result<SignatureBytes, WorkQueueError>>,
}

struct VerifyItem {
    subsystem: SubsystemId,
    public_key: PublicKeyBytes,
    message: Vec<u8>,
    signature: SignatureBytes,
    reply: oneshot::Sender<Result<bool, WorkQueueError>>,
}

/// Handle used by subsystems to enqueue crypto work. Cheaply cloneable.
#[derive(Clone)]
pub struct CryptoWorkQueue {
    sign_tx: mpsc::Sender<SignItem>,
    verify_tx: mpsc::Sender<VerifyItem>,
}

impl CryptoWorkQueue {
    /// Spawns the single cooperative task that drains both queues and
    /// returns a handle to enqueue work against it.
    pub fn spawn() -> Self {
        let (sign_tx, mut sign_rx) = mpsc::channel::<SignItem>(CRYPTO_QUEUE_DEPTH);
        let (verify_tx, mut verify_rx) = mpsc::channel::<VerifyItem>(CRYPTO_QUEUE_DEPTH);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(item) = sign_rx.recv() => {
                        debug!(subsystem = item.subsystem, "draining sign item");
                        let result = crypto::ecdsa_sign(&item.private_key, &item.message)
                            .map_err(WorkQueueError::from);
                        if item.reply.send(result).is_err() {
                            warn!(subsystem = item.subsystem, "originator gone before sign completed");
                        }
                    }
                    Some(item) = verify_rx.recv() => {
                        debug!(subsystem = item.subsystem, "draining verify item");
                        let result = crypto::ecdsa_verify(&item.public_key, &item.message, &item.signature)
                            .map_err(WorkQueueError::from);
                        if item.reply.send(result).is_err() {
                            warn!(subsystem = item.subsystem, "originator gone before verify completed");
                        }
                    }
                    else => break,
                }
            }
        });

        Self { sign_tx, verify_tx }
    }

    /// Enqueues a sign operation; fails fast with `QueueFull` rather than
    /// waiting for room, leaving "try again later" to the caller.
    pub fn enqueue_sign(
        &self,
        subsystem: SubsystemId,
        private_key: PrivateKeyBytes,
        message: Vec<u8>,
    ) -> Result<oneshot::Receiver<Result<SignatureBytes, WorkQueueError>>, WorkQueueError> {
        let (reply, rx) = oneshot::channel();
        let item = SignItem {
            subsystem,
            private_key,
            message,
            reply,
        };
        self.sign_tx.try_send(item).map_err(|_| WorkQueueError::QueueFull)?;
        Ok(rx)
    }

    /// Enqueues a verify operation; fails fast with `QueueFull` when full.
    pub fn enqueue_verify(
        &self,
        subsystem: SubsystemId,
        public_key: PublicKeyBytes,
        message: Vec<u8>,
        signature: SignatureBytes,
    ) -> Result<oneshot::Receiver<Result<bool, WorkQueueError>>, WorkQueueError> {
        let (reply, rx) = oneshot::channel();
        let item = VerifyItem {
            subsystem,
            public_key,
            message,
            signature,
            reply,
        };
        self.verify_tx
            .try_send(item)
            .map_err(|_| WorkQueueError::QueueFull)?;
        Ok(rx)
    }
}

/// Tracks at most one in-flight operation per originating subsystem, used by
/// callers that need to know whether they may enqueue more work (mirrors the
/// "exactly one operation in flight" rule at the caller's own granularity).
#[derive(Default)]
pub struct InFlightTracker {
    inflight: HashMap<SubsystemId, u32>,
}

impl InFlightTracker {
    pub fn begin(&mut self, subsystem: SubsystemId) {
        *self.inflight.entry(subsystem).or_insert(0) += 1;
    }

    pub fn complete(&mut self, subsystem: SubsystemId) {
        if let Some(count) = self.inflight.get_mut(subsystem) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn count(&self, subsystem: SubsystemId) -> u32 {
        self.inflight.get(subsystem).copied().unwrap_or(0)
    }
}
