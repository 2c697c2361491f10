//! A reusable boolean lock with an auto-release timer, used to bound the
//! lifetime of in-flight request state (e.g. a single outstanding
//! `request_public_key`).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// A one-shot boolean lock that auto-unlocks after `duration` and posts an
/// unlock event on its channel if nobody released it first.
pub struct TimedUnlock {
    name: &'static str,
    duration: Duration,
    locked: Arc<Mutex<bool>>,
    timer: Option<JoinHandle<()>>,
    unlock_tx: mpsc::Sender<()>,
}

impl TimedUnlock {
    pub fn new(name: &'static str, duration: Duration) -> (Self, mpsc::Receiver<()>) {
        let (unlock_tx, unlock_rx) = mpsc::channel(1);
        (
            Self {
                name,
                duration,
                locked: Arc::new(Mutex::new(false)),
                timer: None,
                unlock_tx,
            },
            unlock_rx,
        )
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }

    /// Locks and arms the auto-release timer, replacing any previous timer.
    pub fn lock(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }

        *self.locked.lock() = true;

        let locked = self.locked.clone();
        let duration = self.duration;
        let name = self.name;
        let unlock_tx = self.unlock_tx.clone();

        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let was_locked = {
                let mut guard = locked.lock();
                let was_locked = *guard;
                *guard = false;
                was_locked
            };
            if was_locked {
                warn!(lock = name, ?duration, "auto-unlocked after timeout");
                let _ = unlock_tx.send(()).await;
            }
        }));
    }

    /// Releases the lock explicitly on normal completion, cancelling the timer.
    pub fn unlock(&mut self) {
        *self.locked.lock() = false;
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

impl Drop for TimedUnlock {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}
