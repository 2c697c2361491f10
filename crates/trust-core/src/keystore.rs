//! Bounded table of verified peer certificates, their derived session keys,
//! and the pin/evict discipline that keeps in-flight operations from
//! dangling.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::time::Duration;

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::address::{normalize_address, DEFAULT_GLOBAL_PREFIX};
use crate::certificate::{tbs_signing_bytes, Certificate, CertificateError};
use crate::crypto::{self, CryptoError, PrivateKeyBytes, PublicKeyBytes};
use crate::eui64::Eui64;
use crate::limits::MAX_KEYSTORE_ENTRIES;
use crate::timed_unlock::TimedUnlock;
use crate::work_queue::{CryptoWorkQueue, WorkQueueError};

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("keystore is full and no evictable entry was found")]
    OutOfMemory,
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("work queue error: {0}")]
    WorkQueue(#[from] WorkQueueError),
    #[error("signature invalid for certificate issuer")]
    SignatureInvalid,
    #[error("a public key request is already in flight for a different address")]
    RequestInFlight,
    #[error("unknown keystore handle")]
    UnknownHandle,
    #[error("secure-channel seal/open failed")]
    SealFailed,
}

/// Secure-channel context derived once both the issuer signature has
/// verified and the ECDH shared secret has been computed.
#[derive(Clone, Debug)]
pub struct SecureChannelContext {
    pub algorithm: &'static str,
    pub sender_id: [u8; 8],
    pub receiver_id: [u8; 8],
    pub key: [u8; 32],
}

impl SecureChannelContext {
    /// Seals `plaintext` under this channel's key. `nonce` must never repeat
    /// for a given key; callers own nonce bookkeeping (e.g. a per-direction
    /// message counter).
    pub fn seal(&self, nonce: &[u8; 12], plaintext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&self.key));
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| KeystoreError::SealFailed)
    }

    /// Opens a payload sealed with [`seal`](Self::seal) under the same nonce.
    pub fn open(&self, nonce: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| KeystoreError::SealFailed)
    }
}

pub const SECURE_CHANNEL_ALGORITHM: &str = "AES-CCM-16-64-128";

#[derive(Clone, Debug)]
pub struct KeystoreEntry {
    pub cert: Certificate,
    pub address: Ipv6Addr,
    pub shared_secret: Option<[u8; 32]>,
    pub secure_channel: Option<SecureChannelContext>,
    inserted_at: u32,
    pin_count: u16,
}

impl KeystoreEntry {
    /// Ready for protected traffic once signature-verified (always true by
    /// the time it is stored) and the shared secret has been derived.
    pub fn is_ready(&self) -> bool {
        self.shared_secret.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeystoreHandle {
    slot: usize,
    generation: u32,
}

struct Slot {
    entry: Option<KeystoreEntry>,
    generation: u32,
}

struct PendingKeyRequest {
    address: Ipv6Addr,
    lock: TimedUnlock,
}

pub struct Keystore {
    slots: Vec<Slot>,
    by_eui64: HashMap<Eui64, usize>,
    by_address: HashMap<Ipv6Addr, usize>,
    our_eui64: Eui64,
    our_private_key: PrivateKeyBytes,
    root_pubkey: PublicKeyBytes,
    root_address: Ipv6Addr,
    global_prefix: [u8; 2],
    age_clock: u32,
    pending_request: Option<PendingKeyRequest>,
}

impl Keystore {
    pub fn new(
        our_eui64: Eui64,
        our_private_key: PrivateKeyBytes,
        root_pubkey: PublicKeyBytes,
        root_address: Ipv6Addr,
    ) -> Self {
        let mut slots = Vec::with_capacity(MAX_KEYSTORE_ENTRIES);
        for _ in 0..MAX_KEYSTORE_ENTRIES {
            slots.push(Slot {
                entry: None,
                generation: 0,
            });
        }

        Self {
            slots,
            by_eui64: HashMap::new(),
            by_address: HashMap::new(),
            our_eui64,
            our_private_key,
            root_pubkey,
            root_address,
            global_prefix: DEFAULT_GLOBAL_PREFIX,
            age_clock: 0,
            pending_request: None,
        }
    }

    /// Advances the internal age clock; callers tick this once per unit of
    /// elapsed time so eviction can compare age-deltas.
    pub fn tick(&mut self) {
        self.age_clock = self.age_clock.wrapping_add(1);
    }

    fn normalize(&self, addr: Ipv6Addr) -> Ipv6Addr {
        normalize_address(addr, self.global_prefix)
    }

    pub fn find_by_eui64(&self, eui64: Eui64) -> Option<&KeystoreEntry> {
        let slot = *self.by_eui64.get(&eui64)?;
        self.slots[slot].entry.as_ref()
    }

    pub fn find_by_address(&self, addr: Ipv6Addr) -> Option<&KeystoreEntry> {
        let addr = self.normalize(addr);
        let slot = *self.by_address.get(&addr)?;
        self.slots[slot].entry.as_ref()
    }

    /// Returns the root's public key when `addr` is the root's own endpoint,
    /// otherwise looks up a cached peer entry.
    pub fn find_pubkey(&self, addr: Ipv6Addr) -> Option<PublicKeyBytes> {
        let addr = self.normalize(addr);
        if addr == self.normalize(self.root_address) {
            return Some(self.root_pubkey);
        }
        self.find_by_address(addr).map(|e| e.cert.tbs.pubkey)
    }

    fn verify_signature(&self, cert: &Certificate) -> Result<bool, KeystoreError> {
        let signing_bytes = tbs_signing_bytes(&cert.tbs)?;
        Ok(crypto::ecdsa_verify(&self.root_pubkey, &signing_bytes, &cert.signature)?)
    }

    fn find_evictable(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.entry
                    .as_ref()
                    .is_some_and(|e| e.pin_count == 0)
            })
            .max_by_key(|(_, s)| {
                let entry = s.entry.as_ref().unwrap();
                self.age_clock.wrapping_sub(entry.inserted_at)
            })
            .map(|(idx, _)| idx)
    }

    fn allocate_slot(&mut self) -> Result<usize, KeystoreError> {
        if let Some(idx) = self.slots.iter().position(|s| s.entry.is_none()) {
            return Ok(idx);
        }
        self.find_evictable().ok_or(KeystoreError::OutOfMemory).map(|idx| {
            if let Some(old) = self.slots[idx].entry.take() {
                self.by_eui64.remove(&Eui64::from_bytes(*old.cert.tbs.subject.as_bytes()));
                self.by_address.remove(&old.address);
                self.slots[idx].generation = self.slots[idx].generation.wrapping_add(1);
            }
            idx
        })
    }

    fn derive_secure_channel(&self, shared_secret: [u8; 32], peer_eui64: Eui64) -> SecureChannelContext {
        let mut sender_id = [0u8; 8];
        let mut receiver_id = [0u8; 8];
        sender_id.copy_from_slice(&self.our_eui64.as_bytes()[..]);
        receiver_id.copy_from_slice(&peer_eui64.as_bytes()[..]);

        // Never key the channel with the raw ECDH output. Bind it to both
        // EUI-64s via HKDF, in a canonical (sorted) order so the two ends of
        // the channel — who disagree on which of them is "sender" — derive
        // the same key.
        let (lo, hi) = if sender_id <= receiver_id {
            (sender_id, receiver_id)
        } else {
            (receiver_id, sender_id)
        };
        let mut info = [0u8; 16];
        info[..8].copy_from_slice(&lo);
        info[8..].copy_from_slice(&hi);
        let mut key = [0u8; 32];
        Hkdf::<Sha256>::new(None, &shared_secret)
            .expand(&info, &mut key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");

        SecureChannelContext {
            algorithm: SECURE_CHANNEL_ALGORITHM,
            sender_id,
            receiver_id,
            key,
        }
    }

    fn insert_verified(&mut self, cert: Certificate, address: Ipv6Addr) -> Result<KeystoreHandle, KeystoreError> {
        let address = self.normalize(address);
        let eui64 = cert.tbs.subject;

        if let Some(&slot) = self.by_eui64.get(&eui64) {
            // Idempotent: re-announcing an already-verified cert bumps no state.
            return Ok(KeystoreHandle {
                slot,
                generation: self.slots[slot].generation,
            });
        }

        let shared_secret = crypto::ecdh(&self.our_private_key, &cert.tbs.pubkey)?;
        let secure_channel = self.derive_secure_channel(shared_secret, eui64);

        let slot = self.allocate_slot()?;
        let generation = self.slots[slot].generation;
        self.slots[slot].entry = Some(KeystoreEntry {
            cert,
            address,
            shared_secret: Some(shared_secret),
            secure_channel: Some(secure_channel),
            inserted_at: self.age_clock,
            pin_count: 0,
        });
        self.by_eui64.insert(eui64, slot);
        self.by_address.insert(address, slot);

        info!(eui64 = %eui64, "keystore entry verified and session key derived");

        Ok(KeystoreHandle { slot, generation })
    }

    /// Inserts an already-verified certificate. Idempotent on an existing
    /// entry for the same subject.
    pub fn add_verified(
        &mut self,
        cert: Certificate,
        address: Ipv6Addr,
    ) -> Result<KeystoreHandle, KeystoreError> {
        self.insert_verified(cert, address)
    }

    /// Verifies `cert` against the root's public key via the crypto work
    /// queue; on success, publishes the entry and derives the session key.
    pub async fn add_unverified(
        &mut self,
        cert: Certificate,
        address: Ipv6Addr,
        queue: &CryptoWorkQueue,
    ) -> Result<Option<KeystoreHandle>, KeystoreError> {
        let signing_bytes = tbs_signing_bytes(&cert.tbs)?;
        let rx = queue.enqueue_verify("keystore", self.root_pubkey, signing_bytes, cert.signature)?;
        let valid = rx.await.map_err(|_| WorkQueueError::Closed)??;

        if !valid {
            warn!(eui64 = %cert.tbs.subject, "add_unverified: signature invalid, entry discarded");
            return Ok(None);
        }

        Ok(Some(self.insert_verified(cert, address)?))
    }

    /// Signs and "sends" a key request for `addr` (the actual transport is
    /// external); a single request may be in flight at a time.
    pub fn request_public_key(&mut self, addr: Ipv6Addr) -> Result<bool, KeystoreError> {
        let addr = self.normalize(addr);

        if let Some(pending) = &self.pending_request {
            if pending.address != addr {
                return Err(KeystoreError::RequestInFlight);
            }
            return Ok(false);
        }

        let (mut lock, _unlock_rx) = TimedUnlock::new("keystore-key-request", Duration::from_secs(30));
        lock.lock();
        self.pending_request = Some(PendingKeyRequest { address: addr, lock });
        debug!(%addr, "public key request initiated");
        Ok(true)
    }

    /// Clears the in-flight request slot once a response (or failure) has
    /// been handled.
    pub fn complete_public_key_request(&mut self, addr: Ipv6Addr) {
        let addr = self.normalize(addr);
        if matches!(&self.pending_request, Some(p) if p.address == addr) {
            if let Some(mut pending) = self.pending_request.take() {
                pending.lock.unlock();
            }
        }
    }

    pub fn pin(&mut self, handle: KeystoreHandle) -> Result<(), KeystoreError> {
        let slot = self.resolve(handle)?;
        slot.pin_count += 1;
        Ok(())
    }

    pub fn unpin(&mut self, handle: KeystoreHandle) -> Result<(), KeystoreError> {
        let slot = self.resolve(handle)?;
        slot.pin_count = slot.pin_count.saturating_sub(1);
        Ok(())
    }

    pub fn is_pinned(&self, handle: KeystoreHandle) -> bool {
        self.slots
            .get(handle.slot)
            .and_then(|s| s.entry.as_ref())
            .map(|e| e.pin_count > 0)
            .unwrap_or(false)
            && self.slots[handle.slot].generation == handle.generation
    }

    fn resolve(&mut self, handle: KeystoreHandle) -> Result<&mut KeystoreEntry, KeystoreError> {
        let slot = self.slots.get_mut(handle.slot).ok_or(KeystoreError::UnknownHandle)?;
        if slot.generation != handle.generation {
            return Err(KeystoreError::UnknownHandle);
        }
        slot.entry.as_mut().ok_or(KeystoreError::UnknownHandle)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
