//! Single-verb wrappers over SHA-256, ECDSA-P256 sign/verify, and ECDH.
//!
//! Every function accepts and returns big-endian byte buffers. Any
//! little-endian conversion the underlying curve arithmetic needs is
//! contained entirely within this module so wire formats and callers
//! never see swapped words.

use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Failure kinds surfaced by the crypto façade.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid length for {field}: expected {expected}, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("crypto backend error: {0}")]
    BackendError(String),
    #[error("signature invalid")]
    SignatureInvalid,
}

/// A 64-byte big-endian P-256 public key: 32-byte x followed by 32-byte y.
pub type PublicKeyBytes = [u8; 64];
/// A 64-byte big-endian ECDSA signature: 32-byte r followed by 32-byte s.
pub type SignatureBytes = [u8; 64];
/// A 32-byte big-endian P-256 private scalar.
pub type PrivateKeyBytes = [u8; 32];

/// One-shot SHA-256 over a full buffer.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Streaming SHA-256 for objects that are never fully materialised (e.g.
/// signing a TBS certificate assembled field-by-field).
pub struct Sha256Stream(Sha256);

impl Sha256Stream {
    pub fn init() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

impl Default for Sha256Stream {
    fn default() -> Self {
        Self::init()
    }
}

/// Generates a fresh ECDSA-P256 keypair.
pub fn generate_keypair() -> (PrivateKeyBytes, PublicKeyBytes) {
    let secret = SecretKey::random(&mut OsRng);
    let private = secret.to_bytes();
    let mut private_bytes = [0u8; 32];
    private_bytes.copy_from_slice(&private);

    let public = encode_public_key(&secret.public_key());

    (private_bytes, public)
}

fn encode_public_key(public: &PublicKey) -> PublicKeyBytes {
    let point = public.to_encoded_point(false);
    let mut out = [0u8; 64];
    out.copy_from_slice(&point.as_bytes()[1..]);
    out
}

fn decode_public_key(bytes: &PublicKeyBytes) -> Result<PublicKey, CryptoError> {
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(bytes);
    PublicKey::from_sec1_bytes(&sec1).map_err(|e| CryptoError::BackendError(e.to_string()))
}

/// Signs `msg` with `private_key`, returning a big-endian `(r, s)` pair.
pub fn ecdsa_sign(private_key: &PrivateKeyBytes, msg: &[u8]) -> Result<SignatureBytes, CryptoError> {
    let secret = SecretKey::from_bytes(private_key.into())
        .map_err(|e| CryptoError::BackendError(e.to_string()))?;
    let signing_key = SigningKey::from(secret);
    let signature: Signature = signing_key.sign(msg);
    let mut out = [0u8; 64];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Verifies a big-endian `(r, s)` signature against `pubkey` over `msg`.
pub fn ecdsa_verify(
    pubkey: &PublicKeyBytes,
    msg: &[u8],
    sig: &SignatureBytes,
) -> Result<bool, CryptoError> {
    let public = decode_public_key(pubkey)?;
    let verifying_key = VerifyingKey::from(public);
    let signature = Signature::from_slice(sig).map_err(|_| CryptoError::SignatureInvalid)?;
    Ok(verifying_key.verify(msg, &signature).is_ok())
}

/// Derives a 32-byte shared secret with `peer_pubkey` using our private key.
pub fn ecdh(
    private_key: &PrivateKeyBytes,
    peer_pubkey: &PublicKeyBytes,
) -> Result<[u8; 32], CryptoError> {
    let secret = SecretKey::from_bytes(private_key.into())
        .map_err(|e| CryptoError::BackendError(e.to_string()))?;
    let peer = decode_public_key(peer_pubkey)?;
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    Ok(out)
}
