//! Build-time cardinality caps for every bounded table in the crate.
//!
//! All pools are fixed-capacity; callers must handle allocation failure
//! rather than expecting unbounded growth.

/// Maximum number of verified peer certificates held at once.
pub const MAX_KEYSTORE_ENTRIES: usize = 12;

/// Maximum number of known edge resources.
pub const MAX_EDGES: usize = 4;

/// Maximum number of capabilities tracked per edge.
pub const MAX_CAPABILITIES_PER_EDGE: usize = 2;

/// Maximum number of peer (reputation) records.
pub const MAX_PEERS: usize = 16;

/// Maximum number of cached stereotype priors.
pub const MAX_STEREOTYPES: usize = 5;

/// Maximum number of concurrently in-flight outbound trust broadcasts.
pub const MAX_TRUST_TX_SLOTS: usize = 2;

/// Maximum number of concurrently in-flight inbound trust verifications.
pub const MAX_TRUST_RX_SLOTS: usize = 2;

/// Maximum encoded size of a single trust exchange payload.
///
/// Rather than reassembling block-wise fragments, trust payloads larger
/// than this are rejected outright with an explicit error.
pub const MAX_TRUST_PAYLOAD_BYTES: usize = 4096;

/// Maximum bounded history length retained by the HMM trust model.
pub const HMM_HISTORY_LEN: usize = 8;

/// Depth of the crypto work queues (sign, verify), each.
pub const CRYPTO_QUEUE_DEPTH: usize = 8;
