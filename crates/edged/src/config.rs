//! Configuration for edged.

use std::net::Ipv6Addr;
use std::path::PathBuf;

use clap::Parser;

/// edged - fog-trust edge-node daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "edged")]
#[command(about = "Announces presence and capabilities, serves keys and trust state to clients")]
pub struct Config {
    /// This edge's own EUI-64, as 16 lowercase hex digits.
    #[arg(long, env = "EDGED_EUI64")]
    pub eui64: String,

    /// Link-local or global address this edge is reachable on.
    #[arg(long, default_value = "fe80::1")]
    pub address: Ipv6Addr,

    /// Root authority's address, used both as the trust anchor for
    /// certificate verification and the key/stereotype request target.
    #[arg(long, default_value = "fd00::1")]
    pub root_address: Ipv6Addr,

    /// Path to this edge's own certificate (CBOR-encoded, root-signed).
    #[arg(long)]
    pub certificate_path: PathBuf,

    /// Path to this edge's ECDSA-P256 private key (32 raw bytes).
    #[arg(long, env = "EDGED_PRIVATE_KEY_PATH")]
    pub private_key_path: PathBuf,

    /// Root authority's ECDSA-P256 public key (64 raw bytes, x||y).
    #[arg(long)]
    pub root_public_key_path: PathBuf,

    /// Capabilities this edge advertises, comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub capabilities: Vec<String>,

    /// Base announce cadence in seconds, before decay.
    #[arg(long, default_value = "30")]
    pub announce_base_secs: u64,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if trust_core::Eui64::parse_hex(&self.eui64).is_none() {
            anyhow::bail!("eui64 must be 16 lowercase hex digits");
        }
        if self.capabilities.len() > trust_core::limits::MAX_CAPABILITIES_PER_EDGE {
            anyhow::bail!(
                "edge advertises {} capabilities, exceeding the per-edge cap of {}",
                self.capabilities.len(),
                trust_core::limits::MAX_CAPABILITIES_PER_EDGE
            );
        }
        for name in &self.capabilities {
            if name.is_empty() || name.len() > 15 || !name.is_ascii() {
                anyhow::bail!("capability name {name:?} must be 1-15 printable ASCII bytes");
            }
        }
        Ok(())
    }
}
