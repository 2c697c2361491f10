//! Configuration for noded.

use std::net::Ipv6Addr;
use std::path::PathBuf;

use clap::Parser;
use trust_core::choose::ChooseStrategy;
use trust_core::trust_model::TrustModelKind;

/// noded - fog-trust client daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "noded")]
#[command(about = "Tracks known edges, evaluates trust, and selects an edge per capability request")]
pub struct Config {
    /// This client's own EUI-64, as 16 lowercase hex digits.
    #[arg(long, env = "NODED_EUI64")]
    pub eui64: String,

    /// Address this client is reachable on.
    #[arg(long, default_value = "fe80::2")]
    pub address: Ipv6Addr,

    /// Root authority's address.
    #[arg(long, default_value = "fd00::1")]
    pub root_address: Ipv6Addr,

    /// Path to this client's ECDSA-P256 private key (32 raw bytes).
    #[arg(long, env = "NODED_PRIVATE_KEY_PATH")]
    pub private_key_path: PathBuf,

    /// Root authority's ECDSA-P256 public key (64 raw bytes, x||y).
    #[arg(long)]
    pub root_public_key_path: PathBuf,

    /// Which trust model variant to run: none, badlisted, reputation, hmm, throughput.
    #[arg(long, default_value = "reputation")]
    pub trust_model: String,

    /// Edge-selection policy: random, banded, proportional, badlisted, fcfs.
    #[arg(long, default_value = "banded")]
    pub choose_strategy: String,

    /// How often, in seconds, to broadcast our view of edge trust.
    #[arg(long, default_value = "60")]
    pub broadcast_interval_secs: u64,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if trust_core::Eui64::parse_hex(&self.eui64).is_none() {
            anyhow::bail!("eui64 must be 16 lowercase hex digits");
        }
        self.trust_model_kind()?;
        self.choose_strategy()?;
        Ok(())
    }

    pub fn trust_model_kind(&self) -> anyhow::Result<TrustModelKind> {
        match self.trust_model.as_str() {
            "none" => Ok(TrustModelKind::None),
            "badlisted" => Ok(TrustModelKind::Badlisted),
            "reputation" => Ok(TrustModelKind::Reputation),
            "hmm" => Ok(TrustModelKind::Hmm),
            "throughput" => Ok(TrustModelKind::Throughput),
            other => anyhow::bail!("unknown trust model {other:?}"),
        }
    }

    pub fn choose_strategy(&self) -> anyhow::Result<ChooseStrategy> {
        match self.choose_strategy.as_str() {
            "random" => Ok(ChooseStrategy::Random),
            "banded" => Ok(ChooseStrategy::Banded),
            "proportional" => Ok(ChooseStrategy::Proportional),
            "badlisted" => Ok(ChooseStrategy::Badlisted),
            "fcfs" => Ok(ChooseStrategy::Fcfs),
            other => anyhow::bail!("unknown choose strategy {other:?}"),
        }
    }
}
