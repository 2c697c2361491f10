//! edged - fog-trust edge-node daemon
//!
//! Announces this edge's presence and capability set over the gossip
//! channel, and serves key and trust requests to clients. Wraps
//! `trust-core` with the configuration, logging, and publish-loop glue
//! a standalone binary needs.

pub mod config;
pub mod server;

pub use config::Config;
pub use server::Server;
