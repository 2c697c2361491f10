//! noded - fog-trust client daemon
//!
//! Tracks the edges and capabilities it has learned of via gossip, keeps
//! its own trust-model view of each one, and picks an edge to route a
//! capability request to.

pub mod client;
pub mod config;
pub mod transport;

pub use client::NodeClient;
pub use config::Config;
pub use transport::LoggingTransport;
