//! Core trust-management substrate for a fog-computing deployment of
//! sensor-node clients, edge-node servers, and a root certificate authority.

pub mod address;
pub mod certificate;
pub mod choose;
pub mod error;
pub mod eui64;
pub mod exchange;
pub mod gossip;
pub mod keystore;
pub mod limits;
pub mod registry;
pub mod stereotype;
pub mod timed_unlock;
pub mod trust_model;
pub mod work_queue;

pub mod crypto;

pub use error::{Error, Result};
pub use eui64::Eui64;
