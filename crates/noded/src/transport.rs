//! Default `TrustTransport` used until a real CoAP-style client is wired
//! in; logs what would go out instead of touching a socket, the same
//! stand-in role `edged::server::LoggingPublisher` plays for gossip.

use async_trait::async_trait;
use tracing::debug;

use trust_core::exchange::{Confirmable, ExchangeError, IncomingMessage, OutgoingMessage, Status, TrustTransport};

pub struct LoggingTransport;

#[async_trait]
impl TrustTransport for LoggingTransport {
    async fn broadcast(&self, message: OutgoingMessage) -> Result<(), ExchangeError> {
        debug!(
            bytes = message.payload.len(),
            confirmable = matches!(message.confirmable, Confirmable::Con),
            "trust broadcast (no transport configured)"
        );
        Ok(())
    }

    async fn request(&self, peer: [u8; 16], message: OutgoingMessage) -> Result<IncomingMessage, ExchangeError> {
        debug!(
            peer = hex::encode(peer),
            bytes = message.payload.len(),
            "trust request (no transport configured)"
        );
        Ok(IncomingMessage { payload: Vec::new() })
    }

    async fn respond(&self, peer: [u8; 16], status: Status, payload: Vec<u8>) -> Result<(), ExchangeError> {
        debug!(
            peer = hex::encode(peer),
            bytes = payload.len(),
            success = status.is_success(),
            "trust response (no transport configured)"
        );
        Ok(())
    }
}
