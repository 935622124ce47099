//! Request/reply transport seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Envelope, TransportError, WorkerReply};

/// Receives requests delivered to an address and produces exactly one reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> WorkerReply;
}

/// Addressed request/reply messaging between the coordinator and workers.
///
/// Point-to-point addresses have at most one handler. Broadcast addresses
/// have any number of subscribers and never produce replies.
#[async_trait]
pub trait TransportLayer: Send + Sync {
    /// Bind `handler` to `address`, replacing any previous binding.
    async fn register_handler(&self, address: &str, handler: Arc<dyn MessageHandler>);

    /// Remove the binding at `address`. Returns whether one existed.
    async fn unregister_handler(&self, address: &str) -> bool;

    /// Deliver `envelope` to its receiver and wait at most `timeout` for the reply.
    ///
    /// A reply that itself carries an error is still `Ok`; `Err` means the
    /// exchange failed (nobody listening, no reply in time, recipient died).
    async fn send(
        &self,
        envelope: Envelope,
        timeout: Duration,
    ) -> std::result::Result<WorkerReply, TransportError>;

    /// Add a broadcast subscriber. Returns a token for [`TransportLayer::unsubscribe`].
    async fn subscribe(&self, address: &str, handler: Arc<dyn MessageHandler>) -> u64;

    async fn unsubscribe(&self, address: &str, token: u64);

    /// Fire-and-forget delivery to every subscriber of `address`.
    /// Returns how many subscribers were reached.
    async fn publish(&self, address: &str, envelope: Envelope) -> usize;
}
