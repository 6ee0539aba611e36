//! Traits for signaling relay operations

use async_trait::async_trait;
use futures::Stream;
use meshcall_types::{RelayCommand, RelayEvent, UserId};
use std::pin::Pin;

use crate::error::RelayError;

/// Inbound relay events for the local user, in transport delivery order
pub type RelayEventStream = Pin<Box<dyn Stream<Item = Result<RelayEvent, RelayError>> + Send>>;

/// Trait for signaling relay clients
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Send a command; signals are addressed by their target user
    async fn send(&self, command: &RelayCommand) -> Result<(), RelayError>;

    /// Subscribe to events addressed to the local user
    async fn subscribe(&self) -> Result<RelayEventStream, RelayError>;

    /// Identity this client sends as
    fn local_user(&self) -> &UserId;

    /// Check if the client is connected
    async fn is_connected(&self) -> bool;

    /// Get the client type name
    fn client_type(&self) -> &str;
}
