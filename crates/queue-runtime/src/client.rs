//! Client traits and the factory selecting a provider.

use crate::connection::ConnectionString;
use crate::entity::EntityPath;
use crate::error::QueueError;
use crate::message::{EntityRuntimeInfo, LockToken, OutboundMessage, ReceivedMessage};
use crate::provider::{ProviderConfig, ProviderType};
use crate::providers::{InMemoryNamespace, ServiceBusConnector};
use async_trait::async_trait;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Reads messages from one entity
///
/// Both read operations lock the returned message. A lock taken by
/// [`peek`](MessageReceiver::peek) and never completed is released by
/// [`close`](MessageReceiver::close), leaving the message at the source.
/// A lock taken by [`receive`](MessageReceiver::receive) is left to expire,
/// after which the service redelivers the message.
///
/// Locking counts as a delivery, so a peek raises the message's delivery
/// count even though the message stays at the source.
#[async_trait]
pub trait MessageReceiver: Send {
    /// Read the next message without consuming it
    async fn peek(&mut self) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Read and lock the next message pending completion
    async fn receive(&mut self) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Mark a delivered message as processed, removing it from the entity
    async fn complete(&mut self, lock_token: &LockToken) -> Result<(), QueueError>;

    /// Release peeked locks and shut the receiver down
    async fn close(&mut self) -> Result<(), QueueError>;

    /// Entity this receiver reads from
    fn entity_path(&self) -> &EntityPath;
}

/// Writes messages to one queue or topic
#[async_trait]
pub trait MessageSender: Send {
    /// Send single message
    async fn send(&mut self, message: OutboundMessage) -> Result<(), QueueError>;

    /// Shut the sender down
    async fn close(&mut self) -> Result<(), QueueError>;

    /// Entity this sender writes to
    fn entity_path(&self) -> &EntityPath;
}

/// Reads entity metadata from the management surface
#[async_trait]
pub trait EntityManager: Send + Sync {
    /// Message counts of a queue or subscription
    async fn runtime_info(&self, path: &EntityPath) -> Result<EntityRuntimeInfo, QueueError>;
}

/// Opens receivers, senders and managers against a namespace
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a receiver bound to `path`
    async fn open_receiver(
        &self,
        connection: &ConnectionString,
        path: &EntityPath,
    ) -> Result<Box<dyn MessageReceiver>, QueueError>;

    /// Open a sender bound to `path`
    async fn open_sender(
        &self,
        connection: &ConnectionString,
        path: &EntityPath,
    ) -> Result<Box<dyn MessageSender>, QueueError>;

    /// Open a management client for the namespace
    async fn open_manager(
        &self,
        connection: &ConnectionString,
    ) -> Result<Box<dyn EntityManager>, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Factory for creating connectors with appropriate providers
pub struct ConnectorFactory;

impl ConnectorFactory {
    /// Create connector from configuration
    pub fn create_connector(config: ProviderConfig) -> Result<Box<dyn Connector>, QueueError> {
        match config {
            ProviderConfig::AzureServiceBus(azure_config) => {
                Ok(Box::new(ServiceBusConnector::new(azure_config)?))
            }
            ProviderConfig::InMemory(in_memory_config) => {
                Ok(Box::new(InMemoryNamespace::new(in_memory_config)))
            }
        }
    }
}
