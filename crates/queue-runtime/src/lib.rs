//! # Queue Runtime
//!
//! Message transport for Azure Service Bus queues, topics and subscriptions,
//! with an in-memory namespace for tests and offline development.
//!
//! This library provides:
//! - Connection string parsing and Shared Access Signature authorization
//! - Entity paths for queues, subscriptions and dead-letter sub-queues
//! - Peek-lock receivers with completion and lock release
//! - Senders preserving message IDs and user properties
//! - Runtime message counts per entity
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Outbound and received message structures
//! - [`entity`] - Entity path construction
//! - [`connection`] - Connection strings and authorization
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Receiver, sender, manager and connector traits
//! - [`providers`] - Service Bus REST and in-memory implementations

pub mod client;
pub mod connection;
pub mod entity;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{Connector, ConnectorFactory, EntityManager, MessageReceiver, MessageSender};
pub use connection::ConnectionString;
pub use entity::{EntityPath, DEAD_LETTER_SUFFIX};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    EntityRuntimeInfo, LockToken, OutboundMessage, ReceivedMessage, Timestamp, UserProperties,
};
pub use provider::{AzureServiceBusConfig, InMemoryConfig, ProviderConfig, ProviderType};
pub use providers::{InMemoryNamespace, ServiceBusConnector};
