//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `Connector`,
//! `MessageReceiver`, `MessageSender` and `EntityManager` traits.

pub mod azure;
pub mod memory;

pub use azure::{AzureError, ServiceBusConnector, ServiceBusManager, ServiceBusReceiver, ServiceBusSender};
pub use memory::{InMemoryNamespace, InMemoryReceiver, InMemorySender};
