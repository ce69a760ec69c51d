//! Provider types and configuration.

use chrono::Duration;

/// Slack between the service-side receive wait and the client-side deadline
const RECEIVE_DEADLINE_MARGIN_SECS: i64 = 10;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    AzureServiceBus,
    InMemory,
}

impl ProviderType {
    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AzureServiceBus => 256 * 1024, // Standard tier
            Self::InMemory => 10 * 1024 * 1024,  // 10MB
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AzureServiceBus => write!(f, "AzureServiceBus"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    AzureServiceBus(AzureServiceBusConfig),
    InMemory(InMemoryConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::AzureServiceBus(AzureServiceBusConfig::default())
    }
}

/// Azure Service Bus REST configuration
#[derive(Debug, Clone)]
pub struct AzureServiceBusConfig {
    /// How long the service holds a receive open before reporting "no message"
    pub receive_timeout: Duration,
    /// Client-side limit for a single HTTP exchange
    pub request_timeout: Duration,
}

impl Default for AzureServiceBusConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::seconds(5),
            request_timeout: Duration::seconds(60),
        }
    }
}

impl AzureServiceBusConfig {
    /// Deadline for one HTTP exchange
    ///
    /// A receive is held open by the service for up to `receive_timeout`, so the
    /// deadline never falls below that plus a margin. An empty entity then
    /// answers "no message" before the client gives up on the request.
    pub fn http_timeout(&self) -> Duration {
        let receive_deadline =
            self.receive_timeout + Duration::seconds(RECEIVE_DEADLINE_MARGIN_SECS);
        self.request_timeout.max(receive_deadline)
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    pub max_entity_size: usize,
    pub max_message_size: usize,
    pub lock_duration: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entity_size: 10000,
            max_message_size: ProviderType::InMemory.max_message_size(),
            lock_duration: Duration::seconds(60),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
