//! Message types for queue operations.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Application-defined properties carried alongside a message body
pub type UserProperties = HashMap<String, serde_json::Value>;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Opaque token proving the holder owns the delivery lock of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Wrap a token issued by the service
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generate a fresh random token
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get token as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent to a queue or topic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub body: Bytes,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub label: Option<String>,
    pub content_type: Option<String>,
    pub user_properties: UserProperties,
}

impl OutboundMessage {
    /// Create new message with body
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Set an explicit message ID instead of letting the service assign one
    pub fn with_message_id(mut self, message_id: String) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Add correlation ID for tracking
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Add a user property
    pub fn with_property(mut self, key: String, value: serde_json::Value) -> Self {
        self.user_properties.insert(key, value);
        self
    }
}

/// A message delivered by a receiver, holding the lock needed to complete it
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub sequence_number: i64,
    pub body: Bytes,
    pub user_properties: UserProperties,
    pub lock_token: LockToken,
    pub correlation_id: Option<String>,
    pub label: Option<String>,
    pub content_type: Option<String>,
    pub delivery_count: u32,
    pub enqueued_at: Option<Timestamp>,
}

impl ReceivedMessage {
    /// Copy the message for forwarding, keeping ID, properties and metadata
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            body: self.body.clone(),
            message_id: (!self.message_id.is_empty()).then(|| self.message_id.clone()),
            correlation_id: self.correlation_id.clone(),
            label: self.label.clone(),
            content_type: self.content_type.clone(),
            user_properties: self.user_properties.clone(),
        }
    }
}

/// Message counts reported for a queue or subscription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRuntimeInfo {
    pub message_count: i64,
    pub active_message_count: i64,
    pub dead_letter_message_count: i64,
    pub scheduled_message_count: i64,
    pub transfer_message_count: i64,
    pub transfer_dead_letter_message_count: i64,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
