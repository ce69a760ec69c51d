//! Azure Service Bus provider implementation.
//!
//! This module talks to the Service Bus REST surface with:
//! - Shared Access Signature authorization derived from the connection string
//! - Peek-lock reads from queues, subscriptions and their dead-letter sub-queues
//! - Completion and release of held locks
//! - Sends carrying broker properties and user properties as headers
//! - Runtime counts read from the entity's Atom description
//!
//! ## Lock Handling
//!
//! The REST surface has no non-destructive peek. Both [`MessageReceiver::peek`]
//! and [`MessageReceiver::receive`] lock the head message. Locks taken by
//! `peek` are released when the receiver closes, which returns the messages
//! to the entity. Each lock increments the message's delivery count, and the
//! service dead-letters a message whose count reaches the entity's
//! `MaxDeliveryCount` (10 unless configured). Peeking the same message often
//! enough therefore moves it to the dead-letter sub-queue.
//!
//! ## Example
//!
//! ```no_run
//! use queue_runtime::{
//!     AzureServiceBusConfig, ConnectionString, Connector, EntityPath, ServiceBusConnector,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = ServiceBusConnector::new(AzureServiceBusConfig::default())?;
//! let connection = ConnectionString::parse("Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=k;SharedAccessKey=v")?;
//! let path = EntityPath::queue("orders", false)?;
//!
//! let mut receiver = connector.open_receiver(&connection, &path).await?;
//! while let Some(message) = receiver.peek().await? {
//!     println!("{}", message.message_id);
//! }
//! receiver.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::client::{Connector, EntityManager, MessageReceiver, MessageSender};
use crate::connection::ConnectionString;
use crate::entity::EntityPath;
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{
    EntityRuntimeInfo, LockToken, OutboundMessage, ReceivedMessage, Timestamp, UserProperties,
};
use crate::provider::{AzureServiceBusConfig, ProviderType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

const BROKER_PROPERTIES_HEADER: &str = "brokerproperties";
const MANAGEMENT_API_VERSION: &str = "2017-04";
const DEFAULT_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";

/// Response headers that never carry user properties
const STANDARD_HEADERS: &[&str] = &[
    BROKER_PROPERTIES_HEADER,
    "connection",
    "content-length",
    "content-type",
    "date",
    "keep-alive",
    "location",
    "server",
    "strict-transport-security",
    "transfer-encoding",
];

// ============================================================================
// Error Types
// ============================================================================

/// Azure Service Bus specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Message lock lost: {0}")]
    MessageLockLost(String),

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Service Bus error {status}: {message}")]
    ServiceBusError { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AzureError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AuthenticationError(_) => false,
            Self::AccessDenied(_) => false,
            Self::EntityNotFound(_) => false,
            Self::MessageLockLost(_) => false,
            Self::MessageTooLarge { .. } => false,
            Self::NetworkError(_) => true,
            Self::ServiceBusError { status, .. } => *status >= 500 || *status == 429,
            Self::ConfigurationError(_) => false,
            Self::SerializationError(_) => false,
        }
    }

    /// Classify a non-success response
    fn from_status(status: StatusCode, body: &str, target: &str) -> Self {
        let detail = if body.trim().is_empty() {
            target.to_string()
        } else {
            format!("{}: {}", target, body.trim())
        };
        match status {
            StatusCode::UNAUTHORIZED => Self::AuthenticationError(detail),
            StatusCode::FORBIDDEN => Self::AccessDenied(target.to_string()),
            StatusCode::NOT_FOUND => Self::EntityNotFound(target.to_string()),
            StatusCode::GONE => Self::MessageLockLost(target.to_string()),
            StatusCode::PAYLOAD_TOO_LARGE => Self::MessageTooLarge {
                size: 0,
                max_size: ProviderType::AzureServiceBus.max_message_size(),
            },
            _ => Self::ServiceBusError {
                status: status.as_u16(),
                message: detail,
            },
        }
    }

    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::AuthenticationError(message) => QueueError::AuthenticationFailed { message },
            Self::AccessDenied(operation) => QueueError::PermissionDenied { operation },
            Self::EntityNotFound(path) => QueueError::EntityNotFound { path },
            Self::MessageLockLost(lock_token) => QueueError::LockLost { lock_token },
            Self::MessageTooLarge { size, max_size } => {
                QueueError::MessageTooLarge { size, max_size }
            }
            Self::NetworkError(message) => QueueError::ConnectionFailed { message },
            Self::ServiceBusError { status, message } => QueueError::ProviderError {
                provider: ProviderType::AzureServiceBus.to_string(),
                code: status.to_string(),
                message,
            },
            Self::ConfigurationError(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::SerializationError(message) => {
                QueueError::SerializationError(SerializationError::XmlError { message })
            }
        }
    }
}

impl From<AzureError> for QueueError {
    fn from(err: AzureError) -> Self {
        err.to_queue_error()
    }
}

impl From<reqwest::Error> for AzureError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::NetworkError(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            Self::NetworkError(format!("Connection failed: {}", e))
        } else {
            Self::NetworkError(format!("HTTP request failed: {}", e))
        }
    }
}

// ============================================================================
// Broker Properties
// ============================================================================

/// The `BrokerProperties` header exchanged with the service
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing)]
    sequence_number: Option<i64>,
    #[serde(skip_serializing)]
    lock_token: Option<String>,
    #[serde(skip_serializing)]
    delivery_count: Option<u32>,
    #[serde(skip_serializing)]
    enqueued_time_utc: Option<String>,
}

/// Parse the RFC 1123 timestamps used in broker properties
fn parse_enqueued_time(value: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| Timestamp::from_datetime(dt.with_timezone(&Utc)))
}

/// Collect user properties from non-standard response headers
///
/// Values are JSON encoded by the service; anything that does not parse is kept as a string.
fn user_properties_from_headers(headers: &HeaderMap) -> UserProperties {
    headers
        .iter()
        .filter(|(name, _)| !STANDARD_HEADERS.contains(&name.as_str()))
        .filter(|(name, _)| !name.as_str().starts_with("x-ms-"))
        .filter_map(|(name, value)| {
            let raw = value.to_str().ok()?;
            let parsed = serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            Some((name.as_str().to_string(), parsed))
        })
        .collect()
}

// ============================================================================
// HTTP plumbing
// ============================================================================

/// Authorized HTTP access to one namespace
#[derive(Clone)]
struct NamespaceClient {
    http: reqwest::Client,
    connection: ConnectionString,
}

impl NamespaceClient {
    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, AzureError> {
        let token = self
            .connection
            .authorization()
            .map_err(|e| AzureError::ConfigurationError(e.to_string()))?;
        Ok(self.http.request(method, url).header(AUTHORIZATION, token))
    }

    /// Send a request, turning non-success statuses into errors
    async fn execute(
        &self,
        request: RequestBuilder,
        target: &str,
    ) -> Result<Response, AzureError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%status, entity = target, "Service Bus request failed");
        Err(AzureError::from_status(status, &body, target))
    }
}

// ============================================================================
// ServiceBusConnector
// ============================================================================

/// Connector for Azure Service Bus namespaces
pub struct ServiceBusConnector {
    http: reqwest::Client,
    config: AzureServiceBusConfig,
}

impl ServiceBusConnector {
    /// Create connector with an HTTP client whose deadline outlasts the receive wait
    pub fn new(config: AzureServiceBusConfig) -> Result<Self, QueueError> {
        let timeout = config.http_timeout().to_std().map_err(|e| {
            ConfigurationError::Invalid {
                message: format!("request timeout out of range: {}", e),
            }
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { http, config })
    }

    fn namespace(&self, connection: &ConnectionString) -> NamespaceClient {
        NamespaceClient {
            http: self.http.clone(),
            connection: connection.clone(),
        }
    }
}

#[async_trait]
impl Connector for ServiceBusConnector {
    async fn open_receiver(
        &self,
        connection: &ConnectionString,
        path: &EntityPath,
    ) -> Result<Box<dyn MessageReceiver>, QueueError> {
        debug!(path = %path, endpoint = connection.endpoint(), "Opening receiver");
        Ok(Box::new(ServiceBusReceiver {
            client: self.namespace(connection),
            path: path.clone(),
            receive_timeout_secs: self.config.receive_timeout.num_seconds().max(0),
            held_locks: HashMap::new(),
            closed: false,
        }))
    }

    async fn open_sender(
        &self,
        connection: &ConnectionString,
        path: &EntityPath,
    ) -> Result<Box<dyn MessageSender>, QueueError> {
        debug!(path = %path, endpoint = connection.endpoint(), "Opening sender");
        Ok(Box::new(ServiceBusSender {
            client: self.namespace(connection),
            path: path.clone(),
            closed: false,
        }))
    }

    async fn open_manager(
        &self,
        connection: &ConnectionString,
    ) -> Result<Box<dyn EntityManager>, QueueError> {
        Ok(Box::new(ServiceBusManager {
            client: self.namespace(connection),
        }))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}

// ============================================================================
// ServiceBusReceiver
// ============================================================================

/// A lock held by a receiver
#[derive(Debug, Clone, Copy)]
struct HeldLock {
    sequence_number: i64,
    peeked: bool,
}

/// Peek-lock receiver over one entity
pub struct ServiceBusReceiver {
    client: NamespaceClient,
    path: EntityPath,
    receive_timeout_secs: i64,
    held_locks: HashMap<LockToken, HeldLock>,
    closed: bool,
}

impl ServiceBusReceiver {
    fn lock_url(&self, lock: HeldLock, lock_token: &LockToken) -> String {
        self.client.connection.entity_url(
            &self.path,
            &format!("/messages/{}/{}", lock.sequence_number, lock_token),
        )
    }

    async fn lock_head(&mut self, peeked: bool) -> Result<Option<ReceivedMessage>, QueueError> {
        if self.closed {
            return Err(QueueError::ConnectionFailed {
                message: format!("receiver for '{}' is closed", self.path),
            });
        }

        let url = self.client.connection.entity_url(
            &self.path,
            &format!("/messages/head?timeout={}", self.receive_timeout_secs),
        );
        let request = self
            .client
            .request(Method::POST, &url)?
            .header(CONTENT_LENGTH, 0);
        let response = self.client.execute(request, self.path.as_str()).await?;

        if response.status() == StatusCode::NO_CONTENT {
            debug!(path = %self.path, "No message available");
            return Ok(None);
        }

        let message = read_locked_message(response).await?;
        self.held_locks.insert(
            message.lock_token.clone(),
            HeldLock {
                sequence_number: message.sequence_number,
                peeked,
            },
        );
        Ok(Some(message))
    }
}

/// Build a received message from a 201 peek-lock response
async fn read_locked_message(response: Response) -> Result<ReceivedMessage, AzureError> {
    let headers = response.headers().clone();
    let broker_header = headers
        .get(BROKER_PROPERTIES_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AzureError::SerializationError("missing BrokerProperties header".into()))?;
    let broker: BrokerProperties = serde_json::from_str(broker_header)
        .map_err(|e| AzureError::SerializationError(format!("invalid BrokerProperties: {}", e)))?;

    let lock_token = broker
        .lock_token
        .ok_or_else(|| AzureError::SerializationError("response carries no lock token".into()))?;
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await?;

    Ok(ReceivedMessage {
        message_id: broker.message_id.unwrap_or_default(),
        sequence_number: broker.sequence_number.unwrap_or_default(),
        body,
        user_properties: user_properties_from_headers(&headers),
        lock_token: LockToken::new(lock_token),
        correlation_id: broker.correlation_id,
        label: broker.label,
        content_type,
        delivery_count: broker.delivery_count.unwrap_or_default(),
        enqueued_at: broker.enqueued_time_utc.as_deref().and_then(parse_enqueued_time),
    })
}

#[async_trait]
impl MessageReceiver for ServiceBusReceiver {
    async fn peek(&mut self) -> Result<Option<ReceivedMessage>, QueueError> {
        self.lock_head(true).await
    }

    async fn receive(&mut self) -> Result<Option<ReceivedMessage>, QueueError> {
        self.lock_head(false).await
    }

    async fn complete(&mut self, lock_token: &LockToken) -> Result<(), QueueError> {
        let lock = self
            .held_locks
            .get(lock_token)
            .copied()
            .ok_or_else(|| QueueError::LockLost {
                lock_token: lock_token.to_string(),
            })?;

        let url = self.lock_url(lock, lock_token);
        let request = self.client.request(Method::DELETE, &url)?;
        self.client
            .execute(request, lock_token.as_str())
            .await
            .map_err(AzureError::to_queue_error)?;

        self.held_locks.remove(lock_token);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let peeked: Vec<(LockToken, HeldLock)> = self
            .held_locks
            .drain()
            .filter(|(_, lock)| lock.peeked)
            .collect();

        let mut first_error = None;
        for (token, lock) in peeked {
            let url = self.lock_url(lock, &token);
            let released = match self.client.request(Method::PUT, &url) {
                Ok(request) => self
                    .client
                    .execute(request.header(CONTENT_LENGTH, 0), token.as_str())
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = released {
                warn!(lock_token = %token, error = %e, "Failed to release peeked message");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.to_queue_error()),
            None => Ok(()),
        }
    }

    fn entity_path(&self) -> &EntityPath {
        &self.path
    }
}

// ============================================================================
// ServiceBusSender
// ============================================================================

/// Sender into one queue or topic
pub struct ServiceBusSender {
    client: NamespaceClient,
    path: EntityPath,
    closed: bool,
}

impl ServiceBusSender {
    fn build_headers(message: &OutboundMessage) -> Result<HeaderMap, QueueError> {
        let broker = BrokerProperties {
            message_id: message.message_id.clone(),
            correlation_id: message.correlation_id.clone(),
            label: message.label.clone(),
            ..BrokerProperties::default()
        };

        let mut headers = HeaderMap::new();
        let broker_json = serde_json::to_string(&broker).map_err(SerializationError::from)?;
        headers.insert(BROKER_PROPERTIES_HEADER, header_value(BROKER_PROPERTIES_HEADER, &broker_json)?);
        headers.insert(
            CONTENT_TYPE,
            header_value(
                CONTENT_TYPE.as_str(),
                message.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE),
            )?,
        );

        for (key, value) in &message.user_properties {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| SerializationError::InvalidHeader { name: key.clone() })?;
            let encoded = serde_json::to_string(value).map_err(SerializationError::from)?;
            headers.insert(name, header_value(key, &encoded)?);
        }
        Ok(headers)
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, SerializationError> {
    HeaderValue::from_str(value).map_err(|_| SerializationError::InvalidHeader {
        name: name.to_string(),
    })
}

#[async_trait]
impl MessageSender for ServiceBusSender {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::ConnectionFailed {
                message: format!("sender for '{}' is closed", self.path),
            });
        }

        let headers = Self::build_headers(&message)?;
        let size = message.body.len();
        let url = self.client.connection.entity_url(&self.path, "/messages");
        let request = self
            .client
            .request(Method::POST, &url)?
            .headers(headers)
            .body(message.body);

        match self.client.execute(request, self.path.as_str()).await {
            Ok(_) => {
                debug!(path = %self.path, size, "Sent message");
                Ok(())
            }
            Err(AzureError::MessageTooLarge { max_size, .. }) => {
                Err(QueueError::MessageTooLarge { size, max_size })
            }
            Err(e) => Err(e.to_queue_error()),
        }
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        self.closed = true;
        Ok(())
    }

    fn entity_path(&self) -> &EntityPath {
        &self.path
    }
}

// ============================================================================
// ServiceBusManager
// ============================================================================

/// Management client reading entity descriptions
pub struct ServiceBusManager {
    client: NamespaceClient,
}

#[async_trait]
impl EntityManager for ServiceBusManager {
    async fn runtime_info(&self, path: &EntityPath) -> Result<EntityRuntimeInfo, QueueError> {
        let url = self.client.connection.entity_url(
            path,
            &format!("?api-version={}", MANAGEMENT_API_VERSION),
        );
        let request = self.client.request(Method::GET, &url)?;
        let response = self.client.execute(request, path.as_str()).await?;
        let xml = response.text().await.map_err(AzureError::from)?;

        parse_runtime_info(&xml)?.ok_or_else(|| QueueError::EntityNotFound {
            path: path.to_string(),
        })
    }
}

/// Parse the counts from an entity description
///
/// Returns `None` when the feed describes no entity, which is how the
/// service answers for a path that does not exist.
fn parse_runtime_info(xml: &str) -> Result<Option<EntityRuntimeInfo>, AzureError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut info = EntityRuntimeInfo::default();
    let mut found = false;
    let mut current: Option<Vec<u8>> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                current = Some(e.local_name().as_ref().to_vec());
            }
            Ok(Event::Text(e)) => {
                let name = current.as_deref().unwrap_or_default();
                if name == b"MessageCount" {
                    found = true;
                }
                if let Some(field) = count_field(&mut info, name) {
                    let text = e.unescape().map_err(|e| {
                        AzureError::SerializationError(format!("Failed to parse XML: {}", e))
                    })?;
                    *field = text.trim().parse().map_err(|_| {
                        AzureError::SerializationError(format!("invalid count '{}'", text))
                    })?;
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AzureError::SerializationError(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(found.then_some(info))
}

fn count_field<'a>(info: &'a mut EntityRuntimeInfo, name: &[u8]) -> Option<&'a mut i64> {
    match name {
        b"MessageCount" => Some(&mut info.message_count),
        b"ActiveMessageCount" => Some(&mut info.active_message_count),
        b"DeadLetterMessageCount" => Some(&mut info.dead_letter_message_count),
        b"ScheduledMessageCount" => Some(&mut info.scheduled_message_count),
        b"TransferMessageCount" => Some(&mut info.transfer_message_count),
        b"TransferDeadLetterMessageCount" => Some(&mut info.transfer_dead_letter_message_count),
        _ => None,
    }
}
