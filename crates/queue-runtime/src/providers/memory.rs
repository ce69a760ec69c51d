//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory namespace that:
//! - Assigns per-entity sequence numbers
//! - Implements message locks with expiry and redelivery
//! - Fans topic sends out to the topic's subscriptions
//! - Keeps dead-letter sub-queues as ordinary entities
//! - Enforces message and entity size limits
//!
//! This provider is intended for:
//! - Unit testing of relay and formatting code
//! - Development without a live namespace
//! - Reference behaviour for the REST provider

use crate::client::{Connector, EntityManager, MessageReceiver, MessageSender};
use crate::connection::ConnectionString;
use crate::entity::EntityPath;
use crate::error::QueueError;
use crate::message::{
    EntityRuntimeInfo, LockToken, OutboundMessage, ReceivedMessage, Timestamp, UserProperties,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all entities of a namespace
struct NamespaceStorage {
    entities: BTreeMap<EntityPath, EntityState>,
    config: InMemoryConfig,
}

impl NamespaceStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            entities: BTreeMap::new(),
            config,
        }
    }

    /// Get or create an entity
    fn entity_mut(&mut self, path: &EntityPath) -> &mut EntityState {
        self.entities.entry(path.clone()).or_default()
    }

    /// Subscriptions registered under a topic path
    fn subscriptions_of(&self, topic: &EntityPath) -> Vec<EntityPath> {
        self.entities
            .keys()
            .filter(|path| !path.is_dead_letter())
            .filter(|path| {
                path.subscription_parts()
                    .is_some_and(|(t, _)| t == topic.as_str())
            })
            .cloned()
            .collect()
    }

    /// Store a message on `path`, or on every subscription when `path` is a topic
    fn deliver(&mut self, path: &EntityPath, message: &OutboundMessage) -> Result<(), QueueError> {
        if message.body.len() > self.config.max_message_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size: self.config.max_message_size,
            });
        }

        let subscriptions = self.subscriptions_of(path);
        let targets = if subscriptions.is_empty() {
            vec![path.clone()]
        } else {
            subscriptions
        };

        let max_entity_size = self.config.max_entity_size;
        for target in &targets {
            if self
                .entities
                .get(target)
                .is_some_and(|e| e.messages.len() >= max_entity_size)
            {
                return Err(QueueError::QuotaExceeded {
                    path: target.to_string(),
                    max_size: max_entity_size,
                });
            }
        }

        for target in targets {
            let sequence_number = self.entity_mut(&target).push(message);
            debug!(path = %target, sequence_number, "Stored message");
        }
        Ok(())
    }
}

/// State of one queue, subscription or dead-letter sub-queue
#[derive(Default)]
struct EntityState {
    /// Messages ordered by sequence number
    messages: VecDeque<StoredMessage>,
    last_sequence_number: i64,
    completed: u64,
}

impl EntityState {
    fn push(&mut self, message: &OutboundMessage) -> i64 {
        self.last_sequence_number += 1;
        let message_id = message
            .message_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        self.messages.push_back(StoredMessage {
            message_id,
            sequence_number: self.last_sequence_number,
            body: message.body.clone(),
            user_properties: message.user_properties.clone(),
            correlation_id: message.correlation_id.clone(),
            label: message.label.clone(),
            content_type: message.content_type.clone(),
            delivery_count: 0,
            enqueued_at: Timestamp::now(),
            lock: None,
        });
        self.last_sequence_number
    }

    fn position_of(&self, lock_token: &LockToken) -> Option<usize> {
        self.messages.iter().position(|m| {
            m.lock
                .as_ref()
                .is_some_and(|lock| &lock.token == lock_token && !lock.is_expired())
        })
    }
}

/// A message stored in an entity with delivery metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: String,
    sequence_number: i64,
    body: Bytes,
    user_properties: UserProperties,
    correlation_id: Option<String>,
    label: Option<String>,
    content_type: Option<String>,
    delivery_count: u32,
    enqueued_at: Timestamp,
    lock: Option<MessageLock>,
}

impl StoredMessage {
    /// Check if message can be handed to a receiver
    fn is_available(&self) -> bool {
        self.lock.as_ref().map_or(true, MessageLock::is_expired)
    }

    fn to_received(&self, lock_token: LockToken) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id.clone(),
            sequence_number: self.sequence_number,
            body: self.body.clone(),
            user_properties: self.user_properties.clone(),
            lock_token,
            correlation_id: self.correlation_id.clone(),
            label: self.label.clone(),
            content_type: self.content_type.clone(),
            delivery_count: self.delivery_count,
            enqueued_at: Some(self.enqueued_at.clone()),
        }
    }
}

/// Delivery lock held by a receiver
#[derive(Clone)]
struct MessageLock {
    token: LockToken,
    expires_at: Timestamp,
}

impl MessageLock {
    fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expires_at
    }
}

type SharedStorage = Arc<RwLock<NamespaceStorage>>;

fn write(storage: &SharedStorage) -> RwLockWriteGuard<'_, NamespaceStorage> {
    storage.write().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// InMemoryNamespace
// ============================================================================

/// In-memory namespace shared by every receiver, sender and manager opened on it
#[derive(Clone)]
pub struct InMemoryNamespace {
    storage: SharedStorage,
}

impl InMemoryNamespace {
    /// Create new in-memory namespace with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(NamespaceStorage::new(config))),
        }
    }

    /// Register a subscription so that sends to its topic reach it
    pub fn create_subscription(&self, topic: &str, subscription: &str) -> Result<EntityPath, QueueError> {
        let path = EntityPath::subscription(topic, subscription, false)?;
        write(&self.storage).entity_mut(&path);
        Ok(path)
    }

    /// Store a message directly, bypassing any sender
    pub fn enqueue(&self, path: &EntityPath, message: OutboundMessage) -> Result<(), QueueError> {
        write(&self.storage).deliver(path, &message)
    }

    /// Bodies of every message held by an entity, in sequence order
    pub fn bodies(&self, path: &EntityPath) -> Vec<Bytes> {
        write(&self.storage)
            .entities
            .get(path)
            .map(|e| e.messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of messages held by an entity, locked or not
    pub fn message_count(&self, path: &EntityPath) -> usize {
        write(&self.storage)
            .entities
            .get(path)
            .map_or(0, |e| e.messages.len())
    }

    /// Number of messages currently under an unexpired lock
    pub fn locked_count(&self, path: &EntityPath) -> usize {
        write(&self.storage).entities.get(path).map_or(0, |e| {
            e.messages.iter().filter(|m| !m.is_available()).count()
        })
    }

    /// Number of completions an entity has accepted
    pub fn completed_count(&self, path: &EntityPath) -> u64 {
        write(&self.storage)
            .entities
            .get(path)
            .map_or(0, |e| e.completed)
    }
}

impl Default for InMemoryNamespace {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl Connector for InMemoryNamespace {
    async fn open_receiver(
        &self,
        _connection: &ConnectionString,
        path: &EntityPath,
    ) -> Result<Box<dyn MessageReceiver>, QueueError> {
        Ok(Box::new(InMemoryReceiver::new(
            Arc::clone(&self.storage),
            path.clone(),
        )))
    }

    async fn open_sender(
        &self,
        _connection: &ConnectionString,
        path: &EntityPath,
    ) -> Result<Box<dyn MessageSender>, QueueError> {
        Ok(Box::new(InMemorySender {
            storage: Arc::clone(&self.storage),
            path: path.clone(),
            closed: false,
        }))
    }

    async fn open_manager(
        &self,
        _connection: &ConnectionString,
    ) -> Result<Box<dyn EntityManager>, QueueError> {
        Ok(Box::new(self.clone()))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

#[async_trait]
impl EntityManager for InMemoryNamespace {
    async fn runtime_info(&self, path: &EntityPath) -> Result<EntityRuntimeInfo, QueueError> {
        let storage = write(&self.storage);
        let entity = storage
            .entities
            .get(path)
            .ok_or_else(|| QueueError::EntityNotFound {
                path: path.to_string(),
            })?;
        let active = entity.messages.len() as i64;
        let dead_letter = storage
            .entities
            .get(&path.dead_letter())
            .map_or(0, |e| e.messages.len() as i64);

        Ok(EntityRuntimeInfo {
            message_count: active + dead_letter,
            active_message_count: active,
            dead_letter_message_count: dead_letter,
            ..EntityRuntimeInfo::default()
        })
    }
}

// ============================================================================
// InMemoryReceiver
// ============================================================================

/// Receiver over one in-memory entity
pub struct InMemoryReceiver {
    storage: SharedStorage,
    path: EntityPath,
    /// Locks taken by `peek` that have not been completed yet
    peeked: Vec<LockToken>,
    closed: bool,
}

impl InMemoryReceiver {
    fn new(storage: SharedStorage, path: EntityPath) -> Self {
        Self {
            storage,
            path,
            peeked: Vec::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::ConnectionFailed {
                message: format!("receiver for '{}' is closed", self.path),
            });
        }
        Ok(())
    }

    fn lock_next(&mut self) -> Result<Option<ReceivedMessage>, QueueError> {
        self.ensure_open()?;
        let mut storage = write(&self.storage);
        let lock_duration = storage.config.lock_duration;
        let entity = storage.entity_mut(&self.path);

        let Some(message) = entity.messages.iter_mut().find(|m| m.is_available()) else {
            return Ok(None);
        };

        let token = LockToken::generate();
        message.delivery_count += 1;
        message.lock = Some(MessageLock {
            token: token.clone(),
            expires_at: Timestamp::from_datetime(chrono::Utc::now() + lock_duration),
        });
        Ok(Some(message.to_received(token)))
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn peek(&mut self) -> Result<Option<ReceivedMessage>, QueueError> {
        let message = self.lock_next()?;
        if let Some(ref m) = message {
            self.peeked.push(m.lock_token.clone());
        }
        Ok(message)
    }

    async fn receive(&mut self) -> Result<Option<ReceivedMessage>, QueueError> {
        self.lock_next()
    }

    async fn complete(&mut self, lock_token: &LockToken) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut storage = write(&self.storage);
        let entity = storage.entity_mut(&self.path);

        let position = entity
            .position_of(lock_token)
            .ok_or_else(|| QueueError::LockLost {
                lock_token: lock_token.to_string(),
            })?;
        entity.messages.remove(position);
        entity.completed += 1;
        self.peeked.retain(|t| t != lock_token);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut storage = write(&self.storage);
        let entity = storage.entity_mut(&self.path);
        for token in self.peeked.drain(..) {
            if let Some(position) = entity.position_of(&token) {
                entity.messages[position].lock = None;
            }
        }
        Ok(())
    }

    fn entity_path(&self) -> &EntityPath {
        &self.path
    }
}

// ============================================================================
// InMemorySender
// ============================================================================

/// Sender into one in-memory queue or topic
pub struct InMemorySender {
    storage: SharedStorage,
    path: EntityPath,
    closed: bool,
}

#[async_trait]
impl MessageSender for InMemorySender {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::ConnectionFailed {
                message: format!("sender for '{}' is closed", self.path),
            });
        }
        write(&self.storage).deliver(&self.path, &message)
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        self.closed = true;
        Ok(())
    }

    fn entity_path(&self) -> &EntityPath {
        &self.path
    }
}
