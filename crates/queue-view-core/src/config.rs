//! Saved connections, default entity names and their resolution.
//!
//! Names given on the command line win over the configured defaults. An empty
//! name counts as absent, so an empty default never resolves.

use queue_runtime::{ConfigurationError, ConnectionString, EntityPath, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Name of the configuration file in the user's home directory
pub const CONFIG_FILE_NAME: &str = "QueueView.json";

/// Prefix of environment variables overriding configuration values
pub const ENV_PREFIX: &str = "QUEUE_VIEW";

// ============================================================================
// Error Types
// ============================================================================

/// Errors resolving names against the configuration
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{field} name cannot be empty.")]
    MissingName { field: &'static str },

    #[error("No connection found with connection name '{name}'.")]
    ConnectionNotFound { name: String },

    #[error("Connection string cannot be empty for connection '{name}'.")]
    EmptyConnectionString { name: String },

    #[error("Connection string of '{name}' is invalid: {source}")]
    InvalidConnectionString {
        name: String,
        #[source]
        source: ConfigurationError,
    },

    #[error("Invalid entity path: {0}")]
    InvalidPath(#[from] ValidationError),
}

/// Errors reading or writing the configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("Failed to read configuration from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("Failed to write configuration to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// Configuration Model
// ============================================================================

/// A named connection string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub name: String,
    pub connection_string: String,
}

impl Connection {
    pub fn new(name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_string: connection_string.into(),
        }
    }
}

/// Persisted user configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub connections: Vec<Connection>,
    pub default_connection_name: String,
    pub default_queue_name: String,
    pub default_subscription_name: String,
    pub default_topic_name: String,
}

impl Configuration {
    /// Look up a connection by exact name
    pub fn connection(&self, name: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// Add or replace a connection, keeping the list order
    pub fn upsert_connection(&mut self, connection: Connection) {
        match self.connections.iter_mut().find(|c| c.name == connection.name) {
            Some(existing) => *existing = connection,
            None => self.connections.push(connection),
        }
    }

    /// Remove a connection, clearing the default if it pointed at it
    ///
    /// Returns `false` when no connection had that name.
    pub fn remove_connection(&mut self, name: &str) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c.name != name);
        if self.connections.len() == before {
            return false;
        }
        if self.default_connection_name == name {
            self.default_connection_name.clear();
        }
        true
    }

    /// Connections sorted by name
    pub fn sorted_connections(&self) -> Vec<&Connection> {
        let mut connections: Vec<&Connection> = self.connections.iter().collect();
        connections.sort_by(|a, b| a.name.cmp(&b.name));
        connections
    }

    /// Resolve a connection by name, falling back to the default connection
    pub fn resolve_connection_string(
        &self,
        name: Option<&str>,
    ) -> Result<ConnectionString, ResolveError> {
        let name = resolve_with_fallback(name, &self.default_connection_name, "Connection")?;
        let connection = self
            .connection(&name)
            .ok_or_else(|| ResolveError::ConnectionNotFound { name: name.clone() })?;

        if connection.connection_string.trim().is_empty() {
            return Err(ResolveError::EmptyConnectionString { name });
        }
        debug!(connection = %name, "Resolved connection");
        ConnectionString::parse(&connection.connection_string)
            .map_err(|source| ResolveError::InvalidConnectionString { name, source })
    }

    /// Path of a queue or its dead-letter sub-queue
    pub fn resolve_queue_path(
        &self,
        queue: Option<&str>,
        dead_letter: bool,
    ) -> Result<EntityPath, ResolveError> {
        let queue = resolve_with_fallback(queue, &self.default_queue_name, "Queue")?;
        Ok(EntityPath::queue(&queue, dead_letter)?)
    }

    /// Path of a subscription or its dead-letter sub-queue
    pub fn resolve_subscription_path(
        &self,
        topic: Option<&str>,
        subscription: Option<&str>,
        dead_letter: bool,
    ) -> Result<EntityPath, ResolveError> {
        let topic = resolve_with_fallback(topic, &self.default_topic_name, "Topic")?;
        let subscription =
            resolve_with_fallback(subscription, &self.default_subscription_name, "Subscription")?;
        Ok(EntityPath::subscription(&topic, &subscription, dead_letter)?)
    }

    /// Path of a topic
    pub fn resolve_topic_path(&self, topic: Option<&str>) -> Result<EntityPath, ResolveError> {
        let topic = resolve_with_fallback(topic, &self.default_topic_name, "Topic")?;
        Ok(EntityPath::topic(&topic)?)
    }
}

/// Pick the explicit value when non-empty, otherwise the non-empty fallback
pub fn resolve_with_fallback(
    explicit: Option<&str>,
    fallback: &str,
    field: &'static str,
) -> Result<String, ResolveError> {
    explicit
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback).filter(|value| !value.trim().is_empty()))
        .map(str::to_string)
        .ok_or(ResolveError::MissingName { field })
}

// ============================================================================
// Configuration Store
// ============================================================================

/// Persistence of the [`Configuration`]
#[cfg_attr(test, mockall::automock)]
pub trait ConfigurationStore: Send + Sync {
    /// Load the configuration; a store with nothing saved yields the default
    fn read_configuration(&self) -> Result<Configuration, ConfigStoreError>;

    /// Replace the saved configuration
    fn write_configuration(&self, configuration: &Configuration) -> Result<(), ConfigStoreError>;
}

/// Configuration kept in a JSON file
///
/// Values from `QUEUE_VIEW__<FIELD>` environment variables override the
/// file when reading, e.g. `QUEUE_VIEW__DEFAULT_QUEUE_NAME`.
#[derive(Debug, Clone)]
pub struct JsonConfigurationStore {
    path: PathBuf,
}

impl JsonConfigurationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigurationStore for JsonConfigurationStore {
    fn read_configuration(&self) -> Result<Configuration, ConfigStoreError> {
        let read_error = |source| ConfigStoreError::Read {
            path: self.path.clone(),
            source,
        };

        let configuration = config::Config::builder()
            .add_source(
                config::File::from(self.path.as_path())
                    .required(false)
                    .format(config::FileFormat::Json),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(read_error)?
            .try_deserialize::<Configuration>()
            .map_err(read_error)?;

        debug!(
            path = %self.path.display(),
            connections = configuration.connections.len(),
            "Loaded configuration"
        );
        Ok(configuration)
    }

    fn write_configuration(&self, configuration: &Configuration) -> Result<(), ConfigStoreError> {
        let write_error = |source| ConfigStoreError::Write {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_string_pretty(configuration)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(&self.path, json).map_err(write_error)?;

        debug!(path = %self.path.display(), "Saved configuration");
        Ok(())
    }
}
