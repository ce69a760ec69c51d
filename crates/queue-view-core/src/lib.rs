//! # QueueView Core
//!
//! Inspection and resubmission of Service Bus messages.
//!
//! This library provides:
//! - Listing of peeked messages as delimited or fixed-width lines
//! - Relaying messages between entities in peek or consume mode
//! - Sending one message per line of text input
//! - Saved connections and default entity names
//!
//! ## Module Organization
//!
//! - [`format`] - Field selection and line layout
//! - [`relay`] - Relay, text streaming and listing pipelines
//! - [`config`] - Configuration model, name resolution and persistence
//! - [`commands`] - Commands tying configuration, transport and pipelines together

pub mod commands;
pub mod config;
pub mod format;
pub mod relay;

pub use commands::{
    Command, CommandContext, CommandError, ConnectionsAction, MessagesOptions, SendOptions,
    SendSource, SourceEntity, StatusOptions, DEFAULT_MESSAGE_COUNT, SHOW_DEFAULT_MARKER,
};
pub use config::{
    ConfigStoreError, Configuration, ConfigurationStore, Connection, JsonConfigurationStore,
    ResolveError, CONFIG_FILE_NAME,
};
pub use format::{parse_fields, Field, FormatError, Layout, MessageFormatter};
pub use relay::{
    consume_and_send, list_messages, peek_and_send, stream_from_text, RelayError, RelayMode,
    RelaySession, RelaySummary,
};
