//! User-facing commands.
//!
//! Each [`Command`] variant carries plain option values. [`Command::execute`]
//! resolves every name against the stored configuration before any receiver
//! or sender is opened, then runs the matching pipeline.

use crate::config::{
    ConfigStoreError, Configuration, ConfigurationStore, Connection, ResolveError,
};
use crate::format::{Field, Layout, MessageFormatter};
use crate::relay::{self, RelayError, RelayMode, RelaySession};
use queue_runtime::{ConnectionString, Connector, EntityPath, QueueError};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;

/// Number of messages listed when no count is given
pub const DEFAULT_MESSAGE_COUNT: usize = 10;

/// Argument of the default-connection action that prints instead of setting
pub const SHOW_DEFAULT_MARKER: &str = ".";

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while executing a command
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Store(#[from] ConfigStoreError),

    #[error("You must specify either a queue name or a topic name.")]
    MissingEntity,

    #[error(transparent)]
    Transport(#[from] QueueError),

    #[error("Failed to open {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandError {
    /// Check if a later re-run of the command may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<RelayError> for CommandError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Transport(e) => Self::Transport(e),
            RelayError::Io(e) => Self::Io(e),
        }
    }
}

// ============================================================================
// Command Options
// ============================================================================

/// A queue, or a topic and subscription, as named by the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceEntity {
    pub connection: Option<String>,
    pub queue: Option<String>,
    pub topic: Option<String>,
    pub subscription: Option<String>,
    pub dead_letter: bool,
}

impl SourceEntity {
    /// Queue path when a queue was named, otherwise a subscription path
    fn resolve_path(&self, config: &Configuration) -> Result<EntityPath, ResolveError> {
        if is_given(&self.queue) {
            config.resolve_queue_path(self.queue.as_deref(), self.dead_letter)
        } else {
            config.resolve_subscription_path(
                self.topic.as_deref(),
                self.subscription.as_deref(),
                self.dead_letter,
            )
        }
    }
}

/// Options of the `messages` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesOptions {
    pub source: SourceEntity,
    pub fields: Vec<Field>,
    pub count: usize,
    pub pretty: bool,
}

impl Default for MessagesOptions {
    fn default() -> Self {
        Self {
            source: SourceEntity::default(),
            fields: Vec::new(),
            count: DEFAULT_MESSAGE_COUNT,
            pretty: false,
        }
    }
}

/// Where the `send` command reads its messages from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendSource {
    /// Relay messages from an entity; `consume` removes them as they are forwarded
    Entity { entity: SourceEntity, consume: bool },
    /// One message per line of standard input
    Stdin,
    /// One message per line of a file
    File(PathBuf),
}

/// Options of the `send` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    pub source: SendSource,
    pub destination_connection: Option<String>,
    pub destination_queue: Option<String>,
    pub destination_topic: Option<String>,
}

/// Options of the `status` command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusOptions {
    pub source: SourceEntity,
}

/// Changes to and queries of the saved connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionsAction {
    Add {
        name: String,
        connection_string: String,
        update: bool,
    },
    Delete {
        name: String,
    },
    ShowDefault,
    SetDefault {
        name: String,
    },
    List,
}

/// A command ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Messages(MessagesOptions),
    Send(SendOptions),
    Status(StatusOptions),
    Connections(ConnectionsAction),
}

/// Collaborators a command runs against
pub struct CommandContext<'a> {
    pub store: &'a dyn ConfigurationStore,
    pub connector: &'a dyn Connector,
    pub out: &'a mut (dyn Write + Send),
}

fn is_given(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

// ============================================================================
// Execution
// ============================================================================

impl Command {
    /// Run the command to completion
    pub async fn execute(self, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        match self {
            Self::Messages(options) => execute_messages(options, ctx).await,
            Self::Send(options) => execute_send(options, ctx).await,
            Self::Status(options) => execute_status(options, ctx).await,
            Self::Connections(action) => execute_connections(action, ctx),
        }
    }
}

async fn execute_messages(
    options: MessagesOptions,
    ctx: &mut CommandContext<'_>,
) -> Result<(), CommandError> {
    let config = ctx.store.read_configuration()?;
    let connection = config.resolve_connection_string(options.source.connection.as_deref())?;
    let path = options.source.resolve_path(&config)?;

    let layout = if options.pretty {
        Layout::Column
    } else {
        Layout::Delimited
    };
    let formatter = MessageFormatter::new(options.fields, layout);

    info!(path = %path, count = options.count, "Listing messages");
    let mut receiver = ctx.connector.open_receiver(&connection, &path).await?;
    let listed = relay::list_messages(receiver.as_mut(), options.count, &formatter, ctx.out).await;
    let closed = receiver.close().await;

    listed?;
    closed?;
    Ok(())
}

async fn execute_send(
    options: SendOptions,
    ctx: &mut CommandContext<'_>,
) -> Result<(), CommandError> {
    let config = ctx.store.read_configuration()?;
    let destination_connection =
        config.resolve_connection_string(options.destination_connection.as_deref())?;
    let destination = destination_path(&options, &config)?;

    match options.source {
        SendSource::Entity { entity, consume } => {
            let source_connection = config.resolve_connection_string(entity.connection.as_deref())?;
            let source = relay_source_path(&entity, &config)?;
            let mode = if consume {
                RelayMode::Consume
            } else {
                RelayMode::Peek
            };
            relay_entity(
                ctx,
                &source_connection,
                &source,
                &destination_connection,
                &destination,
                mode,
            )
            .await
        }
        SendSource::Stdin => {
            let input = BufReader::new(tokio::io::stdin());
            stream_lines(ctx, input, &destination_connection, &destination).await
        }
        SendSource::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|source| CommandError::Input { path, source })?;
            stream_lines(ctx, BufReader::new(file), &destination_connection, &destination).await
        }
    }
}

fn destination_path(options: &SendOptions, config: &Configuration) -> Result<EntityPath, CommandError> {
    if is_given(&options.destination_queue) {
        Ok(config.resolve_queue_path(options.destination_queue.as_deref(), false)?)
    } else if is_given(&options.destination_topic) {
        Ok(config.resolve_topic_path(options.destination_topic.as_deref())?)
    } else {
        Err(CommandError::MissingEntity)
    }
}

fn relay_source_path(entity: &SourceEntity, config: &Configuration) -> Result<EntityPath, CommandError> {
    if is_given(&entity.queue) || is_given(&entity.topic) {
        Ok(entity.resolve_path(config)?)
    } else {
        Err(CommandError::MissingEntity)
    }
}

async fn relay_entity(
    ctx: &mut CommandContext<'_>,
    source_connection: &ConnectionString,
    source: &EntityPath,
    destination_connection: &ConnectionString,
    destination: &EntityPath,
    mode: RelayMode,
) -> Result<(), CommandError> {
    let mut receiver = ctx.connector.open_receiver(source_connection, source).await?;
    let sender = match ctx.connector.open_sender(destination_connection, destination).await {
        Ok(sender) => sender,
        Err(e) => {
            if let Err(close_error) = receiver.close().await {
                warn!(error = %close_error, "Failed to close receiver");
            }
            return Err(e.into());
        }
    };

    let summary = RelaySession::new(receiver, sender).run(mode, ctx.out).await?;
    debug!(
        forwarded = summary.forwarded,
        completed = summary.completed,
        "Send finished"
    );
    Ok(())
}

async fn stream_lines<R>(
    ctx: &mut CommandContext<'_>,
    input: R,
    connection: &ConnectionString,
    destination: &EntityPath,
) -> Result<(), CommandError>
where
    R: tokio::io::AsyncBufRead + Unpin + Send,
{
    let mut sender = ctx.connector.open_sender(connection, destination).await?;
    let streamed = relay::stream_from_text(input, sender.as_mut(), ctx.out).await;
    let closed = sender.close().await;

    streamed?;
    closed?;
    Ok(())
}

async fn execute_status(
    options: StatusOptions,
    ctx: &mut CommandContext<'_>,
) -> Result<(), CommandError> {
    let config = ctx.store.read_configuration()?;
    let connection = config.resolve_connection_string(options.source.connection.as_deref())?;
    let path = options.source.resolve_path(&config)?;

    let manager = ctx.connector.open_manager(&connection).await?;
    let info = manager.runtime_info(&path).await?;

    let rows: [(&str, String); 7] = [
        ("Path", path.to_string()),
        ("Message Count", info.message_count.to_string()),
        ("Active Messages", info.active_message_count.to_string()),
        ("DeadLetter Messages", info.dead_letter_message_count.to_string()),
        ("Scheduled Messages", info.scheduled_message_count.to_string()),
        ("Transferred Messages", info.transfer_message_count.to_string()),
        (
            "Transferred DeadLetter Messages",
            info.transfer_dead_letter_message_count.to_string(),
        ),
    ];
    for (label, value) in rows {
        writeln!(ctx.out, "{:<35}{:<45}", label, value)?;
    }
    Ok(())
}

fn execute_connections(
    action: ConnectionsAction,
    ctx: &mut CommandContext<'_>,
) -> Result<(), CommandError> {
    let mut config = ctx.store.read_configuration()?;

    match action {
        ConnectionsAction::Add {
            name,
            connection_string,
            update,
        } => {
            if config.connection(&name).is_some() && !update {
                writeln!(
                    ctx.out,
                    "A connection with this name already exists. Specify -u to update."
                )?;
                return Ok(());
            }
            info!(connection = %name, update, "Saving connection");
            config.upsert_connection(Connection::new(name, connection_string));
            ctx.store.write_configuration(&config)?;
        }
        ConnectionsAction::Delete { name } => {
            if !config.remove_connection(&name) {
                writeln!(ctx.out, "No connection with this name was found.")?;
                return Ok(());
            }
            info!(connection = %name, "Deleted connection");
            ctx.store.write_configuration(&config)?;
        }
        ConnectionsAction::ShowDefault => {
            let connection_string = config
                .connection(&config.default_connection_name)
                .map(|c| c.connection_string.as_str())
                .unwrap_or_default();
            writeln!(
                ctx.out,
                "{} {}",
                config.default_connection_name, connection_string
            )?;
        }
        ConnectionsAction::SetDefault { name } => {
            if config.connection(&name).is_none() {
                writeln!(ctx.out, "No connection with this name was found.")?;
                return Ok(());
            }
            config.default_connection_name = name;
            ctx.store.write_configuration(&config)?;
        }
        ConnectionsAction::List => {
            for connection in config.sorted_connections() {
                writeln!(ctx.out, "{} {}", connection.name, connection.connection_string)?;
            }
        }
    }
    Ok(())
}
