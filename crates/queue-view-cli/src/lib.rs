//! # QueueView CLI
//!
//! Command-line interface for inspecting and resubmitting Service Bus messages.
//!
//! This module provides CLI commands for:
//! - Listing messages of a queue, subscription or dead-letter sub-queue
//! - Resubmitting messages from one entity to another, or from text input
//! - Showing runtime message counts of an entity
//! - Managing saved connections and the default connection

use chrono::Duration;
use clap::{Args, CommandFactory, Parser, Subcommand};
use queue_runtime::{AzureServiceBusConfig, Connector, ConnectorFactory, ProviderConfig, QueueError};
use queue_view_core::{
    parse_fields, Command, CommandContext, CommandError, ConnectionsAction, ConfigurationStore,
    JsonConfigurationStore, MessagesOptions, SendOptions, SendSource, SourceEntity, StatusOptions,
    CONFIG_FILE_NAME, DEFAULT_MESSAGE_COUNT, SHOW_DEFAULT_MARKER,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Name of the installed binary
pub const BINARY_NAME: &str = "queue-view";

// ============================================================================
// CLI Structure
// ============================================================================

/// QueueView CLI - Inspect and resubmit Service Bus messages
#[derive(Debug, Parser)]
#[command(name = "queue-view")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and resubmit Azure Service Bus messages")]
#[command(
    long_about = "QueueView lists, relays and resubmits messages of Azure Service Bus queues, topics and dead-letter sub-queues"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_VIEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Seconds the service waits for a message before reporting none
    #[arg(long, default_value_t = 5)]
    pub receive_timeout: u32,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List messages without removing them
    #[command(
        long_about = "List messages without removing them.\n\n\
Service Bus has no side-effect free read over REST: every listed message is \
locked and then released, which raises its delivery count. A message listed \
repeatedly reaches the entity's maximum delivery count and is moved to the \
dead-letter sub-queue by the service."
    )]
    Messages(MessagesArgs),

    /// Resubmit messages from an entity, standard input or a file
    Send(SendArgs),

    /// Show runtime message counts of an entity
    Status(StatusArgs),

    /// Add, delete, list saved connections or get and set the default
    Connections(ConnectionsArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Queue or topic and subscription to read from
#[derive(Debug, Clone, Args)]
pub struct EntityArgs {
    /// Saved connection name, the default connection when omitted
    #[arg(short = 'c', long)]
    pub connection: Option<String>,

    /// Queue name
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Topic name
    #[arg(short, long)]
    pub topic: Option<String>,

    /// Subscription name
    #[arg(short, long)]
    pub subscription: Option<String>,
}

impl EntityArgs {
    fn into_source(self, dead_letter: bool) -> SourceEntity {
        SourceEntity {
            connection: self.connection,
            queue: self.queue,
            topic: self.topic,
            subscription: self.subscription,
            dead_letter,
        }
    }
}

/// Arguments of the `messages` command
#[derive(Debug, Clone, Args)]
pub struct MessagesArgs {
    #[command(flatten)]
    pub entity: EntityArgs,

    /// Read the dead-letter sub-queue
    #[arg(short = 'd', long)]
    pub dead_letter: bool,

    /// Comma separated fields: MessageId, SeqNum, Body, UserProperties
    #[arg(short = 'f', long, value_name = "FIELDS")]
    pub fields: Option<String>,

    /// Maximum number of messages to list
    #[arg(short = 'n', long, default_value_t = DEFAULT_MESSAGE_COUNT)]
    pub count: usize,

    /// Print fixed-width columns
    #[arg(short = 'p', long)]
    pub pretty: bool,
}

/// Arguments of the `send` command
#[derive(Debug, Clone, Args)]
pub struct SendArgs {
    #[command(flatten)]
    pub entity: EntityArgs,

    /// Read the dead-letter sub-queue of the source
    #[arg(short = 'd', long)]
    pub dead_letter: bool,

    /// Remove messages from the source as they are resubmitted
    #[arg(short = 'D', long)]
    pub consume: bool,

    /// Send one message per line of standard input
    #[arg(short = 'i', long, conflicts_with = "file")]
    pub stdin: bool,

    /// Send one message per line of a file
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,

    /// Saved connection name of the destination
    #[arg(short = 'C', long)]
    pub destination_connection: Option<String>,

    /// Destination queue name
    #[arg(short = 'Q', long)]
    pub destination_queue: Option<String>,

    /// Destination topic name
    #[arg(short = 'T', long)]
    pub destination_topic: Option<String>,
}

/// Arguments of the `status` command
#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub entity: EntityArgs,
}

/// Arguments of the `connections` command
///
/// Without flags the saved connections are listed.
#[derive(Debug, Clone, Args)]
pub struct ConnectionsArgs {
    /// Name of the connection to add
    #[arg(
        short = 'n',
        long,
        requires = "connection_string",
        conflicts_with_all = ["delete", "default"]
    )]
    pub name: Option<String>,

    /// Connection string of the connection to add
    #[arg(short = 's', long, requires = "name")]
    pub connection_string: Option<String>,

    /// Replace an existing connection with the same name
    #[arg(short = 'u', long, requires = "name")]
    pub update: bool,

    /// Delete the named connection
    #[arg(short = 'D', long, value_name = "NAME", conflicts_with = "default")]
    pub delete: Option<String>,

    /// Set the default connection, or print it when given '.'
    #[arg(short = 'd', long, value_name = "NAME")]
    pub default: Option<String>,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Failed to create connector: {0}")]
    Connector(#[from] QueueError),

    #[error("Home directory not found. Specify the configuration file with --config.")]
    NoHomeDirectory,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Command(e) => match e {
                CommandError::Resolve(_) | CommandError::Store(_) | CommandError::MissingEntity => 1,
                CommandError::Transport(_) => 2,
                CommandError::Input { .. } | CommandError::Io(_) => 3,
            },
            Self::NoHomeDirectory => 1,
            Self::Connector(_) => 2,
            Self::Io(_) => 3,
            Self::InvalidArgument { .. } => 4,
        }
    }

    /// Check if re-running the same command may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Command(e) => e.is_transient(),
            Self::Connector(e) => e.is_transient(),
            _ => false,
        }
    }
}

// ============================================================================
// Argument Conversion
// ============================================================================

impl MessagesArgs {
    fn into_command(self) -> Result<Command, CliError> {
        let fields = match self.fields.as_deref() {
            Some(list) => parse_fields(list).map_err(|e| CliError::InvalidArgument {
                arg: "fields".to_string(),
                message: e.to_string(),
            })?,
            None => Vec::new(),
        };

        Ok(Command::Messages(MessagesOptions {
            source: self.entity.into_source(self.dead_letter),
            fields,
            count: self.count,
            pretty: self.pretty,
        }))
    }
}

impl SendArgs {
    fn into_command(self) -> Command {
        let source = if self.stdin {
            SendSource::Stdin
        } else if let Some(path) = self.file {
            SendSource::File(path)
        } else {
            SendSource::Entity {
                entity: self.entity.into_source(self.dead_letter),
                consume: self.consume,
            }
        };

        Command::Send(SendOptions {
            source,
            destination_connection: self.destination_connection,
            destination_queue: self.destination_queue,
            destination_topic: self.destination_topic,
        })
    }
}

impl ConnectionsArgs {
    fn into_command(self) -> Result<Command, CliError> {
        let action = match (self.delete, self.default, self.name) {
            (Some(name), _, _) => ConnectionsAction::Delete { name },
            (None, Some(name), _) if name == SHOW_DEFAULT_MARKER => ConnectionsAction::ShowDefault,
            (None, Some(name), _) => ConnectionsAction::SetDefault { name },
            (None, None, Some(name)) => {
                let connection_string =
                    self.connection_string
                        .ok_or_else(|| CliError::InvalidArgument {
                            arg: "connection-string".to_string(),
                            message: "required when adding a connection".to_string(),
                        })?;
                ConnectionsAction::Add {
                    name,
                    connection_string,
                    update: self.update,
                }
            }
            (None, None, None) => ConnectionsAction::List,
        };
        Ok(Command::Connections(action))
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let mut out = std::io::stdout();
    execute(cli, &mut out).await
}

/// Run parsed arguments, writing command output to `out`
pub async fn execute(cli: Cli, out: &mut (dyn Write + Send)) -> Result<(), CliError> {
    let command = match cli.command {
        Commands::Messages(args) => args.into_command()?,
        Commands::Send(args) => args.into_command(),
        Commands::Status(args) => Command::Status(StatusOptions {
            source: args.entity.into_source(false),
        }),
        Commands::Connections(args) => args.into_command()?,
        Commands::Completions { shell } => return execute_completions_command(shell, out),
    };

    let store = JsonConfigurationStore::new(configuration_path(cli.config)?);
    let connector = create_connector(cli.receive_timeout)?;
    debug!(
        config = %store.path().display(),
        provider = %connector.provider_type(),
        "Executing command"
    );

    let mut ctx = CommandContext {
        store: &store as &dyn ConfigurationStore,
        connector: connector.as_ref(),
        out,
    };
    command.execute(&mut ctx).await?;
    Ok(())
}

/// Initialize logging based on CLI arguments
///
/// `RUST_LOG` takes precedence over `--log-level`. Logs go to stderr so that
/// command output on stdout stays clean.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let json_layer = cli.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!cli.json_logs).then(|| {
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
    Ok(())
}

/// Configuration file from `--config`, otherwise in the home directory
fn configuration_path(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match explicit {
        Some(path) => Ok(path),
        None => dirs::home_dir()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .ok_or(CliError::NoHomeDirectory),
    }
}

fn create_connector(receive_timeout: u32) -> Result<Box<dyn Connector>, CliError> {
    let config = AzureServiceBusConfig {
        receive_timeout: Duration::seconds(i64::from(receive_timeout)),
        ..AzureServiceBusConfig::default()
    };
    Ok(ConnectorFactory::create_connector(
        ProviderConfig::AzureServiceBus(config),
    )?)
}

/// Execute completions command
fn execute_completions_command(
    shell: clap_complete::Shell,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    info!(shell = ?shell, "Generating shell completions");
    clap_complete::generate(shell, &mut Cli::command(), BINARY_NAME, out);
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
