//! # Oazure CLI
//!
//! Command-line front end for the oazure runtime.
//!
//! This module provides CLI commands for:
//! - Long-poll receive, send and the peek-lock companions
//! - Blob lease acquire, renew and release
//! - Lease-guarded blob write, delete and copy
//! - Displaying the resolved configuration
//! - Shell completions
//!
//! Command output goes to stdout; logs go to stderr.

use clap::{Args, CommandFactory, Parser, Subcommand};
use oazure_runtime::{
    BlobClient, BlobRef, CancellationToken, ConfigurationError, EntityPath, LeaseId, LeaseManager,
    LockToken, LongPollReceiver, Message, MessageId, MessageSender, OazureConfig, ReceiveMode,
    ReceiveOutcome, Secret, ServiceError, ValidationError,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

/// Oazure CLI - Service Bus long-poll receive and Blob leases
#[derive(Debug, Parser)]
#[command(name = "oazure")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hand-signed Service Bus and Blob Storage client")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "OAZURE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Receive the next message from a queue or subscription
    Receive {
        #[command(flatten)]
        entity: EntityArgs,

        /// Receive mode
        #[arg(short, long, value_enum, default_value = "peek-lock")]
        mode: ModeArg,

        /// Give up after this many seconds; wait until a message or Ctrl-C otherwise
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Spend the timeout as a budget of clamped attempts instead of racing it
        #[arg(long, requires = "timeout")]
        bounded: bool,
    },

    /// Send a message to a queue or topic
    Send {
        #[command(flatten)]
        entity: EntityArgs,

        #[command(flatten)]
        body: BodyArgs,
    },

    /// Make a peek-locked message visible again
    Unlock {
        #[command(flatten)]
        entity: EntityArgs,

        #[command(flatten)]
        lock: LockArgs,
    },

    /// Delete a peek-locked message
    Delete {
        #[command(flatten)]
        entity: EntityArgs,

        #[command(flatten)]
        lock: LockArgs,
    },

    /// Renew the lock on a peek-locked message
    RenewLock {
        #[command(flatten)]
        entity: EntityArgs,

        #[command(flatten)]
        lock: LockArgs,
    },

    /// Blob lease commands
    Lease {
        #[command(subcommand)]
        action: LeaseCommands,
    },

    /// Lease-guarded blob commands
    Blob {
        #[command(subcommand)]
        action: BlobCommands,
    },

    /// Show the resolved configuration with secrets redacted
    Config {
        /// Output format for configuration
        #[arg(short = 'f', long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Queue, topic or subscription selection
#[derive(Debug, Clone, Args)]
pub struct EntityArgs {
    /// Queue name
    #[arg(long, conflicts_with = "topic")]
    pub queue: Option<String>,

    /// Topic name
    #[arg(long)]
    pub topic: Option<String>,

    /// Subscription name (requires --topic)
    #[arg(long, requires = "topic")]
    pub subscription: Option<String>,
}

impl EntityArgs {
    pub fn resolve(&self) -> Result<EntityPath, CliError> {
        let path = match (&self.queue, &self.topic, &self.subscription) {
            (Some(queue), None, None) => EntityPath::queue(queue.as_str())?,
            (None, Some(topic), None) => EntityPath::topic(topic.as_str())?,
            (None, Some(topic), Some(subscription)) => {
                EntityPath::subscription(topic.as_str(), subscription.as_str())?
            }
            _ => {
                return Err(CliError::InvalidArgument {
                    arg: "entity".to_string(),
                    message: "use --queue, --topic, or --topic with --subscription".to_string(),
                })
            }
        };
        Ok(path)
    }
}

/// Message body, inline or from a file
#[derive(Debug, Clone, Args)]
pub struct BodyArgs {
    /// Message body text
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub body: Option<String>,

    /// Read the message body from a file
    #[arg(long)]
    pub file: Option<PathBuf>,
}

impl BodyArgs {
    async fn read(&self) -> Result<Vec<u8>, CliError> {
        match (&self.body, &self.file) {
            (Some(body), _) => Ok(body.clone().into_bytes()),
            (None, Some(file)) => Ok(tokio::fs::read(file).await?),
            (None, None) => Err(CliError::InvalidArgument {
                arg: "body".to_string(),
                message: "use --body or --file".to_string(),
            }),
        }
    }
}

/// Identification of a peek-locked message
#[derive(Debug, Clone, Args)]
pub struct LockArgs {
    /// Message identifier
    pub message_id: String,

    /// Lock token from the peek-lock receive
    pub lock_token: String,
}

impl LockArgs {
    fn parse(&self) -> Result<(MessageId, LockToken), CliError> {
        Ok((
            MessageId::new(self.message_id.as_str())?,
            LockToken::new(self.lock_token.as_str())?,
        ))
    }
}

/// Receive mode argument
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    /// Lock the message; unlock, renew or delete it afterwards
    PeekLock,
    /// Remove the message as it is read
    ReceiveAndDelete,
}

impl From<ModeArg> for ReceiveMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::PeekLock => ReceiveMode::PeekLock,
            ModeArg::ReceiveAndDelete => ReceiveMode::ReceiveAndDelete,
        }
    }
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

// ============================================================================
// Lease Commands
// ============================================================================

/// Lease subcommands
#[derive(Debug, Subcommand)]
pub enum LeaseCommands {
    /// Acquire a lease and print its identifier
    Acquire {
        container: String,
        blob: String,

        /// Lease duration in seconds (15-60)
        #[arg(short, long, default_value = "60")]
        duration: u32,
    },

    /// Renew a held lease
    Renew {
        container: String,
        blob: String,
        lease_id: String,
    },

    /// Release a held lease
    Release {
        container: String,
        blob: String,
        lease_id: String,
    },
}

// ============================================================================
// Blob Commands
// ============================================================================

/// Blob subcommands
#[derive(Debug, Subcommand)]
pub enum BlobCommands {
    /// Write a block blob
    Write {
        container: String,
        blob: String,

        #[command(flatten)]
        body: BodyArgs,

        /// Lease the blob is held under
        #[arg(long)]
        lease_id: Option<String>,
    },

    /// Delete a blob and its snapshots
    Delete {
        container: String,
        blob: String,

        /// Lease the blob is held under
        #[arg(long)]
        lease_id: Option<String>,
    },

    /// Copy a blob within the account
    Copy {
        source_container: String,
        source_blob: String,
        destination_container: String,
        destination_blob: String,

        /// Lease the destination blob is held under
        #[arg(long)]
        lease_id: Option<String>,
    },
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Service error: {0}")]
    Service(ServiceError),

    #[error("No message received within {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Output error: {message}")]
    Output { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ServiceError> for CliError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Configuration(e) => Self::Configuration(e),
            ServiceError::Validation(e) => Self::Validation(e),
            ServiceError::Timeout { duration } => Self::TimedOut {
                seconds: duration.as_secs(),
            },
            other => Self::Service(other),
        }
    }
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::Validation(_) | Self::InvalidArgument { .. } => 3,
            Self::Service(e) if e.is_contention() => 4,
            Self::TimedOut { .. } => 5,
            Self::Service(_) => 6,
            Self::Output { .. } | Self::Io(_) => 7,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli.log_level, cli.json_logs)?;

    run(cli).await
}

/// Execute a parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::Completions { shell } = &cli.command {
        return execute_completions_command(*shell);
    }

    let config = load_configuration(cli.config.as_deref())?;

    match cli.command {
        Commands::Receive {
            entity,
            mode,
            timeout,
            bounded,
        } => execute_receive_command(&config, &entity, mode.into(), timeout, bounded).await,
        Commands::Send { entity, body } => execute_send_command(&config, &entity, &body).await,
        Commands::Unlock { entity, lock } => {
            execute_lock_command(&config, &entity, &lock, LockOperation::Unlock).await
        }
        Commands::Delete { entity, lock } => {
            execute_lock_command(&config, &entity, &lock, LockOperation::Delete).await
        }
        Commands::RenewLock { entity, lock } => {
            execute_lock_command(&config, &entity, &lock, LockOperation::RenewLock).await
        }
        Commands::Lease { action } => execute_lease_command(&config, action).await,
        Commands::Blob { action } => execute_blob_command(&config, action).await,
        Commands::Config { format } => execute_config_command(&config, format),
        Commands::Completions { shell } => execute_completions_command(shell),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Install the tracing subscriber; `RUST_LOG` takes precedence over `log_level`
pub fn initialize_logging(log_level: &str, json_logs: bool) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "oazure={level},oazure_cli={level},oazure_runtime={level}",
                level = log_level
            ))
        })
        .map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::InvalidArgument {
        arg: "log-level".to_string(),
        message: format!("failed to install logger: {}", e),
    })
}

/// Load configuration from the given file and the environment
pub fn load_configuration(config_path: Option<&Path>) -> Result<OazureConfig, CliError> {
    Ok(OazureConfig::load(config_path)?)
}

/// Cancellation token that fires on Ctrl-C
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping receive");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
        }
    });
    token
}

async fn execute_receive_command(
    config: &OazureConfig,
    entity: &EntityArgs,
    mode: ReceiveMode,
    timeout: Option<u64>,
    bounded: bool,
) -> Result<(), CliError> {
    let receiver = LongPollReceiver::from_config(config.service_bus()?, entity.resolve()?)?;
    let timeout = timeout.map(Duration::from_secs);

    info!(
        entity = %receiver.entity(),
        mode = %mode,
        timeout = ?timeout,
        bounded,
        "Receiving message"
    );

    let message = match (bounded, timeout) {
        (true, Some(budget)) => receiver.receive_bounded(mode, budget).await?,
        _ => {
            let cancel = ctrl_c_token();
            match receiver.receive(mode, timeout, Some(&cancel)).await? {
                ReceiveOutcome::Message(message) => message,
                ReceiveOutcome::TimedOut => {
                    return Err(CliError::TimedOut {
                        seconds: timeout.map(|t| t.as_secs()).unwrap_or_default(),
                    })
                }
                ReceiveOutcome::Cancelled => {
                    info!("Receive cancelled");
                    return Ok(());
                }
            }
        }
    };

    print_json(&message_json(&message))
}

async fn execute_send_command(
    config: &OazureConfig,
    entity: &EntityArgs,
    body: &BodyArgs,
) -> Result<(), CliError> {
    let sender = MessageSender::from_config(config.service_bus()?, entity.resolve()?)?;
    let body = body.read().await?;

    info!(entity = %sender.entity(), size = body.len(), "Sending message");
    sender.send(body).await?;
    Ok(())
}

/// Peek-lock companion selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockOperation {
    Unlock,
    Delete,
    RenewLock,
}

async fn execute_lock_command(
    config: &OazureConfig,
    entity: &EntityArgs,
    lock: &LockArgs,
    operation: LockOperation,
) -> Result<(), CliError> {
    let receiver = LongPollReceiver::from_config(config.service_bus()?, entity.resolve()?)?;
    let (id, token) = lock.parse()?;

    info!(
        entity = %receiver.entity(),
        message_id = %id,
        operation = ?operation,
        "Settling message"
    );
    match operation {
        LockOperation::Unlock => receiver.unlock(&id, &token).await?,
        LockOperation::Delete => receiver.delete(&id, &token).await?,
        LockOperation::RenewLock => receiver.renew_lock(&id, &token).await?,
    }
    Ok(())
}

async fn execute_lease_command(
    config: &OazureConfig,
    action: LeaseCommands,
) -> Result<(), CliError> {
    let manager = LeaseManager::from_config(config.blob_storage()?)?;

    match action {
        LeaseCommands::Acquire {
            container,
            blob,
            duration,
        } => {
            let blob = BlobRef::new(container, blob)?;
            let lease = manager.acquire(&blob, duration).await?;
            print_json(&serde_json::json!({
                "blob": lease.blob.to_string(),
                "lease_id": lease.id.as_str(),
                "duration": lease.duration.seconds(),
            }))
        }
        LeaseCommands::Renew {
            container,
            blob,
            lease_id,
        } => {
            let blob = BlobRef::new(container, blob)?;
            manager.renew(&blob, &LeaseId::new(lease_id)?).await?;
            Ok(())
        }
        LeaseCommands::Release {
            container,
            blob,
            lease_id,
        } => {
            let blob = BlobRef::new(container, blob)?;
            manager.release(&blob, &LeaseId::new(lease_id)?).await?;
            Ok(())
        }
    }
}

async fn execute_blob_command(config: &OazureConfig, action: BlobCommands) -> Result<(), CliError> {
    let client = BlobClient::from_config(config.blob_storage()?)?;

    match action {
        BlobCommands::Write {
            container,
            blob,
            body,
            lease_id,
        } => {
            let blob = BlobRef::new(container, blob)?;
            let lease = lease_id.map(LeaseId::new).transpose()?;
            let body = body.read().await?;
            client.write_blob(&blob, body, lease.as_ref()).await?;
            Ok(())
        }
        BlobCommands::Delete {
            container,
            blob,
            lease_id,
        } => {
            let blob = BlobRef::new(container, blob)?;
            let lease = lease_id.map(LeaseId::new).transpose()?;
            client.delete_blob(&blob, lease.as_ref()).await?;
            Ok(())
        }
        BlobCommands::Copy {
            source_container,
            source_blob,
            destination_container,
            destination_blob,
            lease_id,
        } => {
            let source = BlobRef::new(source_container, source_blob)?;
            let destination = BlobRef::new(destination_container, destination_blob)?;
            let lease = lease_id.map(LeaseId::new).transpose()?;
            let status = client.copy_blob(&source, &destination, lease.as_ref()).await?;
            print_json(&serde_json::json!({
                "copy_status": status.status,
                "copy_id": status.copy_id,
            }))
        }
    }
}

fn execute_config_command(config: &OazureConfig, format: ConfigFormat) -> Result<(), CliError> {
    println!("{}", render_config(&redacted(config), format)?);
    Ok(())
}

fn execute_completions_command(shell: clap_complete::Shell) -> Result<(), CliError> {
    info!(shell = ?shell, "Generating shell completions");

    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

/// JSON view of a received message
pub fn message_json(message: &Message) -> serde_json::Value {
    serde_json::json!({
        "message_id": message.id.as_str(),
        "lock_token": message.lock_token.as_ref().map(|t| t.as_str()),
        "delivery_count": message.delivery_count,
        "sequence_number": message.sequence_number,
        "enqueued_at": message.enqueued_at.map(|t| t.to_rfc3339()),
        "locked_until": message.locked_until.map(|t| t.to_rfc3339()),
        "body": message.body_text(),
    })
}

fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Output {
        message: e.to_string(),
    })?;
    println!("{}", text);
    Ok(())
}

/// Copy of `config` with every secret replaced by a marker
pub fn redacted(config: &OazureConfig) -> OazureConfig {
    let mut config = config.clone();
    if let Some(service_bus) = config.service_bus.as_mut() {
        service_bus.key_value = Secret::new("<redacted>");
    }
    if let Some(blob_storage) = config.blob_storage.as_mut() {
        blob_storage.account_key = Secret::new("<redacted>");
    }
    config
}

/// Serialise `config` in the requested format
pub fn render_config(config: &OazureConfig, format: ConfigFormat) -> Result<String, CliError> {
    let output = |message: String| CliError::Output { message };

    match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| output(e.to_string())),
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).map_err(|e| output(e.to_string()))
        }
        ConfigFormat::Toml => toml::to_string(config).map_err(|e| output(e.to_string())),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
