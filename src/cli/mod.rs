//! Command-line interface for pubwrap.
/// Command execution handlers
pub mod commands;
/// Output formatting utilities
pub mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Command-line interface for pubwrap
#[derive(Parser)]
#[command(name = "pubwrap")]
#[command(author, version, about = "Result-wrapping client for Google Cloud Pub/Sub and compatible emulators", long_about = None)]
pub struct Cli {
    /// Connection and output options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// TOML configuration file
    #[arg(long, short, global = true, env = "PUBWRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// GCP project ID (overrides GCP_PROJECT_ID and the config file)
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// REST endpoint, e.g. https://pubsub.googleapis.com
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Emulator address (host:port), overrides PUBSUB_EMULATOR_HOST
    #[arg(long, global = true)]
    pub emulator_host: Option<String>,

    /// Output format (table | json)
    #[arg(long, short, global = true, default_value = "table")]
    pub format: String,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Topic management commands
    #[command(subcommand)]
    Topic(TopicCommands),

    /// Subscription management commands
    #[command(subcommand)]
    Subscription(SubscriptionCommands),

    /// Publish one message
    Publish {
        /// Topic name
        topic: String,

        /// Message data
        data: String,

        /// Attribute as key=value (repeatable)
        #[arg(long = "attr", short)]
        attributes: Vec<String>,

        /// Parse the data as JSON and publish its compact encoding
        #[arg(long)]
        json: bool,

        /// Ordering key
        #[arg(long)]
        ordering_key: Option<String>,
    },

    /// Publish every non-empty line of a file as its own message
    PublishLines {
        /// Topic name
        topic: String,

        /// File to read, one message per line
        file: PathBuf,

        /// Attribute as key=value applied to every message (repeatable)
        #[arg(long = "attr", short)]
        attributes: Vec<String>,
    },

    /// Pull messages from a subscription
    Pull {
        /// Subscription name
        subscription: String,

        /// Maximum number of messages
        #[arg(long, short, default_value = "1")]
        max: u32,

        /// Let the broker wait for messages instead of returning immediately
        #[arg(long)]
        wait: bool,

        /// Acknowledge pulled messages
        #[arg(long)]
        ack: bool,
    },

    /// Acknowledge messages by ack id
    Ack {
        /// Subscription name
        subscription: String,

        /// Ack ids
        #[arg(required = true)]
        ack_ids: Vec<String>,
    },

    /// Show current configuration
    Config,
}

/// Topic management subcommands
#[derive(Subcommand)]
pub enum TopicCommands {
    /// List all topics of the project
    List,

    /// Create a topic (no-op if it exists)
    Create {
        /// Topic name
        name: String,
    },

    /// Delete a topic
    Delete {
        /// Topic name
        name: String,
    },

    /// Check whether a topic exists
    Exists {
        /// Topic name
        name: String,
    },
}

/// Subscription management subcommands
#[derive(Subcommand)]
pub enum SubscriptionCommands {
    /// List all subscriptions of the project
    List,

    /// Create a subscription on an existing topic (no-op if it exists)
    Create {
        /// Topic name
        topic: String,

        /// Subscription name
        name: String,

        /// Ack deadline in seconds (10-600)
        #[arg(long)]
        ack_deadline: Option<u32>,
    },

    /// Delete a subscription
    Delete {
        /// Subscription name
        name: String,
    },

    /// Check whether a subscription exists
    Exists {
        /// Subscription name
        name: String,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
