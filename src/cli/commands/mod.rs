// Commands module
use std::collections::BTreeMap;

use anyhow::Context;
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{Cli, Commands, GlobalArgs, SubscriptionCommands, TopicCommands, output::*};
use crate::client::PubSub;
use crate::config::PubwrapConfig;
use crate::outcome::Outcome;
use crate::types::{Message, MessageAttributes, ReceivedMessage, SubscriptionOptions};

/// Topic row for list output
#[derive(Debug, Serialize, Tabled)]
struct TopicRow {
    name: String,
}

/// Subscription row for list output
#[derive(Debug, Serialize, Tabled)]
struct SubscriptionRow {
    name: String,
    topic: String,
    ack_deadline_seconds: u32,
}

/// Pulled message row
#[derive(Debug, Serialize, Tabled)]
struct MessageRow {
    ack_id: String,
    message_id: String,
    publish_time: String,
    delivery_attempt: u32,
    #[tabled(display_with = "display_attributes")]
    attributes: BTreeMap<String, String>,
    data: String,
}

impl From<&ReceivedMessage> for MessageRow {
    fn from(received: &ReceivedMessage) -> Self {
        Self {
            ack_id: received.ack_id.clone(),
            message_id: received.message.message_id.clone(),
            publish_time: received.message.publish_time.to_rfc3339(),
            delivery_attempt: received.delivery_attempt,
            attributes: received
                .message
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            data: received.message.text(),
        }
    }
}

/// Existence check result
#[derive(Debug, Serialize)]
struct ExistsResponse<'a> {
    name: &'a str,
    exists: bool,
}

/// Display function for attribute maps in tables
fn display_attributes(attributes: &BTreeMap<String, String>) -> String {
    if attributes.is_empty() {
        return "-".to_string();
    }
    attributes
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the effective configuration: file, then environment, then flags.
pub fn load_config(global: &GlobalArgs) -> anyhow::Result<PubwrapConfig> {
    let mut config = match &global.config {
        Some(path) => PubwrapConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PubwrapConfig::default(),
    };

    config.apply_env();

    if let Some(project) = &global.project {
        config.pubsub.project_id = project.clone();
    }
    if let Some(endpoint) = &global.endpoint {
        config.pubsub.endpoint = Some(endpoint.clone());
    }
    if let Some(host) = &global.emulator_host {
        config.pubsub.emulator_host = Some(host.clone());
    }

    Ok(config)
}

/// Execute a CLI command
pub async fn execute_command(cli: Cli, config: PubwrapConfig) -> anyhow::Result<()> {
    let format = OutputFormat::parse(&cli.global.format);

    match cli.command {
        Commands::Config => execute_config(config, format),
        Commands::Topic(topic_cmd) => {
            let pubsub = connect(&config)?;
            execute_topic_command(&pubsub, topic_cmd, format).await
        }
        Commands::Subscription(sub_cmd) => {
            let pubsub = connect(&config)?;
            execute_subscription_command(&pubsub, sub_cmd, format).await
        }
        Commands::Publish {
            topic,
            data,
            attributes,
            json,
            ordering_key,
        } => {
            let pubsub = connect(&config)?;
            let mut message = if json {
                let value: serde_json::Value =
                    serde_json::from_str(&data).context("Message data is not valid JSON")?;
                Message::json(&value)?
            } else {
                Message::new(data)
            };
            message = message.with_attributes(parse_attributes(&attributes)?);
            if let Some(key) = ordering_key {
                message = message.with_ordering_key(key);
            }

            let message_id = settle(pubsub.publish(&topic, message).await)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "messageId": message_id })),
                OutputFormat::Table => {
                    print_success(&format!("Published message {} to '{}'", message_id, topic));
                    Ok(())
                }
            }
        }
        Commands::PublishLines {
            topic,
            file,
            attributes,
        } => {
            let pubsub = connect(&config)?;
            let attributes = parse_attributes(&attributes)?;
            let contents = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let messages: Vec<Message> = contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| Message::new(line).with_attributes(attributes.clone()))
                .collect();

            let count = settle(pubsub.publish_many(&topic, messages).await)?;
            print_success(&format!("Published {} message(s) to '{}'", count, topic));
            Ok(())
        }
        Commands::Pull {
            subscription,
            max,
            wait,
            ack,
        } => {
            let pubsub = connect(&config)?;
            let received = settle(pubsub.pull(&subscription, max, !wait).await)?;
            let rows: Vec<MessageRow> = received.iter().map(MessageRow::from).collect();
            print_list(&rows, format)?;

            if ack && !received.is_empty() {
                let count = settle(
                    pubsub
                        .acknowledge(&subscription, received.into_iter().map(|r| r.ack_id))
                        .await,
                )?;
                print_info(&format!("Acknowledged {} message(s)", count));
            }
            Ok(())
        }
        Commands::Ack {
            subscription,
            ack_ids,
        } => {
            let pubsub = connect(&config)?;
            let count = settle(pubsub.acknowledge(&subscription, ack_ids).await)?;
            print_success(&format!("Acknowledged {} message(s)", count));
            Ok(())
        }
    }
}

/// Validate the configuration and build a client from it.
fn connect(config: &PubwrapConfig) -> anyhow::Result<PubSub> {
    config.validate().context("Invalid configuration")?;
    PubSub::from_config(&config.pubsub).context("Failed to create Pub/Sub client")
}

async fn execute_topic_command(
    pubsub: &PubSub,
    command: TopicCommands,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        TopicCommands::List => {
            let topics = pubsub
                .broker()
                .list_topics(pubsub.project())
                .await
                .context("Failed to list topics")?;
            let rows: Vec<TopicRow> = topics
                .into_iter()
                .map(|t| TopicRow { name: t.name })
                .collect();
            print_list(&rows, format)
        }
        TopicCommands::Create { name } => {
            let path = settle(pubsub.create_topic(&name).await)?;
            print_success(&format!("Topic '{}' ready at {}", name, path));
            Ok(())
        }
        TopicCommands::Delete { name } => {
            settle(pubsub.delete_topic(&name).await)?;
            print_success(&format!("Topic '{}' deleted successfully", name));
            Ok(())
        }
        TopicCommands::Exists { name } => {
            let exists = settle(pubsub.topic_exists(&name).await)?;
            print_exists("Topic", &name, exists, format)
        }
    }
}

async fn execute_subscription_command(
    pubsub: &PubSub,
    command: SubscriptionCommands,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        SubscriptionCommands::List => {
            let subscriptions = pubsub
                .broker()
                .list_subscriptions(pubsub.project())
                .await
                .context("Failed to list subscriptions")?;
            let rows: Vec<SubscriptionRow> = subscriptions
                .into_iter()
                .map(|s| SubscriptionRow {
                    name: s.name,
                    topic: s.topic,
                    ack_deadline_seconds: s.ack_deadline_seconds,
                })
                .collect();
            print_list(&rows, format)
        }
        SubscriptionCommands::Create {
            topic,
            name,
            ack_deadline,
        } => {
            let mut options = SubscriptionOptions::default();
            if let Some(seconds) = ack_deadline {
                options = options.with_ack_deadline(seconds);
            }
            let path = settle(pubsub.create_subscription(&topic, &name, options).await)?;
            print_success(&format!("Subscription '{}' ready at {}", name, path));
            Ok(())
        }
        SubscriptionCommands::Delete { name } => {
            settle(pubsub.delete_subscription(&name).await)?;
            print_success(&format!("Subscription '{}' deleted successfully", name));
            Ok(())
        }
        SubscriptionCommands::Exists { name } => {
            let exists = settle(pubsub.subscription_exists(&name).await)?;
            print_exists("Subscription", &name, exists, format)
        }
    }
}

fn execute_config(mut config: PubwrapConfig, format: OutputFormat) -> anyhow::Result<()> {
    if config.pubsub.access_token.is_some() {
        config.pubsub.access_token = Some("<redacted>".to_string());
    }

    match format {
        OutputFormat::Json => print_json(&config),
        OutputFormat::Table => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
            println!("{}", rendered);
            print_info(&format!("Endpoint: {}", config.pubsub.resolved_endpoint()));
            Ok(())
        }
    }
}

fn print_exists(kind: &str, name: &str, exists: bool, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(&ExistsResponse { name, exists }),
        OutputFormat::Table => {
            if exists {
                print_success(&format!("{} '{}' exists", kind, name));
            } else {
                print_info(&format!("{} '{}' does not exist", kind, name));
            }
            Ok(())
        }
    }
}

/// Turn a failed outcome into a command error.
fn settle<T>(outcome: Outcome<T>) -> anyhow::Result<T> {
    outcome.into_result().map_err(|reason| anyhow::anyhow!(reason))
}

/// Parse repeated `key=value` flags.
fn parse_attributes(raw: &[String]) -> anyhow::Result<MessageAttributes> {
    raw.iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Attribute '{}' must look like key=value", pair))?;
            if key.is_empty() {
                anyhow::bail!("Attribute '{}' has an empty key", pair);
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}
