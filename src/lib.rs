//! # pubwrap
//!
//! A thin, result-wrapping client for Google Cloud Pub/Sub.
//!
//! Every operation on [`PubSub`] returns an [`Outcome`]: either the success
//! payload or a failure reason. Nothing panics and no error type leaks to the
//! caller. The broker behind the client is pluggable: [`broker::rest::RestBroker`]
//! talks to the Pub/Sub v1 REST API (or an emulator), and
//! [`broker::memory::InMemoryBroker`] keeps everything in process.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod cli;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod outcome;
pub mod types;

pub use client::{PubSub, jsonify_message_data};
pub use error::{Error, Result};
pub use outcome::Outcome;
pub use types::{JsonMessage, Message, PublishedMessage, ReceivedMessage, SubscriptionOptions};
