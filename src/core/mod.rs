//! Broker-side building blocks shared by broker implementations.

pub mod ack;
