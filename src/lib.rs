//! murkbot - IRC bot framework.
//!
//! Flood-controlled client connections with SASL and automatic reconnect,
//! a protobuf RPC control socket, and a small module system, built on
//! tokio. The wire-protocol pieces live in the `murk-proto` crate.

pub mod bot;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod net;
pub mod rpc;
pub mod runtime;
