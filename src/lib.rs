//! # dhcpdora
//!
//! An address leasing server built around the four-step DHCP handshake:
//! DISCOVER, OFFER, REQUEST, ACK (plus RELEASE).
//!
//! ## Features
//!
//! - Compact wire format with RFC 2132 option numbering
//! - Lease table with offer holds, confirmation and expiry
//! - Background reaper that reclaims expired leases
//! - Lease events delivered through pluggable sinks
//! - Bounded concurrent request handling with Tokio
//! - A probe client for checking a running server
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dhcpdora::{Config, LeaseServer, TracingSink};
//!
//! #[tokio::main]
//! async fn main() -> dhcpdora::Result<()> {
//!     let config = Config::load_or_create("config.json").await?;
//!     let server = LeaseServer::new(config, Arc::new(TracingSink)).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`HandshakeMessage`] - Message decoding and encoding
//! - [`DhcpOption`] - Option values
//! - [`AddressPool`] - The fixed set of leasable addresses
//! - [`LeaseTable`] - Thread-safe lease records over the pool
//! - [`DoraHandler`] - Turns one client message into at most one reply
//! - [`Reaper`] - Periodic expiry sweep
//! - [`LeaseServer`] - UDP listener tying it together
//! - [`ProbeClient`] - Client side of the handshake

pub mod client;
pub mod config;
pub mod dora;
pub mod error;
pub mod events;
pub mod lease;
pub mod options;
pub mod packet;
pub mod pool;
pub mod reaper;
pub mod server;

pub use client::{OfferedConfiguration, ProbeClient};
pub use config::Config;
pub use dora::DoraHandler;
pub use error::{Error, Result};
pub use events::{BroadcastSink, LeaseAction, LeaseEvent, LeaseEventSink, TracingSink};
pub use lease::{LeaseRecord, LeaseState, LeaseTable};
pub use options::{DhcpOption, OptionCode};
pub use packet::{HandshakeMessage, HardwareAddress, MessageKind};
pub use pool::AddressPool;
pub use reaper::Reaper;
pub use server::LeaseServer;
