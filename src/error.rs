//! Error types for the lease server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. None of the exchange-level errors
//! is fatal to the server: each one ends a single exchange.

use std::net::Ipv4Addr;

/// Errors that can occur while leasing addresses or running the server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A datagram could not be decoded into a handshake message.
    ///
    /// Raised for buffers shorter than the fixed header, hardware address
    /// lengths above 16, option lengths running past the buffer, and
    /// unknown operation codes. The datagram is discarded without a reply.
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// Every address in the pool is leased or on offer.
    ///
    /// Raised by the pool; the lease table reports it as
    /// [`NoAddressAvailable`](Self::NoAddressAvailable).
    #[error("Address pool exhausted")]
    Exhausted,

    /// A DISCOVER could not be answered because the pool is exhausted.
    #[error("No address available for offer")]
    NoAddressAvailable,

    /// A REQUEST named an address that is not offered or bound to the client.
    ///
    /// Either the client was never offered the address, or the offer
    /// expired before the REQUEST arrived. No ACK is sent.
    #[error("Request from {hardware_address} for {address} rejected")]
    Rejected {
        hardware_address: String,
        address: Ipv4Addr,
    },

    /// A hardware address was longer than the 16 bytes the wire format carries,
    /// or could not be parsed from its textual form.
    #[error("Invalid hardware address: {0}")]
    InvalidHardwareAddress(String),

    /// An option could not be represented on the wire.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without administrator privileges.
    #[error("Socket error: {0}")]
    Socket(String),

    /// The probe client gave up waiting for a reply.
    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

/// A specialized Result type for lease operations.
pub type Result<T> = std::result::Result<T, Error>;
