//! Lease events and the sinks that receive them.
//!
//! Lease state changes are reported as structured [`LeaseEvent`]s rather
//! than log lines. Where they end up is the sink's business: the default
//! [`TracingSink`] turns them into `tracing` events, and [`BroadcastSink`]
//! fans them out to in-process subscribers.

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::info;

use crate::lease::LeaseRecord;
use crate::packet::HardwareAddress;

/// What happened to a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseAction {
    /// An address was offered in answer to a DISCOVER.
    Offered,
    /// A REQUEST was acknowledged and the lease is bound (or renewed).
    Confirmed,
    /// The client released the lease.
    Released,
    /// The reaper reclaimed the lease after it ran out.
    Expired,
}

impl fmt::Display for LeaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offered => write!(f, "OFFERED"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Released => write!(f, "RELEASED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// One lease state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseEvent {
    pub timestamp: DateTime<Utc>,
    pub action: LeaseAction,
    pub address: Ipv4Addr,
    pub hardware_address: HardwareAddress,
}

impl LeaseEvent {
    pub fn from_record(action: LeaseAction, record: &LeaseRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            action,
            address: record.address,
            hardware_address: record.hardware_address,
        }
    }
}

/// Receives lease events.
///
/// Sinks are called from request workers and from the reaper, after the
/// lease table lock has been released. Implementations must not block.
pub trait LeaseEventSink: Send + Sync {
    fn record(&self, event: LeaseEvent);
}

/// Writes each event as a structured `tracing` event at INFO level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LeaseEventSink for TracingSink {
    fn record(&self, event: LeaseEvent) {
        info!(
            action = %event.action,
            address = %event.address,
            hardware_address = %event.hardware_address,
            timestamp = %event.timestamp.to_rfc3339(),
            "lease {}",
            event.action
        );
    }
}

/// Publishes events on a broadcast channel.
///
/// Events sent while nobody is subscribed are dropped; slow subscribers
/// see `RecvError::Lagged` rather than holding up the server.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<LeaseEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeaseEvent> {
        self.sender.subscribe()
    }
}

impl LeaseEventSink for BroadcastSink {
    fn record(&self, event: LeaseEvent) {
        let _ = self.sender.send(event);
    }
}
