//! Periodic reclamation of expired leases.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::events::{LeaseAction, LeaseEvent, LeaseEventSink};
use crate::lease::{LeaseRecord, LeaseTable};

/// Sweeps the lease table on a fixed interval, reporting each reclaimed
/// record as an [`Expired`](LeaseAction::Expired) event.
pub struct Reaper {
    leases: Arc<LeaseTable>,
    events: Arc<dyn LeaseEventSink>,
    interval: Duration,
}

impl Reaper {
    pub fn new(
        leases: Arc<LeaseTable>,
        events: Arc<dyn LeaseEventSink>,
        interval: Duration,
    ) -> Self {
        Self {
            leases,
            events,
            interval,
        }
    }

    /// Runs one sweep at `now` and returns the reclaimed records.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<LeaseRecord> {
        let expired = self.leases.sweep_expired(now).await;

        for record in &expired {
            self.events
                .record(LeaseEvent::from_record(LeaseAction::Expired, record, now));
        }

        if !expired.is_empty() {
            debug!("Reclaimed {} expired leases", expired.len());
        }

        expired
    }

    /// Sweeps forever, one tick per interval.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            self.tick(Utc::now()).await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
