//! Lease records and the lease table.
//!
//! The table maps each client hardware address to at most one lease record
//! and owns the [`AddressPool`] the records draw from. It implements the
//! server side of the lease lifecycle:
//!
//! - Offer: reserve an address for a client that sent DISCOVER
//! - Confirm: bind the offered address when the client sends REQUEST
//! - Release: give the address back on RELEASE
//! - Sweep: reclaim records whose time has run out
//!
//! # Thread Safety
//!
//! Records and pool sit behind one [`RwLock`], so every operation sees and
//! leaves them consistent: each record's address is leased in the pool,
//! and each leased pool address belongs to exactly one record. No lock is
//! held across I/O. Time is passed in by the caller, which keeps every
//! operation deterministic under test.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::HardwareAddress;
use crate::pool::AddressPool;

/// Where a record is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseState {
    /// Address reserved by an OFFER, waiting for the client's REQUEST.
    Offered,
    /// Address acknowledged; the client may use it until the lease runs out.
    Bound,
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offered => write!(f, "OFFERED"),
            Self::Bound => write!(f, "BOUND"),
        }
    }
}

/// A grant of one address to one hardware address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub hardware_address: HardwareAddress,
    pub address: Ipv4Addr,

    /// When the record was offered, or last confirmed.
    pub start_time: DateTime<Utc>,

    /// How long the record lives after `start_time`.
    ///
    /// The offer hold while [`Offered`](LeaseState::Offered), the lease
    /// duration once [`Bound`](LeaseState::Bound).
    pub duration_seconds: u32,

    pub state: LeaseState,
}

impl LeaseRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.start_time + TimeDelta::seconds(self.duration_seconds as i64)
    }

    /// True once `now` is strictly past [`expires_at`](Self::expires_at).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() < now
    }

    /// Returns seconds remaining until expiration, or 0 if expired.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at() - now).num_seconds().max(0)
    }
}

#[derive(Debug)]
struct TableState {
    records: HashMap<HardwareAddress, LeaseRecord>,
    pool: AddressPool,
}

impl TableState {
    fn remove(&mut self, hardware_address: &HardwareAddress) -> Option<LeaseRecord> {
        let record = self.records.remove(hardware_address)?;
        self.pool.release(record.address);
        Some(record)
    }
}

/// Thread-safe lease table.
///
/// # Example
///
/// ```no_run
/// use std::net::Ipv4Addr;
/// use chrono::Utc;
/// use dhcpdora::{AddressPool, HardwareAddress, LeaseTable};
///
/// # async fn example() -> dhcpdora::Result<()> {
/// let pool = AddressPool::from_range(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 50))?;
/// let leases = LeaseTable::new(pool, 3600, 60);
///
/// let client = HardwareAddress::from_mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
/// let offer = leases.offer(client, Utc::now()).await?;
/// let bound = leases.confirm(client, offer.address, Utc::now()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LeaseTable {
    state: RwLock<TableState>,
    lease_duration_seconds: u32,
    offer_timeout_seconds: u32,
}

impl LeaseTable {
    /// Creates an empty table over `pool`.
    ///
    /// Offered records hold their address for `offer_timeout_seconds`;
    /// confirmed ones for `lease_duration_seconds`.
    pub fn new(pool: AddressPool, lease_duration_seconds: u32, offer_timeout_seconds: u32) -> Self {
        Self {
            state: RwLock::new(TableState {
                records: HashMap::new(),
                pool,
            }),
            lease_duration_seconds,
            offer_timeout_seconds,
        }
    }

    /// Creates an empty table using the configured pool range and durations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the pool range is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let pool = AddressPool::from_range(config.pool_start, config.pool_end)?;
        Ok(Self::new(
            pool,
            config.lease_duration_seconds,
            config.offer_timeout_seconds,
        ))
    }

    pub fn lease_duration_seconds(&self) -> u32 {
        self.lease_duration_seconds
    }

    /// Returns the record for a client, if one exists.
    ///
    /// Records past their expiry are still returned until the next sweep.
    pub async fn lookup(&self, hardware_address: &HardwareAddress) -> Option<LeaseRecord> {
        let state = self.state.read().await;
        state.records.get(hardware_address).cloned()
    }

    /// Reserves an address for a client (DISCOVER handling).
    ///
    /// A client that already holds a live record gets it back unchanged, so
    /// retried DISCOVERs never consume a second address. Otherwise the
    /// lowest free address is offered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAddressAvailable`] if the pool is exhausted.
    pub async fn offer(
        &self,
        hardware_address: HardwareAddress,
        now: DateTime<Utc>,
    ) -> Result<LeaseRecord> {
        self.offer_preferring(hardware_address, None, now).await
    }

    /// Like [`offer`](Self::offer), but uses `hint` when it is a free pool
    /// address. Falls back to the lowest free address otherwise.
    pub async fn offer_preferring(
        &self,
        hardware_address: HardwareAddress,
        hint: Option<Ipv4Addr>,
        now: DateTime<Utc>,
    ) -> Result<LeaseRecord> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.records.get(&hardware_address)
            && !existing.is_expired(now)
        {
            return Ok(existing.clone());
        }

        // An expired record the reaper has not reached yet.
        state.remove(&hardware_address);

        let address = match hint {
            Some(requested) if state.pool.try_acquire_specific(requested) => requested,
            _ => state.pool.try_acquire().map_err(|error| match error {
                Error::Exhausted => Error::NoAddressAvailable,
                other => other,
            })?,
        };

        let record = LeaseRecord {
            hardware_address,
            address,
            start_time: now,
            duration_seconds: self.offer_timeout_seconds,
            state: LeaseState::Offered,
        };
        state.records.insert(hardware_address, record.clone());

        Ok(record)
    }

    /// Binds an offered address, or renews a bound one (REQUEST handling).
    ///
    /// The client must hold a live record for exactly `address`. The record
    /// becomes [`Bound`](LeaseState::Bound) with a fresh start time and the
    /// full lease duration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] if the client has no record, the record
    /// is for a different address, or it has already expired.
    pub async fn confirm(
        &self,
        hardware_address: HardwareAddress,
        address: Ipv4Addr,
        now: DateTime<Utc>,
    ) -> Result<LeaseRecord> {
        let mut state = self.state.write().await;

        match state.records.get_mut(&hardware_address) {
            Some(record) if record.address == address && !record.is_expired(now) => {
                record.state = LeaseState::Bound;
                record.start_time = now;
                record.duration_seconds = self.lease_duration_seconds;
                Ok(record.clone())
            }
            _ => Err(Error::Rejected {
                hardware_address: hardware_address.to_string(),
                address,
            }),
        }
    }

    /// Removes a client's record and frees its address (RELEASE handling).
    ///
    /// Returns the removed record, or `None` if the client had none; a
    /// repeated release is a no-op.
    pub async fn release(&self, hardware_address: &HardwareAddress) -> Option<LeaseRecord> {
        let mut state = self.state.write().await;
        state.remove(hardware_address)
    }

    /// Removes every record whose expiry is strictly before `now`.
    ///
    /// Returns the removed records in address order.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<LeaseRecord> {
        let mut state = self.state.write().await;

        let expired: Vec<HardwareAddress> = state
            .records
            .values()
            .filter(|record| record.is_expired(now))
            .map(|record| record.hardware_address)
            .collect();

        let mut removed: Vec<LeaseRecord> = expired
            .iter()
            .filter_map(|hardware_address| state.remove(hardware_address))
            .collect();
        removed.sort_by_key(|record| record.address);
        removed
    }

    /// Returns all records (including expired ones) in address order.
    pub async fn list(&self) -> Vec<LeaseRecord> {
        let state = self.state.read().await;
        let mut records: Vec<LeaseRecord> = state.records.values().cloned().collect();
        records.sort_by_key(|record| record.address);
        records
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Returns the count of addresses neither offered nor bound.
    pub async fn free_count(&self) -> usize {
        self.state.read().await.pool.free_count()
    }

    pub async fn is_leased(&self, address: Ipv4Addr) -> bool {
        self.state.read().await.pool.is_leased(address)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    const LEASE_SECONDS: u32 = 3600;
    const OFFER_SECONDS: u32 = 60;

    fn table(last_octet: u8) -> LeaseTable {
        let pool =
            AddressPool::from_range(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, last_octet))
                .unwrap();
        LeaseTable::new(pool, LEASE_SECONDS, OFFER_SECONDS)
    }

    fn client(last: u8) -> HardwareAddress {
        HardwareAddress::from_mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn seconds(secs: i64) -> TimeDelta {
        TimeDelta::seconds(secs)
    }

    async fn assert_consistent(leases: &LeaseTable) {
        let state = leases.state.read().await;
        let mut seen = HashSet::new();
        for (key, record) in &state.records {
            assert_eq!(*key, record.hardware_address);
            assert!(state.pool.is_leased(record.address), "{} not leased", record.address);
            assert!(seen.insert(record.address), "{} held twice", record.address);
        }
        assert_eq!(state.pool.leased_count(), state.records.len());
    }

    #[test]
    fn test_record_expiry_is_strict() {
        let t0 = Utc::now();
        let record = LeaseRecord {
            hardware_address: client(1),
            address: Ipv4Addr::new(10, 0, 0, 1),
            start_time: t0,
            duration_seconds: 100,
            state: LeaseState::Bound,
        };
        assert!(!record.is_expired(t0 + seconds(100)));
        assert!(record.is_expired(t0 + seconds(101)));
        assert_eq!(record.remaining_seconds(t0 + seconds(40)), 60);
        assert_eq!(record.remaining_seconds(t0 + seconds(400)), 0);
    }

    #[tokio::test]
    async fn test_lease_lifecycle() {
        let leases = table(10);
        let now = Utc::now();

        let offer = leases.offer(client(1), now).await.unwrap();
        assert_eq!(offer.address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(offer.state, LeaseState::Offered);
        assert_eq!(offer.duration_seconds, OFFER_SECONDS);

        let later = now + seconds(5);
        let bound = leases.confirm(client(1), offer.address, later).await.unwrap();
        assert_eq!(bound.state, LeaseState::Bound);
        assert_eq!(bound.start_time, later);
        assert_eq!(bound.duration_seconds, LEASE_SECONDS);
        assert_eq!(leases.lookup(&client(1)).await, Some(bound.clone()));

        let released = leases.release(&client(1)).await.unwrap();
        assert_eq!(released.address, bound.address);
        assert!(leases.lookup(&client(1)).await.is_none());
        assert!(!leases.is_leased(bound.address).await);
        assert_consistent(&leases).await;
    }

    #[tokio::test]
    async fn test_offer_is_idempotent() {
        let leases = table(10);
        let now = Utc::now();

        let first = leases.offer(client(1), now).await.unwrap();
        let second = leases.offer(client(1), now + seconds(10)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(leases.len().await, 1);
        assert_eq!(leases.free_count().await, 9);
    }

    #[tokio::test]
    async fn test_offer_returns_bound_record_unchanged() {
        let leases = table(10);
        let now = Utc::now();

        let offer = leases.offer(client(1), now).await.unwrap();
        let bound = leases.confirm(client(1), offer.address, now).await.unwrap();
        let again = leases.offer(client(1), now + seconds(600)).await.unwrap();

        assert_eq!(again, bound);
    }

    #[tokio::test]
    async fn test_offer_replaces_stale_record() {
        let leases = table(10);
        let now = Utc::now();

        leases.offer(client(1), now).await.unwrap();
        leases.offer(client(2), now).await.unwrap();

        let stale_time = now + seconds(OFFER_SECONDS as i64 + 1);
        let fresh = leases.offer(client(2), stale_time).await.unwrap();

        assert_eq!(fresh.start_time, stale_time);
        assert_eq!(fresh.address, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(leases.len().await, 2);
        assert_consistent(&leases).await;
    }

    #[tokio::test]
    async fn test_offer_preferring_hint() {
        let leases = table(10);
        let now = Utc::now();

        let hinted = leases
            .offer_preferring(client(1), Some(Ipv4Addr::new(10, 0, 0, 7)), now)
            .await
            .unwrap();
        assert_eq!(hinted.address, Ipv4Addr::new(10, 0, 0, 7));

        let taken = leases
            .offer_preferring(client(2), Some(Ipv4Addr::new(10, 0, 0, 7)), now)
            .await
            .unwrap();
        assert_eq!(taken.address, Ipv4Addr::new(10, 0, 0, 1));

        let outside = leases
            .offer_preferring(client(3), Some(Ipv4Addr::new(192, 168, 1, 1)), now)
            .await
            .unwrap();
        assert_eq!(outside.address, Ipv4Addr::new(10, 0, 0, 2));
        assert_consistent(&leases).await;
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let leases = table(2);
        let now = Utc::now();

        leases.offer(client(1), now).await.unwrap();
        leases.offer(client(2), now).await.unwrap();

        assert!(matches!(
            leases.offer(client(3), now).await,
            Err(Error::NoAddressAvailable)
        ));
        assert!(leases.lookup(&client(3)).await.is_none());
    }

    #[tokio::test]
    async fn test_confirm_rejections() {
        let leases = table(10);
        let now = Utc::now();

        let unknown = leases.confirm(client(1), Ipv4Addr::new(10, 0, 0, 1), now).await;
        assert!(matches!(unknown, Err(Error::Rejected { .. })));

        let offer = leases.offer(client(1), now).await.unwrap();
        let wrong = leases
            .confirm(client(1), Ipv4Addr::new(10, 0, 0, 9), now)
            .await;
        assert!(matches!(wrong, Err(Error::Rejected { address, .. }) if address == Ipv4Addr::new(10, 0, 0, 9)));

        let late = now + seconds(OFFER_SECONDS as i64 + 1);
        let expired = leases.confirm(client(1), offer.address, late).await;
        assert!(matches!(expired, Err(Error::Rejected { .. })));

        let other_client = leases.confirm(client(2), offer.address, now).await;
        assert!(matches!(other_client, Err(Error::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_confirm_renews_bound_lease() {
        let leases = table(10);
        let now = Utc::now();

        let offer = leases.offer(client(1), now).await.unwrap();
        leases.confirm(client(1), offer.address, now).await.unwrap();

        let renewal_time = now + seconds(1800);
        let renewed = leases
            .confirm(client(1), offer.address, renewal_time)
            .await
            .unwrap();
        assert_eq!(renewed.start_time, renewal_time);
        assert_eq!(renewed.expires_at(), renewal_time + seconds(LEASE_SECONDS as i64));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let leases = table(3);
        let now = Utc::now();

        let offer = leases.offer(client(1), now).await.unwrap();
        leases.offer(client(2), now).await.unwrap();

        assert!(leases.release(&client(1)).await.is_some());
        let once = (leases.list().await, leases.free_count().await);
        assert!(leases.release(&client(1)).await.is_none());
        let twice = (leases.list().await, leases.free_count().await);

        assert_eq!(once, twice);
        assert!(!leases.is_leased(offer.address).await);
        assert_consistent(&leases).await;
    }

    #[tokio::test]
    async fn test_sweep_expired_boundaries() {
        let leases = table(10);
        let t0 = Utc::now();

        let offer = leases.offer(client(1), t0).await.unwrap();
        leases.confirm(client(1), offer.address, t0).await.unwrap();

        let duration = LEASE_SECONDS as i64;
        assert!(leases.sweep_expired(t0 + seconds(duration - 1)).await.is_empty());
        assert!(leases.sweep_expired(t0 + seconds(duration)).await.is_empty());
        assert!(leases.is_leased(offer.address).await);

        let removed = leases.sweep_expired(t0 + seconds(duration + 1)).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].hardware_address, client(1));
        assert_eq!(removed[0].address, offer.address);
        assert!(!leases.is_leased(offer.address).await);
        assert!(leases.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_unconfirmed_offers_first() {
        let leases = table(10);
        let t0 = Utc::now();

        let bound = leases.offer(client(1), t0).await.unwrap();
        leases.confirm(client(1), bound.address, t0).await.unwrap();
        leases.offer(client(2), t0).await.unwrap();
        leases.offer(client(3), t0).await.unwrap();

        let removed = leases.sweep_expired(t0 + seconds(OFFER_SECONDS as i64 + 1)).await;
        let removed_clients: Vec<HardwareAddress> =
            removed.iter().map(|record| record.hardware_address).collect();

        assert_eq!(removed_clients, vec![client(2), client(3)]);
        assert_eq!(leases.list().await.len(), 1);
        assert_consistent(&leases).await;
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = Config {
            pool_start: Ipv4Addr::new(192, 168, 1, 100),
            pool_end: Ipv4Addr::new(192, 168, 1, 104),
            ..Default::default()
        };
        let leases = LeaseTable::from_config(&config).unwrap();
        assert_eq!(leases.free_count().await, 5);
        assert_eq!(leases.lease_duration_seconds(), config.lease_duration_seconds);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_offers_never_share_an_address() {
        let leases = Arc::new(table(200));
        let now = Utc::now();

        let mut handles = Vec::new();
        for index in 0..100u8 {
            let leases = Arc::clone(&leases);
            handles.push(tokio::spawn(async move {
                let hardware_address = client(index);
                let first = leases.offer(hardware_address, now).await.unwrap();
                let second = leases.offer(hardware_address, now).await.unwrap();
                assert_eq!(first.address, second.address);
                leases.confirm(hardware_address, first.address, now).await.unwrap();
                first.address
            }));
        }

        let mut addresses = HashSet::new();
        for handle in handles {
            assert!(addresses.insert(handle.await.unwrap()));
        }

        assert_eq!(addresses.len(), 100);
        assert_eq!(leases.len().await, 100);
        assert_consistent(&leases).await;
    }
}
