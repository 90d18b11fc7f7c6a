//! The fixed set of addresses the server can lease.
//!
//! The pool is fixed at construction and never grows or shrinks. It is
//! the source of truth for whether an address is free or leased. It is not
//! synchronized on its own: it lives inside the lease table's lock so that
//! table records and pool state change together.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Largest pool [`AddressPool::from_range`] will build (a /16).
pub const MAX_POOL_SIZE: u32 = 65536;

/// Candidate addresses plus the subset currently free.
#[derive(Debug, Clone)]
pub struct AddressPool {
    candidates: BTreeSet<Ipv4Addr>,
    /// Sorted so the lowest free address is always the first element.
    free: BTreeSet<Ipv4Addr>,
}

impl AddressPool {
    /// Creates a pool from an arbitrary set of addresses, all initially free.
    pub fn new(addresses: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        let candidates: BTreeSet<Ipv4Addr> = addresses.into_iter().collect();
        Self {
            free: candidates.clone(),
            candidates,
        }
    }

    /// Creates a pool covering `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `start > end` or the range holds
    /// more than [`MAX_POOL_SIZE`] addresses.
    pub fn from_range(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self> {
        let first = u32::from(start);
        let last = u32::from(end);

        if first > last {
            return Err(Error::InvalidConfig(format!(
                "pool start {} is above pool end {}",
                start, end
            )));
        }
        if last - first >= MAX_POOL_SIZE {
            return Err(Error::InvalidConfig(format!(
                "pool {} - {} exceeds {} addresses",
                start, end, MAX_POOL_SIZE
            )));
        }

        Ok(Self::new((first..=last).map(Ipv4Addr::from)))
    }

    /// Leases the lowest-valued free address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`] if every address is leased.
    pub fn try_acquire(&mut self) -> Result<Ipv4Addr> {
        self.free.pop_first().ok_or(Error::Exhausted)
    }

    /// Leases one particular address if it belongs to the pool and is free.
    pub fn try_acquire_specific(&mut self, address: Ipv4Addr) -> bool {
        self.free.remove(&address)
    }

    /// Returns an address to the pool.
    ///
    /// Releasing a free address, or one outside the pool, does nothing, so
    /// duplicate or late releases are harmless.
    pub fn release(&mut self, address: Ipv4Addr) {
        if self.candidates.contains(&address) {
            self.free.insert(address);
        }
    }

    pub fn is_leased(&self, address: Ipv4Addr) -> bool {
        self.candidates.contains(&address) && !self.free.contains(&address)
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.candidates.contains(&address)
    }

    pub fn capacity(&self) -> usize {
        self.candidates.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn leased_count(&self) -> usize {
        self.candidates.len() - self.free.len()
    }

    /// Iterates the leased addresses in ascending order.
    pub fn leased(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.candidates.difference(&self.free).copied()
    }
}
