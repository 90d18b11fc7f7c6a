//! Server configuration.
//!
//! Configuration lives in a JSON file. Missing fields take their defaults,
//! and a missing file is created with the defaults on first run.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pool::{AddressPool, MAX_POOL_SIZE};

/// Standard DHCP server port.
pub const DEFAULT_SERVER_PORT: u16 = 67;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the server identifies itself with (server identifier option).
    pub server_ip: Ipv4Addr,
    pub listen_address: Ipv4Addr,
    pub listen_port: u16,
    pub subnet_mask: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub lease_duration_seconds: u32,
    /// How long an unconfirmed offer holds its address.
    pub offer_timeout_seconds: u32,
    /// T1; half the lease duration when unset.
    pub renewal_time_seconds: Option<u32>,
    /// T2; seven eighths of the lease duration when unset.
    pub rebinding_time_seconds: Option<u32>,
    pub reaper_interval_seconds: u64,
    /// Upper bound on datagrams handled at once.
    pub max_concurrent_exchanges: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            listen_address: Ipv4Addr::UNSPECIFIED,
            listen_port: DEFAULT_SERVER_PORT,
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            pool_start: Ipv4Addr::new(192, 168, 1, 100),
            pool_end: Ipv4Addr::new(192, 168, 1, 199),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            domain_name: None,
            lease_duration_seconds: 3600,
            offer_timeout_seconds: 60,
            renewal_time_seconds: None,
            rebinding_time_seconds: None,
            reaper_interval_seconds: 60,
            max_concurrent_exchanges: 64,
        }
    }
}

impl Config {
    /// Loads and validates the file at `path`, or writes the defaults there
    /// if it does not exist yet.
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path).await?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path).await?;
            Ok(config)
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);

        if start > end {
            return Err(Error::InvalidConfig(
                "pool_start must be less than or equal to pool_end".to_string(),
            ));
        }

        if end - start >= MAX_POOL_SIZE {
            return Err(Error::InvalidConfig(format!(
                "pool must hold at most {} addresses",
                MAX_POOL_SIZE
            )));
        }

        if self.ip_in_pool(self.server_ip) {
            return Err(Error::InvalidConfig(
                "server_ip must not be within the pool range".to_string(),
            ));
        }

        if let Some(gateway) = self.gateway
            && self.ip_in_pool(gateway)
        {
            return Err(Error::InvalidConfig(
                "gateway must not be within the pool range".to_string(),
            ));
        }

        if self.lease_duration_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.offer_timeout_seconds == 0 {
            return Err(Error::InvalidConfig(
                "offer_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.reaper_interval_seconds == 0 {
            return Err(Error::InvalidConfig(
                "reaper_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_exchanges == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_exchanges must be greater than 0".to_string(),
            ));
        }

        let t1 = self.renewal_time();
        let t2 = self.rebinding_time();
        let overridden =
            self.renewal_time_seconds.is_some() || self.rebinding_time_seconds.is_some();
        if overridden && (t1 >= t2 || t2 >= self.lease_duration_seconds) {
            return Err(Error::InvalidConfig(format!(
                "renewal time ({}) < rebinding time ({}) < lease duration ({}) must hold",
                t1, t2, self.lease_duration_seconds
            )));
        }

        Ok(())
    }

    pub fn ip_in_pool(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);
        addr >= start && addr <= end
    }

    pub fn pool_size(&self) -> u32 {
        u32::from(self.pool_end)
            .saturating_sub(u32::from(self.pool_start))
            .saturating_add(1)
    }

    pub fn build_pool(&self) -> Result<AddressPool> {
        AddressPool::from_range(self.pool_start, self.pool_end)
    }

    pub fn renewal_time(&self) -> u32 {
        self.renewal_time_seconds
            .unwrap_or(self.lease_duration_seconds / 2)
    }

    pub fn rebinding_time(&self) -> u32 {
        self.rebinding_time_seconds
            .unwrap_or((self.lease_duration_seconds as u64 * 7 / 8) as u32)
    }

    pub fn listen_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.listen_address, self.listen_port))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }
}
