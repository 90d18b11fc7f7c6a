//! A minimal client for exercising a running server.
//!
//! [`ProbeClient`] walks one hardware address through DISCOVER, OFFER,
//! REQUEST and ACK, renews the lease at T1 as many times as asked,
//! optionally releases the address afterwards, and reports what the server
//! handed out.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::options::{DhcpOption, OptionCode};
use crate::packet::{HandshakeMessage, HardwareAddress, MAX_DATAGRAM_SIZE, MessageKind};

/// What the server offered and acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferedConfiguration {
    pub address: Ipv4Addr,
    pub server_identifier: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub lease_time_seconds: Option<u32>,
    pub renewal_time_seconds: Option<u32>,
}

impl OfferedConfiguration {
    pub fn from_message(message: &HandshakeMessage) -> Self {
        Self {
            address: message.address,
            server_identifier: message.server_identifier(),
            subnet_mask: message
                .option(OptionCode::SubnetMask)
                .and_then(DhcpOption::as_ipv4),
            router: message.option(OptionCode::Router).and_then(DhcpOption::as_ipv4),
            dns_servers: message
                .option(OptionCode::DnsServer)
                .and_then(DhcpOption::as_ipv4_list)
                .unwrap_or_default(),
            domain_name: message
                .option(OptionCode::DomainName)
                .and_then(DhcpOption::as_str)
                .map(str::to_string),
            lease_time_seconds: message.lease_time(),
            renewal_time_seconds: message
                .option(OptionCode::RenewalTime)
                .and_then(DhcpOption::as_u32),
        }
    }

    /// How long to wait before renewing: T1 when the server sent one,
    /// otherwise half the lease time.
    pub fn renewal_interval(&self) -> Option<Duration> {
        let seconds = self
            .renewal_time_seconds
            .or(self.lease_time_seconds.map(|lease| lease / 2))?;
        Some(Duration::from_secs(seconds as u64))
    }
}

pub struct ProbeClient {
    socket: UdpSocket,
    server: SocketAddr,
    timeout: Duration,
}

impl ProbeClient {
    /// Binds an ephemeral port for talking to `server`.
    ///
    /// Broadcast is enabled so `server` may be a broadcast address.
    pub fn bind(server: SocketAddr, timeout: Duration) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(Self {
            socket,
            server,
            timeout,
        })
    }

    /// Sends a DISCOVER and waits for the matching OFFER.
    pub async fn discover(&self, hardware_address: HardwareAddress) -> Result<HandshakeMessage> {
        let discover = HandshakeMessage::discover(new_transaction_id(), hardware_address);
        self.send(&discover).await?;
        self.await_reply(MessageKind::Offer, discover.transaction_id)
            .await
    }

    /// Accepts `offer` with a REQUEST and waits for the matching ACK.
    pub async fn request(&self, offer: &HandshakeMessage) -> Result<HandshakeMessage> {
        let mut request =
            HandshakeMessage::request(offer.transaction_id, offer.hardware_address, offer.address);
        if let Some(server_id) = offer.server_identifier() {
            request = request.with_option(DhcpOption::server_identifier(server_id));
        }

        self.send(&request).await?;
        self.await_reply(MessageKind::Ack, request.transaction_id)
            .await
    }

    /// Renews the lease acknowledged by `ack` and waits for the new ACK.
    pub async fn renew(&self, ack: &HandshakeMessage) -> Result<HandshakeMessage> {
        let mut request =
            HandshakeMessage::request(new_transaction_id(), ack.hardware_address, ack.address);
        if let Some(server_id) = ack.server_identifier() {
            request = request.with_option(DhcpOption::server_identifier(server_id));
        }

        self.send(&request).await?;
        self.await_reply(MessageKind::Ack, request.transaction_id)
            .await
    }

    /// Gives `address` back. The server does not answer a RELEASE.
    pub async fn release(&self, hardware_address: HardwareAddress, address: Ipv4Addr) -> Result<()> {
        let release = HandshakeMessage::release(new_transaction_id(), hardware_address, address);
        self.send(&release).await
    }

    /// Runs a full exchange for `hardware_address`, then renews the lease
    /// `renewals` times, each after the renewal interval of the latest ACK.
    /// The address is released at the end unless `keep` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPacket`] if renewals are requested but the
    /// ACK carries neither T1 nor a lease time.
    pub async fn run_exchange(
        &self,
        hardware_address: HardwareAddress,
        renewals: u32,
        keep: bool,
    ) -> Result<OfferedConfiguration> {
        let offer = self.discover(hardware_address).await?;
        info!("OFFER {} from {}", offer.address, self.server);

        let mut ack = self.request(&offer).await?;
        info!("ACK {} from {}", ack.address, self.server);

        for _ in 0..renewals {
            let wait = OfferedConfiguration::from_message(&ack)
                .renewal_interval()
                .ok_or_else(|| {
                    Error::MalformedPacket("ACK carries no renewal or lease time".to_string())
                })?;
            info!("Renewing {} in {}s", ack.address, wait.as_secs());
            tokio::time::sleep(wait).await;

            ack = self.renew(&ack).await?;
            info!("ACK {} (renewed) from {}", ack.address, self.server);
        }

        if !keep {
            self.release(hardware_address, ack.address).await?;
            info!("RELEASE {}", ack.address);
        }

        Ok(OfferedConfiguration::from_message(&ack))
    }

    async fn send(&self, message: &HandshakeMessage) -> Result<()> {
        self.socket.send_to(&message.encode(), self.server).await?;
        Ok(())
    }

    /// Waits for a reply of `kind` carrying `transaction_id`, discarding
    /// anything else that arrives in the meantime.
    async fn await_reply(&self, kind: MessageKind, transaction_id: u32) -> Result<HandshakeMessage> {
        let deadline = Instant::now() + self.timeout;
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (size, source) =
                tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buffer))
                    .await
                    .map_err(|_| Error::Timeout(format!("{} from {}", kind, self.server)))??;

            match HandshakeMessage::decode(&buffer[..size]) {
                Ok(message) if message.kind == kind && message.transaction_id == transaction_id => {
                    return Ok(message);
                }
                Ok(message) => debug!(
                    "Discarding {} (xid {:#010x}) from {}",
                    message.kind, message.transaction_id, source
                ),
                Err(error) => debug!("Discarding datagram from {}: {}", source, error),
            }
        }
    }
}

fn new_transaction_id() -> u32 {
    Utc::now().timestamp_subsec_nanos() ^ std::process::id().rotate_left(16)
}
