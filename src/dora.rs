//! Server side of the DISCOVER / OFFER / REQUEST / ACK exchange.
//!
//! [`DoraHandler`] turns one decoded client message into at most one reply,
//! updating the lease table and reporting lease events on the way. It does
//! no I/O of its own; the server loop owns the socket.

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{LeaseAction, LeaseEvent, LeaseEventSink};
use crate::lease::LeaseTable;
use crate::options::DhcpOption;
use crate::packet::{HandshakeMessage, MessageKind};

#[derive(Clone)]
pub struct DoraHandler {
    config: Arc<Config>,
    leases: Arc<LeaseTable>,
    events: Arc<dyn LeaseEventSink>,
}

impl DoraHandler {
    pub fn new(
        config: Arc<Config>,
        leases: Arc<LeaseTable>,
        events: Arc<dyn LeaseEventSink>,
    ) -> Self {
        Self {
            config,
            leases,
            events,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn leases(&self) -> &Arc<LeaseTable> {
        &self.leases
    }

    /// Decodes a datagram, handles it, and encodes the reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPacket`] for undecodable datagrams, plus
    /// anything [`handle`](Self::handle) returns.
    pub async fn handle_datagram(&self, data: &[u8], now: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
        let message = HandshakeMessage::decode(data)?;
        let reply = self.handle(&message, now).await?;
        Ok(reply.map(|reply| reply.encode()))
    }

    /// Handles one client message.
    ///
    /// Returns the reply to send, or `None` when the message needs no answer
    /// (RELEASE, messages for another server, server-to-client kinds).
    ///
    /// # Errors
    ///
    /// - [`Error::NoAddressAvailable`] if a DISCOVER finds the pool exhausted
    /// - [`Error::Rejected`] if a REQUEST names an address the client does not hold
    /// - [`Error::MalformedPacket`] if a REQUEST carries no address at all
    pub async fn handle(
        &self,
        message: &HandshakeMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<HandshakeMessage>> {
        match message.kind {
            MessageKind::Discover => self.handle_discover(message, now).await.map(Some),
            MessageKind::Request => self.handle_request(message, now).await,
            MessageKind::Release => {
                self.handle_release(message, now).await;
                Ok(None)
            }
            MessageKind::Offer | MessageKind::Ack => {
                debug!(
                    "Ignoring {} from {}",
                    message.kind, message.hardware_address
                );
                Ok(None)
            }
        }
    }

    async fn handle_discover(
        &self,
        message: &HandshakeMessage,
        now: DateTime<Utc>,
    ) -> Result<HandshakeMessage> {
        let client = message.hardware_address;

        let record = self
            .leases
            .offer_preferring(client, message.requested_address(), now)
            .await?;

        self.events
            .record(LeaseEvent::from_record(LeaseAction::Offered, &record, now));
        info!("OFFER {} to {}", record.address, client);

        Ok(message.reply(MessageKind::Offer, record.address, self.build_reply_options()))
    }

    async fn handle_request(
        &self,
        message: &HandshakeMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<HandshakeMessage>> {
        let client = message.hardware_address;

        if let Some(server_id) = message.server_identifier()
            && server_id != self.config.server_ip
        {
            info!("REQUEST from {} is for different server {}", client, server_id);
            return Ok(None);
        }

        let requested = if message.address != Ipv4Addr::UNSPECIFIED {
            message.address
        } else {
            message.requested_address().ok_or_else(|| {
                Error::MalformedPacket(format!("REQUEST from {} names no address", client))
            })?
        };

        let record = self.leases.confirm(client, requested, now).await?;

        self.events
            .record(LeaseEvent::from_record(LeaseAction::Confirmed, &record, now));
        info!(
            "ACK {} to {} for {}s",
            record.address, client, record.duration_seconds
        );

        Ok(Some(message.reply(
            MessageKind::Ack,
            record.address,
            self.build_reply_options(),
        )))
    }

    async fn handle_release(&self, message: &HandshakeMessage, now: DateTime<Utc>) {
        let client = message.hardware_address;

        match self.leases.release(&client).await {
            Some(record) => {
                self.events
                    .record(LeaseEvent::from_record(LeaseAction::Released, &record, now));
                info!("RELEASE from {} for {}", client, record.address);
            }
            None => debug!("RELEASE from {} with no lease", client),
        }
    }

    fn build_reply_options(&self) -> Vec<DhcpOption> {
        let mut options = vec![
            DhcpOption::server_identifier(self.config.server_ip),
            DhcpOption::lease_time(self.config.lease_duration_seconds),
            DhcpOption::subnet_mask(self.config.subnet_mask),
        ];

        if let Some(gateway) = self.config.gateway {
            options.push(DhcpOption::router(gateway));
        }

        if !self.config.dns_servers.is_empty() {
            options.push(DhcpOption::dns_servers(&self.config.dns_servers));
        }

        if let Some(ref domain) = self.config.domain_name {
            options.push(DhcpOption::domain_name(domain));
        }

        options.push(DhcpOption::renewal_time(self.config.renewal_time()));
        options.push(DhcpOption::rebinding_time(self.config.rebinding_time()));

        options
    }
}
