use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dora::DoraHandler;
use crate::error::{Error, Result};
use crate::events::LeaseEventSink;
use crate::lease::LeaseTable;
use crate::packet::MAX_DATAGRAM_SIZE;
use crate::reaper::Reaper;

pub struct LeaseServer {
    handler: DoraHandler,
    events: Arc<dyn LeaseEventSink>,
    socket: Arc<UdpSocket>,
    workers: Arc<Semaphore>,
}

impl LeaseServer {
    /// Validates `config`, builds the lease table and binds the listening socket.
    pub async fn new(config: Config, events: Arc<dyn LeaseEventSink>) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let leases = Arc::new(LeaseTable::from_config(&config)?);
        let socket = Arc::new(Self::create_socket(&config)?);
        let local_addr = socket.local_addr()?;

        info!(
            "Lease server starting on {} as {}",
            local_addr, config.server_ip
        );
        info!(
            "Address pool: {} - {} ({} addresses)",
            config.pool_start,
            config.pool_end,
            config.pool_size()
        );

        let workers = Arc::new(Semaphore::new(config.max_concurrent_exchanges));

        Ok(Self {
            handler: DoraHandler::new(config, leases, Arc::clone(&events)),
            events,
            socket,
            workers,
        })
    }

    fn create_socket(config: &Config) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = config.listen_socket_addr();
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    /// Serves datagrams until the future is dropped.
    ///
    /// Each datagram is handled on its own task, with at most
    /// `max_concurrent_exchanges` in flight; further datagrams wait in the
    /// socket buffer. The reaper runs alongside and stops with the loop.
    pub async fn run(&self) -> Result<()> {
        let reaper = Reaper::new(
            Arc::clone(self.handler.leases()),
            Arc::clone(&self.events),
            self.handler.config().reaper_interval(),
        );
        let _reaper = AbortOnDrop(reaper.spawn());

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        info!("Lease server ready and listening");

        loop {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|error| Error::Socket(format!("Worker pool closed: {}", error)))?;

            match self.socket.recv_from(&mut buffer).await {
                Ok((size, source)) => {
                    let data = buffer[..size].to_vec();
                    let handler = self.handler.clone();
                    let socket = Arc::clone(&self.socket);

                    tokio::spawn(async move {
                        handle_datagram(&handler, &socket, &data, source).await;
                        drop(permit);
                    });
                }
                Err(error) => {
                    error!("Error receiving packet: {}", error);
                }
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &Config {
        self.handler.config()
    }

    pub fn leases(&self) -> &LeaseTable {
        self.handler.leases()
    }
}

async fn handle_datagram(handler: &DoraHandler, socket: &UdpSocket, data: &[u8], source: SocketAddr) {
    match handler.handle_datagram(data, Utc::now()).await {
        Ok(Some(reply)) => {
            if let Err(error) = socket.send_to(&reply, source).await {
                warn!("Failed to send reply to {}: {}", source, error);
            }
        }
        Ok(None) => {}
        Err(Error::MalformedPacket(reason)) => {
            debug!("Dropping malformed packet from {}: {}", source, reason);
        }
        Err(error) => {
            warn!("Error handling packet from {}: {}", source, error);
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
