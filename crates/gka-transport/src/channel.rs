use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::config::ChannelConfig;
use crate::{Endpoint, TransportError};

/// UDP multicast group membership plus a unicast reply socket.
///
/// Receives on both sockets; sends only from the unicast one so that
/// every peer sees one stable sender endpoint per member.
pub struct MulticastChannel {
    group_socket: UdpSocket,
    unicast_socket: UdpSocket,
    group: SocketAddrV4,
    local_endpoint: Endpoint,
    max_datagram: usize,
}

impl MulticastChannel {
    /// Bind both sockets and join the configured group.
    pub async fn bind(config: ChannelConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let group_socket = group_socket(&config)?;

        let unicast_socket = UdpSocket::bind(SocketAddrV4::new(config.listen_interface, 0))
            .await
            .map_err(|e| TransportError::Bind(e.into()))?;
        unicast_socket
            .set_multicast_ttl_v4(config.multicast_ttl)
            .map_err(|e| TransportError::Bind(e.into()))?;
        unicast_socket
            .set_multicast_loop_v4(config.multicast_loop)
            .map_err(|e| TransportError::Bind(e.into()))?;

        let port = match unicast_socket
            .local_addr()
            .map_err(|e| TransportError::Bind(e.into()))?
        {
            SocketAddr::V4(addr) => addr.port(),
            SocketAddr::V6(addr) => {
                return Err(TransportError::Config(format!(
                    "unicast socket bound to IPv6 address {addr}"
                )))
            }
        };

        let ip = if config.listen_interface.is_unspecified() {
            outgoing_interface(config.multicast_group())
        } else {
            config.listen_interface
        };
        let local_endpoint = SocketAddrV4::new(ip, port);

        info!(
            group = %config.multicast_group(),
            local = %local_endpoint,
            "multicast channel bound"
        );

        Ok(Self {
            group_socket,
            unicast_socket,
            group: config.multicast_group(),
            local_endpoint,
            max_datagram: config.max_datagram,
        })
    }

    /// The endpoint peers see as the sender of our datagrams.
    pub fn local_endpoint(&self) -> Endpoint {
        self.local_endpoint
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    pub fn max_datagram(&self) -> usize {
        self.max_datagram
    }

    /// Send a datagram to every member of the group.
    pub async fn send_multicast(&self, data: &[u8]) -> Result<(), TransportError> {
        self.send_to(data, self.group).await
    }

    /// Send a datagram to a single member.
    pub async fn send_unicast(&self, data: &[u8], to: Endpoint) -> Result<(), TransportError> {
        self.send_to(data, to).await
    }

    async fn send_to(&self, data: &[u8], to: Endpoint) -> Result<(), TransportError> {
        if data.len() > self.max_datagram {
            return Err(TransportError::DatagramTooLarge {
                size: data.len(),
                max: self.max_datagram,
            });
        }
        self.unicast_socket
            .send_to(data, to)
            .await
            .map_err(|source| TransportError::Send { to, source })?;
        Ok(())
    }

    /// Receive the next datagram from either socket. Blocks until one arrives.
    ///
    /// Datagrams from IPv6 senders are skipped.
    pub async fn recv(&self) -> Result<(Vec<u8>, Endpoint), TransportError> {
        let mut group_buf = vec![0u8; self.max_datagram];
        let mut unicast_buf = vec![0u8; self.max_datagram];
        loop {
            let (len, from, from_group) = tokio::select! {
                r = self.group_socket.recv_from(&mut group_buf) => {
                    let (len, from) = r.map_err(TransportError::Receive)?;
                    (len, from, true)
                }
                r = self.unicast_socket.recv_from(&mut unicast_buf) => {
                    let (len, from) = r.map_err(TransportError::Receive)?;
                    (len, from, false)
                }
            };
            let buf = if from_group { &group_buf } else { &unicast_buf };
            match from {
                SocketAddr::V4(from) => return Ok((buf[..len].to_vec(), from)),
                SocketAddr::V6(from) => debug!(%from, "ignoring IPv6 datagram"),
            }
        }
    }
}

fn group_socket(config: &ChannelConfig) -> Result<UdpSocket, TransportError> {
    let bind = |e: anyhow::Error| TransportError::Bind(e);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("Socket::new")
        .map_err(bind)?;
    socket
        .set_reuse_address(true)
        .context("set_reuse_address")
        .map_err(bind)?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .context("set_reuse_port")
        .map_err(bind)?;
    socket
        .bind(&SocketAddrV4::new(config.listen_interface, config.multicast_port).into())
        .context("bind")
        .map_err(bind)?;
    socket
        .join_multicast_v4(&config.multicast_addr, &config.listen_interface)
        .map_err(|source| TransportError::Multicast {
            group: config.multicast_addr,
            source,
        })?;
    socket
        .set_nonblocking(true)
        .context("set_nonblocking")
        .map_err(bind)?;
    UdpSocket::from_std(std::net::UdpSocket::from(socket))
        .context("from_std")
        .map_err(bind)
}

/// Address of the interface the kernel would route group traffic through.
///
/// Connecting a UDP socket sends nothing; it only resolves the route.
/// Falls back to loopback when no route exists.
fn outgoing_interface(group: SocketAddrV4) -> Ipv4Addr {
    let probe = || -> std::io::Result<Ipv4Addr> {
        let socket = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(group)?;
        match socket.local_addr()? {
            SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
            _ => Ok(Ipv4Addr::LOCALHOST),
        }
    };
    probe().unwrap_or_else(|e| {
        debug!(error = %e, "no route to multicast group, using loopback");
        Ipv4Addr::LOCALHOST
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_interface_is_ipv4_and_specified() {
        let ip = outgoing_interface(SocketAddrV4::new(Ipv4Addr::new(239, 255, 0, 1), 65000));
        assert!(!ip.is_unspecified());
    }

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let config = ChannelConfig::new().multicast_addr(Ipv4Addr::LOCALHOST);
        let err = MulticastChannel::bind(config).await.err().unwrap();
        assert!(matches!(err, TransportError::Config(_)));
    }
}
