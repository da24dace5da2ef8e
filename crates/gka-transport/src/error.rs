use crate::Endpoint;

/// Errors returned by the multicast transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind socket: {0}")]
    Bind(#[source] anyhow::Error),

    #[error("failed to join multicast group {group}: {source}")]
    Multicast {
        group: std::net::Ipv4Addr,
        #[source]
        source: std::io::Error,
    },

    #[error("send to {to} failed: {source}")]
    Send {
        to: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("datagram too large: {size} bytes (max {max})")]
    DatagramTooLarge { size: usize, max: usize },

    #[error("invalid configuration: {0}")]
    Config(String),
}
