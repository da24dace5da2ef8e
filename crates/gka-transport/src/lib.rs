//! Group key agreement transport layer.
//!
//! Members find each other through a UDP multicast group and answer each
//! other over unicast. A [`MulticastChannel`] owns both sockets: one bound
//! to the group port with address reuse (so several members can share a
//! host) and one on an ephemeral port that every outbound datagram leaves
//! from. A peer's reply endpoint is therefore the sender address of any
//! datagram it sent.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use gka_transport::{ChannelConfig, MulticastChannel};
//!
//! # async fn example() -> Result<(), gka_transport::TransportError> {
//! let channel = MulticastChannel::bind(ChannelConfig::new()).await?;
//! println!("Local endpoint: {}", channel.local_endpoint());
//!
//! channel.send_multicast(b"hello group").await?;
//!
//! let (data, from) = channel.recv().await?;
//! channel.send_unicast(&data, from).await?;
//! # Ok(())
//! # }
//! ```

mod channel;
mod config;
mod error;

pub use channel::MulticastChannel;
pub use config::ChannelConfig;
pub use error::TransportError;

/// Address of a member: IPv4 address plus the port of its unicast socket.
pub type Endpoint = std::net::SocketAddrV4;
