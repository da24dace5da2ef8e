use std::net::Ipv4Addr;

/// Default multicast group, in the administratively scoped range.
pub const DEFAULT_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);
/// Default multicast port.
pub const DEFAULT_MULTICAST_PORT: u16 = 65000;
/// Default maximum datagram size in bytes.
pub const DEFAULT_MAX_DATAGRAM: usize = 1024;

/// Configuration for a [`MulticastChannel`](crate::MulticastChannel).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use gka_transport::ChannelConfig;
/// use std::net::Ipv4Addr;
///
/// let config = ChannelConfig::new()
///     .multicast_addr(Ipv4Addr::new(239, 255, 0, 7))
///     .multicast_port(40000);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Interface the group socket binds to and joins on.
    pub(crate) listen_interface: Ipv4Addr,
    pub(crate) multicast_addr: Ipv4Addr,
    pub(crate) multicast_port: u16,
    /// Largest datagram accepted or sent.
    pub(crate) max_datagram: usize,
    pub(crate) multicast_ttl: u32,
    /// Deliver our own multicast sends back to this host. Needed when
    /// several members share one machine.
    pub(crate) multicast_loop: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelConfig {
    /// Create a new config with defaults (`0.0.0.0`, `239.255.0.1:65000`).
    pub fn new() -> Self {
        Self {
            listen_interface: Ipv4Addr::UNSPECIFIED,
            multicast_addr: DEFAULT_MULTICAST_ADDR,
            multicast_port: DEFAULT_MULTICAST_PORT,
            max_datagram: DEFAULT_MAX_DATAGRAM,
            multicast_ttl: 1,
            multicast_loop: true,
        }
    }

    pub fn listen_interface(mut self, addr: Ipv4Addr) -> Self {
        self.listen_interface = addr;
        self
    }

    pub fn multicast_addr(mut self, addr: Ipv4Addr) -> Self {
        self.multicast_addr = addr;
        self
    }

    pub fn multicast_port(mut self, port: u16) -> Self {
        self.multicast_port = port;
        self
    }

    /// Set maximum datagram size (default: 1024 bytes).
    pub fn max_datagram(mut self, bytes: usize) -> Self {
        self.max_datagram = bytes;
        self
    }

    /// Set multicast TTL (default: 1, link-local).
    pub fn multicast_ttl(mut self, ttl: u32) -> Self {
        self.multicast_ttl = ttl;
        self
    }

    pub fn multicast_loop(mut self, enabled: bool) -> Self {
        self.multicast_loop = enabled;
        self
    }

    pub fn multicast_group(&self) -> std::net::SocketAddrV4 {
        std::net::SocketAddrV4::new(self.multicast_addr, self.multicast_port)
    }

    /// Check the values that cannot be caught by the type system.
    pub fn validate(&self) -> Result<(), crate::TransportError> {
        if !self.multicast_addr.is_multicast() {
            return Err(crate::TransportError::Config(format!(
                "{} is not a multicast address",
                self.multicast_addr
            )));
        }
        if self.multicast_port == 0 {
            return Err(crate::TransportError::Config(
                "multicast port must be non-zero".into(),
            ));
        }
        if self.max_datagram == 0 || self.max_datagram > 65_507 {
            return Err(crate::TransportError::Config(format!(
                "max datagram {} out of range 1..=65507",
                self.max_datagram
            )));
        }
        Ok(())
    }
}
