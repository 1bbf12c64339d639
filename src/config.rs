use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::{engine::PeerEndpoint, error::ConfigError};

/// Default DHT transport port.
pub const DEFAULT_LISTEN_PORT: u16 = 17168;
/// Default routing table fan-out passed to the engine.
pub const DEFAULT_BUCKET_SIZE: usize = 20;
/// Default HTTP gateway port.
pub const DEFAULT_GATEWAY_PORT: u16 = 8083;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Which gateway surface to expose.
pub enum Variant {
    /// Unauthenticated `/set` and `/get`, bound to loopback.
    Basic,
    /// Token gated `/set`, `/get` and `/neighbors`, plus JSON `POST /set`,
    /// bound to all interfaces.
    #[default]
    Hardened,
}

impl Variant {
    pub fn default_bind(&self) -> IpAddr {
        match self {
            Variant::Basic => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Variant::Hardened => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// What to do when joining through the bootstrap peer fails.
pub enum JoinPolicy {
    /// Abort startup.
    #[default]
    FailFast,
    /// Log the failure and keep running as a seed node.
    Standalone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Gateway Configurations
pub struct GatewayConfig {
    /// Surface to expose.
    ///
    /// Defaults to [Variant::Hardened]
    pub variant: Variant,
    /// HTTP port.
    ///
    /// Defaults to [DEFAULT_GATEWAY_PORT]
    pub port: u16,
    /// Explicit address to bind, overriding [Variant::default_bind].
    ///
    /// Defaults to None
    pub bind: Option<IpAddr>,
}

impl GatewayConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.bind.unwrap_or_else(|| self.variant.default_bind()),
            self.port,
        )
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            port: DEFAULT_GATEWAY_PORT,
            bind: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Node Configurations
pub struct NodeConfig {
    /// Local DHT transport port.
    ///
    /// Defaults to [DEFAULT_LISTEN_PORT]
    pub listen_port: u16,
    /// Existing peer to join through. `None` starts a seed node.
    ///
    /// Defaults to None
    pub bootstrap: Option<PeerEndpoint>,
    /// Routing table fan-out, passed to the engine as is.
    ///
    /// Defaults to [DEFAULT_BUCKET_SIZE]
    pub bucket_size: usize,
    /// Defaults to [JoinPolicy::FailFast]
    pub join_policy: JoinPolicy,
    pub gateway: GatewayConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            bootstrap: None,
            bucket_size: DEFAULT_BUCKET_SIZE,
            join_policy: JoinPolicy::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Set the bootstrap peer from a loose host and port.
    ///
    /// Both present selects join mode, both absent selects seed mode, and
    /// anything in between is rejected. An empty host counts as absent.
    pub fn with_bootstrap_parts(
        mut self,
        host: Option<String>,
        port: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let host = host.filter(|h| !h.is_empty());

        self.bootstrap = match (host, port) {
            (Some(host), Some(port)) => Some(PeerEndpoint::new(host, port)),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::PartialBootstrapPeer("host")),
            (None, Some(_)) => return Err(ConfigError::PartialBootstrapPeer("port")),
        };

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_size == 0 {
            return Err(ConfigError::ZeroBucketSize);
        }

        Ok(())
    }
}
