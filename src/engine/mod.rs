//! The DHT engine facade consumed by the gateway and the node lifecycle.
//!
//! Routing, replication and lookups all live behind [DhtEngine]; nothing in
//! this crate interprets how the engine does its job.

#[cfg(feature = "mainline")]
pub mod mainline;
pub mod memory;

use std::{fmt, str::FromStr};

use async_trait::async_trait;

use crate::error::{BindError, JoinError, LookupError, WriteError};

/// A peer's transport address, as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    host: String,
    port: u16,
}

impl PeerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    // === Getters ===

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid peer endpoint {0:?}, expected host:port")]
pub struct InvalidPeerEndpoint(String);

impl FromStr for PeerEndpoint {
    type Err = InvalidPeerEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidPeerEndpoint(s.to_string()))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port
            .parse::<u16>()
            .map_err(|_| InvalidPeerEndpoint(s.to_string()))?;

        if host.is_empty() {
            return Err(InvalidPeerEndpoint(s.to_string()));
        }

        Ok(PeerEndpoint::new(host, port))
    }
}

/// Asynchronous operations the node needs from a DHT implementation.
///
/// Implementations are shared by every in-flight gateway request, so they
/// must synchronize their own interior state.
#[async_trait]
pub trait DhtEngine: fmt::Debug + Send + Sync + 'static {
    /// Bind the engine's transport to `port`. Called once per node lifetime.
    async fn listen(&self, port: u16) -> Result<(), BindError>;

    /// Integrate into an existing network through `peers`.
    async fn join(&self, peers: &[PeerEndpoint]) -> Result<(), JoinError>;

    /// Replicate `value` under `key` across the network.
    async fn set(&self, key: &str, value: &str) -> Result<(), WriteError>;

    /// Look `key` up, possibly over the network.
    async fn get(&self, key: &str) -> Result<String, LookupError>;

    /// Known peers that others could bootstrap from.
    async fn bootstrappable_neighbors(&self) -> Vec<PeerEndpoint>;

    /// Release every engine resource.
    async fn stop(&self);
}
