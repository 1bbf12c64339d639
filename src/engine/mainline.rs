//! [DhtEngine] backed by the BitTorrent Mainline DHT.
//!
//! Values are stored as [BEP_0044](https://www.bittorrent.org/beps/bep_0044.html)
//! mutable items. Every gateway derives the same signing key for a given key,
//! so any node in the network resolves a key to the same target.

use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use futures::StreamExt;
use mainline::{async_dht::AsyncDht, Bytes, Dht, MutableItem};
use sha2::{Digest, Sha256};
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, info, warn};

use super::{DhtEngine, PeerEndpoint};
use crate::error::{BindError, JoinError, LookupError, WriteError};

/// Prefix mixed into every key before deriving its signing key.
const KEY_DOMAIN: &[u8] = b"dht-gateway:kv:";

/// Default budget for a single `get` query.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts to rebind the same port while the previous socket is released.
const REBIND_ATTEMPTS: usize = 5;
const REBIND_BACKOFF: Duration = Duration::from_millis(50);

/// Mainline's own k-bucket size.
const MAINLINE_BUCKET_SIZE: usize = 20;

#[derive(Debug, Clone)]
struct Running {
    dht: AsyncDht,
    port: u16,
}

#[derive(Debug)]
/// Mainline DHT engine.
pub struct MainlineEngine {
    running: RwLock<Option<Running>>,
    bucket_size: usize,
    lookup_timeout: Duration,
}

impl MainlineEngine {
    pub fn new(bucket_size: usize) -> Self {
        Self {
            running: RwLock::new(None),
            bucket_size,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Set the budget after which a `get` query fails with [LookupError::Timeout].
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Local UDP address of the running node, if listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let dht = self.dht().await?;

        local_addr(&dht).await
    }

    /// Port the running node is bound to, if listening.
    pub async fn port(&self) -> Option<u16> {
        self.running.read().await.as_ref().map(|r| r.port)
    }

    // === Private Methods ===

    async fn dht(&self) -> Option<AsyncDht> {
        self.running.read().await.as_ref().map(|r| r.dht.clone())
    }

    async fn bind(
        &self,
        port: u16,
        bootstrap: &[String],
        attempts: usize,
    ) -> Result<AsyncDht, BindError> {
        let mut attempt = 1;

        loop {
            let built = Dht::builder()
                .port(port)
                .bootstrap(bootstrap)
                .server()
                .build();

            match built {
                Ok(dht) => return Ok(dht.as_async()),
                Err(error) if attempt < attempts => {
                    debug!(port, attempt, ?error, "Retrying bind");
                    attempt += 1;
                    tokio::time::sleep(REBIND_BACKOFF).await;
                }
                Err(error) => {
                    return Err(BindError::Io {
                        port,
                        source: std::io::Error::other(error.to_string()),
                    })
                }
            }
        }
    }
}

async fn local_addr(dht: &AsyncDht) -> Option<SocketAddr> {
    let info = dht.info().await.ok()?;
    let addr = info.local_addr().ok()?;

    Some(*addr)
}

/// Signing key every gateway derives for `key`.
pub fn signer_for_key(key: &str) -> SigningKey {
    let seed: [u8; 32] = Sha256::new()
        .chain_update(KEY_DOMAIN)
        .chain_update(key.as_bytes())
        .finalize()
        .into();

    SigningKey::from_bytes(&seed)
}

#[async_trait]
impl DhtEngine for MainlineEngine {
    async fn listen(&self, port: u16) -> Result<(), BindError> {
        let mut running = self.running.write().await;

        if let Some(current) = running.as_ref() {
            return Err(BindError::AlreadyListening(current.port));
        }

        if self.bucket_size != MAINLINE_BUCKET_SIZE {
            warn!(
                bucket_size = self.bucket_size,
                "Mainline uses fixed size k-buckets, ignoring bucket size"
            );
        }

        let dht = self.bind(port, &[], 1).await?;

        // Port 0 binds an ephemeral port, remember the one we got.
        let port = match local_addr(&dht).await {
            Some(local_addr) => {
                info!(%local_addr, "Mainline node listening");
                local_addr.port()
            }
            None => port,
        };

        *running = Some(Running { dht, port });

        Ok(())
    }

    async fn join(&self, peers: &[PeerEndpoint]) -> Result<(), JoinError> {
        let bootstrap: Vec<String> = peers.iter().map(ToString::to_string).collect();

        let dht = {
            let mut running = self.running.write().await;

            let Running { mut dht, port } = running.take().ok_or(JoinError::NotListening)?;

            // Mainline only bootstraps when built, so restart on the same port.
            dht.shutdown().await;

            match self.bind(port, &bootstrap, REBIND_ATTEMPTS).await {
                Ok(dht) => {
                    *running = Some(Running {
                        dht: dht.clone(),
                        port,
                    });

                    dht
                }
                Err(error) => {
                    warn!(port, %error, "Rebind with bootstrap failed, restoring listener");

                    let dht = self
                        .bind(port, &[], REBIND_ATTEMPTS)
                        .await
                        .map_err(JoinError::ListenerLost)?;
                    *running = Some(Running { dht, port });

                    return Err(error.into());
                }
            }
        };

        info!(bootstrap = ?bootstrap, "Joining network");

        let id = *dht.info().await.map_err(|_| JoinError::Shutdown)?.id();
        let closest = dht.find_node(id).await.map_err(|_| JoinError::Shutdown)?;

        if closest.is_empty() {
            return Err(JoinError::Unreachable(bootstrap.join(", ")));
        }

        debug!(nodes = closest.len(), "Joined through bootstrap");

        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), WriteError> {
        let dht = self.dht().await.ok_or(WriteError::NotListening)?;

        let seq = chrono::Utc::now().timestamp_micros();
        let value = Bytes::copy_from_slice(value.as_bytes());
        let item = MutableItem::new(signer_for_key(key), value, seq, None);

        let target = dht
            .put_mutable(item)
            .await
            .map_err(|error| WriteError::Rejected(error.to_string()))?;

        debug!(key, ?target, seq, "Stored mutable item");

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, LookupError> {
        let dht = self.dht().await.ok_or(LookupError::NotListening)?;

        let signer = signer_for_key(key);
        let mut stream = dht
            .get_mutable(signer.verifying_key().as_bytes(), None, None)
            .map_err(|_| LookupError::Shutdown)?;

        let deadline = Instant::now() + self.lookup_timeout;
        let mut latest: Option<MutableItem> = None;

        loop {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(item)) => {
                    if latest.as_ref().map_or(true, |l| item.seq() > l.seq()) {
                        latest = Some(item);
                    }
                }
                Ok(None) => break,
                Err(_) if latest.is_some() => break,
                Err(_) => return Err(LookupError::Timeout),
            }
        }

        latest
            .map(|item| String::from_utf8_lossy(item.value()).into_owned())
            .ok_or_else(|| LookupError::NotFound(key.to_string()))
    }

    /// Closest responding nodes to this node's own id.
    async fn bootstrappable_neighbors(&self) -> Vec<PeerEndpoint> {
        let Some(dht) = self.dht().await else {
            return vec![];
        };

        let Ok(info) = dht.info().await else {
            return vec![];
        };

        dht.find_node(*info.id())
            .await
            .unwrap_or_default()
            .iter()
            .map(|node| {
                let address = node.address();
                PeerEndpoint::new(address.ip().to_string(), address.port())
            })
            .collect()
    }

    async fn stop(&self) {
        if let Some(Running { mut dht, port }) = self.running.write().await.take() {
            dht.shutdown().await;
            info!(port, "Mainline node stopped");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signer_is_deterministic() {
        let a = signer_for_key("greeting");
        let b = signer_for_key("greeting");
        let c = signer_for_key("farewell");

        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_ne!(a.to_bytes(), c.to_bytes());
    }

    #[tokio::test]
    async fn not_listening() {
        let engine = MainlineEngine::new(20);

        assert_eq!(
            engine.set("a", "b").await,
            Err(WriteError::NotListening)
        );
        assert_eq!(engine.get("a").await, Err(LookupError::NotListening));
        assert!(engine.bootstrappable_neighbors().await.is_empty());
        assert!(matches!(
            engine.join(&[PeerEndpoint::new("127.0.0.1", 6881)]).await,
            Err(JoinError::NotListening)
        ));
    }

    /// A local port nothing is listening on.
    fn unused_port() -> u16 {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn listen_twice_then_stop() {
        let engine = MainlineEngine::new(20);

        engine.listen(0).await.unwrap();

        let addr = engine.local_addr().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(engine.port().await, Some(addr.port()));

        assert!(matches!(
            engine.listen(0).await,
            Err(BindError::AlreadyListening(port)) if port == addr.port()
        ));

        engine.stop().await;
        engine.stop().await;

        assert!(engine.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn join_unreachable_peer() {
        let engine = MainlineEngine::new(20);
        engine.listen(0).await.unwrap();
        let port = engine.port().await.unwrap();

        let result = engine
            .join(&[PeerEndpoint::new("127.0.0.1", unused_port())])
            .await;

        assert!(matches!(result, Err(JoinError::Unreachable(_))));

        // Still listening on the same port, as a seed.
        assert_eq!(engine.port().await, Some(port));
        assert_eq!(engine.local_addr().await.map(|a| a.port()), Some(port));

        engine.stop().await;
    }

    #[tokio::test]
    async fn join_testnet() {
        let testnet = mainline::Testnet::new(3).unwrap();
        let peers: Vec<PeerEndpoint> = testnet
            .bootstrap
            .iter()
            .map(|address| address.parse().unwrap())
            .collect();

        let engine = MainlineEngine::new(20);
        engine.listen(0).await.unwrap();
        let port = engine.port().await.unwrap();

        engine.join(&peers).await.unwrap();

        assert_eq!(engine.port().await, Some(port));
        assert!(!engine.bootstrappable_neighbors().await.is_empty());

        engine.stop().await;
    }
}
