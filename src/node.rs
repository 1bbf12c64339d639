//! Node lifecycle: start the engine in seed or join mode, serve the gateway
//! until cancelled, then release the engine exactly once.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{net::TcpListener, sync::oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::{JoinPolicy, NodeConfig},
    engine::DhtEngine,
    error::NodeError,
    gateway::{http, AuthPolicy, Gateway},
    token::{SystemClock, TimeBucketTokens, TokenGate},
};

/// How long [run_blocking] waits for leftover tasks when releasing the runtime.
pub const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How the node entered the network.
pub enum StartMode {
    /// Listening only, others may bootstrap from this node.
    Seed,
    /// Listening and joined through a bootstrap peer.
    Join,
}

/// A DHT node with its gateway.
#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    engine: Arc<dyn DhtEngine>,
    tokens: Arc<dyn TokenGate>,
    ready: Option<oneshot::Sender<SocketAddr>>,
}

impl Node {
    /// Create a node, rejecting an invalid `config` before the engine is touched.
    pub fn new(config: NodeConfig, engine: Arc<dyn DhtEngine>) -> Result<Self, NodeError> {
        config.validate()?;

        Ok(Self {
            config,
            engine,
            tokens: Arc::new(TimeBucketTokens::new(SystemClock)),
            ready: None,
        })
    }

    // === Options ===

    /// Replace the default [TimeBucketTokens] gate.
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenGate>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Receive the gateway's bound address once it is serving.
    pub fn with_ready_notifier(mut self, ready: oneshot::Sender<SocketAddr>) -> Self {
        self.ready = Some(ready);
        self
    }

    // === Getters ===

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    // === Public Methods ===

    /// Run until `shutdown` is cancelled.
    ///
    /// The engine is stopped exactly once on every exit path: after a clean
    /// shutdown, after a startup failure, and when this future is dropped.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), NodeError> {
        let guard = EngineGuard::new(Arc::clone(&self.engine));

        let result = self.serve(shutdown).await;

        guard.release().await;

        result
    }

    // === Private Methods ===

    async fn serve(self, shutdown: CancellationToken) -> Result<(), NodeError> {
        let mode = tokio::select! {
            mode = self.start_engine() => mode?,
            _ = shutdown.cancelled() => {
                info!("Cancelled during startup");
                return Ok(());
            }
        };

        let Node {
            config,
            engine,
            tokens,
            ready,
        } = self;

        let variant = config.gateway.variant;
        let addr = config.gateway.socket_addr();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NodeError::Gateway { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| NodeError::Gateway { addr, source })?;

        let gateway = Gateway::new(engine, tokens, AuthPolicy::for_variant(variant));
        let app = http::router(gateway, variant);

        info!(%local_addr, ?variant, ?mode, "Gateway listening");

        if let Some(ready) = ready {
            let _ = ready.send(local_addr);
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|source| NodeError::Gateway {
                addr: local_addr,
                source,
            })?;

        info!("Gateway stopped");

        Ok(())
    }

    async fn start_engine(&self) -> Result<StartMode, NodeError> {
        let port = self.config.listen_port;

        self.engine.listen(port).await?;

        let Some(peer) = &self.config.bootstrap else {
            info!(port, "Started seed node");
            return Ok(StartMode::Seed);
        };

        match self.engine.join(std::slice::from_ref(peer)).await {
            Ok(()) => {
                info!(port, %peer, "Joined network");
                Ok(StartMode::Join)
            }
            Err(error) => match self.config.join_policy {
                JoinPolicy::Standalone if error.is_recoverable() => {
                    warn!(%peer, %error, "Join failed, continuing as seed node");
                    Ok(StartMode::Seed)
                }
                _ => Err(error.into()),
            },
        }
    }
}

/// Stops the engine exactly once.
///
/// [EngineGuard::release] stops it in place; if the guard is dropped instead,
/// the stop is spawned on the current runtime.
struct EngineGuard {
    engine: Option<Arc<dyn DhtEngine>>,
}

impl EngineGuard {
    fn new(engine: Arc<dyn DhtEngine>) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    async fn release(mut self) {
        if let Some(engine) = self.engine.take() {
            engine.stop().await;
            info!("Engine stopped");
        }
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    engine.stop().await;
                    info!("Engine stopped after the node was dropped");
                });
            }
            Err(_) => warn!("Node dropped outside of a runtime, engine was not stopped"),
        }
    }
}

/// Own the runtime for `node`: build it, run the node, then release it.
pub fn run_blocking(node: Node, shutdown: CancellationToken) -> Result<(), NodeError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("dht-gateway")
        .build()
        .map_err(NodeError::Runtime)?;

    let result = runtime.block_on(node.run(shutdown));

    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    result
}
