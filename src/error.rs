//! Main Crate Errors

use std::io;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Invalid [crate::config::NodeConfig].
pub enum ConfigError {
    /// Only one half of the bootstrap `host:port` pair was given.
    #[error("bootstrap peer requires both host and port, got only the {0}")]
    PartialBootstrapPeer(&'static str),

    /// Bucket size must be at least one.
    #[error("bucket size must be greater than zero")]
    ZeroBucketSize,
}

#[derive(thiserror::Error, Debug)]
/// Engine failed to bind its transport.
pub enum BindError {
    #[error("engine is already listening on port {0}")]
    AlreadyListening(u16),

    #[error("failed to bind port {port}: {source}")]
    /// Transparent [std::io::Error] with the port that failed.
    Io {
        port: u16,
        #[source]
        source: io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
/// Engine failed to integrate into an existing network.
pub enum JoinError {
    #[error("engine is not listening, call listen before join")]
    NotListening,

    #[error("no bootstrap peer responded: {0}")]
    Unreachable(String),

    /// Rebinding with the bootstrap peers failed, the engine is still
    /// listening without them.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// The engine gave up its listener to join and could not get it back.
    #[error("engine lost its listener while joining: {0}")]
    ListenerLost(#[source] BindError),

    #[error("Dht was shutdown")]
    Shutdown,
}

impl JoinError {
    /// Whether the engine can still serve as a seed after this failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, JoinError::ListenerLost(_) | JoinError::Shutdown)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Engine failed to replicate a value.
pub enum WriteError {
    #[error("engine is not listening")]
    NotListening,

    #[error("put failed: {0}")]
    Rejected(String),

    #[error("Dht was shutdown")]
    Shutdown,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Engine failed to look a key up.
pub enum LookupError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("lookup timed out")]
    Timeout,

    #[error("engine is not listening")]
    NotListening,

    #[error("Dht was shutdown")]
    Shutdown,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Request scoped gateway errors, each one maps to a response.
pub enum GatewayError {
    /// A required request parameter is missing or empty.
    #[error("{0}")]
    Validation(&'static str),

    /// The presented token is not the currently valid one.
    #[error("Invalid token")]
    Auth,

    /// The engine failed, the message is the engine's description.
    #[error("{0}")]
    Backend(String),
}

impl From<WriteError> for GatewayError {
    fn from(error: WriteError) -> Self {
        GatewayError::Backend(error.to_string())
    }
}

impl From<LookupError> for GatewayError {
    fn from(error: LookupError) -> Self {
        GatewayError::Backend(error.to_string())
    }
}

#[derive(thiserror::Error, Debug)]
/// Fatal errors that abort a node.
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("engine failed to listen: {0}")]
    Bind(#[from] BindError),

    #[error("failed to join the network: {0}")]
    Join(#[from] JoinError),

    #[error("gateway failed on {addr}: {source}")]
    Gateway {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to start the runtime: {0}")]
    Runtime(#[source] io::Error),
}
