#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod node;
pub mod token;

pub use crate::config::{GatewayConfig, JoinPolicy, NodeConfig, Variant};
pub use crate::engine::{DhtEngine, PeerEndpoint};
pub use crate::gateway::{AuthPolicy, Gateway};
pub use crate::node::{run_blocking, Node, StartMode};
pub use crate::token::{derive_token, TimeBucketTokens, TokenGate};

pub use tokio_util::sync::CancellationToken;
