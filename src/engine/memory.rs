//! In-process engine without networking.
//!
//! Keeps values in a local map and records every call it receives, which
//! makes it the engine of choice for tests and for running a gateway
//! locally without joining any network.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tracing::debug;

use super::{DhtEngine, PeerEndpoint};
use crate::error::{BindError, JoinError, LookupError, WriteError};

/// A call received by a [MemoryEngine], in order of arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Listen(u16),
    Join(Vec<PeerEndpoint>),
    Set(String, String),
    Get(String),
    BootstrappableNeighbors,
    Stop,
}

#[derive(Debug, Default)]
struct State {
    listening: Option<u16>,
    values: HashMap<String, String>,
    calls: Vec<EngineCall>,
}

#[derive(Debug, Default)]
/// Single node engine that stores values in memory.
pub struct MemoryEngine {
    state: Mutex<State>,
    neighbors: Vec<PeerEndpoint>,
    fail_bind: bool,
    fail_join: bool,
    lose_listener_on_join: bool,
    lookup_failure: Option<LookupError>,
    write_failure: Option<WriteError>,
    lookup_delay: Option<Duration>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // === Options ===

    /// Return these peers from [DhtEngine::bootstrappable_neighbors].
    pub fn with_neighbors(mut self, neighbors: Vec<PeerEndpoint>) -> Self {
        self.neighbors = neighbors;
        self
    }

    /// Make [DhtEngine::listen] fail as if the port was taken.
    pub fn failing_bind(mut self) -> Self {
        self.fail_bind = true;
        self
    }

    /// Make [DhtEngine::join] fail as if no bootstrap peer responded.
    pub fn failing_join(mut self) -> Self {
        self.fail_join = true;
        self
    }

    /// Make [DhtEngine::join] fail after giving up the listener, as an engine
    /// that could not rebind its port would.
    pub fn losing_listener_on_join(mut self) -> Self {
        self.lose_listener_on_join = true;
        self
    }

    /// Make every [DhtEngine::get] fail with `error`.
    pub fn failing_lookups(mut self, error: LookupError) -> Self {
        self.lookup_failure = Some(error);
        self
    }

    /// Make every [DhtEngine::set] fail with `error`.
    pub fn failing_writes(mut self, error: WriteError) -> Self {
        self.write_failure = Some(error);
        self
    }

    /// Suspend every [DhtEngine::get] for `delay` before answering.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    // === Getters ===

    /// Every call received so far.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// How many times [DhtEngine::stop] was called.
    pub fn stop_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| **call == EngineCall::Stop)
            .count()
    }

    /// Calls that reached the storage, excluding lifecycle calls.
    pub fn data_calls(&self) -> Vec<EngineCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    EngineCall::Set(..) | EngineCall::Get(_) | EngineCall::BootstrappableNeighbors
                )
            })
            .cloned()
            .collect()
    }

    // === Private Methods ===

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: EngineCall) -> MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

#[async_trait]
impl DhtEngine for MemoryEngine {
    async fn listen(&self, port: u16) -> Result<(), BindError> {
        let mut state = self.record(EngineCall::Listen(port));

        if let Some(current) = state.listening {
            return Err(BindError::AlreadyListening(current));
        }

        if self.fail_bind {
            return Err(BindError::Io {
                port,
                source: std::io::ErrorKind::AddrInUse.into(),
            });
        }

        state.listening = Some(port);
        debug!(port, "Memory engine listening");

        Ok(())
    }

    async fn join(&self, peers: &[PeerEndpoint]) -> Result<(), JoinError> {
        let mut state = self.record(EngineCall::Join(peers.to_vec()));

        let Some(port) = state.listening else {
            return Err(JoinError::NotListening);
        };

        if self.lose_listener_on_join {
            state.listening = None;
            return Err(JoinError::ListenerLost(BindError::Io {
                port,
                source: std::io::ErrorKind::AddrInUse.into(),
            }));
        }

        if self.fail_join {
            let peers: Vec<String> = peers.iter().map(ToString::to_string).collect();
            return Err(JoinError::Unreachable(peers.join(", ")));
        }

        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), WriteError> {
        let mut state = self.record(EngineCall::Set(key.to_string(), value.to_string()));

        if let Some(error) = &self.write_failure {
            return Err(error.clone());
        }

        state.values.insert(key.to_string(), value.to_string());

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, LookupError> {
        drop(self.record(EngineCall::Get(key.to_string())));

        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = &self.lookup_failure {
            return Err(error.clone());
        }

        self.state()
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(key.to_string()))
    }

    async fn bootstrappable_neighbors(&self) -> Vec<PeerEndpoint> {
        drop(self.record(EngineCall::BootstrappableNeighbors));

        self.neighbors.clone()
    }

    async fn stop(&self) {
        let mut state = self.record(EngineCall::Stop);
        state.listening = None;
    }
}
