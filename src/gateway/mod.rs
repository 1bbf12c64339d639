//! Gateway between external callers and the [DhtEngine].
//!
//! Every operation runs the same steps: parameter validation, then the token
//! check if the [AuthPolicy] asks for one, then the engine call. A request
//! rejected by either check never reaches the engine.

pub mod http;

use std::sync::Arc;

use tracing::debug;

use crate::{
    config::Variant,
    engine::DhtEngine,
    error::GatewayError,
    token::TokenGate,
};

pub const SET_SUCCESS: &str = "Key-Value set successfully";

const MISSING_KEY_VALUE: &str = "Both 'key' and 'value' parameters are required.";
const MISSING_JSON_KEY_VALUE: &str = "Key and value required";
const MISSING_KEY: &str = "A 'key' parameter is required.";
const MISSING_TOKEN: &str = "A 'token' parameter is required.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Gateway operations, one per route.
pub enum Operation {
    /// SET with query parameters.
    Set,
    /// SET with a JSON body.
    SetJson,
    Get,
    Neighbors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which operations require a valid token.
pub struct AuthPolicy {
    pub set: bool,
    pub set_json: bool,
    pub get: bool,
    pub neighbors: bool,
}

impl AuthPolicy {
    /// No operation requires a token.
    pub const OPEN: AuthPolicy = AuthPolicy {
        set: false,
        set_json: false,
        get: false,
        neighbors: false,
    };

    /// Every operation but the JSON SET requires a token.
    ///
    /// The JSON SET route has never been token gated; keep it that way until
    /// its callers are migrated.
    pub const HARDENED: AuthPolicy = AuthPolicy {
        set: true,
        set_json: false,
        get: true,
        neighbors: true,
    };

    pub fn for_variant(variant: Variant) -> Self {
        match variant {
            Variant::Basic => Self::OPEN,
            Variant::Hardened => Self::HARDENED,
        }
    }

    pub fn requires_token(&self, operation: Operation) -> bool {
        match operation {
            Operation::Set => self.set,
            Operation::SetJson => self.set_json,
            Operation::Get => self.get,
            Operation::Neighbors => self.neighbors,
        }
    }
}

#[derive(Debug, Clone)]
/// Request/response service over a shared engine.
///
/// Holds no state of its own besides the engine and token handles, so clones
/// can serve requests concurrently.
pub struct Gateway {
    engine: Arc<dyn DhtEngine>,
    tokens: Arc<dyn TokenGate>,
    policy: AuthPolicy,
}

impl Gateway {
    pub fn new(engine: Arc<dyn DhtEngine>, tokens: Arc<dyn TokenGate>, policy: AuthPolicy) -> Self {
        Self {
            engine,
            tokens,
            policy,
        }
    }

    // === Getters ===

    pub fn policy(&self) -> AuthPolicy {
        self.policy
    }

    // === Public Methods ===

    /// Store `value` under `key`, the query parameter flavor.
    pub async fn set(
        &self,
        token: Option<&str>,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<(), GatewayError> {
        let (key, value) = required(key)
            .zip(required(value))
            .ok_or(GatewayError::Validation(MISSING_KEY_VALUE))?;

        self.authorize(Operation::Set, token)?;
        self.store(key, value).await
    }

    /// Store `value` under `key`, the JSON body flavor.
    pub async fn set_json(
        &self,
        token: Option<&str>,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<(), GatewayError> {
        let (key, value) = required(key)
            .zip(required(value))
            .ok_or(GatewayError::Validation(MISSING_JSON_KEY_VALUE))?;

        self.authorize(Operation::SetJson, token)?;
        self.store(key, value).await
    }

    /// Look `key` up. Engine failures come back as [GatewayError::Backend].
    pub async fn get(&self, token: Option<&str>, key: Option<&str>) -> Result<String, GatewayError> {
        let key = required(key).ok_or(GatewayError::Validation(MISSING_KEY))?;

        self.authorize(Operation::Get, token)?;

        debug!(key, "Gateway get");
        Ok(self.engine.get(key).await?)
    }

    /// Hosts of the engine's bootstrappable neighbors, in engine order.
    pub async fn neighbors(&self, token: Option<&str>) -> Result<Vec<String>, GatewayError> {
        self.authorize(Operation::Neighbors, token)?;

        let neighbors = self.engine.bootstrappable_neighbors().await;
        debug!(count = neighbors.len(), "Gateway neighbors");

        Ok(neighbors
            .into_iter()
            .map(|peer| peer.host().to_string())
            .collect())
    }

    // === Private Methods ===

    /// The single place where tokens are checked.
    fn authorize(&self, operation: Operation, token: Option<&str>) -> Result<(), GatewayError> {
        if !self.policy.requires_token(operation) {
            return Ok(());
        }

        let token = required(token).ok_or(GatewayError::Validation(MISSING_TOKEN))?;

        if self.tokens.validate(token) {
            Ok(())
        } else {
            debug!(?operation, "Rejected token");
            Err(GatewayError::Auth)
        }
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), GatewayError> {
        debug!(key, len = value.len(), "Gateway set");

        Ok(self.engine.set(key, value).await?)
    }
}

fn required(param: Option<&str>) -> Option<&str> {
    param.filter(|p| !p.is_empty())
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        engine::{
            memory::{EngineCall, MemoryEngine},
            PeerEndpoint,
        },
        error::{LookupError, WriteError},
        token::{derive_token, Clock, ManualClock, TimeBucketTokens},
    };

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 10).unwrap())
    }

    fn setup(engine: MemoryEngine, policy: AuthPolicy) -> (Gateway, Arc<MemoryEngine>, String) {
        let clock = clock();
        let token = derive_token(clock.now());
        let engine = Arc::new(engine);
        let gateway = Gateway::new(
            engine.clone(),
            Arc::new(TimeBucketTokens::new(clock)),
            policy,
        );

        (gateway, engine, token)
    }

    #[tokio::test]
    async fn set_then_get() {
        let (gateway, _, token) = setup(MemoryEngine::new(), AuthPolicy::HARDENED);

        gateway
            .set(Some(&token), Some("greeting"), Some("Hello World!"))
            .await
            .unwrap();

        let value = gateway.get(Some(&token), Some("greeting")).await.unwrap();
        assert_eq!(value, "Hello World!");
    }

    #[tokio::test]
    async fn concurrent_requests() {
        let (gateway, engine, token) = setup(MemoryEngine::new(), AuthPolicy::HARDENED);

        let writes = (0..16).map(|i| {
            let gateway = gateway.clone();
            let token = token.clone();
            tokio::spawn(async move {
                gateway
                    .set(Some(&token), Some(&format!("key-{i}")), Some(&format!("value-{i}")))
                    .await
            })
        });

        for result in futures::future::join_all(writes).await {
            assert_eq!(result.unwrap(), Ok(()));
        }

        let reads = (0..16).map(|i| {
            let gateway = gateway.clone();
            let token = token.clone();
            async move { gateway.get(Some(&token), Some(&format!("key-{i}"))).await }
        });

        let values = futures::future::join_all(reads).await;

        for (i, value) in values.into_iter().enumerate() {
            assert_eq!(value, Ok(format!("value-{i}")));
        }
        assert_eq!(engine.data_calls().len(), 32);
    }

    #[tokio::test]
    async fn missing_parameters_never_reach_engine() {
        let (gateway, engine, token) = setup(MemoryEngine::new(), AuthPolicy::HARDENED);

        assert_eq!(
            gateway.set(Some(&token), Some("k"), None).await,
            Err(GatewayError::Validation(MISSING_KEY_VALUE))
        );
        assert_eq!(
            gateway.set(Some(&token), Some(""), Some("v")).await,
            Err(GatewayError::Validation(MISSING_KEY_VALUE))
        );
        assert_eq!(
            gateway.set_json(None, None, Some("v")).await,
            Err(GatewayError::Validation(MISSING_JSON_KEY_VALUE))
        );
        assert_eq!(
            gateway.get(Some(&token), None).await,
            Err(GatewayError::Validation(MISSING_KEY))
        );
        assert_eq!(
            gateway.get(None, Some("k")).await,
            Err(GatewayError::Validation(MISSING_TOKEN))
        );
        assert_eq!(
            gateway.neighbors(Some("")).await,
            Err(GatewayError::Validation(MISSING_TOKEN))
        );

        assert!(engine.data_calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_token_never_reaches_engine() {
        let (gateway, engine, _) = setup(MemoryEngine::new(), AuthPolicy::HARDENED);

        assert_eq!(
            gateway.set(Some("bogus"), Some("k"), Some("v")).await,
            Err(GatewayError::Auth)
        );
        assert_eq!(
            gateway.get(Some("bogus"), Some("k")).await,
            Err(GatewayError::Auth)
        );
        assert_eq!(gateway.neighbors(Some("bogus")).await, Err(GatewayError::Auth));

        assert!(engine.data_calls().is_empty());
    }

    #[tokio::test]
    async fn every_call_site_accepts_the_same_token() {
        let (gateway, _, token) = setup(MemoryEngine::new(), AuthPolicy::HARDENED);

        assert!(gateway.set(Some(&token), Some("k"), Some("v")).await.is_ok());
        assert!(gateway.get(Some(&token), Some("k")).await.is_ok());
        assert!(gateway.neighbors(Some(&token)).await.is_ok());

        let stale = derive_token(Utc.with_ymd_and_hms(2024, 5, 17, 9, 29, 59).unwrap());
        assert_eq!(
            gateway.set(Some(&stale), Some("k"), Some("v")).await,
            Err(GatewayError::Auth)
        );
        assert_eq!(
            gateway.get(Some(&stale), Some("k")).await,
            Err(GatewayError::Auth)
        );
        assert_eq!(gateway.neighbors(Some(&stale)).await, Err(GatewayError::Auth));
    }

    #[tokio::test]
    async fn json_set_is_open_in_hardened_policy() {
        let (gateway, engine, _) = setup(MemoryEngine::new(), AuthPolicy::HARDENED);

        gateway.set_json(None, Some("k"), Some("v")).await.unwrap();

        assert_eq!(
            engine.data_calls(),
            vec![EngineCall::Set("k".into(), "v".into())]
        );
    }

    #[tokio::test]
    async fn open_policy_ignores_tokens() {
        let (gateway, _, _) = setup(MemoryEngine::new(), AuthPolicy::OPEN);

        gateway.set(None, Some("k"), Some("v")).await.unwrap();
        assert_eq!(gateway.get(Some("anything"), Some("k")).await.unwrap(), "v");
    }

    #[tokio::test]
    async fn lookup_failures_become_backend_errors() {
        let (gateway, _, token) = setup(
            MemoryEngine::new().failing_lookups(LookupError::Timeout),
            AuthPolicy::HARDENED,
        );

        assert_eq!(
            gateway.get(Some(&token), Some("k")).await,
            Err(GatewayError::Backend("lookup timed out".into()))
        );

        let (gateway, _, token) = setup(MemoryEngine::new(), AuthPolicy::HARDENED);

        assert_eq!(
            gateway.get(Some(&token), Some("missing")).await,
            Err(GatewayError::Backend("key not found: missing".into()))
        );
    }

    #[tokio::test]
    async fn write_failures_become_backend_errors() {
        let (gateway, _, token) = setup(
            MemoryEngine::new().failing_writes(WriteError::Rejected("no nodes".into())),
            AuthPolicy::HARDENED,
        );

        assert_eq!(
            gateway.set(Some(&token), Some("k"), Some("v")).await,
            Err(GatewayError::Backend("put failed: no nodes".into()))
        );
    }

    #[tokio::test]
    async fn neighbors_surface_hosts_only() {
        let engine = MemoryEngine::new().with_neighbors(vec![
            PeerEndpoint::new("10.0.0.2", 17168),
            PeerEndpoint::new("10.0.0.1", 17169),
        ]);
        let (gateway, _, token) = setup(engine, AuthPolicy::HARDENED);

        assert_eq!(
            gateway.neighbors(Some(&token)).await.unwrap(),
            vec!["10.0.0.2".to_string(), "10.0.0.1".to_string()]
        );
    }
}
