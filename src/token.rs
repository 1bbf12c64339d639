//! Time bucketed gateway tokens.
//!
//! A token is the first [TOKEN_LENGTH] hex characters of the SHA-256 digest of
//! the current UTC minute, formatted as [BUCKET_FORMAT]. It is only valid
//! during that minute.
//!
//! No secret goes into the derivation, so anyone who knows the time can mint
//! a valid token. [TokenGate] exists so a keyed scheme can replace
//! [TimeBucketTokens] without touching the gateway.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest.
pub const TOKEN_LENGTH: usize = 24;

/// `year-month-day-hour-minute`, the granularity of a token.
pub const BUCKET_FORMAT: &str = "%Y-%m-%d-%H-%M";

/// Source of the current time.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
/// Clock that only moves when told to. Clones share the same instant.
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(at)))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.0.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Issues and checks the credentials guarding gateway operations.
pub trait TokenGate: Debug + Send + Sync {
    /// The token valid right now.
    fn issue(&self) -> String;

    /// Whether `token` is valid right now.
    fn validate(&self, token: &str) -> bool;
}

/// Derive the token for the minute containing `at`.
///
/// Both issuing and validating go through this function.
pub fn derive_token(at: DateTime<Utc>) -> String {
    let bucket = at.format(BUCKET_FORMAT).to_string();
    let digest = Sha256::digest(bucket.as_bytes());

    let mut token = hex::encode(digest);
    token.truncate(TOKEN_LENGTH);

    token
}

#[derive(Debug, Default, Clone)]
/// [TokenGate] deriving tokens from the current minute of `C`.
pub struct TimeBucketTokens<C = SystemClock> {
    clock: C,
}

impl<C: Clock> TimeBucketTokens<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> TokenGate for TimeBucketTokens<C> {
    fn issue(&self) -> String {
        derive_token(self.clock.now())
    }

    fn validate(&self, token: &str) -> bool {
        token == derive_token(self.clock.now())
    }
}
