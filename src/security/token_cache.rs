use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::security::credentials::Credential;

/// Remaining validity below which a cached token is treated as absent.
pub const EXPIRY_MARGIN_MS: i64 = 5_000;

// Ten years; keeps chrono arithmetic away from overflow on absurd `expires_in`.
const MAX_TTL_SECS: u64 = 315_360_000;

/// Upper bound on distinct override identities kept in a [`TokenStore`].
pub const DEFAULT_MAX_OVERRIDE_SLOTS: usize = 256;

/// Source of wall-clock time for expiry decisions.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock, used to exercise expiry without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::RwLock::new(start),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let delta = Duration::from_std(by).unwrap_or(Duration::zero());
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("value", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Holds one access token and its expiry.
///
/// Clones share the same slot. Concurrent `set` calls are last-write-wins.
#[derive(Debug, Clone)]
pub struct TokenCache {
    slot: Arc<RwLock<Option<CachedToken>>>,
    clock: Arc<dyn Clock>,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl TokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            clock,
        }
    }

    /// The cached token, if it has at least [`EXPIRY_MARGIN_MS`] of validity left.
    pub async fn get(&self) -> Option<String> {
        let now = self.clock.now();
        let guard = self.slot.read().await;
        guard.as_ref().and_then(|cached| {
            if now < cached.expires_at - Duration::milliseconds(EXPIRY_MARGIN_MS) {
                Some(cached.value.clone())
            } else {
                None
            }
        })
    }

    /// Store a token valid for `ttl_secs` from now.
    pub async fn set(&self, token: String, ttl_secs: u64) {
        let ttl = i64::try_from(ttl_secs.min(MAX_TTL_SECS)).unwrap_or(0);
        let expires_at = self.clock.now() + Duration::seconds(ttl);
        let mut guard = self.slot.write().await;
        *guard = Some(CachedToken {
            value: token,
            expires_at,
        });
        debug!(%expires_at, "access token cached");
    }

    pub async fn invalidate(&self) {
        let mut guard = self.slot.write().await;
        if guard.take().is_some() {
            debug!("access token invalidated");
        }
    }

    /// Expiry of the stored token, whether or not it is still usable.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.slot.read().await.as_ref().map(|c| c.expires_at)
    }
}

/// Token caches keyed by identity: one slot for the process-default
/// credential and one per distinct override.
///
/// Override slots are bounded. When the map is full, slots without a usable
/// token are dropped first, then the one whose token expires soonest.
#[derive(Debug, Clone)]
pub struct TokenStore {
    default: TokenCache,
    overrides: Arc<RwLock<HashMap<String, TokenCache>>>,
    clock: Arc<dyn Clock>,
    max_overrides: usize,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl TokenStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            default: TokenCache::new(clock.clone()),
            overrides: Arc::new(RwLock::new(HashMap::new())),
            clock,
            max_overrides: DEFAULT_MAX_OVERRIDE_SLOTS,
        }
    }

    pub fn with_max_overrides(mut self, max: usize) -> Self {
        self.max_overrides = max.max(1);
        self
    }

    /// The slot serving `credential`: the shared default slot for the
    /// process credential, a dedicated one per override identity.
    pub async fn slot(&self, credential: &Credential) -> TokenCache {
        if !credential.is_override() {
            return self.default.clone();
        }
        let key = credential.cache_key();

        if let Some(cache) = self.overrides.read().await.get(&key) {
            return cache.clone();
        }
        let mut overrides = self.overrides.write().await;
        if !overrides.contains_key(&key) && overrides.len() >= self.max_overrides {
            self.evict(&mut overrides).await;
        }
        overrides
            .entry(key)
            .or_insert_with(|| TokenCache::new(self.clock.clone()))
            .clone()
    }

    /// Drop the override slot of `credential`, e.g. after its token request
    /// was rejected. The default slot is never removed.
    pub async fn forget(&self, credential: &Credential) {
        if !credential.is_override() {
            return;
        }
        if self.overrides.write().await.remove(&credential.cache_key()).is_some() {
            debug!("override token slot dropped");
        }
    }

    async fn evict(&self, overrides: &mut HashMap<String, TokenCache>) {
        let usable_after = self.clock.now() + Duration::milliseconds(EXPIRY_MARGIN_MS);
        let mut expiries = Vec::with_capacity(overrides.len());
        for (key, cache) in overrides.iter() {
            expiries.push((key.clone(), cache.expires_at().await));
        }

        let before = overrides.len();
        for (key, expires_at) in &expiries {
            if expires_at.map_or(true, |at| at <= usable_after) {
                overrides.remove(key);
            }
        }

        if overrides.len() >= self.max_overrides {
            let soonest = expiries
                .iter()
                .filter(|(key, _)| overrides.contains_key(key))
                .min_by_key(|(_, expires_at)| *expires_at)
                .map(|(key, _)| key.clone());
            if let Some(key) = soonest {
                overrides.remove(&key);
            }
        }
        debug!(evicted = before - overrides.len(), "override token slots evicted");
    }

    pub fn default_slot(&self) -> &TokenCache {
        &self.default
    }

    pub async fn override_count(&self) -> usize {
        self.overrides.read().await.len()
    }
}
