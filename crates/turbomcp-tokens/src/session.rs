//! Bounded cache of issued tokens keyed by (user, project)
//!
//! Entries are ordered by (expiration, insertion sequence). That order drives
//! both capacity eviction (earliest first) and expiry eviction: when a lookup
//! hits an expired entry, that entry and everything ordered before it are
//! dropped, since all of them expire no later than the one just found expired.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::clock::{Clock, system_clock};
use crate::config::SessionCacheConfig;
use crate::error::{Result, TokenError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    user: String,
    project: String,
}

impl SessionKey {
    fn new(user: &str, project: &str) -> Self {
        Self {
            user: user.to_string(),
            project: project.to_string(),
        }
    }
}

/// Eviction order: expiration first, then insertion sequence
type Rank = (i64, u64);

#[derive(Debug)]
struct Slot {
    token: String,
    rank: Rank,
}

#[derive(Debug, Default)]
struct Entries {
    slots: HashMap<SessionKey, Slot>,
    order: BTreeMap<Rank, SessionKey>,
    next_seq: u64,
}

impl Entries {
    fn remove(&mut self, key: &SessionKey) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.rank);
        Some(slot)
    }

    fn pop_first(&mut self) -> Option<SessionKey> {
        let (_, key) = self.order.pop_first()?;
        self.slots.remove(&key);
        Some(key)
    }

    /// Drop every entry ranked at or before `rank`; returns how many went
    fn evict_through(&mut self, rank: Rank) -> usize {
        let mut retained = self.order.split_off(&rank);
        // split_off keeps `rank` itself on the retained side
        if let Some((_, key)) = retained.pop_first() {
            self.slots.remove(&key);
        }
        let evicted = std::mem::replace(&mut self.order, retained);
        for key in evicted.values() {
            self.slots.remove(key);
        }
        evicted.len() + 1
    }
}

/// Only the claim the cache needs
#[derive(Deserialize)]
struct Expiry {
    exp: Option<i64>,
}

/// Read `exp` from a compact token without verifying it
fn token_expiry(tks: &str) -> Result<i64> {
    let mut parts = tks.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed(
            "token must have three dot-separated segments".to_string(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("payload is not base64url: {e}")))?;
    let expiry: Expiry = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("payload is not JSON: {e}")))?;
    expiry
        .exp
        .ok_or_else(|| TokenError::Malformed("payload has no exp claim".to_string()))
}

/// Bounded, thread-safe session token cache
#[derive(Debug)]
pub struct SessionCache {
    capacity: usize,
    entries: RwLock<Entries>,
    clock: Arc<dyn Clock>,
}

impl SessionCache {
    /// Cache holding at most `capacity` sessions
    ///
    /// # Errors
    ///
    /// [`TokenError::InvalidConfig`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TokenError::InvalidConfig(
                "session cache capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            entries: RwLock::new(Entries::default()),
            clock: system_clock(),
        })
    }

    /// Cache sized from `config`
    ///
    /// # Errors
    ///
    /// Same as [`SessionCache::new`].
    pub fn from_config(config: &SessionCacheConfig) -> Result<Self> {
        Self::new(config.capacity)
    }

    /// Use `clock` for expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cached token for (`user`, `project`)
    ///
    /// # Errors
    ///
    /// - [`TokenError::CacheMiss`] if nothing is cached
    /// - [`TokenError::CacheExpired`] if the cached token has expired; it is
    ///   evicted along with every entry ranked before it
    pub fn get(&self, user: &str, project: &str) -> Result<String> {
        let key = SessionKey::new(user, project);
        let mut entries = self.entries.write();

        let slot = entries.slots.get(&key).ok_or(TokenError::CacheMiss)?;
        let (exp, _) = slot.rank;
        if self.clock.now() < exp {
            debug!(user, project, "Session cache hit");
            return Ok(slot.token.clone());
        }

        let rank = slot.rank;
        let evicted = entries.evict_through(rank);
        debug!(user, project, evicted, "Session cache entry expired");
        Err(TokenError::CacheExpired)
    }

    /// Cache `tks` for (`user`, `project`), replacing any previous entry
    ///
    /// Evicts the earliest-expiring entries while the cache is full.
    ///
    /// # Errors
    ///
    /// [`TokenError::Malformed`] if `tks` isn't a compact token with an `exp`
    /// claim. The cache is unchanged in that case.
    pub fn add(&self, user: &str, project: &str, tks: &str) -> Result<()> {
        let exp = token_expiry(tks)?;
        let key = SessionKey::new(user, project);
        let mut entries = self.entries.write();

        entries.remove(&key);
        while entries.slots.len() >= self.capacity {
            match entries.pop_first() {
                Some(evicted) => debug!(
                    user = %evicted.user,
                    project = %evicted.project,
                    "Session cache full, evicting"
                ),
                None => break,
            }
        }

        let rank = (exp, entries.next_seq);
        entries.next_seq += 1;
        entries.order.insert(rank, key.clone());
        entries.slots.insert(
            key,
            Slot {
                token: tks.to_string(),
                rank,
            },
        );
        debug!(user, project, exp, "Session cached");
        Ok(())
    }

    /// Drop the entry for (`user`, `project`), if any
    pub fn remove(&self, user: &str, project: &str) {
        if self
            .entries
            .write()
            .remove(&SessionKey::new(user, project))
            .is_some()
        {
            debug!(user, project, "Session removed");
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.slots.clear();
        entries.order.clear();
    }

    /// Number of entries, expired ones included
    pub fn size(&self) -> usize {
        self.entries.read().slots.len()
    }

    /// Cached token, or the result of `mint` cached in its place
    ///
    /// `mint` runs on a miss or an expired entry, without any lock held.
    ///
    /// # Errors
    ///
    /// Errors from `mint`, or [`TokenError::Malformed`] if its token can't be
    /// cached.
    pub fn get_or_insert_with<F>(&self, user: &str, project: &str, mint: F) -> Result<String>
    where
        F: FnOnce() -> Result<String>,
    {
        match self.get(user, project) {
            Ok(tks) => Ok(tks),
            Err(TokenError::CacheMiss | TokenError::CacheExpired) => {
                let tks = mint()?;
                self.add(user, project, &tks)?;
                Ok(tks)
            }
            Err(e) => Err(e),
        }
    }
}
