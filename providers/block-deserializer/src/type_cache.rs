//! Time-versioned contract schema cache
//!
//! One entry per account holds the schema that was in force over a block
//! range `[valid_from, valid_until)`. Lookups outside that range re-resolve
//! against the versioned schema store and, failing that, the chain head.

use crate::abi::{self, Abi};
use crate::config::CacheConfig;
use crate::error::SchemaError;
use crate::schema::{ContractSchema, TypeTable};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Versioned schema history, keyed by account and the heights at which the
/// account's schema changed.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Heights at which the account's schema changed, if the store tracks it
    async fn changed_at(&self, account: &str) -> Result<Option<Vec<u64>>, SchemaError>;

    /// Schema JSON stored for the change at `block`
    async fn abi_at(&self, account: &str, block: u64) -> Result<Option<String>, SchemaError>;
}

/// Source of the account's current schema at the chain head
#[async_trait]
pub trait ChainAbiSource: Send + Sync {
    async fn get_abi(&self, account: &str) -> Result<Abi, SchemaError>;
}

/// Upper end of a validity window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidUntil {
    /// Taken from the chain head, the window is not known
    Unknown,
    /// No later schema change is recorded
    Unbounded,
    /// Exclusive upper bound
    Block(u64),
}

/// A schema together with the block range it is valid for
#[derive(Debug, Clone)]
pub struct CachedSchemaEntry {
    pub schema: Arc<ContractSchema>,
    pub abi: Arc<Abi>,
    pub valid_from: Option<u64>,
    pub valid_until: ValidUntil,
    /// Cumulative, carried over when the entry is replaced for a new window
    pub hit_count: u64,
    pub last_used: u64,
}

impl CachedSchemaEntry {
    /// Whether the entry can decode data at `block`
    pub fn is_valid_at(&self, block: u64) -> bool {
        let Some(from) = self.valid_from else {
            return false;
        };
        if block < from {
            return false;
        }
        match self.valid_until {
            ValidUntil::Unknown => false,
            ValidUntil::Unbounded => true,
            ValidUntil::Block(until) => block < until,
        }
    }
}

/// Result of a cache resolution
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub schema: Arc<ContractSchema>,
    pub abi: Arc<Abi>,
}

/// Raw schema fetched for a block together with its window
#[derive(Debug, Clone)]
struct SavedAbi {
    abi: Abi,
    valid_from: Option<u64>,
    valid_until: ValidUntil,
}

/// Finds the change height in force at `block` and the next one after it
pub fn validity_window(history: &[u64], block: u64) -> Option<(u64, ValidUntil)> {
    let mut sorted = history.to_vec();
    sorted.sort_unstable();
    let from = sorted.iter().rev().find(|h| **h <= block).copied()?;
    let until = sorted
        .iter()
        .find(|h| **h > block)
        .map(|h| ValidUntil::Block(*h))
        .unwrap_or(ValidUntil::Unbounded);
    Some((from, until))
}

/// Shared, concurrently accessed schema cache
pub struct TypeCache {
    entries: DashMap<String, CachedSchemaEntry>,
    store: Arc<dyn SchemaStore>,
    chain_api: Arc<dyn ChainAbiSource>,
    base: Arc<TypeTable>,
    config: CacheConfig,
}

impl TypeCache {
    pub fn new(
        store: Arc<dyn SchemaStore>,
        chain_api: Arc<dyn ChainAbiSource>,
        base: Arc<TypeTable>,
        config: CacheConfig,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            chain_api,
            base,
            config,
        }
    }

    /// Resolves the schema of `account` as of `block`.
    ///
    /// A valid cached entry is returned without any remote call. Otherwise the
    /// schema is fetched, built and cached for its validity window.
    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, account: &str, block: u64) -> Result<ResolvedSchema, SchemaError> {
        if let Some(mut entry) = self.entries.get_mut(account) {
            if entry.is_valid_at(block) {
                entry.hit_count += 1;
                entry.last_used = block;
                return Ok(ResolvedSchema {
                    schema: Arc::clone(&entry.schema),
                    abi: Arc::clone(&entry.abi),
                });
            }
        }

        let saved = self.fetch_abi_at_block(account, block).await?;
        let schema = ContractSchema::from_abi_with_remap(account, &saved.abi, Some(Arc::clone(&self.base)))
            .map_err(|e| match e {
                SchemaError::Malformed { .. } => e,
                other => SchemaError::Malformed {
                    account: account.to_string(),
                    reason: other.to_string(),
                },
            })?;

        let resolved = ResolvedSchema {
            schema: Arc::new(schema),
            abi: Arc::new(saved.abi),
        };

        let previous_hits = self.entries.get(account).map(|e| e.hit_count).unwrap_or(0);
        self.entries.insert(
            account.to_string(),
            CachedSchemaEntry {
                schema: Arc::clone(&resolved.schema),
                abi: Arc::clone(&resolved.abi),
                valid_from: saved.valid_from,
                valid_until: saved.valid_until,
                hit_count: previous_hits + 1,
                last_used: block,
            },
        );

        Ok(resolved)
    }

    async fn fetch_abi_at_block(&self, account: &str, block: u64) -> Result<SavedAbi, SchemaError> {
        let history = match self.store.changed_at(account).await {
            Ok(history) => history.unwrap_or_default(),
            Err(e) => {
                warn!("Schema history lookup failed for {}: {}", account, e);
                Vec::new()
            }
        };

        if let Some((from, until)) = validity_window(&history, block) {
            match self.store.abi_at(account, from).await {
                Ok(Some(json)) => {
                    let abi: Abi = serde_json::from_str(&json).map_err(|e| SchemaError::Malformed {
                        account: account.to_string(),
                        reason: format!("stored schema at {} is not valid JSON: {}", from, e),
                    })?;
                    debug!("Loaded schema for {} valid from {} ({:?})", account, from, until);
                    return Ok(SavedAbi {
                        abi,
                        valid_from: Some(from),
                        valid_until: until,
                    });
                }
                Ok(None) => debug!("No stored schema for {} at {}", account, from),
                Err(e) => warn!("Stored schema lookup failed for {} at {}: {}", account, from, e),
            }
        }

        self.fetch_head_abi(account).await
    }

    async fn fetch_head_abi(&self, account: &str) -> Result<SavedAbi, SchemaError> {
        let start = Instant::now();
        let fetched = self.chain_api.get_abi(account).await;
        let elapsed = start.elapsed();
        if elapsed > Duration::from_millis(self.config.slow_fetch_ms) {
            warn!("Head schema fetch for {} took {:?}", account, elapsed);
        }

        let abi = match fetched {
            Ok(abi) => abi,
            Err(e) if account == self.config.fallback_account => {
                warn!("Using built-in fallback schema for {}: {}", account, e);
                abi::rex_fallback()
            }
            Err(e) => {
                return Err(match e {
                    SchemaError::Unavailable { .. } => e,
                    other => SchemaError::Unavailable {
                        account: account.to_string(),
                        reason: other.to_string(),
                    },
                })
            }
        };

        Ok(SavedAbi {
            abi,
            valid_from: None,
            valid_until: ValidUntil::Unknown,
        })
    }

    /// Snapshot of the entry for `account`
    pub fn get(&self, account: &str) -> Option<CachedSchemaEntry> {
        self.entries.get(account).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry whose cumulative hit count is below the threshold.
    /// Decodes already holding a schema keep their `Arc` until they finish.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let min_hits = self.config.min_hits;
        self.entries.retain(|account, entry| {
            debug!("{} -> {} hits", account, entry.hit_count);
            entry.hit_count >= min_hits
        });
        before - self.entries.len()
    }

    /// Runs [`TypeCache::sweep`] on a fixed period until the handle is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    info!("Type cache sweep removed {} entries, {} remain", removed, cache.len());
                } else {
                    debug!("Type cache sweep: {} entries", cache.len());
                }
            }
        })
    }
}
