// src/service/result_cache.rs
//! TTL cache for computed aggregates.
//!
//! Key features:
//! - Deterministic SHA-256 key over (metric, filter, scope), so two principals
//!   with different scopes never share an entry.
//! - Per-entry expiry measured against the injected [`Clock`].
//! - Soft capacity: expired entries are purged first, then the oldest ones.
//! - A TTL of zero disables the cache entirely.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use crate::domain::model::filter::FilterSpec;
use crate::domain::model::principal::PrincipalScope;
use crate::service::clock::Clock;
use crate::telemetry::metrics;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_seconds: i64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 60, max_entries: 10_000 }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct ResultCache<T: Clone + Send + Sync + 'static> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    metric: &'a str,
    filter: &'a FilterSpec,
    scope: &'a PrincipalScope,
}

/// Hex SHA-256 of the canonical JSON of (metric, filter, scope).
pub fn cache_key(metric: &str, filter: &FilterSpec, scope: &PrincipalScope) -> String {
    let material = serde_json::to_vec(&KeyMaterial { metric, filter, scope }).unwrap_or_else(|_| metric.as_bytes().to_vec());
    let digest = Sha256::digest(&material);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl<T: Clone + Send + Sync + 'static> ResultCache<T> {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.ttl_seconds > 0 && self.config.max_entries > 0
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        if !self.enabled() {
            return None;
        }
        let now = self.clock.now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                metrics::incr("kpi_cache_hits", &[]);
                Some(entry.value.clone())
            }
            _ => {
                metrics::incr("kpi_cache_misses", &[]);
                None
            }
        }
    }

    pub async fn insert(&self, key: String, value: T) {
        if !self.enabled() {
            return;
        }
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            entries.retain(|_, e| e.expires_at > now);
            while entries.len() >= self.config.max_entries {
                let oldest = entries.iter().min_by_key(|(_, e)| e.stored_at).map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        entries.remove(&k);
                    }
                    None => break,
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
                expires_at: now + Duration::seconds(self.config.ttl_seconds),
            },
        );
    }

    /// Drops expired entries; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
