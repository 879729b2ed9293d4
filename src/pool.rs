//! Core proxy pool implementation.
//!
//! The pool is the single in-memory source of truth for which proxies exist
//! (candidates) and which currently work per provider (validated sets). Every
//! mutation is flushed back to the store so memory and disk cannot diverge in
//! ordering; the pool is explicitly constructed and passed by handle, so
//! tests can hold several independent pools.

use crate::config::RotatorConfig;
use crate::provider::ProviderType;
use crate::proxy::Proxy;
use crate::store::{CheckpointMap, CheckpointRecord, ProxyStore};

use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// A pool of proxies keyed by the provider they are known to work for.
pub struct ProxyPool {
    store: ProxyStore,
    /// Configuration shared with the validator and executor.
    pub config: RotatorConfig,
    state: RwLock<PoolState>,
}

#[derive(Default)]
struct PoolState {
    loaded: bool,
    candidates: Vec<Proxy>,
    validated: HashMap<ProviderType, HashMap<String, Vec<Proxy>>>,
    checkpoints: CheckpointMap,
}

impl ProxyPool {
    pub fn new(store: ProxyStore, config: RotatorConfig) -> Self {
        Self {
            store,
            config,
            state: RwLock::new(PoolState::default()),
        }
    }

    /// Populate the pool from the store. Idempotent: once loaded, repeated
    /// calls are no-ops so callers may invoke it defensively.
    pub fn load(&self) {
        let mut state = self.state.write();
        if state.loaded {
            return;
        }

        state.candidates = self.store.load_candidates();
        for provider_type in ProviderType::ALL {
            let sets = self.store.load_validated(provider_type);
            if !sets.is_empty() {
                state.validated.insert(provider_type, sets);
            }
        }
        state.checkpoints = self.store.load_checkpoints();
        state.loaded = true;

        let validated: usize = state
            .validated
            .values()
            .flat_map(|sets| sets.values())
            .map(|set| set.len())
            .sum();
        info!(
            "proxy pool loaded: {} candidates, {} validated entries",
            state.candidates.len(),
            validated
        );
    }

    /// Uniformly pick one proxy from the provider's validated set.
    /// Selection is memoryless: no weighting by recency or past success.
    pub fn get_random_proxy(&self, provider_type: ProviderType, id: &str) -> Option<Proxy> {
        let state = self.state.read();
        let set = state.validated.get(&provider_type)?.get(id)?;
        if set.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..set.len());
        Some(set[idx].clone())
    }

    /// Drop a proxy from the provider's validated set by identity and persist
    /// the shrunken set. This is how the executor reports "this proxy failed
    /// in production use".
    pub fn remove_proxy(&self, provider_type: ProviderType, id: &str, proxy: &Proxy) {
        let mut state = self.state.write();
        let Some(set) = state
            .validated
            .get_mut(&provider_type)
            .and_then(|sets| sets.get_mut(id))
        else {
            return;
        };

        let before = set.len();
        set.retain(|p| !p.same_endpoint(proxy));
        if set.len() == before {
            return;
        }

        debug!("evicted {} from {}/{}", proxy, provider_type, id);
        let sets = state.validated[&provider_type].clone();
        self.store.save_validated(provider_type, &sets);
    }

    /// Replace the provider's validated set wholesale and persist it.
    pub fn replace_validated_set(
        &self,
        provider_type: ProviderType,
        id: &str,
        proxies: Vec<Proxy>,
    ) {
        let mut state = self.state.write();
        state
            .validated
            .entry(provider_type)
            .or_default()
            .insert(id.to_string(), proxies);
        let sets = state.validated[&provider_type].clone();
        self.store.save_validated(provider_type, &sets);
    }

    /// Append candidates whose `(ip, port)` is not already present, persist,
    /// and return how many were added.
    pub fn merge_candidates(&self, proxies: Vec<Proxy>) -> usize {
        let mut state = self.state.write();
        let mut seen: HashSet<(String, u16)> = state
            .candidates
            .iter()
            .map(|p| (p.ip.clone(), p.port))
            .collect();

        let mut added = 0;
        for proxy in proxies {
            if seen.insert((proxy.ip.clone(), proxy.port)) {
                state.candidates.push(proxy);
                added += 1;
            }
        }

        if added > 0 {
            self.store.save_candidates(&state.candidates);
            info!("merged {} new candidates ({} total)", added, state.candidates.len());
        }
        added
    }

    /// The candidate slice from `start` to the end of the pool, plus the
    /// current pool size. `start` past the end yields an empty slice.
    pub fn candidates_from(&self, start: usize) -> (Vec<Proxy>, usize) {
        let state = self.state.read();
        let total = state.candidates.len();
        (state.candidates[start.min(total)..].to_vec(), total)
    }

    pub fn checkpoint(
        &self,
        provider_type: ProviderType,
        id: &str,
    ) -> Option<CheckpointRecord> {
        let state = self.state.read();
        state
            .checkpoints
            .get(&provider_type)
            .and_then(|records| records.get(id))
            .cloned()
    }

    /// Commit a completed validation pass: the validated set and its
    /// checkpoint move forward together under one lock, so the cursor can
    /// never advance past results that were not recorded.
    pub fn commit_validation(
        &self,
        provider_type: ProviderType,
        id: &str,
        proxies: Vec<Proxy>,
        record: CheckpointRecord,
    ) {
        let mut state = self.state.write();
        state
            .validated
            .entry(provider_type)
            .or_default()
            .insert(id.to_string(), proxies);
        state
            .checkpoints
            .entry(provider_type)
            .or_default()
            .insert(id.to_string(), record);

        let sets = state.validated[&provider_type].clone();
        self.store.save_validated(provider_type, &sets);
        self.store.save_checkpoints(&state.checkpoints);
    }

    /// Refresh only `last_checked` after a pass that produced nothing, so the
    /// provider backs off for one cooldown instead of being re-probed every
    /// run. `reset_index` additionally rewinds the cursor to 0 (used when the
    /// cursor sits at or past the end of a shrunken candidate pool).
    pub fn touch_checkpoint(
        &self,
        provider_type: ProviderType,
        id: &str,
        now: DateTime<Utc>,
        reset_index: bool,
    ) {
        let mut state = self.state.write();
        let record = state
            .checkpoints
            .entry(provider_type)
            .or_default()
            .entry(id.to_string())
            .or_insert(CheckpointRecord {
                last_checked: now,
                valid_proxies_found: 0,
                last_checked_index: 0,
            });
        record.last_checked = now;
        if reset_index {
            record.last_checked_index = 0;
        }
        self.store.save_checkpoints(&state.checkpoints);
    }

    /// Current validated set for one provider, mostly for observability.
    pub fn validated_set(&self, provider_type: ProviderType, id: &str) -> Vec<Proxy> {
        let state = self.state.read();
        state
            .validated
            .get(&provider_type)
            .and_then(|sets| sets.get(id))
            .cloned()
            .unwrap_or_default()
    }

    /// (candidate count, validated entries across all providers).
    pub fn stats(&self) -> (usize, usize) {
        let state = self.state.read();
        let validated = state
            .validated
            .values()
            .flat_map(|sets| sets.values())
            .map(|set| set.len())
            .sum();
        (state.candidates.len(), validated)
    }
}
