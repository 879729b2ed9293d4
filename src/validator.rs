//! Scheduled proxy validation.
//!
//! For every provider that needs proxies, the validator decides whether a
//! pass is due (cooldown), probes a slice of the candidate pool against the
//! provider's own `proxy_check`, and commits the surviving proxies plus a
//! resumable checkpoint. Each pass scans from the checkpoint cursor to the
//! end of the pool, so a large pool is covered incrementally across runs.

use crate::pool::ProxyPool;
use crate::provider::{Provider, ProviderType};
use crate::store::CheckpointRecord;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Batch validator over a shared pool.
///
/// The cooldown check is advisory, not a lock: run one validator instance at
/// a time per data directory.
pub struct ProxyValidator {
    pool: Arc<ProxyPool>,
    checking: Mutex<HashSet<(ProviderType, String)>>,
}

impl ProxyValidator {
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        Self {
            pool,
            checking: Mutex::new(HashSet::new()),
        }
    }

    /// Whether a validation pass for this provider is currently in flight.
    /// Observability only; not a mutual-exclusion guarantee.
    pub fn is_checking(&self, provider_type: ProviderType, id: &str) -> bool {
        self.checking
            .lock()
            .contains(&(provider_type, id.to_string()))
    }

    /// Run one validation pass over every provider that needs proxies.
    /// One provider failing (or having zero usable candidates) never stops
    /// the others.
    pub async fn run(&self, providers: &[Arc<dyn Provider>], verbose: bool) {
        self.pool.load();

        for provider in providers {
            if !provider.needs_proxy() {
                continue;
            }
            let provider_type = provider.provider_type();
            let id = provider.id().to_string();

            if !self.due(provider_type, &id) {
                debug!("skipping {}/{}: cooldown not elapsed", provider_type, id);
                continue;
            }

            let key = (provider_type, id.clone());
            self.checking.lock().insert(key.clone());
            self.validate_provider(provider.as_ref(), verbose).await;
            self.checking.lock().remove(&key);
        }
    }

    fn due(&self, provider_type: ProviderType, id: &str) -> bool {
        let Some(record) = self.pool.checkpoint(provider_type, id) else {
            return true;
        };
        // an out-of-range cooldown can never elapse
        let Ok(cooldown) = chrono::Duration::from_std(self.pool.config.validation_cooldown) else {
            return false;
        };
        Utc::now().signed_duration_since(record.last_checked) >= cooldown
    }

    async fn validate_provider(&self, provider: &dyn Provider, verbose: bool) {
        let provider_type = provider.provider_type();
        let id = provider.id().to_string();

        let start = self
            .pool
            .checkpoint(provider_type, &id)
            .map(|record| record.last_checked_index)
            .unwrap_or(0);
        let (slice, total) = self.pool.candidates_from(start);

        if slice.is_empty() {
            info!(
                "no candidates to validate for {}/{} (cursor {} of {})",
                provider_type, id, start, total
            );
            // rewind so the next pass rescans from the front
            self.pool.touch_checkpoint(provider_type, &id, Utc::now(), true);
            return;
        }

        info!(
            "validating {}/{}: {} candidates from index {}",
            provider_type,
            id,
            slice.len(),
            start
        );

        let checked = slice.len();
        let semaphore = Arc::new(Semaphore::new(self.pool.config.validation_concurrency));
        let valid: Vec<_> = stream::iter(slice)
            .map(|proxy| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("validation semaphore closed");
                    let proxy_url = proxy.url();
                    // an erroring check is just an invalid candidate
                    match provider.proxy_check(&proxy_url).await {
                        Ok(true) => {
                            if verbose {
                                info!("{} works for {}/{}", proxy_url, provider.provider_type(), provider.id());
                            }
                            Some(proxy)
                        }
                        Ok(false) => {
                            debug!("{} rejected by {}", proxy_url, provider.id());
                            None
                        }
                        Err(e) => {
                            debug!("{} check errored for {}: {:#}", proxy_url, provider.id(), e);
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.pool.config.validation_concurrency)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        let now = Utc::now();
        if valid.is_empty() {
            // never wipe a working set on an empty pass; back off one cooldown
            warn!(
                "validation pass for {}/{} found 0 working proxies out of {}; keeping previous set",
                provider_type, id, checked
            );
            self.pool.touch_checkpoint(provider_type, &id, now, false);
            return;
        }

        // a scan to the end of the pool always wraps the cursor
        let next_index = if start + checked >= total {
            0
        } else {
            start + checked
        };
        info!(
            "validated {}/{}: {} of {} candidates work",
            provider_type,
            id,
            valid.len(),
            checked
        );
        let record = CheckpointRecord {
            last_checked: now,
            valid_proxies_found: valid.len(),
            last_checked_index: next_index,
        };
        self.pool.commit_validation(provider_type, &id, valid, record);
    }
}
