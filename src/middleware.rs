//! Middleware adapter for reqwest-middleware stacks.
//!
//! Scraping code that manages its own request lifecycle through a
//! `reqwest_middleware::ClientWithMiddleware` can mount this instead of
//! calling the executor: every request is routed through the provider's
//! validated proxies, with the same eviction-and-rotate behavior on
//! transient failure. Redirect handling stays with the underlying client
//! here; callers that need cookie continuity across hops should use
//! `RequestExecutor` directly.

use crate::pool::ProxyPool;
use crate::provider::ProviderType;
use crate::transport::classify_reqwest;

use anyhow::anyhow;
use async_trait::async_trait;
use log::warn;
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Middleware that rotates a provider's validated proxies.
#[derive(Clone)]
pub struct RotatingProxyMiddleware {
    pool: Arc<ProxyPool>,
    provider_type: ProviderType,
    provider_id: String,
}

impl RotatingProxyMiddleware {
    pub fn new(pool: Arc<ProxyPool>, provider_type: ProviderType, provider_id: impl Into<String>) -> Self {
        pool.load();
        Self {
            pool,
            provider_type,
            provider_id: provider_id.into(),
        }
    }

    fn draw_unused(&self, used: &HashSet<String>) -> Option<crate::proxy::Proxy> {
        for _ in 0..self.pool.config.max_proxy_draws {
            let candidate = self
                .pool
                .get_random_proxy(self.provider_type, &self.provider_id)?;
            if !used.contains(&candidate.url()) {
                return Some(candidate);
            }
        }
        None
    }
}

#[async_trait]
impl Middleware for RotatingProxyMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let max_retries = self.pool.config.max_retries;
        let mut used: HashSet<String> = HashSet::new();
        let mut retries = 0;

        loop {
            let Some(proxy) = self.draw_unused(&used) else {
                return Err(Error::Middleware(anyhow!(
                    "no more unused proxies for {}/{}",
                    self.provider_type,
                    self.provider_id
                )));
            };
            used.insert(proxy.url());

            let cloned = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "request object is not cloneable; streaming bodies cannot be rotated"
                ))
            })?;

            let client = reqwest::Client::builder()
                .proxy(reqwest::Proxy::all(proxy.url()).map_err(Error::Reqwest)?)
                .timeout(self.pool.config.request_timeout)
                .build()
                .map_err(Error::Reqwest)?;

            match client.execute(cloned).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let kind = classify_reqwest(&err);
                    warn!(
                        "request via {} failed ({}, attempt {}): {}",
                        proxy,
                        kind,
                        retries + 1,
                        err
                    );
                    self.pool
                        .remove_proxy(self.provider_type, &self.provider_id, &proxy);

                    if !kind.is_retriable() {
                        return Err(Error::Reqwest(err));
                    }
                    retries += 1;
                    if retries >= max_retries {
                        return Err(Error::Reqwest(err));
                    }
                }
            }
        }
    }
}
