//! Resilient request executor.
//!
//! Performs one logical outbound request, transparently rotating through the
//! provider's validated proxies on transient transport failure. Rotation is
//! bounded: a proxy is never reused within one logical call, draws and
//! retries are capped, and application-level HTTP errors are returned to the
//! caller untouched.

use crate::error::RequestError;
use crate::pool::ProxyPool;
use crate::provider::ProviderType;
use crate::proxy::Proxy;
use crate::transport::{
    AttemptRequest, ReqwestTransport, Transport, TransportResponse,
};

use futures::future::BoxFuture;
use futures::FutureExt;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Method};
use log::{debug, warn};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Per-call options. Everything defaults from the pool's config.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Explicit proxy for the first attempt instead of a pool draw.
    pub proxy: Option<Proxy>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<usize>,
    /// Identity used to source replacement proxies from the pool. Without
    /// it, transport failures are not eligible for rotation.
    pub provider: Option<(ProviderType, String)>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Validation probes re-raise every failure unrotated: the validator
    /// reads any throw as "candidate invalid".
    pub probe: bool,
}

impl RequestOptions {
    pub fn for_provider(provider_type: ProviderType, id: impl Into<String>) -> Self {
        Self {
            provider: Some((provider_type, id.into())),
            ..Self::default()
        }
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn as_probe(mut self) -> Self {
        self.probe = true;
        self
    }
}

/// Rotation state for one logical request. Rebuilt on every rotation so the
/// retry contract stays auditable; never shared across calls.
struct Attempt {
    proxy: Option<Proxy>,
    used: HashSet<String>,
    retries: usize,
}

impl Attempt {
    fn first(proxy: Option<Proxy>) -> Self {
        let mut used = HashSet::new();
        if let Some(p) = &proxy {
            used.insert(p.url());
        }
        Self {
            proxy,
            used,
            retries: 0,
        }
    }

    fn rotate(self, next: Proxy) -> Self {
        let mut used = self.used;
        used.insert(next.url());
        Self {
            proxy: Some(next),
            used,
            retries: self.retries + 1,
        }
    }
}

/// Pool-backed executor for outbound requests.
pub struct RequestExecutor {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn Transport>,
    limiter: DirectLimiter,
}

impl RequestExecutor {
    pub fn new(pool: Arc<ProxyPool>, transport: Arc<dyn Transport>) -> Self {
        let rps = pool.config.max_requests_per_second;
        let quota = Quota::per_second(
            NonZeroU32::new(rps.ceil() as u32).unwrap_or_else(|| NonZeroU32::new(1).unwrap()),
        );
        Self {
            pool,
            transport,
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Executor over the production reqwest transport.
    pub fn with_default_transport(pool: Arc<ProxyPool>) -> Self {
        Self::new(pool, Arc::new(ReqwestTransport::new()))
    }

    /// Perform one logical request. Redirects are followed manually (cookies
    /// carried hop to hop) and transient failures rotate proxies, bounded by
    /// `max_retries`.
    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<TransportResponse, RequestError> {
        self.request_hop(url.to_string(), options, 0).await
    }

    fn request_hop(
        &self,
        url: String,
        options: RequestOptions,
        depth: usize,
    ) -> BoxFuture<'_, Result<TransportResponse, RequestError>> {
        async move {
            let timeout = options.timeout.unwrap_or(self.pool.config.request_timeout);
            let max_retries = options.max_retries.unwrap_or(self.pool.config.max_retries);

            let initial = match &options.proxy {
                Some(explicit) => Some(explicit.clone()),
                None => options
                    .provider
                    .as_ref()
                    .and_then(|(t, id)| self.pool.get_random_proxy(*t, id)),
            };
            let mut attempt = Attempt::first(initial);

            loop {
                self.limiter.until_ready().await;

                let request = AttemptRequest {
                    url: url.clone(),
                    method: options.method.clone(),
                    headers: options.headers.clone(),
                    body: options.body.clone(),
                    proxy: attempt.proxy.clone(),
                    timeout,
                };

                let error = match self.transport.execute(&request).await {
                    Ok(response) => match response.location().map(str::to_string) {
                        Some(location) if response.is_redirect() => {
                            return self
                                .follow_redirect(&url, response, location, &options, depth)
                                .await;
                        }
                        _ => return Ok(response),
                    },
                    Err(error) => error,
                };

                // Only proxy-backed requests with a provider identity are
                // eligible for rotation; probes never rotate.
                if options.probe || !error.is_retriable() {
                    return Err(error.into());
                }
                let Some((provider_type, provider_id)) = options.provider.as_ref() else {
                    return Err(error.into());
                };
                let Some(failed) = attempt.proxy.clone() else {
                    return Err(error.into());
                };

                warn!(
                    "attempt {} for {} failed via {}: {}",
                    attempt.retries + 1,
                    url,
                    failed,
                    error
                );
                self.pool.remove_proxy(*provider_type, provider_id, &failed);

                let Some(next) =
                    self.draw_unused(*provider_type, provider_id, &attempt.used)
                else {
                    return Err(RequestError::NoUnusedProxies { url });
                };

                attempt = attempt.rotate(next);
                if attempt.retries >= max_retries {
                    return Err(RequestError::MaxRetriesReached { url, source: error });
                }
            }
        }
        .boxed()
    }

    /// Draw a proxy not yet used by this call, giving up after a bounded
    /// number of draws (or immediately once the validated set is empty).
    fn draw_unused(
        &self,
        provider_type: ProviderType,
        provider_id: &str,
        used: &HashSet<String>,
    ) -> Option<Proxy> {
        for _ in 0..self.pool.config.max_proxy_draws {
            let candidate = self.pool.get_random_proxy(provider_type, provider_id)?;
            if !used.contains(&candidate.url()) {
                return Some(candidate);
            }
        }
        None
    }

    async fn follow_redirect(
        &self,
        url: &str,
        response: TransportResponse,
        location: String,
        options: &RequestOptions,
        depth: usize,
    ) -> Result<TransportResponse, RequestError> {
        if depth >= self.pool.config.max_redirects {
            return Err(RequestError::TooManyRedirects {
                url: url.to_string(),
                limit: self.pool.config.max_redirects,
            });
        }

        let next_url = Url::parse(url)
            .and_then(|base| base.join(&location))
            .map_err(|e| RequestError::InvalidRedirect {
                url: url.to_string(),
                location: location.clone(),
                source: e,
            })?;

        let mut next_options = options.clone();
        // 307/308 preserve the method and body; the rest demote to GET.
        if !matches!(response.status.as_u16(), 307 | 308) {
            next_options.method = Method::GET;
            next_options.body = None;
        }
        propagate_cookies(&response.headers, &mut next_options.headers);

        debug!("following {} redirect {} -> {}", response.status, url, next_url);
        self.request_hop(next_url.into(), next_options, depth + 1).await
    }
}

/// Carry `Set-Cookie` values from one hop into the next hop's `Cookie`
/// header, merging with whatever cookies the caller already set.
fn propagate_cookies(from: &HeaderMap, into: &mut HeaderMap) {
    let pairs: Vec<&str> = from
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .collect();
    if pairs.is_empty() {
        return;
    }

    let mut cookie = into
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    for pair in pairs {
        if !cookie.is_empty() {
            cookie.push_str("; ");
        }
        cookie.push_str(pair);
    }

    if let Ok(value) = HeaderValue::from_str(&cookie) {
        into.insert(COOKIE, value);
    }
}
