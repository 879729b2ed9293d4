//! End-to-end rotation behavior of the request executor, driven through a
//! scripted transport.

use async_trait::async_trait;
use http::header::{COOKIE, LOCATION, SET_COOKIE};
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use proxy_rotator::{
    AttemptRequest, ProviderType, Proxy, ProxyPool, ProxyScheme, ProxyStore, RequestError,
    RequestExecutor, RequestOptions, RotatorConfig, Transport, TransportError,
    TransportErrorKind, TransportResponse,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One recorded attempt: (url, proxy url if any, cookie header if any).
type AttemptLog = Vec<(String, Option<String>, Option<String>)>;

/// Scripted transport: fails for configured proxy endpoints, serves
/// configured redirects, records every attempt.
#[derive(Default)]
struct ScriptedTransport {
    failing_proxies: HashSet<String>,
    fail_direct: bool,
    failure_kind: Option<TransportErrorKind>,
    /// url -> (status, location, set-cookie)
    redirects: HashMap<String, (StatusCode, String, Option<String>)>,
    fixed_status: Option<StatusCode>,
    log: Mutex<AttemptLog>,
}

impl ScriptedTransport {
    fn failing(proxies: &[&Proxy], kind: TransportErrorKind) -> Self {
        Self {
            failing_proxies: proxies.iter().map(|p| p.url()).collect(),
            failure_kind: Some(kind),
            ..Self::default()
        }
    }

    fn attempts(&self) -> usize {
        self.log.lock().len()
    }

    fn proxies_used(&self) -> Vec<Option<String>> {
        self.log.lock().iter().map(|(_, p, _)| p.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, attempt: &AttemptRequest) -> Result<TransportResponse, TransportError> {
        let proxy_url = attempt.proxy.as_ref().map(|p| p.url());
        let cookie = attempt
            .headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.log
            .lock()
            .push((attempt.url.clone(), proxy_url.clone(), cookie));

        let kind = self.failure_kind.unwrap_or(TransportErrorKind::ConnectionRefused);
        match proxy_url {
            Some(url) if self.failing_proxies.contains(&url) => {
                return Err(TransportError::new(kind, &attempt.url));
            }
            None if self.fail_direct => {
                return Err(TransportError::new(kind, &attempt.url));
            }
            _ => {}
        }

        if let Some((status, location, set_cookie)) = self.redirects.get(&attempt.url) {
            let mut headers = HeaderMap::new();
            headers.insert(LOCATION, location.parse().unwrap());
            if let Some(cookie) = set_cookie {
                headers.insert(SET_COOKIE, cookie.parse().unwrap());
            }
            return Ok(TransportResponse {
                status: *status,
                headers,
                body: Vec::new(),
                url: attempt.url.clone(),
            });
        }

        Ok(TransportResponse {
            status: self.fixed_status.unwrap_or(StatusCode::OK),
            headers: HeaderMap::new(),
            body: b"ok".to_vec(),
            url: attempt.url.clone(),
        })
    }
}

fn proxy(ip: &str) -> Proxy {
    Proxy::new(ip, 8080, ProxyScheme::Http)
}

fn pool_with_validated(dir: &tempfile::TempDir, proxies: Vec<Proxy>) -> Arc<ProxyPool> {
    let pool = Arc::new(ProxyPool::new(
        ProxyStore::new(dir.path()),
        RotatorConfig::builder()
            .data_dir(dir.path())
            .max_proxy_draws(64)
            .build(),
    ));
    pool.load();
    pool.replace_validated_set(ProviderType::Manga, "x", proxies);
    pool
}

fn options() -> RequestOptions {
    RequestOptions::for_provider(ProviderType::Manga, "x")
}

#[tokio::test]
async fn rotates_to_a_working_proxy_and_evicts_the_failed_ones() {
    let a = proxy("10.0.0.1");
    let b = proxy("10.0.0.2");
    let c = proxy("10.0.0.3");

    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![a.clone(), b.clone(), c.clone()]);
    let transport = Arc::new(ScriptedTransport::failing(
        &[&a, &b],
        TransportErrorKind::ConnectionRefused,
    ));
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let response = executor
        .request("http://site.example/title/1", options().with_max_retries(3))
        .await
        .unwrap();

    // C is the only working proxy, so the call can only succeed through it
    assert_eq!(response.status, StatusCode::OK);
    let used = transport.proxies_used();
    assert_eq!(used.last().unwrap().as_deref(), Some(c.url().as_str()));

    // every proxy that failed in production use was evicted; C survived
    let set = pool.validated_set(ProviderType::Manga, "x");
    assert!(set.contains(&c));
    for failed in &used[..used.len() - 1] {
        let failed = failed.as_deref().unwrap();
        assert!(
            !set.iter().any(|p| p.url() == failed),
            "{failed} failed but was not evicted"
        );
    }
}

#[tokio::test]
async fn evicts_exactly_the_failed_proxies() {
    // deterministic variant: start on A explicitly, A fails, C succeeds
    let a = proxy("10.0.0.1");
    let c = proxy("10.0.0.3");
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![a.clone(), c.clone()]);
    let transport = Arc::new(ScriptedTransport::failing(
        &[&a],
        TransportErrorKind::ConnectionRefused,
    ));
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let response = executor
        .request(
            "http://site.example/title/1",
            options().with_proxy(a.clone()).with_max_retries(3),
        )
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        transport.proxies_used(),
        vec![Some(a.url()), Some(c.url())]
    );
    assert_eq!(pool.validated_set(ProviderType::Manga, "x"), vec![c]);
}

#[tokio::test]
async fn retry_budget_terminates_with_max_retries_reached() {
    let proxies: Vec<Proxy> = (1..=10).map(|i| proxy(&format!("10.0.0.{i}"))).collect();
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, proxies.clone());
    let refs: Vec<&Proxy> = proxies.iter().collect();
    let transport = Arc::new(ScriptedTransport::failing(&refs, TransportErrorKind::Timeout));
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let err = executor
        .request("http://site.example/", options().with_max_retries(3))
        .await
        .unwrap_err();

    match err {
        RequestError::MaxRetriesReached { url, .. } => assert_eq!(url, "http://site.example/"),
        other => panic!("expected MaxRetriesReached, got {other:?}"),
    }
    // exactly max_retries rotations; never loops past the budget
    assert_eq!(transport.attempts(), 3);
}

#[tokio::test]
async fn never_reuses_a_proxy_within_one_call() {
    let proxies: Vec<Proxy> = (1..=6).map(|i| proxy(&format!("10.0.0.{i}"))).collect();
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, proxies.clone());
    let refs: Vec<&Proxy> = proxies.iter().collect();
    let transport = Arc::new(ScriptedTransport::failing(
        &refs,
        TransportErrorKind::ConnectionClosed,
    ));
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let _ = executor
        .request("http://site.example/", options().with_max_retries(5))
        .await;

    let used: Vec<String> = transport.proxies_used().into_iter().flatten().collect();
    let mut unique = used.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(used.len(), unique.len(), "proxy reused within one call: {used:?}");
}

#[tokio::test]
async fn exhausting_the_pool_reports_no_unused_proxies() {
    let a = proxy("10.0.0.1");
    let b = proxy("10.0.0.2");
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![a.clone(), b.clone()]);
    let transport = Arc::new(ScriptedTransport::failing(
        &[&a, &b],
        TransportErrorKind::ConnectionRefused,
    ));
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let err = executor
        .request("http://site.example/", options().with_max_retries(5))
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::NoUnusedProxies { .. }), "got {err:?}");
    assert!(pool.validated_set(ProviderType::Manga, "x").is_empty());
}

#[tokio::test]
async fn failure_without_proxy_is_raised_unrotated() {
    // provider identity present, but the validated set is empty: the attempt
    // goes direct and its failure is not eligible for rotation
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![]);
    let transport = Arc::new(ScriptedTransport {
        fail_direct: true,
        ..ScriptedTransport::default()
    });
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let err = executor.request("http://site.example/", options()).await.unwrap_err();
    assert!(matches!(err, RequestError::Transport(_)), "got {err:?}");
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn failure_without_provider_identity_is_raised_unrotated() {
    let a = proxy("10.0.0.1");
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![a.clone()]);
    let transport = Arc::new(ScriptedTransport::failing(&[&a], TransportErrorKind::Timeout));
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let options = RequestOptions::default().with_proxy(a.clone());
    let err = executor.request("http://site.example/", options).await.unwrap_err();

    assert!(matches!(err, RequestError::Transport(_)), "got {err:?}");
    assert_eq!(transport.attempts(), 1);
    // without a provider identity there is nothing to evict from
    assert_eq!(pool.validated_set(ProviderType::Manga, "x"), vec![a]);
}

#[tokio::test]
async fn probe_mode_never_rotates() {
    let a = proxy("10.0.0.1");
    let b = proxy("10.0.0.2");
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![a.clone(), b.clone()]);
    let transport = Arc::new(ScriptedTransport::failing(&[&a], TransportErrorKind::Timeout));
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let options = options().with_proxy(a.clone()).as_probe();
    let err = executor.request("http://site.example/", options).await.unwrap_err();

    assert!(matches!(err, RequestError::Transport(_)), "got {err:?}");
    assert_eq!(transport.attempts(), 1);
    // a probe failure must not evict anything
    assert_eq!(pool.validated_set(ProviderType::Manga, "x").len(), 2);
}

#[tokio::test]
async fn non_retriable_failures_do_not_rotate() {
    let a = proxy("10.0.0.1");
    let b = proxy("10.0.0.2");
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![a.clone(), b.clone()]);
    let transport = Arc::new(ScriptedTransport::failing(&[&a, &b], TransportErrorKind::Other));
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let err = executor
        .request("http://site.example/", options().with_max_retries(5))
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::Transport(_)), "got {err:?}");
    assert_eq!(transport.attempts(), 1);
    assert_eq!(pool.validated_set(ProviderType::Manga, "x").len(), 2);
}

#[tokio::test]
async fn http_error_statuses_are_returned_not_retried() {
    let a = proxy("10.0.0.1");
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![a.clone()]);
    let transport = Arc::new(ScriptedTransport {
        fixed_status: Some(StatusCode::SERVICE_UNAVAILABLE),
        ..ScriptedTransport::default()
    });
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let response = executor.request("http://site.example/", options()).await.unwrap();

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(transport.attempts(), 1);
    assert_eq!(pool.validated_set(ProviderType::Manga, "x"), vec![a]);
}

#[tokio::test]
async fn redirects_are_followed_with_cookie_continuity() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![proxy("10.0.0.1")]);

    let mut redirects = HashMap::new();
    redirects.insert(
        "http://site.example/login".to_string(),
        (
            StatusCode::FOUND,
            "/reader".to_string(),
            Some("session=abc123; Path=/; HttpOnly".to_string()),
        ),
    );
    let transport = Arc::new(ScriptedTransport {
        redirects,
        ..ScriptedTransport::default()
    });
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let mut options = options();
    options.method = Method::POST;
    options.body = Some(b"user=u&pass=p".to_vec());
    let response = executor.request("http://site.example/login", options).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    let log = transport.log.lock().clone();
    assert_eq!(log.len(), 2);
    // second hop hits the resolved location carrying the session cookie
    assert_eq!(log[1].0, "http://site.example/reader");
    assert_eq!(log[1].2.as_deref(), Some("session=abc123"));
}

#[tokio::test]
async fn redirect_loops_are_cut_off() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_with_validated(&dir, vec![proxy("10.0.0.1")]);

    let mut redirects = HashMap::new();
    redirects.insert(
        "http://site.example/a".to_string(),
        (StatusCode::MOVED_PERMANENTLY, "/b".to_string(), None),
    );
    redirects.insert(
        "http://site.example/b".to_string(),
        (StatusCode::MOVED_PERMANENTLY, "/a".to_string(), None),
    );
    let transport = Arc::new(ScriptedTransport {
        redirects,
        ..ScriptedTransport::default()
    });
    let executor = RequestExecutor::new(Arc::clone(&pool), Arc::clone(&transport) as Arc<dyn Transport>);

    let err = executor.request("http://site.example/a", options()).await.unwrap_err();
    assert!(matches!(err, RequestError::TooManyRedirects { .. }), "got {err:?}");
}
