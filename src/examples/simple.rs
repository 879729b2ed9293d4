//! Simple example: wire the pool, validator and executor end to end.

use async_trait::async_trait;
use proxy_rotator::{
    default_sources, gather_candidates, Provider, ProviderRegistry, ProviderType, ProxyPool,
    ProxyStore, ProxyValidator, RequestExecutor, RequestOptions, RotatorConfig,
};
use std::sync::Arc;
use std::time::Duration;

/// A stand-in manga provider: a proxy is good enough if an ip-echo endpoint
/// answers through it. Real adapters probe their own origin instead.
struct DemoManga;

#[async_trait]
impl Provider for DemoManga {
    fn id(&self) -> &str {
        "demo"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Manga
    }

    fn needs_proxy(&self) -> bool {
        true
    }

    async fn proxy_check(&self, proxy_url: &str) -> anyhow::Result<bool> {
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(proxy_url)?)
            .timeout(Duration::from_secs(5))
            .build()?;
        let response = client.get("https://httpbin.org/ip").send().await?;
        Ok(response.status().is_success())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = RotatorConfig::builder()
        .data_dir("data/proxies")
        .validation_concurrency(50)
        .request_timeout(Duration::from_secs(5))
        .max_retries(3)
        .build();
    let pool = Arc::new(ProxyPool::new(ProxyStore::new(&config.data_dir), config));
    pool.load();

    println!("Gathering proxy candidates...");
    let candidates = gather_candidates(&default_sources()).await;
    let added = pool.merge_candidates(candidates);
    let (total, validated) = pool.stats();
    println!("{added} new candidates ({total} total, {validated} validated)");

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(DemoManga));

    println!("Validating candidates (this probes the whole slice)...");
    let validator = ProxyValidator::new(Arc::clone(&pool));
    validator.run(registry.providers(), true).await;

    println!("Fetching through the pool...");
    let executor = RequestExecutor::with_default_transport(Arc::clone(&pool));
    let options = RequestOptions::for_provider(ProviderType::Manga, "demo");
    let response = executor.request("https://httpbin.org/ip", options).await?;

    println!("Status: {}", response.status);
    println!("Response: {}", response.text());

    Ok(())
}
