//! Candidate supply: fetching and parsing public proxy lists.
//!
//! Sources are deliberately thin and swappable. The core only needs
//! something that yields `Vec<Proxy>`; everything here can be replaced by a
//! caller-supplied list.

use crate::proxy::{Proxy, ProxyScheme};

use anyhow::Context;
use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;

/// How a source's payload is parsed.
#[derive(Debug, Clone)]
pub enum SourceFormat {
    /// One `ip:port` (optionally `scheme://ip:port`) per line.
    PlainList(ProxyScheme),
    /// The geonode-style JSON API (`{"data": [{ip, port, ...}]}`).
    GeonodeJson,
}

/// A public proxy list endpoint.
#[derive(Debug, Clone)]
pub struct ProxySource {
    pub name: &'static str,
    pub url: String,
    pub format: SourceFormat,
}

/// The endpoints scraped by default. All free, all noisy; the validator is
/// what separates the working entries from the rest.
pub fn default_sources() -> Vec<ProxySource> {
    vec![
        ProxySource {
            name: "proxyscrape-http",
            url: "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&timeout=10000&country=all".to_string(),
            format: SourceFormat::PlainList(ProxyScheme::Http),
        },
        ProxySource {
            name: "proxifly-socks5",
            url: "https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/socks5/data.txt".to_string(),
            format: SourceFormat::PlainList(ProxyScheme::Socks5),
        },
        ProxySource {
            name: "geonode",
            url: "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc".to_string(),
            format: SourceFormat::GeonodeJson,
        },
    ]
}

/// Fetch and parse one source.
pub async fn fetch_source(source: &ProxySource) -> anyhow::Result<Vec<Proxy>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;
    let body = client
        .get(&source.url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    match &source.format {
        SourceFormat::PlainList(scheme) => Ok(parse_plain_list(&body, *scheme)),
        SourceFormat::GeonodeJson => {
            parse_geonode(&body).with_context(|| format!("parsing {} payload", source.name))
        }
    }
}

/// Fetch every source, skipping (and logging) the ones that fail. The result
/// may contain duplicate endpoints; `ProxyPool::merge_candidates` dedups.
pub async fn gather_candidates(sources: &[ProxySource]) -> Vec<Proxy> {
    let mut all = Vec::new();
    for source in sources {
        match fetch_source(source).await {
            Ok(proxies) => {
                info!("fetched {} proxies from {}", proxies.len(), source.name);
                all.extend(proxies);
            }
            Err(e) => warn!("failed to fetch {}: {:#}", source.name, e),
        }
    }
    all
}

fn scheme_from_str(s: &str) -> Option<ProxyScheme> {
    match s {
        "http" => Some(ProxyScheme::Http),
        "https" => Some(ProxyScheme::Https),
        "socks4" => Some(ProxyScheme::Socks4),
        "socks5" => Some(ProxyScheme::Socks5),
        _ => None,
    }
}

/// Parse `ip:port` lines, tolerating comments, blanks, and an optional
/// scheme prefix (which overrides `default_scheme`).
pub fn parse_plain_list(content: &str, default_scheme: ProxyScheme) -> Vec<Proxy> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }

            let (scheme, rest) = match line.split_once("://") {
                Some((prefix, rest)) => (scheme_from_str(prefix)?, rest),
                None => (default_scheme, line),
            };

            let (ip, port) = rest.split_once(':')?;
            let port: u16 = port.parse().ok()?;
            if ip.is_empty() {
                return None;
            }
            Some(Proxy::new(ip, port, scheme))
        })
        .collect()
}

#[derive(Deserialize)]
struct GeonodePage {
    data: Vec<GeonodeEntry>,
}

#[derive(Deserialize)]
struct GeonodeEntry {
    ip: String,
    port: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, rename = "anonymityLevel")]
    anonymity_level: Option<String>,
    #[serde(default)]
    protocols: Vec<String>,
}

fn parse_geonode(content: &str) -> anyhow::Result<Vec<Proxy>> {
    let page: GeonodePage = serde_json::from_str(content)?;
    Ok(page
        .data
        .into_iter()
        .filter_map(|entry| {
            let port: u16 = entry.port.parse().ok()?;
            let scheme = entry
                .protocols
                .first()
                .and_then(|p| scheme_from_str(p))
                .unwrap_or(ProxyScheme::Http);
            let mut proxy = Proxy::new(entry.ip, port, scheme);
            proxy.country = entry.country.unwrap_or_default();
            proxy.anonymity = entry.anonymity_level.unwrap_or_default();
            Some(proxy)
        })
        .collect())
}
