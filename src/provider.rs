//! Provider boundary: the identity and validation predicate each site
//! adapter exposes to the core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Kind of media a provider serves. Used as the outer key for validated
/// proxy sets and checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Manga,
    Anime,
    Novel,
}

impl ProviderType {
    pub const ALL: [ProviderType; 3] =
        [ProviderType::Manga, ProviderType::Anime, ProviderType::Novel];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Manga => "manga",
            ProviderType::Anime => "anime",
            ProviderType::Novel => "novel",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manga" => Ok(ProviderType::Manga),
            "anime" => Ok(ProviderType::Anime),
            "novel" => Ok(ProviderType::Novel),
            other => Err(format!("unknown provider type: {other}")),
        }
    }
}

/// A site/API adapter as seen by this crate.
///
/// Concrete providers live outside the core; here they only contribute an
/// identity, whether they need proxied traffic at all, and a predicate the
/// validator runs against candidate proxies. `proxy_check` should perform a
/// cheap request through the given proxy against the provider's own origin
/// and report whether it came back usable. Any error is treated the same as
/// `Ok(false)` by the validator.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn provider_type(&self) -> ProviderType;

    fn needs_proxy(&self) -> bool {
        false
    }

    async fn proxy_check(&self, proxy_url: &str) -> anyhow::Result<bool>;
}

/// Statically assembled set of providers, built once at startup.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.push(provider);
    }

    pub fn get(&self, provider_type: ProviderType, id: &str) -> Option<&Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.provider_type() == provider_type && p.id() == id)
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Providers that route through the proxy pool, i.e. the validator's
    /// work list.
    pub fn proxy_users(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter().filter(|p| p.needs_proxy())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        id: &'static str,
        needs: bool,
    }

    #[async_trait]
    impl Provider for Fake {
        fn id(&self) -> &str {
            self.id
        }

        fn provider_type(&self) -> ProviderType {
            ProviderType::Manga
        }

        fn needs_proxy(&self) -> bool {
            self.needs
        }

        async fn proxy_check(&self, _proxy_url: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn registry_lookup_and_proxy_users() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Fake { id: "a", needs: true }));
        registry.register(Arc::new(Fake { id: "b", needs: false }));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(ProviderType::Manga, "a").is_some());
        assert!(registry.get(ProviderType::Anime, "a").is_none());
        let users: Vec<_> = registry.proxy_users().map(|p| p.id().to_string()).collect();
        assert_eq!(users, vec!["a"]);
    }

    #[test]
    fn provider_type_string_round_trip() {
        for t in ProviderType::ALL {
            assert_eq!(t.as_str().parse::<ProviderType>().unwrap(), t);
        }
        assert!("comics".parse::<ProviderType>().is_err());
    }
}
