//! Proxy data model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheme a proxy speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyScheme::Http => write!(f, "http"),
            ProxyScheme::Https => write!(f, "https"),
            ProxyScheme::Socks4 => write!(f, "socks4"),
            ProxyScheme::Socks5 => write!(f, "socks5"),
        }
    }
}

/// A single proxy endpoint as discovered from a public list.
///
/// Identity is the `(ip, port)` pair: no list in the pool or store may hold
/// two entries with the same endpoint. `country` and `anonymity` are
/// best-effort metadata from whichever source supplied the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub scheme: ProxyScheme,
    #[serde(default)]
    pub anonymity: String,
}

impl Proxy {
    pub fn new(ip: impl Into<String>, port: u16, scheme: ProxyScheme) -> Self {
        Self {
            ip: ip.into(),
            port,
            country: String::new(),
            scheme,
            anonymity: String::new(),
        }
    }

    /// The identity of this proxy.
    pub fn endpoint(&self) -> (&str, u16) {
        (&self.ip, self.port)
    }

    /// Whether `other` is the same proxy, regardless of metadata.
    pub fn same_endpoint(&self, other: &Proxy) -> bool {
        self.ip == other.ip && self.port == other.port
    }

    /// The URL form used to configure a transport (e.g. `socks5://1.2.3.4:1080`).
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.ip, self.port)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}
