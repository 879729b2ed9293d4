//! # proxy-rotator
//!
//! The resilient outbound-request layer of a media-metadata aggregator.
//!
//! A number of the third-party sites and APIs this system scrapes actively
//! block or rate-limit datacenter traffic, so every outbound call may need to
//! ride a third-party proxy. This crate provides the three pieces that make
//! that workable:
//!
//! - a durable [`ProxyPool`]: raw candidates scraped from public lists plus
//!   per-provider sets of proxies known to currently work;
//! - a checkpointed [`ProxyValidator`] that re-probes candidates against each
//!   provider's own check on a cooldown schedule, with bounded concurrency;
//! - a [`RequestExecutor`] that performs one logical HTTP call, following
//!   redirects manually (to keep cookies and proxies consistent hop to hop)
//!   and rotating to a fresh proxy on transient transport failure, with a
//!   bounded retry budget.
//!
//! Site adapters ("providers") implement [`Provider`] and perform their own
//! fetches through the executor or the [`RotatingProxyMiddleware`] adapter.

pub mod config;
pub mod error;
pub mod executor;
pub mod middleware;
pub mod pool;
pub mod provider;
pub mod proxy;
pub mod sources;
pub mod store;
pub mod transport;
pub mod validator;

pub use config::{RotatorConfig, RotatorConfigBuilder};
pub use error::RequestError;
pub use executor::{RequestExecutor, RequestOptions};
pub use middleware::RotatingProxyMiddleware;
pub use pool::ProxyPool;
pub use provider::{Provider, ProviderRegistry, ProviderType};
pub use proxy::{Proxy, ProxyScheme};
pub use sources::{default_sources, gather_candidates, ProxySource, SourceFormat};
pub use store::{CheckpointRecord, ProxyStore};
pub use transport::{
    AttemptRequest, ReqwestTransport, Transport, TransportError, TransportErrorKind,
    TransportResponse,
};
pub use validator::ProxyValidator;
