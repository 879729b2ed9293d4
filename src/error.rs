//! Typed failures surfaced by the request executor.

use crate::transport::TransportError;

use thiserror::Error;

/// Why a logical request ultimately failed. Transient transport failures are
/// rotated through the pool first; these variants are what remains once
/// rotation is exhausted or impossible.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The retry budget ran out; carries the last transport failure.
    #[error("max retries reached for {url}")]
    MaxRetriesReached {
        url: String,
        #[source]
        source: TransportError,
    },

    /// Every draw from the pool came back empty or already used this call.
    #[error("no more unused proxies for {url}")]
    NoUnusedProxies { url: String },

    /// Redirect chain exceeded the configured hop limit.
    #[error("stopped after {limit} redirects at {url}")]
    TooManyRedirects { url: String, limit: usize },

    /// A `Location` header that cannot be resolved against the current URL.
    #[error("invalid redirect location {location:?} from {url}")]
    InvalidRedirect {
        url: String,
        location: String,
        #[source]
        source: url::ParseError,
    },

    /// A non-retriable failure, or a retriable one on a request that was not
    /// eligible for rotation (no proxy in use, no provider identity, probe).
    #[error(transparent)]
    Transport(#[from] TransportError),
}
