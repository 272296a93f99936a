use thiserror::Error;
use url::Url;

/// Errors raised while deciding which proxies are trusted
#[derive(Debug, Error)]
pub enum Error {
    /// A remote list of trusted proxies could not be retrieved
    ///
    /// The request must fail: trusting nobody or everybody instead would silently change who is
    /// seen as the client.
    #[error("failed to fetch trusted proxy list {url}")]
    ConfigurationFetch {
        url: Url,
        #[source]
        source: FetchError,
    },
    #[error("failed to build http client")]
    HttpClient(#[source] reqwest::Error),
    #[error("invalid trusted proxy configuration")]
    InvalidConfiguration(#[from] toml::de::Error),
    #[error("failed to read trusted proxy configuration")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`ListFetcher`](crate::ListFetcher)
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network error or timeout
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("cannot read local list")]
    Io(#[from] std::io::Error),
    #[error("unexpected status code {status}")]
    Status { status: u16 },
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown forwarded header set `{0}`")]
pub struct UnknownHeaderSet(pub String);
