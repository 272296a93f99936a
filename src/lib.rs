//! # Trust proxies
//!
//! This crate decides which forwarding proxies are trusted for each request, then extracts the real
//! client ip address, host, scheme and port from the forwarded headers those proxies set.
//!
//! ## Usage
//!
//! ```rust
//! use trust_proxies::{Proxies, RemoteAddr, TrustConfiguration, TrustResolver, TrustedRequest};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), trust_proxies::Error> {
//! let config = TrustConfiguration {
//!     proxies: Proxies::parse("192.168.10.10, 10.0.0.0/8"),
//!     ..TrustConfiguration::default()
//! };
//! let resolver = TrustResolver::new(config)?;
//!
//! let mut request = http::Request::get("/").body(()).unwrap();
//! request.headers_mut().insert("x-forwarded-for", "173.174.200.38".parse().unwrap());
//! request.headers_mut().insert("x-forwarded-proto", "https".parse().unwrap());
//! request.extensions_mut().insert(RemoteAddr([192, 168, 10, 10].into()));
//!
//! let (ip, scheme) = resolver
//!     .handle(request, |request| async move {
//!         (request.client_ip(), request.scheme().map(str::to_string))
//!     })
//!     .await?;
//!
//! assert_eq!(ip, Some([173, 174, 200, 38].into()));
//! assert_eq!(scheme.as_deref(), Some("https"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//!  * Trust an explicit list of addresses and CIDRs, merged with remote lists fetched over http(s)
//!    and cached.
//!  * `"*"` trusts the directly connected peer only, whatever its address.
//!  * Use the `Forwarded` header to extract the client ip address and other informations in priority.
//!  * Fall back to the `X-Forwarded-For` header if the `Forwarded` header is not present or not trusted.
//!  * Can extract information from the `X-Forwarded-Host` / `X-Forwarded-Proto` / `X-Forwarded-Port`
//!    headers if they are trusted, under their default names or custom ones.
//!  * A [tower](https://docs.rs/tower) layer, behind the `http` feature.
//!
//! ## Implementation
//!
//! This crate try to follow the [RFC 7239](https://tools.ietf.org/html/rfc7239) specifications but may differ on real
//! world usage.

mod cache;
mod config;
mod error;
mod extract;
mod fetch;
mod headers;
#[cfg(feature = "http")]
mod layer;
mod resolver;
mod trust;
mod trusted;

pub use cache::{remember, ListCache, MemoryCache};
pub use config::{Proxies, ProxyEntry, TrustConfiguration};
pub use error::{Error, FetchError, UnknownHeaderSet};
pub use extract::{RemoteAddr, RequestInformation, TrustedRequest};
pub use fetch::{parse_list, HttpListFetcher, ListFetcher};
pub use headers::{HeaderMode, HeaderNames, HeaderRole, HeaderSet};
#[cfg(feature = "http")]
pub use layer::{TrustProxiesLayer, TrustProxiesService};
pub use resolver::{ResolvedTrustSet, TrustMode, TrustResolver};
pub use trust::ProxyTrust;
pub use trusted::Trusted;
