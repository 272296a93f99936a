use core::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use url::Url;

use crate::cache::{remember, ListCache, MemoryCache};
use crate::config::{Proxies, ProxyEntry, TrustConfiguration};
use crate::error::Error;
use crate::extract::TrustedRequest;
use crate::fetch::{parse_list, HttpListFetcher, ListFetcher};
use crate::headers::HeaderMode;

/// Networks trusted when every hop of a forwarding chain is trusted: all IPv4 addresses and every
/// currently allocated IPv6 unicast address
const ALL_HOPS: [&str; 2] = ["0.0.0.0/0", "2000::/3"];

/// How proxies are trusted for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    /// An explicit list of addresses and networks
    Explicit,
    /// Only the peer directly connected to the server
    TrustDirectPeer,
    /// Every hop of the forwarding chain
    TrustAllHops,
    /// Nobody
    None,
}

/// Trusted proxies computed for a single request, never reused for another one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrustSet {
    mode: TrustMode,
    trusted_networks: Vec<String>,
}

impl ResolvedTrustSet {
    pub fn new(mode: TrustMode, trusted_networks: Vec<String>) -> Self {
        Self {
            mode,
            trusted_networks,
        }
    }

    pub fn mode(&self) -> TrustMode {
        self.mode
    }

    /// Trusted IP addresses and CIDRs, order does not matter
    pub fn trusted_networks(&self) -> &[String] {
        &self.trusted_networks
    }
}

/// Decide which proxies are trusted and configure requests accordingly
///
/// A resolver is built once from the configuration and shared between requests. Nothing
/// resolved for a request is kept for the next one, except remote lists which are cached for
/// [`TrustConfiguration::cache_ttl`] minutes.
#[derive(Clone)]
pub struct TrustResolver {
    config: Arc<TrustConfiguration>,
    cache: Arc<dyn ListCache>,
    fetcher: Arc<dyn ListFetcher>,
    proxies: Option<Proxies>,
    headers: Option<HeaderMode>,
}

impl fmt::Debug for TrustResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustResolver")
            .field("config", &self.config)
            .field("proxies", &self.proxies)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl TrustResolver {
    /// Create a resolver caching remote lists in memory and fetching them over http(s)
    pub fn new(config: TrustConfiguration) -> Result<Self, Error> {
        let fetcher =
            HttpListFetcher::new(config.list_fetch_timeout()).map_err(Error::HttpClient)?;

        Ok(Self::with_components(
            config,
            Arc::new(MemoryCache::new()),
            Arc::new(fetcher),
        ))
    }

    pub fn with_components(
        config: TrustConfiguration,
        cache: Arc<dyn ListCache>,
        fetcher: Arc<dyn ListFetcher>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cache,
            fetcher,
            proxies: None,
            headers: None,
        }
    }

    /// Trust these proxies instead of the configured ones
    #[must_use]
    pub fn with_proxies(mut self, proxies: Proxies) -> Self {
        self.proxies = Some(proxies);
        self
    }

    /// Honor these headers instead of the configured ones
    #[must_use]
    pub fn with_headers(mut self, headers: impl Into<HeaderMode>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    pub fn config(&self) -> &TrustConfiguration {
        &self.config
    }

    /// The header selection applied to requests
    pub fn header_mode(&self) -> &HeaderMode {
        self.headers.as_ref().unwrap_or(&self.config.headers)
    }

    fn proxies(&self) -> &Proxies {
        self.proxies.as_ref().unwrap_or(&self.config.proxies)
    }

    /// Configure trust on `request`, then hand it to `next` and return its output unchanged
    ///
    /// Fails without calling `next` when a remote list cannot be fetched.
    pub async fn handle<R, F, Fut>(&self, mut request: R, next: F) -> Result<Fut::Output, Error>
    where
        R: TrustedRequest,
        F: FnOnce(R) -> Fut,
        Fut: Future,
    {
        self.resolve_request(&mut request).await?;

        Ok(next(request).await)
    }

    /// Reset the trust state of `request` and apply the one resolved from the configuration
    pub async fn resolve_request<R: TrustedRequest>(
        &self,
        request: &mut R,
    ) -> Result<ResolvedTrustSet, Error> {
        let header_mode = self.header_mode();
        let headers = header_mode.header_set();

        request.reset_trust(headers);

        if let HeaderMode::Names(names) = header_mode {
            for (role, name) in names {
                request.set_trusted_header_name(*role, name);
            }
        }

        let resolved = self.resolve_trust(request.remote_addr()).await?;
        request.set_trusted_proxies(resolved.trusted_networks(), headers);

        Ok(resolved)
    }

    /// Resolve the trusted proxies for a request coming from `remote_addr`
    pub async fn resolve_trust(
        &self,
        remote_addr: Option<IpAddr>,
    ) -> Result<ResolvedTrustSet, Error> {
        let resolved = match self.proxies() {
            Proxies::List(entries) => {
                ResolvedTrustSet::new(TrustMode::Explicit, self.compute_trusted_proxies(entries).await?)
            }
            Proxies::AllHops if self.config.trust_all_hops => ResolvedTrustSet::new(
                TrustMode::TrustAllHops,
                ALL_HOPS.iter().map(|network| network.to_string()).collect(),
            ),
            proxies @ (Proxies::DirectPeer | Proxies::AllHops) => {
                if matches!(proxies, Proxies::AllHops) {
                    tracing::debug!("`**` only trusts the directly connected peer");
                }

                // trust was reset before, so the peer is the raw transport address
                ResolvedTrustSet::new(
                    TrustMode::TrustDirectPeer,
                    remote_addr.map(|addr| addr.to_string()).into_iter().collect(),
                )
            }
            Proxies::None => ResolvedTrustSet::new(TrustMode::None, Vec::new()),
        };

        tracing::debug!(
            mode = ?resolved.mode(),
            networks = resolved.trusted_networks().len(),
            "resolved trusted proxies"
        );

        Ok(resolved)
    }

    /// Expand a list of proxies, replacing remote lists by their entries
    pub async fn compute_trusted_proxies(
        &self,
        entries: &[ProxyEntry],
    ) -> Result<Vec<String>, Error> {
        let mut trusted = Vec::with_capacity(entries.len());

        for entry in entries {
            match entry {
                ProxyEntry::Literal(proxy) => trusted.push(proxy.clone()),
                ProxyEntry::RemoteList(url) => {
                    // entries of a remote list go before the ones collected so far
                    let mut list = self.remote_list(url).await?;
                    list.append(&mut trusted);
                    trusted = list;
                }
            }
        }

        Ok(trusted)
    }

    async fn remote_list(&self, url: &Url) -> Result<Vec<String>, Error> {
        remember(
            self.cache.as_ref(),
            url.as_str(),
            self.config.list_ttl(),
            || async {
                tracing::debug!(%url, "fetching trusted proxy list");

                let content = self.fetcher.fetch(url).await.map_err(|source| {
                    Error::ConfigurationFetch {
                        url: url.clone(),
                        source,
                    }
                })?;

                Ok(parse_list(&content))
            },
        )
        .await
    }
}

#[cfg(all(test, feature = "http"))]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::extract::RemoteAddr;
    use crate::headers::{HeaderRole, HeaderSet};
    use async_trait::async_trait;
    use http::Request;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StaticFetcher {
        lists: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn with_list(mut self, url: &str, content: &str) -> Self {
            self.lists.insert(url.to_string(), content.to_string());
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ListFetcher for StaticFetcher {
        async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            self.lists
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| FetchError::Unavailable(format!("no list at {url}")))
        }
    }

    fn resolver(proxies: Proxies, fetcher: Arc<StaticFetcher>) -> TrustResolver {
        let config = TrustConfiguration {
            proxies,
            ..TrustConfiguration::default()
        };

        TrustResolver::with_components(config, Arc::new(MemoryCache::new()), fetcher)
    }

    fn proxied_request(remote_addr: &str, forwarded_for: &str) -> Request<()> {
        let mut request = Request::get("http://localhost:8888/tag/proxy")
            .header("host", "localhost:8888")
            .header("x-forwarded-for", forwarded_for)
            .header("x-forwarded-host", "serversforhackers.com")
            .header("x-forwarded-port", "443")
            .header("x-forwarded-proto", "https")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(RemoteAddr(remote_addr.parse().unwrap()));

        request
    }

    fn ip(ip: &str) -> IpAddr {
        ip.parse().unwrap()
    }

    #[tokio::test]
    async fn explicit_list() {
        let resolver = resolver(Proxies::list(["192.168.10.10"]), Arc::default());
        let request = proxied_request("192.168.10.10", "173.174.200.38");

        let request = resolver.handle(request, |request| async move { request }).await.unwrap();

        assert_eq!(request.client_ip(), Some(ip("173.174.200.38")));
        assert_eq!(request.scheme(), Some("https"));
        assert_eq!(request.host(), Some("serversforhackers.com"));
        assert_eq!(request.port(), Some(443));
    }

    #[tokio::test]
    async fn untrusted_peer_is_ignored() {
        let resolver = resolver(Proxies::list(["192.168.10.10"]), Arc::default());
        let request = proxied_request("10.1.2.3", "173.174.200.38");

        let request = resolver.handle(request, |request| async move { request }).await.unwrap();

        assert_eq!(request.client_ip(), Some(ip("10.1.2.3")));
        assert_eq!(request.host(), Some("localhost"));
        assert_eq!(request.port(), Some(8888));
    }

    #[tokio::test]
    async fn nothing_configured_trusts_nobody() {
        let resolver = resolver(Proxies::None, Arc::default());
        let mut request = proxied_request("192.168.10.10", "173.174.200.38");

        let resolved = resolver.resolve_request(&mut request).await.unwrap();

        assert_eq!(resolved.mode(), TrustMode::None);
        assert!(resolved.trusted_networks().is_empty());
        assert_eq!(request.client_ip(), Some(ip("192.168.10.10")));
    }

    #[tokio::test]
    async fn empty_list_trusts_nobody() {
        let resolver = resolver(Proxies::List(Vec::new()), Arc::default());
        let mut request = proxied_request("192.168.10.10", "173.174.200.38");

        let resolved = resolver.resolve_request(&mut request).await.unwrap();

        assert_eq!(resolved.mode(), TrustMode::Explicit);
        assert_eq!(request.client_ip(), Some(ip("192.168.10.10")));
    }

    #[tokio::test]
    async fn trust_is_reset_between_requests() {
        let resolver = resolver(Proxies::DirectPeer, Arc::default());

        let mut first = proxied_request("192.168.10.10", "173.174.200.38");
        resolver.resolve_request(&mut first).await.unwrap();
        assert_eq!(first.client_ip(), Some(ip("173.174.200.38")));

        // the second request carries the state of the first one, as a reused request object would
        let mut second = proxied_request("10.9.9.9", "173.174.200.38");
        second
            .extensions_mut()
            .insert(first.proxy_trust().cloned().unwrap());
        let resolved = resolver.resolve_request(&mut second).await.unwrap();

        assert_eq!(resolved.trusted_networks(), &["10.9.9.9".to_string()]);
        assert!(!second
            .proxy_trust()
            .unwrap()
            .is_ip_trusted(&ip("192.168.10.10")));
        assert_eq!(second.client_ip(), Some(ip("173.174.200.38")));

        let resolver = resolver.with_proxies(Proxies::list(["192.168.10.10"]));
        let mut third = proxied_request("10.9.9.9", "173.174.200.38");
        third
            .extensions_mut()
            .insert(second.proxy_trust().cloned().unwrap());
        resolver.resolve_request(&mut third).await.unwrap();

        assert_eq!(third.client_ip(), Some(ip("10.9.9.9")));
    }

    #[tokio::test]
    async fn wildcard_trusts_direct_peer_only() {
        let resolver = resolver(Proxies::DirectPeer, Arc::default());

        for forwarded_for in [
            "192.0.2.2",
            "192.0.2.199, 192.0.2.2",
            "192.0.2.199,192.0.2.2",
            "99.99.99.99,192.0.2.199,192.0.2.2",
        ] {
            let mut request = proxied_request("192.168.10.10", forwarded_for);
            let resolved = resolver.resolve_request(&mut request).await.unwrap();

            assert_eq!(resolved.mode(), TrustMode::TrustDirectPeer);
            assert_eq!(resolved.trusted_networks(), &["192.168.10.10".to_string()]);
            assert_eq!(request.client_ip(), Some(ip("192.0.2.2")), "{forwarded_for}");
        }
    }

    #[tokio::test]
    async fn wildcard_without_remote_addr() {
        let resolver = resolver(Proxies::DirectPeer, Arc::default());
        let mut request = Request::get("/").body(()).unwrap();

        let resolved = resolver.resolve_request(&mut request).await.unwrap();

        assert_eq!(resolved.mode(), TrustMode::TrustDirectPeer);
        assert!(resolved.trusted_networks().is_empty());
    }

    #[tokio::test]
    async fn double_wildcard() {
        let resolver = resolver(Proxies::AllHops, Arc::default());
        let mut request = proxied_request("192.168.10.10", "173.174.200.38");

        let resolved = resolver.resolve_request(&mut request).await.unwrap();

        assert_eq!(resolved.mode(), TrustMode::TrustDirectPeer);
        assert_eq!(request.client_ip(), Some(ip("173.174.200.38")));

        let config = TrustConfiguration {
            proxies: Proxies::AllHops,
            trust_all_hops: true,
            ..TrustConfiguration::default()
        };
        let resolver = TrustResolver::with_components(
            config,
            Arc::new(MemoryCache::new()),
            Arc::new(StaticFetcher::default()),
        );
        let mut request = proxied_request("192.168.10.10", "99.99.99.99, 192.0.2.2");

        let resolved = resolver.resolve_request(&mut request).await.unwrap();

        assert_eq!(resolved.mode(), TrustMode::TrustAllHops);
        assert_eq!(request.client_ip(), Some(ip("99.99.99.99")));
    }

    #[tokio::test]
    async fn multiple_hops() {
        let resolver = resolver(Proxies::list(["192.168.10.10"]), Arc::default());

        for forwarded_for in [
            "192.0.2.2",
            "192.0.2.2, 192.0.2.199",
            "192.0.2.2, 192.0.2.199, 99.99.99.99",
            "192.0.2.2,192.0.2.199",
        ] {
            let mut request = proxied_request("192.168.10.10", forwarded_for);
            resolver.resolve_request(&mut request).await.unwrap();

            assert_eq!(
                request.client_ips().last(),
                Some(&ip("192.0.2.2")),
                "{forwarded_for}"
            );
        }
    }

    #[tokio::test]
    async fn multiple_hops_some_trusted() {
        let resolver = resolver(Proxies::list(["192.168.10.10", "192.0.2.199"]), Arc::default());

        for forwarded_for in [
            "192.0.2.2",
            "192.0.2.2, 192.0.2.199",
            "99.99.99.99, 192.0.2.2, 192.0.2.199",
            "192.0.2.2,192.0.2.199",
        ] {
            let mut request = proxied_request("192.168.10.10", forwarded_for);
            resolver.resolve_request(&mut request).await.unwrap();

            assert_eq!(request.client_ip(), Some(ip("192.0.2.2")), "{forwarded_for}");
        }
    }

    #[tokio::test]
    async fn remote_list_is_merged() {
        let fetcher = Arc::new(
            StaticFetcher::default().with_list("https://example/list-a", "10.0.0.1\n10.0.0.2\n\n"),
        );
        let resolver = resolver(
            Proxies::list(["192.0.2.1", "https://example/list-a"]),
            Arc::clone(&fetcher),
        );

        let resolved = resolver.resolve_trust(None).await.unwrap();

        assert_eq!(resolved.mode(), TrustMode::Explicit);
        assert_eq!(
            resolved.trusted_networks(),
            &["10.0.0.1", "10.0.0.2", "192.0.2.1"]
        );
    }

    #[tokio::test]
    async fn remote_list_is_cached() {
        let fetcher = Arc::new(
            StaticFetcher::default().with_list("https://example/list-a", "10.0.0.1\n10.0.0.2"),
        );
        let resolver = resolver(
            Proxies::list(["https://example/list-a", "192.0.2.1"]),
            Arc::clone(&fetcher),
        );

        for _ in 0..3 {
            let mut request = proxied_request("10.0.0.2", "173.174.200.38");
            resolver.resolve_request(&mut request).await.unwrap();

            assert_eq!(request.client_ip(), Some(ip("173.174.200.38")));
        }

        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn remote_list_with_header_names() {
        let fetcher = Arc::new(StaticFetcher::default().with_list(
            "https://www.cloudflare.com/ips-v4",
            "173.245.48.0/20\n103.21.244.0/22\n",
        ));
        let resolver = resolver(
            Proxies::list(["https://www.cloudflare.com/ips-v4"]),
            Arc::clone(&fetcher),
        )
        .with_headers(HeaderMode::Names(
            [(HeaderRole::ClientIp, "CF_CONNECTING_IP".to_string())].into(),
        ));

        let mut request = proxied_request("103.21.244.2", "173.174.200.38");
        request
            .headers_mut()
            .insert("cf-connecting-ip", "198.51.100.7".parse().unwrap());
        resolver.resolve_request(&mut request).await.unwrap();

        assert_eq!(request.client_ip(), Some(ip("198.51.100.7")));
        assert_eq!(request.host(), Some("serversforhackers.com"));
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_request() {
        let fetcher = Arc::new(StaticFetcher::default());
        let resolver = resolver(
            Proxies::list(["192.168.10.10", "https://example/list-a"]),
            Arc::clone(&fetcher),
        );
        let request = proxied_request("192.168.10.10", "173.174.200.38");
        let called = AtomicUsize::new(0);
        let calls = &called;

        let result = resolver
            .handle(request, |request| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                request.client_ip()
            })
            .await;

        assert!(matches!(
            result,
            Err(Error::ConfigurationFetch { ref url, .. }) if url.as_str() == "https://example/list-a"
        ));
        assert_eq!(called.load(Ordering::SeqCst), 0);

        // failures are not cached
        let _ = resolver.resolve_trust(None).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn compute_trusted_proxies_prepends_remote_entries() {
        let fetcher = Arc::new(
            StaticFetcher::default()
                .with_list("https://example/list-a", "10.0.0.1\n10.0.0.2")
                .with_list("https://example/list-b", "10.0.0.3"),
        );
        let resolver = resolver(Proxies::None, Arc::clone(&fetcher));
        let Proxies::List(entries) = Proxies::list([
            "192.0.2.1",
            "https://example/list-a",
            "192.0.2.2",
            "https://example/list-b",
        ]) else {
            panic!("expected a list");
        };

        let trusted = resolver.compute_trusted_proxies(&entries).await.unwrap();

        assert_eq!(
            trusted,
            ["10.0.0.3", "10.0.0.1", "10.0.0.2", "192.0.2.1", "192.0.2.2"]
        );
    }

    #[tokio::test]
    async fn unreadable_local_list_fails_the_request() {
        let fetcher = Arc::new(StaticFetcher::default());
        let resolver = resolver(
            Proxies::list(["file:///etc/trusted-proxies.txt"]),
            Arc::clone(&fetcher),
        );
        let mut request = proxied_request("192.168.10.10", "173.174.200.38");

        let result = resolver.resolve_request(&mut request).await;

        assert!(matches!(
            result,
            Err(Error::ConfigurationFetch { ref url, .. }) if url.scheme() == "file"
        ));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn renamed_forwarded_header() {
        let resolver = resolver(Proxies::list(["192.168.10.10"]), Arc::default()).with_headers(
            HeaderMode::Names([(HeaderRole::Forwarded, "X-Custom-Forwarded".to_string())].into()),
        );
        let mut request = proxied_request("192.168.10.10", "173.174.200.38");
        request.headers_mut().insert(
            "x-custom-forwarded",
            "for=198.51.100.7;proto=https".parse().unwrap(),
        );

        resolver.resolve_request(&mut request).await.unwrap();

        assert_eq!(request.client_ip(), Some(ip("198.51.100.7")));
        assert_eq!(request.scheme(), Some("https"));
    }

    #[tokio::test]
    async fn forwarded_header_only() {
        let resolver = resolver(Proxies::list(["192.168.10.10"]), Arc::default())
            .with_headers(HeaderSet::FORWARDED);
        let mut request = proxied_request("192.168.10.10", "173.174.200.38");
        request.headers_mut().insert(
            "forwarded",
            "for=173.174.200.40:443; proto=https; host=serversforhackers.com"
                .parse()
                .unwrap(),
        );
        request
            .headers_mut()
            .insert("x-forwarded-host", "svrs4hkrs.com".parse().unwrap());
        request
            .headers_mut()
            .insert("x-forwarded-port", "80".parse().unwrap());
        request
            .headers_mut()
            .insert("x-forwarded-proto", "http".parse().unwrap());

        resolver.resolve_request(&mut request).await.unwrap();

        assert_eq!(request.client_ip(), Some(ip("173.174.200.40")));
        assert_eq!(request.scheme(), Some("https"));
        assert_eq!(request.host(), Some("serversforhackers.com"));
        assert_eq!(request.port(), Some(443));
    }

    #[tokio::test]
    async fn header_set_is_applied() {
        for (name, headers) in [
            ("HEADER_X_FORWARDED_ALL", HeaderSet::X_FORWARDED_ALL),
            ("HEADER_FORWARDED", HeaderSet::FORWARDED),
            ("HEADER_X_FORWARDED_AWS_ELB", HeaderSet::X_FORWARDED_AWS_ELB),
        ] {
            let resolver = resolver(Proxies::parse("192.168.1.1, 192.168.1.2"), Arc::default())
                .with_headers(name.parse::<HeaderSet>().unwrap());
            let mut request = proxied_request("192.168.10.10", "173.174.200.38");
            resolver.resolve_request(&mut request).await.unwrap();

            let trust = request.proxy_trust().unwrap();
            assert_eq!(trust.trusted_headers(), headers);
            assert_eq!(trust.trusted_ips().len(), 2);
            assert!(trust.is_ip_trusted(&ip("192.168.1.1")));
            assert!(trust.is_ip_trusted(&ip("192.168.1.2")));
        }
    }
}
