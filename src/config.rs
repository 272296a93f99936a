use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::headers::HeaderMode;

/// Entry of an explicit list of trusted proxies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEntry {
    /// An IP address or a CIDR
    Literal(String),
    /// A remote list of IP addresses and CIDRs, one per line
    RemoteList(Url),
}

impl ProxyEntry {
    /// Absolute urls with a host and `file:` urls are remote lists, anything else is a literal
    ///
    /// IPv6 networks like `fd00::/8` parse as urls without a host, so they stay literals.
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();

        match Url::parse(entry) {
            Ok(url) if url.has_host() || url.scheme() == "file" => Self::RemoteList(url),
            _ => Self::Literal(entry.to_string()),
        }
    }
}

/// Which proxies are trusted
///
/// # Example
/// ```
/// use trust_proxies::{Proxies, ProxyEntry};
///
/// assert_eq!(Proxies::parse("*"), Proxies::DirectPeer);
/// assert_eq!(
///     Proxies::parse("192.168.1.1, 192.168.1.2"),
///     Proxies::List(vec![
///         ProxyEntry::Literal("192.168.1.1".to_string()),
///         ProxyEntry::Literal("192.168.1.2".to_string()),
///     ])
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Option<ProxiesRepr>")]
pub enum Proxies {
    /// Trust nobody, forwarded headers are ignored
    #[default]
    None,
    /// `"*"`: trust the peer directly connected to the server, but not the hops behind it
    DirectPeer,
    /// `"**"`: deprecated alias, see [`TrustConfiguration::trust_all_hops`]
    AllHops,
    /// Trust the listed proxies
    List(Vec<ProxyEntry>),
}

impl Proxies {
    /// Parse a textual configuration: a wildcard or a comma separated list
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" => Self::None,
            "*" => Self::DirectPeer,
            "**" => Self::AllHops,
            list => Self::list(list.split(',').filter(|entry| !entry.trim().is_empty())),
        }
    }

    pub fn list<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::List(
            entries
                .into_iter()
                .map(|entry| ProxyEntry::parse(entry.as_ref()))
                .collect(),
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProxiesRepr {
    Text(String),
    List(Vec<String>),
}

impl From<Option<ProxiesRepr>> for Proxies {
    fn from(repr: Option<ProxiesRepr>) -> Self {
        match repr {
            None => Self::None,
            Some(ProxiesRepr::Text(text)) => Self::parse(&text),
            Some(ProxiesRepr::List(entries)) => Self::list(entries),
        }
    }
}

/// Configuration of the trusted proxies, loaded once and shared by every request
///
/// # Example
/// ```
/// use trust_proxies::{HeaderMode, HeaderSet, Proxies, TrustConfiguration};
///
/// let config = TrustConfiguration::from_toml_str(r#"
/// [trustedproxy]
/// proxies = ["https://www.cloudflare.com/ips-v4", "192.168.10.10"]
/// headers = "HEADER_X_FORWARDED_AWS_ELB"
/// cache_ttl = 60
/// "#).unwrap();
///
/// assert!(matches!(config.proxies, Proxies::List(ref entries) if entries.len() == 2));
/// assert_eq!(config.headers, HeaderMode::Set(HeaderSet::X_FORWARDED_AWS_ELB));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrustConfiguration {
    pub proxies: Proxies,
    pub headers: HeaderMode,
    /// How long remote lists are cached, in minutes
    pub cache_ttl: u64,
    /// Upper bound of a remote list download, in seconds
    pub fetch_timeout: u64,
    /// Make `"**"` trust every hop of the forwarding chain instead of the direct peer only
    pub trust_all_hops: bool,
}

impl Default for TrustConfiguration {
    fn default() -> Self {
        Self {
            proxies: Proxies::None,
            headers: HeaderMode::default(),
            cache_ttl: 24 * 60,
            fetch_timeout: 10,
            trust_all_hops: false,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    trustedproxy: TrustConfiguration,
}

impl TrustConfiguration {
    pub fn list_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl.saturating_mul(60))
    }

    pub fn list_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    /// Read the `[trustedproxy]` table of a toml document
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let file: ConfigFile = toml::from_str(content)?;

        Ok(file.trustedproxy)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;

        Self::from_toml_str(&content)
    }
}
