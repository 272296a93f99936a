use core::net::IpAddr;

use ipnet::{AddrParseError, IpNet};

use crate::headers::{HeaderNames, HeaderRole, HeaderSet};

/// Trusted proxies state of a request
///
/// Holds which proxies are trusted, which forwarded headers they are allowed to set and under
/// which names those headers are read. The default state trusts no proxy, so forwarded headers
/// are ignored until [`ProxyTrust::set_trusted_proxies`] is called.
///
/// # Example
/// ```
/// use trust_proxies::{HeaderSet, ProxyTrust};
///
/// let mut trust = ProxyTrust::new();
/// trust.set_trusted_proxies(["168.10.0.0/16", "10.1.2.3"], HeaderSet::FORWARDED);
///
/// assert!(trust.is_ip_trusted(&"168.10.20.30".parse().unwrap()));
/// assert!(!trust.is_ip_trusted(&"10.1.2.4".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProxyTrust {
    trusted_ips: Vec<IpNet>,
    headers: HeaderSet,
    header_names: HeaderNames,
}

impl ProxyTrust {
    /// Create a state with no trusted proxies and every `X-Forwarded-*` header selected
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state with no trusted proxies and the given headers selected
    pub fn with_headers(headers: HeaderSet) -> Self {
        Self {
            headers,
            ..Self::default()
        }
    }

    /// Replace the trusted proxies and the headers they are allowed to set
    ///
    /// Each proxy can be an IP address or a CIDR, malformed entries are skipped.
    pub fn set_trusted_proxies<I, S>(&mut self, proxies: I, headers: HeaderSet)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.trusted_ips.clear();
        self.headers = headers;

        for proxy in proxies {
            let proxy = proxy.as_ref();

            if let Err(error) = self.add_trusted_ip(proxy) {
                tracing::warn!(proxy, %error, "ignoring malformed trusted proxy");
            }
        }
    }

    /// Add a trusted proxy to the list of trusted proxies
    ///
    /// proxy can be an IP address or a CIDR
    pub fn add_trusted_ip(&mut self, proxy: &str) -> Result<(), AddrParseError> {
        let proxy = proxy.trim();

        match proxy.parse() {
            Ok(v) => {
                self.trusted_ips.push(v);

                Ok(())
            }
            Err(e) => match proxy.parse::<IpAddr>() {
                Ok(v) => {
                    self.trusted_ips.push(IpNet::from(v));

                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    /// Check if a remote address is trusted given the list of trusted proxies
    pub fn is_ip_trusted(&self, remote_addr: &IpAddr) -> bool {
        self.trusted_ips
            .iter()
            .any(|proxy| proxy.contains(remote_addr))
    }

    pub fn trusted_ips(&self) -> &[IpNet] {
        &self.trusted_ips
    }

    pub fn trusted_headers(&self) -> HeaderSet {
        self.headers
    }

    pub fn is_header_trusted(&self, role: HeaderRole) -> bool {
        self.headers.contains_role(role)
    }

    /// Read `role` from another header than its default one
    pub fn set_trusted_header_name(&mut self, role: HeaderRole, name: &str) {
        self.header_names.set(role, name);
    }

    /// Name of the header read for `role`
    pub fn header_name(&self, role: HeaderRole) -> &str {
        self.header_names.get(role)
    }
}
