use core::net::IpAddr;

use crate::headers::{HeaderRole, HeaderSet};
use crate::trust::ProxyTrust;
use crate::trusted::{default_port, split_host_port, Trusted};

/// Address of the peer directly connected to the server
///
/// Servers insert it in the request extensions when accepting a connection. Forwarded headers are
/// only read when this address belongs to a trusted proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteAddr(pub IpAddr);

/// A trait to extract required information from a request in order to fetch trusted information
pub trait RequestInformation {
    /// Check if the host header is allowed
    ///
    /// Most implementations should return `true` if the HTTP version is less than HTTP/2
    fn is_host_header_allowed(&self) -> bool;

    /// Get the host header of the request
    fn host_header(&self) -> Option<&str>;

    /// Get the authority of the request
    fn authority(&self) -> Option<&str>;

    /// Get the values of the header `name`, in the order they were received
    ///
    /// A double-ended iterator is returned to allow the implementation to optimize the iteration in
    /// case of multiple values
    fn header_values(&self, name: &str) -> impl DoubleEndedIterator<Item = &str>;

    /// Return the default host of the request when no trusted headers are found
    ///
    /// Default to host header if allowed or authority
    fn default_host(&self) -> Option<&str> {
        self.host_header()
            // skip host header if HTTP/2, we should use :authority instead
            .filter(|_| self.is_host_header_allowed())
            .or_else(|| self.authority())
    }

    /// Return the default scheme of the request when no trusted headers are found
    fn default_scheme(&self) -> Option<&str>;

    /// Return the default port of the request when no trusted headers are found
    ///
    /// Default to the port of the default host, then to the well known port of the scheme
    fn default_port(&self) -> Option<u16> {
        self.default_host()
            .and_then(|host| split_host_port(host).1)
            .or_else(|| self.default_scheme().and_then(default_port))
    }
}

/// A request carrying its own trusted proxies state
///
/// Resolution methods (`client_ip`, `host`, ...) read forwarded headers only when the
/// [`RemoteAddr`] of the request is one of the trusted proxies.
pub trait TrustedRequest: RequestInformation + Sized {
    /// The raw transport peer address, never derived from headers
    fn remote_addr(&self) -> Option<IpAddr>;

    fn proxy_trust(&self) -> Option<&ProxyTrust>;

    fn proxy_trust_mut(&mut self) -> &mut ProxyTrust;

    /// Drop every trusted proxy and header name previously set on this request
    fn reset_trust(&mut self, headers: HeaderSet) {
        *self.proxy_trust_mut() = ProxyTrust::with_headers(headers);
    }

    fn set_trusted_proxies<I, S>(&mut self, proxies: I, headers: HeaderSet)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.proxy_trust_mut().set_trusted_proxies(proxies, headers);
    }

    fn set_trusted_header_name(&mut self, role: HeaderRole, name: &str) {
        self.proxy_trust_mut().set_trusted_header_name(role, name);
    }

    fn is_from_trusted_proxy(&self) -> bool {
        match (self.remote_addr(), self.proxy_trust()) {
            (Some(remote_addr), Some(trust)) => trust.is_ip_trusted(&remote_addr),
            _ => false,
        }
    }

    /// Resolve the client information, `None` when the remote address is unknown
    fn trusted(&self) -> Option<Trusted<'_>> {
        let remote_addr = self.remote_addr()?;

        Some(match self.proxy_trust() {
            Some(trust) => Trusted::from(remote_addr, self, trust),
            None => Trusted::from(remote_addr, self, &ProxyTrust::new()),
        })
    }

    /// Closest hop that is not a trusted proxy
    ///
    /// With untrusted intermediate hops this is the last of them, the originating client is
    /// `client_ips().last()`.
    fn client_ip(&self) -> Option<IpAddr> {
        self.trusted().map(|trusted| trusted.ip())
    }

    /// Client addresses, closest hop first, the originating client last
    fn client_ips(&self) -> Vec<IpAddr> {
        self.trusted()
            .map(|trusted| trusted.ips().to_vec())
            .unwrap_or_default()
    }

    fn host(&self) -> Option<&str> {
        match self.trusted() {
            Some(trusted) => trusted.host(),
            None => self.default_host().map(|host| split_host_port(host).0),
        }
    }

    fn scheme(&self) -> Option<&str> {
        match self.trusted() {
            Some(trusted) => trusted.scheme(),
            None => self.default_scheme(),
        }
    }

    fn port(&self) -> Option<u16> {
        match self.trusted() {
            Some(trusted) => trusted.port(),
            None => self.default_port(),
        }
    }
}

#[cfg(feature = "http")]
mod http {
    use core::net::IpAddr;

    use super::{RemoteAddr, RequestInformation, TrustedRequest};
    use crate::trust::ProxyTrust;

    impl<T> RequestInformation for http::Request<T> {
        fn is_host_header_allowed(&self) -> bool {
            self.version() < http::Version::HTTP_2
        }

        fn host_header(&self) -> Option<&str> {
            self.headers()
                .get("host")
                .and_then(|value| value.to_str().ok())
        }

        fn authority(&self) -> Option<&str> {
            self.uri().authority().map(|auth| auth.as_str())
        }

        fn header_values(&self, name: &str) -> impl DoubleEndedIterator<Item = &str> {
            self.headers()
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
        }

        fn default_scheme(&self) -> Option<&str> {
            self.uri().scheme_str()
        }
    }

    impl<T> TrustedRequest for http::Request<T> {
        fn remote_addr(&self) -> Option<IpAddr> {
            self.extensions().get::<RemoteAddr>().map(|addr| addr.0)
        }

        fn proxy_trust(&self) -> Option<&ProxyTrust> {
            self.extensions().get()
        }

        fn proxy_trust_mut(&mut self) -> &mut ProxyTrust {
            self.extensions_mut().get_or_insert_default()
        }
    }

    impl RequestInformation for http::request::Parts {
        fn is_host_header_allowed(&self) -> bool {
            self.version < http::Version::HTTP_2
        }

        fn host_header(&self) -> Option<&str> {
            self.headers
                .get("host")
                .and_then(|value| value.to_str().ok())
        }

        fn authority(&self) -> Option<&str> {
            self.uri.authority().map(|auth| auth.as_str())
        }

        fn header_values(&self, name: &str) -> impl DoubleEndedIterator<Item = &str> {
            self.headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
        }

        fn default_scheme(&self) -> Option<&str> {
            self.uri.scheme_str()
        }
    }

    impl TrustedRequest for http::request::Parts {
        fn remote_addr(&self) -> Option<IpAddr> {
            self.extensions.get::<RemoteAddr>().map(|addr| addr.0)
        }

        fn proxy_trust(&self) -> Option<&ProxyTrust> {
            self.extensions.get()
        }

        fn proxy_trust_mut(&mut self) -> &mut ProxyTrust {
            self.extensions.get_or_insert_default()
        }
    }
}
