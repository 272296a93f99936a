use crate::extract::RequestInformation;
use crate::headers::HeaderRole;
use crate::trust::ProxyTrust;
use std::net::IpAddr;

/// Client information of a request, read from forwarded headers when the peer is trusted
#[derive(Debug, Clone)]
pub struct Trusted<'a> {
    host: Option<&'a str>,
    scheme: Option<&'a str>,
    port: Option<u16>,
    ip: IpAddr,
    ips: Vec<IpAddr>,
}

/// Trim whitespace then any quote marks.
fn unquote(val: &str) -> &str {
    val.trim().trim_start_matches('"').trim_end_matches('"')
}

/// Parse a peer specification, ignoring its port and IPv6 square brackets.
fn parse_address(val: &str) -> Option<IpAddr> {
    let val = unquote(val);

    if let Ok(ip) = val.parse() {
        return Some(ip);
    }

    if let Some(rest) = val.strip_prefix('[') {
        return rest.split(']').next().and_then(|ip| ip.parse().ok());
    }

    val.rsplit_once(':').and_then(|(ip, _)| ip.parse().ok())
}

/// Split a host in its name and its port, if any.
pub(crate) fn split_host_port(host: &str) -> (&str, Option<u16>) {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((ip, port)) => (ip, port.strip_prefix(':').and_then(|p| p.parse().ok())),
            None => (host, None),
        };
    }

    match host.rsplit_once(':') {
        // a bare IPv6 address has no port
        Some((name, port)) if !name.contains(':') => (name, port.parse().ok()),
        _ => (host, None),
    }
}

/// Well known port of a scheme.
pub(crate) fn default_port(scheme: &str) -> Option<u16> {
    if scheme.eq_ignore_ascii_case("https") || scheme.eq_ignore_ascii_case("wss") {
        Some(443)
    } else if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("ws") {
        Some(80)
    } else {
        None
    }
}

/// One element of a `Forwarded` header, as added by a single proxy.
#[derive(Default)]
struct ForwardedElement<'a> {
    for_ip: Option<IpAddr>,
    proto: Option<&'a str>,
    host: Option<&'a str>,
}

impl<'a> ForwardedElement<'a> {
    fn parse(element: &'a str) -> Self {
        let mut parsed = Self::default();

        for item in element.split(';') {
            let mut kv = item.splitn(2, '=');
            let key = kv.next().map(|s| s.trim()).unwrap_or_default();
            let value = kv.next().map(unquote).unwrap_or_default();

            if key.eq_ignore_ascii_case("for") {
                parsed.for_ip = parse_address(value);
            } else if key.eq_ignore_ascii_case("proto") {
                parsed.proto = Some(value);
            } else if key.eq_ignore_ascii_case("host") {
                parsed.host = Some(value);
            }
        }

        parsed
    }
}

/// Comma separated values of a header, last one first.
fn values_rev<'a: 'b, 'b, T: RequestInformation>(
    request: &'a T,
    name: &'b str,
) -> impl Iterator<Item = &'a str> + 'b {
    request
        .header_values(name)
        .flat_map(|vals| vals.split(','))
        .map(|s| s.trim())
        .rev()
}

impl<'a> Trusted<'a> {
    pub fn scheme(&self) -> Option<&'a str> {
        self.scheme
    }

    pub fn host_with_port(&self) -> Option<&'a str> {
        self.host
    }

    pub fn host(&self) -> Option<&'a str> {
        self.host.map(|host| split_host_port(host).0)
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Address of the client, the closest hop that is not a trusted proxy
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Addresses of the forwarding chain that are not trusted, closest hop first
    ///
    /// The last one is the farthest hop, usually the originating client.
    pub fn ips(&self) -> &[IpAddr] {
        &self.ips
    }

    pub fn from<T: RequestInformation>(ip_addr: IpAddr, request: &'a T, trust: &ProxyTrust) -> Self {
        if !trust.is_ip_trusted(&ip_addr) {
            // if the peer address is not trusted, we can't trust the headers
            // set the host and scheme to the server's configuration
            return Self {
                host: request.default_host(),
                scheme: request.default_scheme(),
                port: request.default_port(),
                ip: ip_addr,
                ips: vec![ip_addr],
            };
        }

        // if the peer address is trusted, we can start to check trusted header to get correct information
        let mut host = None;
        let mut scheme = None;
        let mut ips = Vec::new();
        let mut farthest_trusted = None;

        // first check the forwarded header if it is trusted
        if trust.is_header_trusted(HeaderRole::Forwarded) {
            // quote from RFC 7239:
            // A proxy server that wants to add a new "Forwarded" header field value
            //    can either append it to the last existing "Forwarded" header field
            //    after a comma separator or add a new field at the end of the header
            //    block.
            // --- https://datatracker.ietf.org/doc/html/rfc7239#section-4
            // so we walk the values in reverse order, the first untrusted element describes the client
            let mut client = None;

            for element in values_rev(request, trust.header_name(HeaderRole::Forwarded))
                .map(ForwardedElement::parse)
            {
                let Some(ip) = element.for_ip else {
                    continue;
                };

                if trust.is_ip_trusted(&ip) {
                    farthest_trusted = Some(ip);
                    continue;
                }

                ips.push(ip);
                client.get_or_insert(element);
            }

            if let Some(element) = client {
                host = element.host;
                scheme = element.proto;
            }
        }

        if ips.is_empty() && trust.is_header_trusted(HeaderRole::ClientIp) {
            for ip in values_rev(request, trust.header_name(HeaderRole::ClientIp))
                .filter_map(parse_address)
            {
                if trust.is_ip_trusted(&ip) {
                    farthest_trusted = Some(ip);
                    continue;
                }

                ips.push(ip);
            }
        }

        if host.is_none() && trust.is_header_trusted(HeaderRole::Host) {
            host = values_rev(request, trust.header_name(HeaderRole::Host)).next();
        }

        if scheme.is_none() && trust.is_header_trusted(HeaderRole::Proto) {
            scheme = values_rev(request, trust.header_name(HeaderRole::Proto)).next();
        }

        let forwarded_port = if trust.is_header_trusted(HeaderRole::Port) {
            values_rev(request, trust.header_name(HeaderRole::Port))
                .next()
                .and_then(|port| port.parse::<u16>().ok())
        } else {
            None
        };

        let port = match (forwarded_port, host, scheme) {
            (Some(port), _, _) => Some(port),
            (None, Some(host), _) => split_host_port(host).1.or_else(|| {
                scheme
                    .or_else(|| request.default_scheme())
                    .and_then(default_port)
            }),
            (None, None, Some(scheme)) => default_port(scheme),
            (None, None, None) => request.default_port(),
        };

        // every hop is a trusted proxy: the farthest one is the client
        let ip = ips.first().copied().or(farthest_trusted).unwrap_or(ip_addr);

        if ips.is_empty() {
            ips.push(ip);
        }

        Self {
            host: host.or_else(|| request.default_host()),
            scheme: scheme.or_else(|| request.default_scheme()),
            port,
            ip,
            ips,
        }
    }
}
