use core::ops::{BitOr, BitOrAssign};
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::UnknownHeaderSet;

/// A set of forwarded headers that trusted proxies are allowed to set
///
/// Bit values follow the ones used by symfony based configurations, so `30` and
/// `"HEADER_X_FORWARDED_ALL"` describe the same set.
///
/// # Example
/// ```
/// use trust_proxies::HeaderSet;
///
/// let set: HeaderSet = "HEADER_X_FORWARDED_AWS_ELB".parse().unwrap();
///
/// assert!(set.contains(HeaderSet::X_FORWARDED_FOR));
/// assert!(!set.contains(HeaderSet::X_FORWARDED_HOST));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "HeaderSetRepr")]
pub struct HeaderSet(u8);

impl HeaderSet {
    pub const NONE: Self = Self(0);
    /// The `Forwarded` header, see [RFC 7239](https://tools.ietf.org/html/rfc7239)
    pub const FORWARDED: Self = Self(0b00001);
    pub const X_FORWARDED_FOR: Self = Self(0b00010);
    pub const X_FORWARDED_HOST: Self = Self(0b00100);
    pub const X_FORWARDED_PROTO: Self = Self(0b01000);
    pub const X_FORWARDED_PORT: Self = Self(0b10000);
    /// Every `X-Forwarded-*` header
    pub const X_FORWARDED_ALL: Self = Self(0b11110);
    /// Headers set by an AWS Elastic Load Balancer, it never sends `X-Forwarded-Host`
    pub const X_FORWARDED_AWS_ELB: Self = Self(0b11010);

    const MASK: u8 = 0b11111;

    /// Build a set from its bitmask, unknown bits are rejected
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::MASK == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn contains_role(self, role: HeaderRole) -> bool {
        self.contains(role.header())
    }
}

impl Default for HeaderSet {
    fn default() -> Self {
        Self::X_FORWARDED_ALL
    }
}

impl BitOr for HeaderSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for HeaderSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromStr for HeaderSet {
    type Err = UnknownHeaderSet;

    /// Parse a symbolic name like `HEADER_FORWARDED`, the `HEADER_` prefix is optional and case
    /// does not matter
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        let name = normalized.strip_prefix("HEADER_").unwrap_or(&normalized);

        match name {
            "FORWARDED" => Ok(Self::FORWARDED),
            "X_FORWARDED_FOR" => Ok(Self::X_FORWARDED_FOR),
            "X_FORWARDED_HOST" => Ok(Self::X_FORWARDED_HOST),
            "X_FORWARDED_PROTO" => Ok(Self::X_FORWARDED_PROTO),
            "X_FORWARDED_PORT" => Ok(Self::X_FORWARDED_PORT),
            "X_FORWARDED_ALL" => Ok(Self::X_FORWARDED_ALL),
            "X_FORWARDED_AWS_ELB" => Ok(Self::X_FORWARDED_AWS_ELB),
            _ => Err(UnknownHeaderSet(value.to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderSetRepr {
    Bits(u8),
    Name(String),
}

impl TryFrom<HeaderSetRepr> for HeaderSet {
    type Error = UnknownHeaderSet;

    fn try_from(repr: HeaderSetRepr) -> Result<Self, Self::Error> {
        match repr {
            HeaderSetRepr::Bits(bits) => {
                Self::from_bits(bits).ok_or_else(|| UnknownHeaderSet(bits.to_string()))
            }
            HeaderSetRepr::Name(name) => name.parse(),
        }
    }
}

/// The piece of information a forwarded header carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderRole {
    /// The `Forwarded` header, which carries every other role by itself
    Forwarded,
    /// The address of the client, `X-Forwarded-For` by default
    #[serde(alias = "for")]
    ClientIp,
    /// `X-Forwarded-Host` by default
    #[serde(alias = "client_host")]
    Host,
    /// `X-Forwarded-Proto` by default
    #[serde(alias = "client_proto")]
    Proto,
    /// `X-Forwarded-Port` by default
    #[serde(alias = "client_port")]
    Port,
}

impl HeaderRole {
    pub const fn header(self) -> HeaderSet {
        match self {
            Self::Forwarded => HeaderSet::FORWARDED,
            Self::ClientIp => HeaderSet::X_FORWARDED_FOR,
            Self::Host => HeaderSet::X_FORWARDED_HOST,
            Self::Proto => HeaderSet::X_FORWARDED_PROTO,
            Self::Port => HeaderSet::X_FORWARDED_PORT,
        }
    }

    pub const fn default_name(self) -> &'static str {
        match self {
            Self::Forwarded => "forwarded",
            Self::ClientIp => "x-forwarded-for",
            Self::Host => "x-forwarded-host",
            Self::Proto => "x-forwarded-proto",
            Self::Port => "x-forwarded-port",
        }
    }
}

/// Names of the headers read for each role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderNames {
    overrides: BTreeMap<HeaderRole, String>,
}

impl HeaderNames {
    /// Read `role` from the header `name`
    ///
    /// Names are case insensitive and `_` is read as `-`, so `X_FORWARDED_FOR` selects the
    /// `x-forwarded-for` header.
    pub fn set(&mut self, role: HeaderRole, name: &str) {
        let name = name.trim().to_ascii_lowercase().replace('_', "-");

        if name == role.default_name() {
            self.overrides.remove(&role);
        } else {
            self.overrides.insert(role, name);
        }
    }

    pub fn get(&self, role: HeaderRole) -> &str {
        self.overrides
            .get(&role)
            .map(String::as_str)
            .unwrap_or_else(|| role.default_name())
    }
}

/// Which forwarded headers are honored, as authored in the configuration
///
/// Either a [`HeaderSet`], or a mapping from roles to header names. With a mapping, every
/// `X-Forwarded-*` role stays trusted and unmapped roles keep their default header name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HeaderMode {
    Set(HeaderSet),
    Names(BTreeMap<HeaderRole, String>),
}

impl HeaderMode {
    /// The set of headers trusted under this mode
    ///
    /// A mapping trusts every `X-Forwarded-*` header, and the `Forwarded` header when it is mapped.
    pub fn header_set(&self) -> HeaderSet {
        match self {
            Self::Set(set) => *set,
            Self::Names(names) if names.contains_key(&HeaderRole::Forwarded) => {
                HeaderSet::X_FORWARDED_ALL | HeaderSet::FORWARDED
            }
            Self::Names(_) => HeaderSet::X_FORWARDED_ALL,
        }
    }
}

impl Default for HeaderMode {
    fn default() -> Self {
        Self::Set(HeaderSet::default())
    }
}

impl From<HeaderSet> for HeaderMode {
    fn from(set: HeaderSet) -> Self {
        Self::Set(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_symbolic_names() {
        assert_eq!(
            "HEADER_X_FORWARDED_ALL".parse::<HeaderSet>(),
            Ok(HeaderSet::X_FORWARDED_ALL)
        );
        assert_eq!("header_forwarded".parse::<HeaderSet>(), Ok(HeaderSet::FORWARDED));
        assert_eq!(
            "x-forwarded-aws-elb".parse::<HeaderSet>(),
            Ok(HeaderSet::X_FORWARDED_AWS_ELB)
        );
        assert!("HEADER_CLIENT_IP".parse::<HeaderSet>().is_err());
    }

    #[test]
    fn bits() {
        assert_eq!(HeaderSet::from_bits(30), Some(HeaderSet::X_FORWARDED_ALL));
        assert_eq!(HeaderSet::from_bits(0b100000), None);
        assert_eq!(
            HeaderSet::X_FORWARDED_FOR | HeaderSet::X_FORWARDED_PROTO | HeaderSet::X_FORWARDED_PORT,
            HeaderSet::X_FORWARDED_AWS_ELB
        );
        assert!(HeaderSet::X_FORWARDED_ALL.contains_role(HeaderRole::Host));
        assert!(!HeaderSet::X_FORWARDED_ALL.contains_role(HeaderRole::Forwarded));
    }

    #[test]
    fn header_names() {
        let mut names = HeaderNames::default();
        assert_eq!(names.get(HeaderRole::ClientIp), "x-forwarded-for");

        names.set(HeaderRole::ClientIp, "X_CLIENT_IP");
        assert_eq!(names.get(HeaderRole::ClientIp), "x-client-ip");
        assert_eq!(names.get(HeaderRole::Host), "x-forwarded-host");

        names.set(HeaderRole::ClientIp, "X_FORWARDED_FOR");
        assert_eq!(names, HeaderNames::default());
    }

    #[test]
    fn deserialize_mode() {
        let mode: HeaderMode = serde_json::from_str("30").unwrap();
        assert_eq!(mode, HeaderMode::Set(HeaderSet::X_FORWARDED_ALL));

        let mode: HeaderMode = serde_json::from_str(r#""HEADER_FORWARDED""#).unwrap();
        assert_eq!(mode.header_set(), HeaderSet::FORWARDED);

        let mode: HeaderMode = serde_json::from_str(r#"{"client_ip": "X_FORWARDED_FOR"}"#).unwrap();
        let HeaderMode::Names(names) = &mode else {
            panic!("expected a mapping, got {mode:?}");
        };
        assert_eq!(names.get(&HeaderRole::ClientIp).map(String::as_str), Some("X_FORWARDED_FOR"));
        assert_eq!(mode.header_set(), HeaderSet::X_FORWARDED_ALL);

        assert!(serde_json::from_str::<HeaderMode>(r#""HEADER_NOPE""#).is_err());

        let mode: HeaderMode =
            serde_json::from_str(r#"{"forwarded": "X-Custom-Forwarded"}"#).unwrap();
        assert!(mode.header_set().contains(HeaderSet::FORWARDED));
        assert!(mode.header_set().contains(HeaderSet::X_FORWARDED_ALL));
    }
}
