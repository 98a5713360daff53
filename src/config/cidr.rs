//! IPv4 CIDR parsing for address space and subnet prefixes.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum length for an IPv4 prefix.
const MAX_LENGTH: u8 = 32;

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    /// Address as written.
    pub addr: Ipv4Addr,
    /// Prefix length.
    pub prefix: u8,
}

impl Cidr {
    fn mask(self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (MAX_LENGTH - self.prefix)
        }
    }

    /// Network address (host bits cleared).
    #[must_use]
    pub fn network(self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & self.mask())
    }

    /// Returns true if host bits are set, e.g. `10.0.1.5/24`.
    #[must_use]
    pub fn has_host_bits(self) -> bool {
        u32::from(self.addr) & !self.mask() != 0
    }

    /// Returns true if `other` lies entirely inside this network.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        other.prefix >= self.prefix
            && u32::from(other.addr) & self.mask() == u32::from(self.network())
    }

    /// Returns true if the two networks share any address.
    #[must_use]
    pub fn overlaps(self, other: Self) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("Invalid CIDR '{s}': expected ADDRESS/PREFIX"))?;
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| format!("Invalid CIDR '{s}': bad address"))?;
        let prefix = prefix
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= MAX_LENGTH)
            .ok_or_else(|| format!("Invalid CIDR '{s}': prefix must be 0-32"))?;
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}
