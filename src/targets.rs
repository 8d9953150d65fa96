//! Target and port expression parsing.
//!
//! Scan workloads are the Cartesian product of an address set and a port
//! list. Both sides are parsed up front so that validation never touches
//! the network, and enumeration order is reproducible: addresses ascend
//! numerically (IPv4 before IPv6, host names last in the order given), ports
//! keep their first-seen order.

use std::fmt;
use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::error::ValidationError;

/// Upper bound on the number of work items a single task may expand to.
pub const MAX_WORK_ITEMS: u64 = 1 << 20;

/// One endpoint of a scan workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// IP literal or host name.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A single parsed target term.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TargetTerm {
    Addr(IpAddr),
    Network(IpNetwork),
    Range(IpAddr, IpAddr),
    Host(String),
}

impl TargetTerm {
    fn parse(raw: &str) -> Result<Self, ValidationError> {
        let term = raw.trim();
        let invalid = |reason: &str| ValidationError::InvalidTarget {
            value: term.to_string(),
            reason: reason.to_string(),
        };

        if let Ok(addr) = term.parse::<IpAddr>() {
            return Ok(Self::Addr(addr));
        }
        if term.contains('/') {
            let net = term
                .parse::<IpNetwork>()
                .map_err(|e| invalid(&format!("bad CIDR block: {e}")))?;
            return Ok(Self::Network(net));
        }
        if let Some((lo, hi)) = term.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<IpAddr>(), hi.trim().parse::<IpAddr>()) {
                if lo.is_ipv4() != hi.is_ipv4() {
                    return Err(invalid("range mixes IPv4 and IPv6"));
                }
                if addr_to_u128(lo) > addr_to_u128(hi) {
                    return Err(invalid("range start is above range end"));
                }
                return Ok(Self::Range(lo, hi));
            }
        }
        if is_host_name(term) {
            return Ok(Self::Host(term.to_ascii_lowercase()));
        }
        Err(invalid("not an address, CIDR block, range or host name"))
    }

    fn len(&self) -> u128 {
        match self {
            Self::Addr(_) | Self::Host(_) => 1,
            Self::Network(net) => {
                let width: u8 = if net.is_ipv4() { 32 } else { 128 };
                let host_bits = u32::from(width - net.prefix());
                if host_bits >= 128 {
                    u128::MAX
                } else {
                    1u128 << host_bits
                }
            }
            Self::Range(lo, hi) => addr_to_u128(*hi) - addr_to_u128(*lo) + 1,
        }
    }
}

fn is_host_name(term: &str) -> bool {
    !term.is_empty()
        && term.len() <= 253
        && term.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn u128_to_addr(value: u128, v4: bool) -> IpAddr {
    if v4 {
        #[allow(clippy::cast_possible_truncation)]
        IpAddr::from(std::net::Ipv4Addr::from(value as u32))
    } else {
        IpAddr::from(std::net::Ipv6Addr::from(value))
    }
}

/// A parsed, comma-separated target expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet {
    terms: Vec<TargetTerm>,
}

impl TargetSet {
    /// Parses `10.0.0.1`, `10.0.0.0/30`, `10.0.0.1-10.0.0.9`, `example.com`,
    /// or any comma-separated mix of those.
    pub fn parse(expr: &str) -> Result<Self, ValidationError> {
        let terms = expr
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(TargetTerm::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if terms.is_empty() {
            return Err(ValidationError::MissingField {
                field: "IP".to_string(),
            });
        }
        Ok(Self { terms })
    }

    /// Upper bound on the number of distinct hosts in the set.
    #[must_use]
    pub fn len(&self) -> u128 {
        self.terms
            .iter()
            .fold(0u128, |acc, t| acc.saturating_add(t.len()))
    }

    /// True if the set contains no terms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Expands the set into host strings in enumeration order.
    ///
    /// Callers must bound `len()` first; this materializes every address.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        let mut addrs: Vec<IpAddr> = Vec::new();
        let mut names: Vec<String> = Vec::new();

        for term in &self.terms {
            match term {
                TargetTerm::Addr(addr) => addrs.push(*addr),
                TargetTerm::Network(net) => addrs.extend(net.iter()),
                TargetTerm::Range(lo, hi) => {
                    let v4 = lo.is_ipv4();
                    let (lo, hi) = (addr_to_u128(*lo), addr_to_u128(*hi));
                    let mut cur = lo;
                    loop {
                        addrs.push(u128_to_addr(cur, v4));
                        if cur == hi {
                            break;
                        }
                        cur += 1;
                    }
                }
                TargetTerm::Host(name) => {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
        }

        addrs.sort_unstable();
        addrs.dedup();

        addrs
            .into_iter()
            .map(|a| a.to_string())
            .chain(names)
            .collect()
    }
}

/// Parses a port expression such as `22,80,8000-8010`.
///
/// Duplicates keep their first position.
pub fn parse_ports(expr: &str) -> Result<Vec<u16>, ValidationError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField {
            field: "Ports".to_string(),
        });
    }
    let invalid = |reason: String| ValidationError::InvalidPorts {
        value: trimmed.to_string(),
        reason,
    };
    let parse_one = |s: &str| -> Result<u16, ValidationError> {
        let port = s
            .trim()
            .parse::<u16>()
            .map_err(|_| invalid(format!("'{}' is not a port number", s.trim())))?;
        if port == 0 {
            return Err(invalid("port 0 is not scannable".to_string()));
        }
        Ok(port)
    };

    let mut seen = vec![false; usize::from(u16::MAX) + 1];
    let mut out = Vec::new();
    let mut push = |p: u16, out: &mut Vec<u16>| {
        if !seen[usize::from(p)] {
            seen[usize::from(p)] = true;
            out.push(p);
        }
    };

    for part in trimmed.split(',').filter(|p| !p.trim().is_empty()) {
        if let Some((lo, hi)) = part.split_once('-') {
            let (lo, hi) = (parse_one(lo)?, parse_one(hi)?);
            if lo > hi {
                return Err(invalid(format!("range {lo}-{hi} is reversed")));
            }
            for p in lo..=hi {
                push(p, &mut out);
            }
        } else {
            push(parse_one(part)?, &mut out);
        }
    }

    if out.is_empty() {
        return Err(invalid("no ports listed".to_string()));
    }
    Ok(out)
}

/// Rejects workloads larger than [`MAX_WORK_ITEMS`].
pub fn check_workload(items: u128) -> Result<(), ValidationError> {
    if items > u128::from(MAX_WORK_ITEMS) {
        return Err(ValidationError::WorkloadTooLarge {
            items,
            max: MAX_WORK_ITEMS,
        });
    }
    Ok(())
}
