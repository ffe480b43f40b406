//! Forward-confirmed reverse DNS (FCrDNS) crawler verification.
//!
//! An offender is only worth blocking if it is not a legitimate search-engine
//! crawler. Crawlers publish PTR records whose forward lookup resolves back
//! to the querying address; anything else — including every resolver failure
//! kind — leaves the candidate unverified and therefore blockable.

use crate::filter::types::Verdict;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::Resolver;
use std::net::{IpAddr, Ipv4Addr};

/// Hostname suffixes of search-engine crawlers that are never blocked.
/// Matching is case-insensitive against the fully-qualified hostname; the
/// trailing root dot is part of the suffix.
pub const CRAWLER_SUFFIXES: [&str; 7] = [
    ".googlebot.com.",
    ".google.com.",
    ".yandex.com.",
    ".yandex.net.",
    ".yandex.ru.",
    ".search.msn.com.",
    ".fbsv.net.",
];

/// Seam between the detector and DNS: implemented by the resolver-backed
/// verifier below and by test stubs.
pub trait ReverseVerifier {
    fn verify(&self, addr: &str) -> Verdict;
}

/// FCrDNS verifier backed by the recursive resolver on loopback.
pub struct RdnsVerifier {
    resolver: Resolver,
}

impl RdnsVerifier {
    /// Builds a verifier against the recursive resolver at 127.0.0.1:53.
    ///
    /// Timeouts are the resolver's own; the daemon imposes no additional
    /// bound, and a slow or dead resolver degrades to `Unverified` verdicts
    /// rather than stalling the pipeline indefinitely.
    pub fn new() -> Result<Self, String> {
        let servers = NameServerConfigGroup::from_ips_clear(
            &[IpAddr::V4(Ipv4Addr::LOCALHOST)],
            53,
            true,
        );
        let config = ResolverConfig::from_parts(None, vec![], servers);
        let resolver = Resolver::new(config, ResolverOpts::default())
            .map_err(|e| format!("cannot initialize DNS resolver: {e}"))?;
        Ok(Self { resolver })
    }
}

impl ReverseVerifier for RdnsVerifier {
    /// PTR, then forward-confirm the first answer.
    ///
    /// The hostname counts as verified only when the forward lookup (A for
    /// IPv4, AAAA for IPv6) includes the original address. Any failure along
    /// the way is `Unverified`.
    fn verify(&self, addr: &str) -> Verdict {
        let ip: IpAddr = match addr.parse() {
            Ok(ip) => ip,
            Err(_) => return Verdict::Unverified,
        };

        let host = match self.resolver.reverse_lookup(ip) {
            Ok(lookup) => match lookup.iter().next() {
                Some(name) => normalize_host(&name.to_string()),
                None => return Verdict::Unverified,
            },
            Err(_) => return Verdict::Unverified,
        };

        let confirmed = match self.resolver.lookup_ip(host.as_str()) {
            Ok(forward) => forward.iter().any(|a| a == ip),
            Err(_) => false,
        };
        if !confirmed {
            return Verdict::Unverified;
        }

        if is_crawler_host(&host) {
            Verdict::Whitelisted
        } else {
            Verdict::VerifiedOther(host)
        }
    }
}

/// Ensures the fully-qualified trailing dot, which the suffix match requires.
fn normalize_host(host: &str) -> String {
    if host.ends_with('.') {
        host.to_string()
    } else {
        format!("{host}.")
    }
}

/// Case-insensitive suffix match against the crawler allowlist.
pub fn is_crawler_host(host: &str) -> bool {
    let lower = host.to_ascii_lowercase();
    CRAWLER_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}
