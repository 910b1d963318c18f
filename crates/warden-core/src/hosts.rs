//! Default network and secret blocklists.
//!
//! These are immutable process-wide constants honored by the policy
//! engine before any user rules, and by sandbox host constraints as the
//! baseline deny set. They cover loopback, link-local metadata services
//! and RFC1918 ranges.

use std::net::{IpAddr, Ipv4Addr};

/// Hostnames blocked regardless of user policy.
pub const DEFAULT_BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "::1",
    "169.254.169.254",
    "metadata.google.internal",
];

/// Secret-name patterns blocked regardless of user policy.
pub const DEFAULT_BLOCKED_SECRET_PATTERNS: &[&str] =
    &["*_API_KEY", "*_SECRET", "*_TOKEN", "*_PASSWORD"];

/// Normalize a hostname for matching: lower-case, trailing dot removed.
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || octets[0] == 0
}

/// Whether a host is on the built-in deny set.
///
/// Matches the constant hostname list, then parses the host as an IP
/// address to catch loopback, link-local and RFC1918 literals that are
/// not spelled exactly like a list entry.
pub fn is_blocked_host(host: &str) -> bool {
    let normalized = normalize_host(host);
    if DEFAULT_BLOCKED_HOSTS.contains(&normalized.as_str()) {
        return true;
    }
    match normalized.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_private_ipv4(ip),
        Ok(IpAddr::V6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

/// Whether a secret name matches the built-in deny patterns.
pub fn is_blocked_secret_name(name: &str) -> bool {
    DEFAULT_BLOCKED_SECRET_PATTERNS
        .iter()
        .any(|pattern| crate::pattern::name_pattern_matches(pattern, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_metadata_hosts_are_blocked() {
        assert!(is_blocked_host("localhost"));
        assert!(is_blocked_host("LOCALHOST."));
        assert!(is_blocked_host("127.0.0.1"));
        assert!(is_blocked_host("::1"));
        assert!(is_blocked_host("169.254.169.254"));
        assert!(is_blocked_host("metadata.google.internal"));
    }

    #[test]
    fn rfc1918_literals_are_blocked() {
        assert!(is_blocked_host("10.0.0.8"));
        assert!(is_blocked_host("172.16.4.1"));
        assert!(is_blocked_host("192.168.1.20"));
        assert!(!is_blocked_host("172.32.0.1"));
        assert!(!is_blocked_host("8.8.8.8"));
    }

    #[test]
    fn public_hostnames_pass() {
        assert!(!is_blocked_host("api.example.com"));
        assert!(!is_blocked_host("example.org"));
    }

    #[test]
    fn secret_names_match_deny_patterns() {
        assert!(is_blocked_secret_name("STRIPE_API_KEY"));
        assert!(is_blocked_secret_name("DB_PASSWORD"));
        assert!(is_blocked_secret_name("SESSION_TOKEN"));
        assert!(!is_blocked_secret_name("PUBLIC_URL"));
    }
}
