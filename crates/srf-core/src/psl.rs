//! Registrable-domain (eTLD+1) utilities
//!
//! First-party / third-party decisions compare registrable domains. Suffix
//! lookups go through the `psl` crate, which compiles in the full Public
//! Suffix List, ICANN and private sections alike.
//!
//! # Examples
//!
//! ```
//! use srf_core::psl::registrable_domain;
//!
//! assert_eq!(registrable_domain("sub.example.com"), "example.com");
//! assert_eq!(registrable_domain("sub.example.co.uk"), "example.co.uk");
//! ```

use std::net::IpAddr;

/// Get the registrable domain for a hostname.
///
/// IP addresses, single-label hosts and hosts that are themselves a public
/// suffix are returned unchanged (minus a trailing dot). The result is a
/// slice of the input.
pub fn registrable_domain(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    if host.is_empty() || is_ip_address(host) {
        return host;
    }
    psl::domain_str(host).unwrap_or(host)
}

fn is_ip_address(host: &str) -> bool {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>().is_ok()
}

/// Check if two hosts share the same registrable domain.
///
/// IP addresses are only same-site with themselves.
pub fn is_same_site(host1: &str, host2: &str) -> bool {
    registrable_domain(host1).eq_ignore_ascii_case(registrable_domain(host2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrable_domain_simple() {
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("sub.example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.sub.example.com."), "example.com");
    }

    #[test]
    fn test_registrable_domain_two_part() {
        assert_eq!(registrable_domain("sub.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("user.github.io"), "user.github.io");
    }

    #[test]
    fn test_registrable_domain_full_suffix_list() {
        assert_eq!(registrable_domain("www.shop-a.com.ar"), "shop-a.com.ar");
        assert_eq!(registrable_domain("news.example.co.il"), "example.co.il");
        assert_eq!(registrable_domain("alice.herokuapp.com"), "alice.herokuapp.com");
        assert_eq!(registrable_domain("bucket.s3.amazonaws.com"), "bucket.s3.amazonaws.com");
        // A bare public suffix has no registrable part.
        assert_eq!(registrable_domain("com.ar"), "com.ar");
    }

    #[test]
    fn test_registrable_domain_ip_and_single_label() {
        assert_eq!(registrable_domain("192.168.0.1"), "192.168.0.1");
        assert_eq!(registrable_domain("[::1]"), "[::1]");
        assert_eq!(registrable_domain("localhost"), "localhost");
    }

    #[test]
    fn test_is_same_site() {
        assert!(is_same_site("a.example.com", "b.example.com"));
        assert!(is_same_site("Example.com", "cdn.example.com"));
        assert!(!is_same_site("example.com", "example.org"));
        assert!(!is_same_site("10.0.0.1", "10.0.0.2"));
    }

    #[test]
    fn test_sites_under_shared_suffix_are_distinct() {
        assert!(!is_same_site("shop-a.com.ar", "tracker-b.com.ar"));
        assert!(!is_same_site("www.site.com.tr", "cdn.other.com.tr"));
        assert!(!is_same_site("alice.herokuapp.com", "mallory.herokuapp.com"));
        assert!(!is_same_site("app.vercel.app", "evil.vercel.app"));
        assert!(is_same_site("static.shop-a.com.ar", "shop-a.com.ar"));
    }
}
