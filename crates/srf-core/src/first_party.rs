//! First-party / third-party classification relative to a document origin

use url::{Origin, Url};

use crate::psl::is_same_site;

/// Document origin plus a one-entry cache of the last host checked.
///
/// Subresource loads from one document tend to hit the same few hosts in a
/// row, so a single cached verdict avoids most registrable-domain lookups.
#[derive(Debug, Clone)]
pub struct FirstPartyOrigin {
    origin: Origin,
    host: Option<String>,
    last_checked_host: Option<String>,
    last_checked_host_was_third_party: bool,
}

impl FirstPartyOrigin {
    pub fn new(origin: Origin) -> Self {
        let host = match &origin {
            Origin::Tuple(_, host, _) => Some(host.to_string()),
            Origin::Opaque(_) => None,
        };
        Self {
            origin,
            host,
            last_checked_host: None,
            last_checked_host_was_third_party: false,
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Host of the origin, `None` for opaque origins.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Whether `url` is third-party to the document origin. Opaque origins
    /// and URLs without a host are always third-party.
    pub fn is_third_party(&mut self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return true;
        };
        if self.last_checked_host.as_deref() == Some(host) {
            return self.last_checked_host_was_third_party;
        }
        let third_party = is_third_party_host(host, self.host.as_deref());
        self.last_checked_host = Some(host.to_string());
        self.last_checked_host_was_third_party = third_party;
        third_party
    }
}

/// Uncached check used for one-off decisions like parent document origins.
pub fn is_third_party_url(url: &Url, origin: &Origin) -> bool {
    let origin_host = match origin {
        Origin::Tuple(_, host, _) => host.to_string(),
        Origin::Opaque(_) => return true,
    };
    match url.host_str() {
        Some(host) => is_third_party_host(host, Some(&origin_host)),
        None => true,
    }
}

fn is_third_party_host(host: &str, origin_host: Option<&str>) -> bool {
    match origin_host {
        Some(origin_host) => !is_same_site(host, origin_host),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(s: &str) -> Origin {
        Url::parse(s).unwrap().origin()
    }

    #[test]
    fn test_same_site_is_first_party() {
        let mut fp = FirstPartyOrigin::new(origin("https://www.example.com"));
        assert!(!fp.is_third_party(&Url::parse("https://cdn.example.com/a.js").unwrap()));
        assert!(fp.is_third_party(&Url::parse("https://ads.other.com/a.js").unwrap()));
        assert!(!fp.is_third_party(&Url::parse("http://example.com/b.js").unwrap()));
    }

    #[test]
    fn test_neighbours_under_public_suffix_are_third_party() {
        let mut fp = FirstPartyOrigin::new(origin("https://shop-a.com.ar"));
        assert!(fp.is_third_party(&Url::parse("https://tracker-b.com.ar/t.gif").unwrap()));
        assert!(!fp.is_third_party(&Url::parse("https://img.shop-a.com.ar/p.png").unwrap()));

        let mut fp = FirstPartyOrigin::new(origin("https://alice.herokuapp.com"));
        assert!(fp.is_third_party(&Url::parse("https://mallory.herokuapp.com/x.js").unwrap()));
    }

    #[test]
    fn test_cache_tracks_last_host() {
        let mut fp = FirstPartyOrigin::new(origin("https://example.co.uk"));
        let third = Url::parse("https://tracker.net/p").unwrap();
        let first = Url::parse("https://img.example.co.uk/p").unwrap();
        assert!(fp.is_third_party(&third));
        assert!(fp.is_third_party(&third));
        assert!(!fp.is_third_party(&first));
        assert_eq!(fp.last_checked_host.as_deref(), Some("img.example.co.uk"));
        assert!(fp.is_third_party(&third));
    }

    #[test]
    fn test_opaque_origin_is_always_third_party() {
        let mut fp = FirstPartyOrigin::new(origin("data:text/html,hi"));
        assert!(fp.host().is_none());
        assert!(fp.is_third_party(&Url::parse("https://example.com/").unwrap()));
        assert!(is_third_party_url(&Url::parse("https://example.com/").unwrap(), fp.origin()));
    }

    #[test]
    fn test_is_third_party_url() {
        let o = origin("https://news.example.com");
        assert!(!is_third_party_url(&Url::parse("https://example.com/").unwrap(), &o));
        assert!(is_third_party_url(&Url::parse("https://example.org/").unwrap(), &o));
    }
}
