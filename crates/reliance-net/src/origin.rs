//! Origin model for same-origin checks.
//!
//! The worker only handles requests for its own origin; everything else
//! is forwarded untouched.

use url::Url;

/// A web origin (scheme + host + port).
///
/// `data:`, `file:` and similar URLs have opaque origins, which are never
/// same-origin with anything, themselves included. `blob:` URLs take the
/// origin of the URL they wrap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(url::Origin);

impl Origin {
    pub fn from_url(url: &Url) -> Self {
        Self(url.origin())
    }

    /// Scheme, host and effective port all equal.
    pub fn same_origin(&self, other: &Origin) -> bool {
        self.0.is_tuple() && self.0 == other.0
    }

    /// Whether `url` belongs to this origin.
    pub fn contains(&self, url: &Url) -> bool {
        self.same_origin(&Origin::from_url(url))
    }

    pub fn is_opaque(&self) -> bool {
        !self.0.is_tuple()
    }

    /// `Origin` header form; `null` when opaque.
    pub fn serialize(&self) -> String {
        self.0.ascii_serialization()
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(url: &str) -> Origin {
        Origin::from_url(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_same_origin_ignores_path_and_host_case() {
        assert!(origin("https://App.example.com/a").same_origin(&origin("https://app.example.com/b?x=1")));
    }

    #[test]
    fn test_default_port_is_implicit() {
        assert!(origin("https://example.com:443/").same_origin(&origin("https://example.com/")));
        assert!(!origin("http://localhost:3000/").same_origin(&origin("http://localhost/")));
    }

    #[test]
    fn test_scheme_mismatch() {
        assert!(!origin("http://example.com/").same_origin(&origin("https://example.com/")));
    }

    #[test]
    fn test_opaque_never_matches() {
        let data = origin("data:text/plain,hi");
        assert!(data.is_opaque());
        assert!(!data.same_origin(&data.clone()));
    }

    #[test]
    fn test_blob_uses_inner_origin() {
        assert!(origin("blob:http://localhost:3000/6b1f").same_origin(&origin("http://localhost:3000/")));
    }

    #[test]
    fn test_serialize() {
        assert_eq!(origin("https://example.com/x").serialize(), "https://example.com");
        assert_eq!(origin("http://localhost:3000/").to_string(), "http://localhost:3000");
        assert_eq!(origin("data:,x").serialize(), "null");
    }

    #[test]
    fn test_contains() {
        let app = origin("http://localhost:3000/");
        assert!(app.contains(&Url::parse("http://localhost:3000/_next/static/a.js").unwrap()));
        assert!(!app.contains(&Url::parse("https://fonts.gstatic.com/a.woff2").unwrap()));
    }
}
