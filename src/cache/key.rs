use std::fmt;

use crate::Request;

const STALE_SUFFIX: &str = ".stale";

/// Identifies a cached response: the request target, query string included.
///
/// The same key addresses the entry itself and, with a `.stale` suffix, its
/// refresh marker.
///
/// # Examples
///
/// ```
/// use dogpile::cache::CacheKey;
/// use dogpile::http::Request;
///
/// let raw = b"GET /products?page=2 HTTP/1.1\r\nHost: shop\r\n\r\n";
/// let (request, _) = Request::parse(raw).unwrap();
/// let key = CacheKey::from_request(&request);
///
/// assert_eq!(key.as_str(), "/products?page=2");
/// assert_eq!(key.stale(), "/products?page=2.stale");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Keys on the raw request target, so `/a?x=1` and `/a?x=2` are
    /// cached separately.
    pub fn from_request(request: &Request) -> Self {
        Self(request.target().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the refresh marker paired with this entry.
    pub fn stale(&self) -> String {
        format!("{}{STALE_SUFFIX}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_for(target: &str) -> CacheKey {
        let raw = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        CacheKey::from_request(&req)
    }

    #[test]
    fn query_string_is_part_of_key() {
        assert_ne!(key_for("/search?q=a"), key_for("/search?q=b"));
        assert_ne!(key_for("/search"), key_for("/search?q=a"));
    }

    #[test]
    fn stale_key_appends_suffix() {
        assert_eq!(key_for("/foo").stale(), "/foo.stale");
    }
}
