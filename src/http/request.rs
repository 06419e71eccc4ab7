//! Incoming requests, either parsed from HTTP/1.1 bytes with [`httparse`] or
//! built directly for in-process pipelines.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A request as seen by middleware and handlers.
///
/// The raw target (path plus `?query`) is kept verbatim; it is what response
/// caches key on.
///
/// ```
/// use dogpile::http::{Method, Request};
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.target(), "/hello?name=world");
///
/// let built = Request::new(Method::Get, "/hello?name=world").with_header("Host", "localhost");
/// assert_eq!(built.target(), request.target());
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    headers: Headers,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parses a request head from `buf`, returning the request and the offset
    /// just past the `\r\n\r\n` terminator. Everything after that offset is
    /// taken as the body. Header values that are not UTF-8 are skipped.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut head = httparse::Request::new(&mut slots);

        let httparse::Status::Complete(body_offset) = head.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        let Some(method) = head.method else {
            return Err(RequestError::MissingField { field: "method" });
        };
        let Some(target) = head.path else {
            return Err(RequestError::MissingField { field: "path" });
        };
        let Ok(method) = method.parse::<Method>();

        let mut request = Self::new(method, target);
        for header in head.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                request.headers.insert(header.name, value);
            }
        }
        request.body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((request, body_offset))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target as sent: path, then `?query` if there was one.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The target without its query string.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    pub fn query_string(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
        assert!(req.body().is_empty());
    }

    #[test]
    fn target_keeps_query() {
        let raw = b"GET /search?q=rust&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&page=2"));
        assert_eq!(req.target(), "/search?q=rust&page=2");
    }

    #[test]
    fn target_without_query_is_path() {
        let req = Request::new(Method::Get, "/foo");
        assert_eq!(req.target(), "/foo");
        assert_eq!(req.path(), "/foo");
        assert_eq!(req.query_string(), None);
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn body_follows_headers() {
        let raw = b"POST /items HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Post);
        assert_eq!(&raw[body_offset..], b"hello");
        assert_eq!(req.body().as_ref(), b"hello");
    }

    #[test]
    fn builder_sets_headers_and_body() {
        let req = Request::new(Method::Custom("PURGE".into()), "/foo")
            .with_header("X-Token", "abc")
            .with_body("payload");
        assert_eq!(req.method().as_str(), "PURGE");
        assert_eq!(req.headers().get("x-token"), Some("abc"));
        assert_eq!(req.body().as_ref(), b"payload");
    }
}
