//! Responses produced by handlers and decorated by middleware on the way out.

use super::{Headers, StatusCode};

/// A handler's response.
///
/// Built fluently by handlers, then adjusted in place by any middleware it
/// passes back through:
///
/// ```
/// use dogpile::http::{Response, StatusCode};
///
/// let mut response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
/// response.set_header("Cache-Control", "no-store");
///
/// assert_eq!(response.body_ref().len(), 15);
/// assert_eq!(response.headers().get("cache-control"), Some("no-store"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header. Repeated names are kept side by side.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Replaces every value of `name`.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Appends a chunk to the body. Handlers that produce output piecewise
    /// call this once per chunk; the response is complete when the handler
    /// returns it.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) {
        self.body.extend_from_slice(chunk.as_ref());
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The body bytes written so far.
    pub fn body_ref(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_headers_and_body() {
        let r = Response::new(StatusCode::NotFound)
            .header("X-Request-Id", "abc-123")
            .header("X-Request-Id", "def-456")
            .body("Not Found");
        assert_eq!(r.status(), StatusCode::NotFound);
        assert_eq!(r.headers().get_all("x-request-id").count(), 2);
        assert_eq!(r.into_body(), b"Not Found");
    }

    #[test]
    fn write_appends_chunks() {
        let mut r = Response::new(StatusCode::Ok);
        r.write("hel");
        r.write(b"lo");
        assert_eq!(r.body_ref(), b"hello");
    }

    #[test]
    fn set_header_replaces_existing() {
        let mut r = Response::new(StatusCode::Ok)
            .header("Cache-Control", "no-store")
            .header("X-Keep", "yes");
        r.set_header("cache-control", "max-age=60, must-revalidate");
        assert_eq!(
            r.headers().get("Cache-Control"),
            Some("max-age=60, must-revalidate")
        );
        assert_eq!(r.headers().get_all("cache-control").count(), 1);
        assert_eq!(r.headers().get("x-keep"), Some("yes"));
    }

    #[test]
    fn set_status_overrides() {
        let mut r = Response::new(StatusCode::Ok);
        r.set_status(StatusCode::Accepted);
        assert_eq!(r.status(), StatusCode::Accepted);
    }

    #[test]
    fn default_is_empty_ok() {
        let r = Response::default();
        assert_eq!(r.status(), StatusCode::Ok);
        assert!(r.headers().is_empty());
        assert!(r.body_ref().is_empty());
    }
}
