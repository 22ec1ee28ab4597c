//! The owned request record produced by the wire parser.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use serde_json::Value;

use super::{Headers, Method, Version};

/// A decoded request body, shaped by the request's `content-type`.
///
/// Populated by the body-parser middleware; until it runs the body is
/// [`Body::Empty`].
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// `application/json` payload.
    Json(Value),
    /// `application/x-www-form-urlencoded` payload.
    Form(HashMap<String, String>),
    /// Any other non-empty payload, as lossily-decoded text.
    Raw(String),
    /// No payload.
    #[default]
    Empty,
}

impl Body {
    /// Returns the JSON value if this is a [`Body::Json`].
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the form map if this is a [`Body::Form`].
    pub fn as_form(&self) -> Option<&HashMap<String, String>> {
        match self {
            Self::Form(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the text if this is a [`Body::Raw`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Raw(text) => Some(text),
            _ => None,
        }
    }

    /// Returns `true` if no payload was parsed.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// A fully parsed HTTP/1.1 request.
///
/// Created by [`parser::parse`](super::parser::parse) from a raw byte
/// buffer, then enriched as it moves through the pipeline: the router fills
/// `params`, the body parser fills `parsed_body`, the auth guard fills
/// `user`.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: String,
    path: String,
    version: Version,
    headers: Headers,
    query: HashMap<String, String>,
    body: Bytes,
    params: HashMap<String, String>,
    parsed_body: Body,
    user: Option<Value>,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        url: String,
        path: String,
        version: Version,
        headers: Headers,
        query: HashMap<String, String>,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            url,
            path,
            version,
            headers,
            query,
            body,
            params: HashMap::new(),
            parsed_body: Body::Empty,
            user: None,
            remote_addr: None,
        }
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the raw request-target from the request line.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the request path (without the query string), undecoded.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the parsed query-string map.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Returns a query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Returns the raw request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the route parameters extracted by the router.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Returns a route parameter value by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Returns the decoded body, if a body-parsing middleware has run.
    pub fn parsed_body(&self) -> &Body {
        &self.parsed_body
    }

    /// Replaces the decoded body. Intended for body-parsing middleware.
    pub fn set_parsed_body(&mut self, body: Body) {
        self.parsed_body = body;
    }

    /// Returns the authenticated principal, if an auth middleware has run.
    pub fn user(&self) -> Option<&Value> {
        self.user.as_ref()
    }

    /// Records the authenticated principal. Intended for auth middleware.
    pub fn set_user(&mut self, user: Value) {
        self.user = Some(user);
    }

    /// Returns the peer address of the connection that carried this request.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub(crate) fn set_remote_addr(&mut self, addr: Option<SocketAddr>) {
        self.remote_addr = addr;
    }

    /// Returns `true` if the connection should be kept alive after this
    /// request.
    ///
    /// HTTP/1.1 defaults to keep-alive unless the peer sends
    /// `Connection: close`; HTTP/1.0 defaults to close unless the peer sends
    /// `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        let connection = self.headers.get("connection");
        match self.version {
            Version::Http11 => !connection.is_some_and(|c| c.eq_ignore_ascii_case("close")),
            Version::Http10 => connection.is_some_and(|c| c.eq_ignore_ascii_case("keep-alive")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::{self, Parse};
    use super::*;

    fn parse_one(raw: &[u8]) -> Request {
        match parser::parse(raw) {
            Parse::Complete { request, .. } => request,
            other => panic!("expected a complete request, got {other:?}"),
        }
    }

    #[test]
    fn keep_alive_http11_default() {
        let req = parse_one(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(req.is_keep_alive());
    }

    #[test]
    fn connection_close_http11() {
        let req = parse_one(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn http10_default_close() {
        let req = parse_one(b"GET / HTTP/1.0\r\nHost: localhost\r\n\r\n");
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn http10_keep_alive_opt_in() {
        let req = parse_one(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n");
        assert!(req.is_keep_alive());
    }

    #[test]
    fn body_accessors_narrow() {
        let json = Body::Json(serde_json::json!({"a": 1}));
        assert!(json.as_json().is_some());
        assert!(json.as_form().is_none());

        let raw = Body::Raw("hello".to_owned());
        assert_eq!(raw.as_text(), Some("hello"));

        assert!(Body::Empty.is_empty());
        assert!(!raw.is_empty());
    }

    #[test]
    fn enrichment_fields_start_empty() {
        let req = parse_one(b"GET /x HTTP/1.1\r\n\r\n");
        assert!(req.params().is_empty());
        assert!(req.parsed_body().is_empty());
        assert!(req.user().is_none());
        assert!(req.remote_addr().is_none());
    }
}
