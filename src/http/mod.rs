//! HTTP/1.1 protocol types and wire parsing.
//!
//! This module provides the core HTTP primitives:
//! [`Method`], [`Version`], [`Headers`], [`Request`], [`Response`], and the
//! incremental wire [`parser`].

use std::fmt;

use thiserror::Error;

pub mod headers;
pub mod parser;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::{Body, Request};
pub use response::{Response, SharedSink};

/// Cap on the size of a request's header section. A buffer that grows past
/// this without a complete header block is rejected with `413`.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Cap on the size of a request body. Larger declared or decoded bodies are
/// rejected with `413`.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Returns the canonical reason phrase for a status code.
///
/// Codes outside the table map to `"Unknown"` so arbitrary integer statuses
/// still serialize to a valid status line.
///
/// # Examples
///
/// ```
/// use rivet::http::reason_phrase;
///
/// assert_eq!(reason_phrase(200), "OK");
/// assert_eq!(reason_phrase(418), "Unknown");
/// ```
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// An HTTP request method.
///
/// The set is closed: a request line carrying anything else is rejected by
/// the parser with `400 Unsupported HTTP method`.
///
/// # Examples
///
/// ```
/// use rivet::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    /// Returns the method as its uppercase wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a request line carries a method outside the
/// recognized set.
#[derive(Debug, Error)]
#[error("unsupported HTTP method")]
pub struct UnknownMethod;

impl std::str::FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(UnknownMethod),
        }
    }
}

/// An HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Returns the version as its wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trip() {
        for name in ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"] {
            let method: Method = name.parse().unwrap();
            assert_eq!(method.as_str(), name);
        }
    }

    #[test]
    fn method_rejects_unrecognized() {
        assert!("TRACE".parse::<Method>().is_err());
        assert!("get".parse::<Method>().is_err());
        assert!("".parse::<Method>().is_err());
    }

    #[test]
    fn phrases_for_known_codes() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(405), "Method Not Allowed");
        assert_eq!(reason_phrase(429), "Too Many Requests");
        assert_eq!(reason_phrase(503), "Service Unavailable");
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(reason_phrase(418), "Unknown");
        assert_eq!(reason_phrase(999), "Unknown");
    }

    #[test]
    fn version_wire_form() {
        assert_eq!(Version::Http10.as_str(), "HTTP/1.0");
        assert_eq!(Version::Http11.to_string(), "HTTP/1.1");
    }
}
