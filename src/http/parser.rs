//! Incremental HTTP/1.1 wire parsing.
//!
//! [`parse`] inspects the front of a connection's receive buffer and either
//! produces one complete [`Request`] plus the number of bytes it consumed,
//! reports that more bytes are needed, or rejects the stream as unframeable.
//! The request head (request line + header block) goes through [`httparse`];
//! body framing, query decoding, and the resource limits are handled here.
//!
//! The parser is pure: it never blocks, never mutates its input, and only
//! allocates the request record it returns. The caller owns buffer
//! advancement, which is what makes pipelining work — after a
//! [`Parse::Complete`] the driver drops exactly `consumed` bytes and calls
//! back in for the next queued request.

use std::collections::HashMap;

use bytes::Bytes;
use percent_encoding::percent_decode_str;

use super::{Headers, MAX_BODY_BYTES, MAX_HEADER_BYTES, Method, Request, Version};

/// Maximum number of headers supported per request.
const MAX_HEADERS: usize = 64;

/// Outcome of attempting to parse the next request out of a buffer.
#[derive(Debug)]
pub enum Parse {
    /// Not enough bytes buffered yet; read more and retry.
    Incomplete,
    /// One complete request, and the count of bytes it consumed from the
    /// front of the buffer.
    Complete { request: Request, consumed: usize },
    /// The bytes cannot be framed as a request. The connection must answer
    /// with `status` and close: no further framing can be trusted.
    Invalid { status: u16, message: &'static str },
}

/// Parses the next HTTP/1.1 request from the front of `buf`.
pub fn parse(buf: &[u8]) -> Parse {
    let Some(header_end) = find(buf, b"\r\n\r\n") else {
        if buf.len() > MAX_HEADER_BYTES {
            return Parse::Invalid {
                status: 413,
                message: "Headers too large",
            };
        }
        return Parse::Incomplete;
    };

    if header_end == 0 {
        return Parse::Invalid {
            status: 400,
            message: "Empty request",
        };
    }

    let body_start = header_end + 4;
    let head = &buf[..body_start];

    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Request::new(&mut raw_headers);
    match raw.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Parse::Incomplete,
        Err(e) => return invalid_head(e),
    }

    let (Some(method_str), Some(target), Some(minor)) = (raw.method, raw.path, raw.version) else {
        return Parse::Invalid {
            status: 400,
            message: "Malformed request line",
        };
    };

    let Ok(method) = method_str.parse::<Method>() else {
        return Parse::Invalid {
            status: 400,
            message: "Unsupported HTTP method",
        };
    };

    let version = match minor {
        0 => Version::Http10,
        _ => Version::Http11,
    };

    let url = target.to_owned();
    let (path, raw_query) = match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), query),
        None => (target.to_owned(), ""),
    };
    let query = parse_query(raw_query);

    let mut headers = Headers::with_capacity(raw.headers.len());
    for header in raw.headers.iter() {
        if let Ok(value) = std::str::from_utf8(header.value) {
            headers.insert(header.name, value.trim());
        }
    }

    // Body framing: chunked transfer takes precedence over content-length;
    // anything else is an empty body.
    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));

    if chunked {
        return match decode_chunked(&buf[body_start..]) {
            Ok(Some((body, used))) => Parse::Complete {
                request: Request::new(method, url, path, version, headers, query, body),
                consumed: body_start + used,
            },
            Ok(None) => Parse::Incomplete,
            Err((status, message)) => Parse::Invalid { status, message },
        };
    }

    let declared = headers
        .get("content-length")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if declared > MAX_BODY_BYTES {
        return Parse::Invalid {
            status: 413,
            message: "Payload too large",
        };
    }
    if buf.len() - body_start < declared {
        return Parse::Incomplete;
    }

    let body = if declared > 0 {
        Bytes::copy_from_slice(&buf[body_start..body_start + declared])
    } else {
        Bytes::new()
    };

    Parse::Complete {
        request: Request::new(method, url, path, version, headers, query, body),
        consumed: body_start + declared,
    }
}

fn invalid_head(error: httparse::Error) -> Parse {
    match error {
        httparse::Error::TooManyHeaders => Parse::Invalid {
            status: 413,
            message: "Headers too large",
        },
        httparse::Error::Version => Parse::Invalid {
            status: 400,
            message: "Malformed HTTP version",
        },
        httparse::Error::HeaderName | httparse::Error::HeaderValue => Parse::Invalid {
            status: 400,
            message: "Malformed header line",
        },
        _ => Parse::Invalid {
            status: 400,
            message: "Malformed request line",
        },
    }
}

/// Decodes a chunked body from the bytes following the header section.
///
/// Returns `Ok(None)` until the `0\r\n\r\n` terminator has been buffered,
/// then the concatenated chunk payloads plus the byte count through the end
/// of the terminator.
fn decode_chunked(region: &[u8]) -> Result<Option<(Bytes, usize)>, (u16, &'static str)> {
    const TERMINATOR: &[u8] = b"0\r\n\r\n";

    let Some(terminator) = find(region, TERMINATOR) else {
        return Ok(None);
    };
    let used = terminator + TERMINATOR.len();

    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        let Some(line_len) = find(&region[pos..], b"\r\n") else {
            return Err((400, "Invalid chunk size"));
        };
        let size = std::str::from_utf8(&region[pos..pos + line_len])
            .ok()
            .and_then(|line| usize::from_str_radix(line.trim(), 16).ok())
            .ok_or((400, "Invalid chunk size"))?;
        pos += line_len + 2;

        if size == 0 {
            break;
        }
        if pos + size > region.len() {
            return Err((400, "Incomplete chunk data"));
        }
        if body.len() + size > MAX_BODY_BYTES {
            return Err((413, "Payload too large"));
        }
        body.extend_from_slice(&region[pos..pos + size]);
        pos += size + 2; // skip the CRLF trailing the chunk data
    }

    Ok(Some((Bytes::from(body), used)))
}

/// Parses a query string: pairs split on `&`, key/value on the first `=`,
/// both sides percent-decoded, duplicate keys last-write-wins. A bare key
/// maps to the empty string. `+` is NOT folded to space here — that rule
/// applies to form bodies only.
fn parse_query(raw: &str) -> HashMap<String, String> {
    let mut query = HashMap::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        query.insert(percent_decode(key), percent_decode(value));
    }
    query
}

/// Lossy percent-decoding shared by the query parser, the form-body parser,
/// and route-parameter extraction.
pub(crate) fn percent_decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
