//! HTTP/1.1 response building and emission.
//!
//! A [`Response`] accumulates a status code and headers, then emits exactly
//! once onto the connection through a [`SharedSink`]. The sink handle is
//! cloneable so the connection driver keeps one for the lifetime of the
//! socket while each request gets its own response with its own
//! `headers_sent` latch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Headers, reason_phrase};

/// Cloneable handle on a connection's write half.
///
/// Writes are serialized behind an async mutex so a response emission is
/// atomic with respect to any other holder of the handle. A failed write
/// latches the sink as broken; the driver drops such connections without
/// retrying.
#[derive(Clone)]
pub struct SharedSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    sink: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    broken: AtomicBool,
}

impl SharedSink {
    /// Wraps a write half in a shareable handle.
    pub fn new(sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                sink: Mutex::new(Box::new(sink)),
                broken: AtomicBool::new(false),
            }),
        }
    }

    /// Returns `true` once a write on this sink has failed.
    pub fn is_broken(&self) -> bool {
        self.inner.broken.load(Ordering::Acquire)
    }

    pub(crate) async fn write_all(&self, bytes: &[u8]) {
        let mut sink = self.inner.sink.lock().await;
        let result = async {
            sink.write_all(bytes).await?;
            sink.flush().await
        }
        .await;
        if let Err(e) = result {
            debug!(error = %e, "socket write failed — dropping connection");
            self.inner.broken.store(true, Ordering::Release);
        }
    }
}

/// An HTTP/1.1 response bound to a connection.
///
/// Setters are chainable; the terminal operations ([`send`](Self::send),
/// [`json`](Self::json), [`text`](Self::text), [`html`](Self::html),
/// [`send_status`](Self::send_status)) serialize and emit the response.
/// Only the first emission writes anything — later calls are silently
/// dropped, which is what guarantees at most one response per request no
/// matter how many middleware try to terminate.
pub struct Response {
    status: u16,
    headers: Headers,
    sent: bool,
    sink: SharedSink,
}

impl Response {
    /// Creates a response bound to a connection sink. Status defaults to 200.
    pub fn new(sink: SharedSink) -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            sent: false,
            sink,
        }
    }

    /// Sets the status code.
    pub fn status(&mut self, code: u16) -> &mut Self {
        self.status = code;
        self
    }

    /// Returns the current status code.
    pub fn status_code(&self) -> u16 {
        self.status
    }

    /// Sets a header, lowercasing the name.
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Removes a header by name. Returns `true` if it was present.
    pub fn remove_header(&mut self, name: &str) -> bool {
        self.headers.remove(name)
    }

    /// Returns `true` once this response has been emitted.
    pub fn headers_sent(&self) -> bool {
        self.sent
    }

    /// Emits the response with the given body. Second and later calls on the
    /// same response are no-ops.
    ///
    /// Before serialization the response auto-populates `content-length`
    /// from the body, `content-type` (`text/plain; charset=utf-8`, only for
    /// a non-empty body with no explicit type), and `date`.
    pub async fn send(&mut self, body: impl AsRef<[u8]>) {
        if self.sent {
            debug!("response already emitted — dropping duplicate send");
            return;
        }
        self.sent = true;

        let body = body.as_ref();
        if !self.headers.contains("content-length") {
            self.headers.insert("content-length", body.len().to_string());
        }
        if !body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("content-type", "text/plain; charset=utf-8");
        }
        if !self.headers.contains("date") {
            self.headers
                .insert("date", httpdate::fmt_http_date(SystemTime::now()));
        }

        let frame = self.serialize(body);
        self.sink.write_all(&frame).await;
    }

    /// Emits `value` serialized as JSON with
    /// `content-type: application/json; charset=utf-8`.
    pub async fn json<T: Serialize + ?Sized>(&mut self, value: &T) {
        let body = match serde_json::to_vec(value) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "response body failed to serialize");
                self.status = 500;
                br#"{"error":"Internal Server Error"}"#.to_vec()
            }
        };
        self.headers
            .insert("content-type", "application/json; charset=utf-8");
        self.send(body).await;
    }

    /// Emits a plain-text body.
    pub async fn text(&mut self, body: impl AsRef<str>) {
        self.headers
            .insert("content-type", "text/plain; charset=utf-8");
        self.send(body.as_ref().as_bytes()).await;
    }

    /// Emits an HTML body.
    pub async fn html(&mut self, body: impl AsRef<str>) {
        self.headers
            .insert("content-type", "text/html; charset=utf-8");
        self.send(body.as_ref().as_bytes()).await;
    }

    /// Sets the status and emits its reason phrase as a plain-text body.
    pub async fn send_status(&mut self, code: u16) {
        self.status = code;
        self.send(reason_phrase(code)).await;
    }

    /// Serializes the status line, headers, and body into one wire frame so
    /// the emission is a single write.
    fn serialize(&self, body: &[u8]) -> BytesMut {
        let estimated = 128 + self.headers.len() * 64 + body.len();
        let mut buf = BytesMut::with_capacity(estimated);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status,
                reason_phrase(self.status)
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);
        if !body.is_empty() {
            buf.put(body);
        }
        buf
    }
}
