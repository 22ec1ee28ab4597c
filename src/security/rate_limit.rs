//! Fixed-window rate limiting keyed by client IP.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::pipeline::{Flow, NormalFn, normal};

/// Rate-limiter options.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests allowed per window per client.
    pub max_requests: u32,
    /// Body message sent with the `429`.
    pub message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
            message: "Too many requests, please try again later".to_owned(),
        }
    }
}

impl RateLimitConfig {
    /// Sets the window length.
    #[must_use]
    pub fn window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    /// Sets the per-window request budget.
    #[must_use]
    pub fn max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Sets the `429` message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

struct Window {
    count: u32,
    resets_at: SystemTime,
}

struct Buckets {
    entries: HashMap<IpAddr, Window>,
    swept_at: SystemTime,
}

/// Rate-limiting middleware.
///
/// Counts requests per client IP in fixed windows. Every response carries
/// `x-ratelimit-limit`, `x-ratelimit-remaining`, and `x-ratelimit-reset`
/// (unix seconds); a request over budget also gets `retry-after` and a
/// `429` with the configured message. Expired windows are swept inline once
/// per window. The map lives behind a lock because connections are served
/// from a multi-threaded runtime; the critical section never spans an await.
pub fn rate_limit(config: RateLimitConfig) -> NormalFn {
    let config = Arc::new(config);
    let buckets = Arc::new(Mutex::new(Buckets {
        entries: HashMap::new(),
        swept_at: SystemTime::now(),
    }));

    normal(move |req, mut res, next| {
        let config = Arc::clone(&config);
        let buckets = Arc::clone(&buckets);
        async move {
            let window = Duration::from_millis(config.window_ms);
            let key: IpAddr = req
                .remote_addr()
                .map(|addr| addr.ip())
                .unwrap_or_else(|| IpAddr::from([0, 0, 0, 0]));
            let now = SystemTime::now();

            let (count, resets_at) = {
                let mut buckets = buckets.lock().unwrap_or_else(|e| e.into_inner());
                if now.duration_since(buckets.swept_at).unwrap_or_default() >= window {
                    buckets.entries.retain(|_, w| w.resets_at > now);
                    buckets.swept_at = now;
                }
                let entry = buckets.entries.entry(key).or_insert(Window {
                    count: 0,
                    resets_at: now + window,
                });
                if now >= entry.resets_at {
                    entry.count = 0;
                    entry.resets_at = now + window;
                }
                entry.count += 1;
                (entry.count, entry.resets_at)
            };

            let limit = config.max_requests;
            let reset_unix = resets_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            res.set_header("x-ratelimit-limit", limit.to_string());
            res.set_header("x-ratelimit-remaining", limit.saturating_sub(count).to_string());
            res.set_header("x-ratelimit-reset", reset_unix.to_string());

            if count > limit {
                let retry = resets_at.duration_since(now).unwrap_or_default().as_secs();
                res.set_header("retry-after", retry.to_string());
                res.status(429);
                res.json(&json!({ "error": config.message })).await;
                return Flow::ok(req, res);
            }

            next.run(req, res).await
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::{self, Parse};
    use crate::http::response::test_io::RecordingSink;
    use crate::http::{Response, SharedSink};
    use crate::pipeline::{Pipeline, terminal};

    fn make_request() -> crate::http::Request {
        match parser::parse(b"GET /limited HTTP/1.1\r\nHost: x\r\n\r\n") {
            Parse::Complete { request, .. } => request,
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    async fn hit(pipeline: &Pipeline) -> String {
        let recorder = RecordingSink::default();
        let response = Response::new(SharedSink::new(recorder.clone()));
        pipeline
            .execute(
                make_request(),
                response,
                terminal(|req, mut res: Response| async move {
                    res.send("served").await;
                    Flow::ok(req, res)
                }),
            )
            .await;
        recorder.text()
    }

    fn header_value<'a>(reply: &'a str, name: &str) -> Option<&'a str> {
        reply
            .lines()
            .find_map(|line| line.strip_prefix(&format!("{name}: ")))
    }

    #[tokio::test]
    async fn third_request_in_window_is_limited() {
        let mut pipeline = Pipeline::new();
        pipeline.push(rate_limit(
            RateLimitConfig::default().window_ms(1_000).max_requests(2),
        ));

        let first = hit(&pipeline).await;
        assert!(first.starts_with("HTTP/1.1 200"));
        assert_eq!(header_value(&first, "x-ratelimit-limit"), Some("2"));
        assert_eq!(header_value(&first, "x-ratelimit-remaining"), Some("1"));

        let second = hit(&pipeline).await;
        assert!(second.starts_with("HTTP/1.1 200"));
        assert_eq!(header_value(&second, "x-ratelimit-remaining"), Some("0"));

        let third = hit(&pipeline).await;
        assert!(third.starts_with("HTTP/1.1 429 Too Many Requests\r\n"));
        assert_eq!(header_value(&third, "x-ratelimit-remaining"), Some("0"));
        let retry: u64 = header_value(&third, "retry-after")
            .expect("retry-after missing")
            .parse()
            .unwrap();
        assert!(retry <= 1);
        assert!(third.ends_with(r#"{"error":"Too many requests, please try again later"}"#));
    }

    #[tokio::test]
    async fn reset_header_is_unix_seconds() {
        let mut pipeline = Pipeline::new();
        pipeline.push(rate_limit(RateLimitConfig::default()));

        let reply = hit(&pipeline).await;
        let reset: u64 = header_value(&reply, "x-ratelimit-reset")
            .expect("reset header missing")
            .parse()
            .unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(reset >= now);
        assert!(reset <= now + 61);
    }

    #[tokio::test]
    async fn window_expiry_restores_budget() {
        let mut pipeline = Pipeline::new();
        pipeline.push(rate_limit(
            RateLimitConfig::default().window_ms(30).max_requests(1),
        ));

        let first = hit(&pipeline).await;
        assert!(first.starts_with("HTTP/1.1 200"));
        let second = hit(&pipeline).await;
        assert!(second.starts_with("HTTP/1.1 429"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let third = hit(&pipeline).await;
        assert!(third.starts_with("HTTP/1.1 200"));
    }
}
