//! Bearer-token auth guard.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;

use crate::pipeline::{Flow, NormalFn, normal};

/// Interface to the external token service that issues and verifies signed
/// tokens. The HMAC implementation lives outside this crate; rivet only
/// names the seam.
pub trait TokenVerifier: Send + Sync {
    /// Verifies `token` against `secret`, returning the token payload when
    /// the signature and expiry check out.
    fn verify(&self, secret: &str, token: &str) -> Option<Value>;
}

/// Auth-guard options. A missing `secret` falls back to the `TOKEN_SECRET`
/// environment variable.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub secret: Option<String>,
}

impl AuthConfig {
    /// Sets the token secret explicitly.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// Auth-guard middleware.
///
/// Expects `authorization: Bearer <token>`; a missing or unverifiable token
/// answers `401` and stops the chain. On success the token payload is
/// stored as the request's user for downstream handlers.
pub fn auth_guard(config: AuthConfig, verifier: Arc<dyn TokenVerifier>) -> NormalFn {
    let secret = config
        .secret
        .or_else(|| std::env::var("TOKEN_SECRET").ok());
    if secret.is_none() {
        warn!("auth guard has no token secret configured — all requests will be rejected");
    }
    let secret = Arc::new(secret);

    normal(move |mut req, mut res, next| {
        let secret = Arc::clone(&secret);
        let verifier = Arc::clone(&verifier);
        async move {
            let token = req
                .headers()
                .get("authorization")
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(str::to_owned);
            let Some(token) = token else {
                res.status(401);
                res.json(&json!({ "error": "Authentication required" })).await;
                return Flow::ok(req, res);
            };

            let payload = secret
                .as_deref()
                .and_then(|secret| verifier.verify(secret, &token));
            let Some(payload) = payload else {
                res.status(401);
                res.json(&json!({ "error": "Invalid or expired token" })).await;
                return Flow::ok(req, res);
            };

            req.set_user(payload);
            next.run(req, res).await
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::http::parser::{self, Parse};
    use crate::http::response::test_io::RecordingSink;
    use crate::http::{Response, SharedSink};
    use crate::pipeline::{Pipeline, terminal};

    /// Accepts any token equal to the secret; payload names the subject.
    struct EchoVerifier;

    impl TokenVerifier for EchoVerifier {
        fn verify(&self, secret: &str, token: &str) -> Option<Value> {
            (token == secret).then(|| json!({ "sub": "tester" }))
        }
    }

    async fn run(raw: &[u8]) -> (String, Option<Value>) {
        let Parse::Complete { request, .. } = parser::parse(raw) else {
            panic!("fixture request failed to parse");
        };
        let mut pipeline = Pipeline::new();
        pipeline.push(auth_guard(
            AuthConfig::default().secret("s3cret"),
            Arc::new(EchoVerifier),
        ));
        let seen_user = Arc::new(Mutex::new(None));
        let recorder = RecordingSink::default();
        let response = Response::new(SharedSink::new(recorder.clone()));
        let slot = Arc::clone(&seen_user);
        pipeline
            .execute(
                request,
                response,
                terminal(move |req, mut res: Response| {
                    let slot = Arc::clone(&slot);
                    async move {
                        *slot.lock().unwrap() = req.user().cloned();
                        res.send("in").await;
                        Flow::ok(req, res)
                    }
                }),
            )
            .await;
        let user = seen_user.lock().unwrap().clone();
        (recorder.text(), user)
    }

    #[tokio::test]
    async fn missing_token_rejected() {
        let (reply, user) = run(b"GET /private HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(user.is_none());
        assert!(reply.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(reply.ends_with(r#"{"error":"Authentication required"}"#));
    }

    #[tokio::test]
    async fn bad_token_rejected() {
        let (reply, user) =
            run(b"GET /private HTTP/1.1\r\nAuthorization: Bearer wrong\r\n\r\n").await;
        assert!(user.is_none());
        assert!(reply.ends_with(r#"{"error":"Invalid or expired token"}"#));
    }

    #[tokio::test]
    async fn valid_token_attaches_user() {
        let (reply, user) =
            run(b"GET /private HTTP/1.1\r\nAuthorization: Bearer s3cret\r\n\r\n").await;
        let user = user.expect("handler saw no user");
        assert_eq!(user["sub"].as_str(), Some("tester"));
        assert!(reply.starts_with("HTTP/1.1 200"));
        assert!(reply.ends_with("in"));
    }
}
