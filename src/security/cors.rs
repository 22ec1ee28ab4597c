//! Cross-Origin Resource Sharing middleware.

use std::sync::Arc;

use crate::http::Method;
use crate::pipeline::{Flow, NormalFn, normal};

/// CORS policy options.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` permits every origin.
    pub origins: Vec<String>,
    /// Methods advertised on preflight.
    pub methods: Vec<String>,
    /// Request headers advertised on preflight.
    pub allowed_headers: Vec<String>,
    /// Response headers exposed to the caller.
    pub exposed_headers: Vec<String>,
    /// Whether `access-control-allow-credentials` is sent.
    pub credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_owned()],
            methods: vec![
                "GET".to_owned(),
                "POST".to_owned(),
                "PUT".to_owned(),
                "DELETE".to_owned(),
                "PATCH".to_owned(),
            ],
            allowed_headers: vec!["Content-Type".to_owned(), "Authorization".to_owned()],
            exposed_headers: Vec::new(),
            credentials: false,
            max_age: 86_400,
        }
    }
}

impl CorsConfig {
    /// Restricts the policy to a single origin.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origins = vec![origin.into()];
        self
    }

    /// Replaces the allowed-origin list.
    #[must_use]
    pub fn origins(mut self, origins: Vec<String>) -> Self {
        self.origins = origins;
        self
    }

    /// Adds a method to the preflight advertisement.
    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.methods.push(method.into());
        self
    }

    /// Adds a request header to the preflight advertisement.
    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    /// Exposes a response header to cross-origin callers.
    #[must_use]
    pub fn expose_header(mut self, header: impl Into<String>) -> Self {
        self.exposed_headers.push(header.into());
        self
    }

    /// Enables `access-control-allow-credentials`.
    #[must_use]
    pub fn credentials(mut self, credentials: bool) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the preflight cache lifetime.
    #[must_use]
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }
}

/// CORS middleware.
///
/// Sets the `access-control-*` headers on every response. With a wildcard
/// policy the origin is `*`; with an explicit list a matching request
/// origin is echoed back together with `vary: origin`, and a non-matching
/// origin gets no allow-origin header at all. `OPTIONS` preflights are
/// answered directly with an empty `204` and the method/header/max-age
/// advertisement — the rest of the chain does not run.
pub fn cors(config: CorsConfig) -> NormalFn {
    let config = Arc::new(config);
    normal(move |req, mut res, next| {
        let config = Arc::clone(&config);
        async move {
            let wildcard = config.origins.iter().any(|o| o == "*");
            let allow_origin = if wildcard {
                Some("*".to_owned())
            } else {
                req.headers()
                    .get("origin")
                    .filter(|o| config.origins.iter().any(|allowed| allowed.as_str() == *o))
                    .map(str::to_owned)
            };

            if let Some(origin) = &allow_origin {
                res.set_header("access-control-allow-origin", origin.clone());
                if !wildcard {
                    res.set_header("vary", "Origin");
                }
            }
            if config.credentials {
                res.set_header("access-control-allow-credentials", "true");
            }
            if !config.exposed_headers.is_empty() {
                res.set_header(
                    "access-control-expose-headers",
                    config.exposed_headers.join(", "),
                );
            }

            if req.method() == Method::Options {
                res.set_header("access-control-allow-methods", config.methods.join(", "));
                res.set_header(
                    "access-control-allow-headers",
                    config.allowed_headers.join(", "),
                );
                res.set_header("access-control-max-age", config.max_age.to_string());
                res.status(204);
                res.send("").await;
                return Flow::ok(req, res);
            }

            next.run(req, res).await
        }
    })
}
