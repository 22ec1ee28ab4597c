//! Hardening response headers.

use crate::pipeline::{NormalFn, normal};

/// Security-header options.
#[derive(Debug, Clone, Copy)]
pub struct SecurityHeadersConfig {
    /// Whether `strict-transport-security` is sent.
    pub hsts: bool,
    /// HSTS lifetime in seconds.
    pub hsts_max_age: u64,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            hsts: true,
            hsts_max_age: 31_536_000,
        }
    }
}

impl SecurityHeadersConfig {
    /// Enables or disables the HSTS header.
    #[must_use]
    pub fn hsts(mut self, enabled: bool) -> Self {
        self.hsts = enabled;
        self
    }

    /// Sets the HSTS lifetime.
    #[must_use]
    pub fn hsts_max_age(mut self, seconds: u64) -> Self {
        self.hsts_max_age = seconds;
        self
    }
}

/// Sets the standard hardening headers on every response, then delegates.
pub fn security_headers(config: SecurityHeadersConfig) -> NormalFn {
    normal(move |req, mut res, next| async move {
        res.set_header("x-content-type-options", "nosniff");
        res.set_header("x-frame-options", "DENY");
        res.set_header("x-xss-protection", "1; mode=block");
        res.set_header("referrer-policy", "strict-origin-when-cross-origin");
        res.set_header(
            "permissions-policy",
            "camera=(), microphone=(), geolocation=()",
        );
        if config.hsts {
            res.set_header(
                "strict-transport-security",
                format!("max-age={}; includeSubDomains", config.hsts_max_age),
            );
        }
        next.run(req, res).await
    })
}
