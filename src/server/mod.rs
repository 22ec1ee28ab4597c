//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and hands each one to a connection driver task
//! that parses HTTP/1.1 requests out of the byte stream and dispatches them
//! through the middleware pipeline and router. HTTP/1.1 persistent
//! connections and pipelining are supported out of the box.

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::pipeline::{Middleware, Pipeline};
use crate::router::{Handler, IntoHandler, Router};

mod conn;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Structured server options, passed by the application.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind. Defaults to `0.0.0.0`.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
}

impl ServerConfig {
    /// Options for the given port on the default `0.0.0.0` interface.
    pub fn new(port: u16) -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port,
        }
    }

    /// Overrides the bind interface.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// The `host:port` string handed to the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The rivet HTTP server.
///
/// Owns the global middleware [`Pipeline`], the [`Router`], and an optional
/// `on_request` fallback used when no routes are registered.
///
/// # Examples
///
/// ```rust,no_run
/// use rivet::pipeline::Flow;
/// use rivet::{Request, Response, Server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut server = Server::new(ServerConfig::new(8080));
///     server.router_mut().get("/hello", |req: Request, mut res: Response| async move {
///         res.json(&serde_json::json!({ "message": "ok" })).await;
///         Flow::ok(req, res)
///     });
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    config: ServerConfig,
    pipeline: Pipeline,
    router: Router,
    on_request: Option<Handler>,
}

impl Server {
    /// Creates a server with an empty pipeline and router.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            pipeline: Pipeline::new(),
            router: Router::new(),
            on_request: None,
        }
    }

    /// Registers a global middleware at the end of the pipeline.
    pub fn apply(&mut self, middleware: impl Into<Middleware>) {
        self.pipeline.push(middleware);
    }

    /// Returns the route registry for registration.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Sets the fallback handler used when no routes are registered.
    pub fn on_request(&mut self, handler: impl IntoHandler) {
        self.on_request = Some(Arc::new(move |req, res| handler.call(req, res)));
    }

    /// Binds the listener and serves connections until the process ends or
    /// the listener itself fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound (e.g.
    /// port already in use, insufficient permissions).
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "rivet listening");

        let app = Arc::new(conn::App {
            pipeline: self.pipeline,
            router: self.router,
            on_request: self.on_request,
        });

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let app = Arc::clone(&app);

            tokio::spawn(async move {
                if let Err(e) = conn::drive(stream, Some(peer_addr), app).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_all_interfaces() {
        let config = ServerConfig::new(3000);
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn config_host_override() {
        let config = ServerConfig::new(3000).host("127.0.0.1");
        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
    }
}
