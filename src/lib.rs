//! # rivet
//!
//! An async HTTP/1.1 server framework written from scratch in Rust:
//! a byte-level wire parser with chunked-transfer decoding, persistent
//! connections with pipelining, a composable middleware pipeline with
//! `next`-style advancement and error handlers, and a router with
//! static-over-dynamic pattern precedence.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rivet::middleware::logger;
//! use rivet::pipeline::Flow;
//! use rivet::{Request, Response, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::new(8080));
//!     server.apply(logger());
//!     server.router_mut().get("/hello", |req: Request, mut res: Response| async move {
//!         res.json(&serde_json::json!({ "message": "ok" })).await;
//!         Flow::ok(req, res)
//!     });
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod http;
pub mod middleware;
pub mod pipeline;
pub mod router;
pub mod security;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Body, Headers, Method, Request, Response, Version};
pub use pipeline::{Flow, Middleware, Next, Pipeline, PipelineError};
pub use router::Router;
pub use server::{Server, ServerConfig, ServerError};
