//! A small JSON API on top of rivet: an in-memory posts store with an
//! auth-guarded create route and the full middleware stack.
//!
//! Run with `cargo run --example api`, then:
//!
//! ```text
//! curl http://127.0.0.1:8080/posts
//! curl -X POST http://127.0.0.1:8080/posts \
//!     -H 'Authorization: Bearer demo-secret' \
//!     -H 'Content-Type: application/json' \
//!     -d '{"title":"hello"}'
//! ```

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use rivet::middleware::{body_parser, logger};
use rivet::pipeline::{Flow, normal};
use rivet::security::{
    AuthConfig, CorsConfig, RateLimitConfig, SecurityHeadersConfig, TokenVerifier, auth_guard,
    cors, rate_limit, security_headers,
};
use rivet::{Method, Request, Response, Server, ServerConfig};

/// Demo stand-in for the real HMAC token service: the token must equal the
/// configured secret.
struct StaticSecretVerifier;

impl TokenVerifier for StaticSecretVerifier {
    fn verify(&self, secret: &str, token: &str) -> Option<Value> {
        (token == secret).then(|| json!({ "sub": "demo-user" }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut server = Server::new(ServerConfig::new(8080).host("127.0.0.1"));

    server.apply(logger());
    server.apply(security_headers(SecurityHeadersConfig::default()));
    server.apply(cors(CorsConfig::default()));
    server.apply(rate_limit(RateLimitConfig::default()));
    server.apply(body_parser());

    let posts: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let guard = auth_guard(
        AuthConfig::default().secret("demo-secret"),
        Arc::new(StaticSecretVerifier),
    );

    let router = server.router_mut();

    router.get("/health", |req: Request, mut res: Response| async move {
        res.json(&json!({ "status": "ok" })).await;
        Flow::ok(req, res)
    });

    {
        let posts = Arc::clone(&posts);
        router.get("/posts", move |req: Request, mut res: Response| {
            let posts = Arc::clone(&posts);
            async move {
                let all = posts.lock().unwrap().clone();
                res.json(&all).await;
                Flow::ok(req, res)
            }
        });
    }

    {
        let posts = Arc::clone(&posts);
        router.get("/posts/:id", move |req: Request, mut res: Response| {
            let posts = Arc::clone(&posts);
            async move {
                let index: usize = match req.param("id").and_then(|id| id.parse().ok()) {
                    Some(index) => index,
                    None => {
                        res.status(400);
                        res.json(&json!({ "error": "Invalid post id" })).await;
                        return Flow::ok(req, res);
                    }
                };
                let post = posts.lock().unwrap().get(index).cloned();
                match post {
                    Some(post) => res.json(&post).await,
                    None => {
                        res.status(404);
                        res.json(&json!({ "error": "Post not found" })).await;
                    }
                }
                Flow::ok(req, res)
            }
        });
    }

    {
        let posts = Arc::clone(&posts);
        router.add_with(
            Method::Post,
            "/posts",
            vec![guard, require_json()],
            move |req: Request, mut res: Response| {
                let posts = Arc::clone(&posts);
                async move {
                    let Some(body) = req.parsed_body().as_json().cloned() else {
                        return Flow::fail(req, res, "request body vanished after validation");
                    };
                    let author = req
                        .user()
                        .and_then(|u| u["sub"].as_str())
                        .unwrap_or("anonymous")
                        .to_owned();
                    let post = json!({ "author": author, "post": body });
                    {
                        let mut all = posts.lock().unwrap();
                        all.push(post.clone());
                    }
                    res.status(201);
                    res.json(&post).await;
                    Flow::ok(req, res)
                }
            },
        );
    }

    server.run().await?;
    Ok(())
}

/// Route middleware: creation requires a JSON body.
fn require_json() -> rivet::pipeline::NormalFn {
    normal(|req, mut res, next| async move {
        if req.parsed_body().as_json().is_none() {
            res.status(400);
            res.json(&json!({ "error": "Expected a JSON body" })).await;
            return Flow::ok(req, res);
        }
        next.run(req, res).await
    })
}
