//! Request routing — map URL patterns and HTTP methods to handler functions.
//!
//! Patterns are made of literal segments and `:name` parameter segments:
//!
//! | Pattern          | Example match | Captured params |
//! |------------------|---------------|-----------------|
//! | `/users`         | `/users`      | *(none)*        |
//! | `/users/:id`     | `/users/42`   | `id → "42"`     |
//!
//! Empty segments are elided on both patterns and incoming paths, so
//! `/users/` and `/users` are equivalent.
//!
//! [`Router::resolve`] walks the full registry: among method-matching
//! routes a fully-literal (static) pattern beats a parameterized (dynamic)
//! one regardless of registration order, and first registration wins within
//! a class. When only differently-methoded routes match the path, the
//! resolution is a `405` carrying the set of allowed methods.

use std::collections::HashMap;
use std::sync::Arc;

use crate::http::parser::percent_decode;
use crate::http::{Method, Request, Response};
use crate::pipeline::{BoxFuture, Flow, NormalFn};

/// Type-erased, heap-allocated async route handler.
///
/// Handlers receive the enriched [`Request`] and its [`Response`] and give
/// both back in the returned [`Flow`]; returning [`Flow::fail`] is how a
/// handler raises into the pipeline's error flow. In practice you never
/// name this type — registration methods accept `impl IntoHandler`.
pub type Handler = Arc<dyn Fn(Request, Response) -> BoxFuture<Flow> + Send + Sync>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request, Response) -> impl Future<Output = Flow> + Send` that is
/// also `Send + Sync + 'static` implements this trait via the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler, boxing the returned future.
    fn call(&self, request: Request, response: Response) -> BoxFuture<Flow>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request, Response) -> F + Send + Sync + 'static,
    F: Future<Output = Flow> + Send + 'static,
{
    fn call(&self, request: Request, response: Response) -> BoxFuture<Flow> {
        Box::pin((self)(request, response))
    }
}

// A single path segment of a compiled pattern.
#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

fn compile(pattern: &str) -> Vec<Segment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_owned()),
            None => Segment::Literal(s.to_owned()),
        })
        .collect()
}

// A registered route binding a method + pattern to a handler and its
// route-scoped middleware.
struct Route {
    method: Method,
    segments: Vec<Segment>,
    is_static: bool,
    middleware: Vec<NormalFn>,
    handler: Handler,
}

impl Route {
    fn new(method: Method, pattern: &str, middleware: Vec<NormalFn>, handler: Handler) -> Self {
        let segments = compile(pattern);
        let is_static = segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)));
        Self {
            method,
            segments,
            is_static,
            middleware,
            handler,
        }
    }

    // Segment-by-segment match: literals compare byte-exactly, params
    // capture the (percent-decoded) path segment.
    fn match_path(&self, path_segments: &[&str]) -> Option<HashMap<String, String>> {
        if self.segments.len() != path_segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, actual) in self.segments.iter().zip(path_segments) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != actual {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), percent_decode(actual));
                }
            }
        }
        Some(params)
    }
}

/// The outcome of resolving a method + path against the route table.
pub enum Resolution {
    /// A route matched: its extracted params, route-scoped middleware, and
    /// handler.
    Match {
        params: HashMap<String, String>,
        middleware: Vec<NormalFn>,
        handler: Handler,
    },
    /// No registered pattern matches the path.
    NotFound,
    /// The path is known but not under this method.
    MethodNotAllowed { allowed: Vec<Method> },
}

/// Registry of (method, pattern, route-middleware, handler) entries.
///
/// # Examples
///
/// ```no_run
/// use rivet::pipeline::Flow;
/// use rivet::{Request, Response, Router};
///
/// let mut router = Router::new();
/// router.get("/ping", |req: Request, mut res: Response| async move {
///     res.text("pong").await;
///     Flow::ok(req, res)
/// });
/// router.get("/users/:id", |req: Request, mut res: Response| async move {
///     let id = req.param("id").unwrap_or("unknown").to_owned();
///     res.text(id).await;
///     Flow::ok(req, res)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route with no route-scoped middleware.
    pub fn add(&mut self, method: Method, pattern: &str, handler: impl IntoHandler) {
        self.add_with(method, pattern, Vec::new(), handler);
    }

    /// Registers a route with an ordered list of route-scoped middleware,
    /// run after the global pipeline and before the handler.
    pub fn add_with(
        &mut self,
        method: Method,
        pattern: &str,
        middleware: Vec<NormalFn>,
        handler: impl IntoHandler,
    ) {
        let handler: Handler = Arc::new(move |req, res| handler.call(req, res));
        self.routes
            .push(Route::new(method, pattern, middleware, handler));
    }

    /// Registers a handler for `GET` requests matching `pattern`.
    pub fn get(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.add(Method::Get, pattern, handler);
    }

    /// Registers a handler for `POST` requests matching `pattern`.
    pub fn post(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.add(Method::Post, pattern, handler);
    }

    /// Registers a handler for `PUT` requests matching `pattern`.
    pub fn put(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.add(Method::Put, pattern, handler);
    }

    /// Registers a handler for `DELETE` requests matching `pattern`.
    pub fn delete(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.add(Method::Delete, pattern, handler);
    }

    /// Registers a handler for `PATCH` requests matching `pattern`.
    pub fn patch(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.add(Method::Patch, pattern, handler);
    }

    /// Returns the number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolves a method + path against the registry.
    pub fn resolve(&self, method: Method, path: &str) -> Resolution {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut static_hit: Option<(usize, HashMap<String, String>)> = None;
        let mut dynamic_hit: Option<(usize, HashMap<String, String>)> = None;
        let mut allowed: Vec<Method> = Vec::new();

        for (index, route) in self.routes.iter().enumerate() {
            let Some(params) = route.match_path(&path_segments) else {
                continue;
            };
            if route.method == method {
                if route.is_static {
                    if static_hit.is_none() {
                        static_hit = Some((index, params));
                    }
                } else if dynamic_hit.is_none() {
                    dynamic_hit = Some((index, params));
                }
            } else if !allowed.contains(&route.method) {
                allowed.push(route.method);
            }
        }

        if let Some((index, params)) = static_hit.or(dynamic_hit) {
            let route = &self.routes[index];
            return Resolution::Match {
                params,
                middleware: route.middleware.clone(),
                handler: Arc::clone(&route.handler),
            };
        }
        if !allowed.is_empty() {
            return Resolution::MethodNotAllowed { allowed };
        }
        Resolution::NotFound
    }
}
