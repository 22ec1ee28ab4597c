//! Middleware pipeline — an ordered chain of normal and error-handling
//! middleware walked with `next`-style advancement.
//!
//! ## Core types
//!
//! - [`Middleware`] — a tagged entry: [`Middleware::Normal`] runs in ok
//!   state, [`Middleware::ErrorHandler`] runs once an error is in flight.
//! - [`Next`] — the continuation handed to each entry; [`Next::run`]
//!   resumes the walk, [`Next::fail`] resumes it in error state.
//! - [`Flow`] — the value every walk returns: the request and response
//!   travel back to the caller, plus any error still pending.
//! - [`Pipeline`] — the registered chain, with [`execute`](Pipeline::execute)
//!   for the full walk and [`handle_error`](Pipeline::handle_error) for the
//!   error-handlers-only walk.
//! - [`run_stack`] — the route-scoped sequential runner: normal middleware
//!   only, first error stops the walk and is surfaced to the caller.
//!
//! ## Walk rules
//!
//! In ok state, normal entries are invoked and error handlers are skipped;
//! in error state the reverse. Calling `next.fail(e, ..)` switches the walk
//! to error state; an error handler calling `next.run(..)` clears it. The
//! walk checks the response's `headers_sent` latch before every step and
//! terminates silently once a response has been emitted. Exhausting the
//! chain in ok state invokes the terminal handler; exhausting it in error
//! state emits the default `500` JSON body carrying the error message.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::http::{Request, Response};

/// Boxed, sendable future — the erased return type of middleware, handlers,
/// and terminals.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An error raised by a middleware or handler, carried through the chain in
/// error state until an error handler consumes it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineError {
    message: String,
}

impl PipelineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for PipelineError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for PipelineError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// The value threaded back out of a walk: ownership of the request and
/// response returns to the caller, along with any error the walk did not
/// handle itself (sequential stacks surface errors this way).
pub struct Flow {
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) error: Option<PipelineError>,
}

impl Flow {
    /// A completed walk step with no pending error.
    pub fn ok(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            error: None,
        }
    }

    /// A walk step that raised. From a handler this is the equivalent of
    /// throwing: the pipeline routes it into the error-handler chain.
    pub fn fail(request: Request, response: Response, error: impl Into<PipelineError>) -> Self {
        Self {
            request,
            response,
            error: Some(error.into()),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    pub fn into_parts(self) -> (Request, Response, Option<PipelineError>) {
        (self.request, self.response, self.error)
    }
}

/// Type-erased normal middleware: `(request, response, next)`.
pub type NormalFn = Arc<dyn Fn(Request, Response, Next) -> BoxFuture<Flow> + Send + Sync>;

/// Type-erased error-handling middleware: `(error, request, response, next)`.
pub type ErrorFn =
    Arc<dyn Fn(PipelineError, Request, Response, Next) -> BoxFuture<Flow> + Send + Sync>;

/// Type-erased terminal handler invoked when the chain exhausts in ok state.
pub type Terminal = Arc<dyn Fn(Request, Response) -> BoxFuture<Flow> + Send + Sync>;

/// Wraps an async closure as a [`NormalFn`].
pub fn normal<F, Fut>(f: F) -> NormalFn
where
    F: Fn(Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Arc::new(move |req, res, next| Box::pin(f(req, res, next)))
}

/// Wraps an async closure as an [`ErrorFn`].
pub fn error_handler<F, Fut>(f: F) -> ErrorFn
where
    F: Fn(PipelineError, Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Arc::new(move |err, req, res, next| Box::pin(f(err, req, res, next)))
}

/// Wraps an async closure as a [`Terminal`].
pub fn terminal<F, Fut>(f: F) -> Terminal
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Arc::new(move |req, res| Box::pin(f(req, res)))
}

/// A single registered pipeline entry.
#[derive(Clone)]
pub enum Middleware {
    /// Runs in ok state; skipped while an error is in flight.
    Normal(NormalFn),
    /// Runs only while an error is in flight.
    ErrorHandler(ErrorFn),
}

impl From<NormalFn> for Middleware {
    fn from(f: NormalFn) -> Self {
        Self::Normal(f)
    }
}

impl From<ErrorFn> for Middleware {
    fn from(f: ErrorFn) -> Self {
        Self::ErrorHandler(f)
    }
}

enum Mode {
    /// The full pipeline: exhaustion in ok state invokes the terminal.
    Full { terminal: Terminal },
    /// Error handlers only; exhaustion emits the default 500.
    ErrorsOnly,
    /// Route-scoped stack: the first error stops the walk and is returned.
    Sequential,
}

struct Chain {
    entries: Vec<Middleware>,
    mode: Mode,
}

/// Continuation into the remainder of the chain for one request.
///
/// Middleware receive a `Next` and either resume the walk with
/// [`run`](Self::run), resume it in error state with [`fail`](Self::fail),
/// or terminate the request by emitting a response and returning without
/// calling either.
#[derive(Clone)]
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    /// Resumes the walk in ok state. From an error handler this clears the
    /// in-flight error.
    pub fn run(self, request: Request, response: Response) -> BoxFuture<Flow> {
        walk(self.chain, self.index, None, request, response)
    }

    /// Resumes the walk in error state, skipping normal middleware until an
    /// error handler picks the error up.
    pub fn fail(
        self,
        error: impl Into<PipelineError>,
        request: Request,
        response: Response,
    ) -> BoxFuture<Flow> {
        walk(self.chain, self.index, Some(error.into()), request, response)
    }
}

fn walk(
    chain: Arc<Chain>,
    mut index: usize,
    mut error: Option<PipelineError>,
    request: Request,
    mut response: Response,
) -> BoxFuture<Flow> {
    Box::pin(async move {
        // An emitted response resolves the request: the rest of the chain
        // and the terminal are skipped.
        if response.headers_sent() {
            if let Some(e) = error {
                debug!(error = %e, "error raised after response emission");
            }
            return Flow::ok(request, response);
        }

        while index < chain.entries.len() {
            if matches!(chain.mode, Mode::Sequential) && error.is_some() {
                return Flow {
                    request,
                    response,
                    error,
                };
            }
            match (&chain.entries[index], error.take()) {
                (Middleware::Normal(f), None) => {
                    let next = Next {
                        chain: Arc::clone(&chain),
                        index: index + 1,
                    };
                    return f(request, response, next).await;
                }
                (Middleware::ErrorHandler(f), Some(e)) => {
                    let next = Next {
                        chain: Arc::clone(&chain),
                        index: index + 1,
                    };
                    return f(e, request, response, next).await;
                }
                (_, pending) => {
                    error = pending;
                    index += 1;
                }
            }
        }

        match &chain.mode {
            Mode::Sequential => Flow {
                request,
                response,
                error,
            },
            Mode::ErrorsOnly => {
                let message = error.map(|e| e.message).unwrap_or_default();
                emit_fallback(&mut response, &message).await;
                Flow::ok(request, response)
            }
            Mode::Full { terminal } => match error {
                Some(e) => {
                    emit_fallback(&mut response, e.message()).await;
                    Flow::ok(request, response)
                }
                None => {
                    let terminal = Arc::clone(terminal);
                    let entries = chain.entries.clone();
                    match terminal(request, response).await {
                        Flow {
                            request,
                            response,
                            error: None,
                        } => Flow::ok(request, response),
                        Flow {
                            request,
                            response,
                            error: Some(e),
                        } => {
                            if response.headers_sent() {
                                warn!(error = %e, "handler failed after response was emitted");
                                Flow::ok(request, response)
                            } else {
                                run_error_chain(entries, e, request, response).await
                            }
                        }
                    }
                }
            },
        }
    })
}

/// Emits the default `500` JSON body when a walk exhausts with an
/// unhandled error (or with nothing emitted at all on the error-only path).
async fn emit_fallback(response: &mut Response, message: &str) {
    let message = if message.is_empty() {
        "Internal Server Error"
    } else {
        message
    };
    response.status(500);
    response.json(&json!({ "error": message })).await;
}

async fn run_error_chain(
    entries: Vec<Middleware>,
    error: PipelineError,
    request: Request,
    response: Response,
) -> Flow {
    let handlers: Vec<Middleware> = entries
        .into_iter()
        .filter(|entry| matches!(entry, Middleware::ErrorHandler(_)))
        .collect();
    let chain = Arc::new(Chain {
        entries: handlers,
        mode: Mode::ErrorsOnly,
    });
    walk(chain, 0, Some(error), request, response).await
}

/// The ordered middleware chain applied to every request.
#[derive(Default)]
pub struct Pipeline {
    stack: Vec<Middleware>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a middleware at the end of the chain. Accepts a
    /// [`Middleware`], a [`NormalFn`], or an [`ErrorFn`].
    pub fn push(&mut self, middleware: impl Into<Middleware>) {
        self.stack.push(middleware.into());
    }

    /// Returns the number of registered middleware.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Returns `true` if no middleware are registered.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Walks the chain with `request`/`response`, invoking `terminal` if the
    /// walk exhausts in ok state. A terminal that returns an error flow is
    /// routed into the error-handler chain; an error that survives the walk
    /// emits the default 500.
    pub async fn execute(&self, request: Request, response: Response, terminal: Terminal) -> Flow {
        let chain = Arc::new(Chain {
            entries: self.stack.clone(),
            mode: Mode::Full { terminal },
        });
        walk(chain, 0, None, request, response).await
    }

    /// Walks only the registered error handlers with `error` in flight.
    /// Used when a failure surfaces after the normal walk has completed,
    /// e.g. out of a route-scoped stack or a route handler.
    pub async fn handle_error(
        &self,
        error: impl Into<PipelineError>,
        request: Request,
        response: Response,
    ) -> Flow {
        run_error_chain(self.stack.clone(), error.into(), request, response).await
    }
}

/// Runs a route-scoped stack of normal middleware in order.
///
/// Unlike [`Pipeline::execute`] this never invokes error handlers: the first
/// error stops the walk and comes back in [`Flow::error`] for the caller to
/// forward into [`Pipeline::handle_error`]. A middleware that emits a
/// response stops the walk with no error.
pub async fn run_stack(stack: &[NormalFn], request: Request, response: Response) -> Flow {
    let entries = stack.iter().cloned().map(Middleware::Normal).collect();
    let chain = Arc::new(Chain {
        entries,
        mode: Mode::Sequential,
    });
    walk(chain, 0, None, request, response).await
}
