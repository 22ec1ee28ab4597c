//! Per-connection driver.
//!
//! One driver per accepted connection. It owns the rolling receive buffer,
//! repeatedly drains complete requests out of it (supporting pipelined
//! requests within a single read), runs each through the pipeline with the
//! router dispatch as the terminal handler, and keeps the connection open
//! per the keep-alive rules. Framing errors and the 30 s idle timeout end
//! the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::http::parser::{self, Parse};
use crate::http::{Response, SharedSink};
use crate::pipeline::{self, Flow, Pipeline, Terminal};
use crate::router::{Handler, Resolution, Router};

/// Idle-connection timeout: a connection with no bytes received for this
/// long is closed without a response.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The request-handling surface shared by every connection task.
pub(crate) struct App {
    pub(crate) pipeline: Pipeline,
    pub(crate) router: Router,
    pub(crate) on_request: Option<Handler>,
}

/// Drives one connection over its lifetime.
///
/// Generic over the stream so tests can exercise the full driver against an
/// in-memory duplex transport.
pub(crate) async fn drive<S>(
    stream: S,
    peer: Option<SocketAddr>,
    app: Arc<App>,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let sink = SharedSink::new(writer);
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let terminal = route_terminal(&app);

    loop {
        let read = match timeout(IDLE_TIMEOUT, reader.read_buf(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                debug!("idle timeout — closing connection");
                return Ok(());
            }
        };
        if read == 0 {
            debug!("connection closed by peer");
            return Ok(());
        }

        // Drain every complete request already buffered before reading
        // again: pipelined requests get their responses in receive order.
        loop {
            match parser::parse(&buf) {
                Parse::Incomplete => break,
                Parse::Invalid { status, message } => {
                    warn!(status, message, "unframeable request — closing");
                    reject(&sink, status, message).await;
                    return Ok(());
                }
                Parse::Complete {
                    mut request,
                    consumed,
                } => {
                    buf.advance(consumed);

                    let keep_alive = request.is_keep_alive();
                    request.set_remote_addr(peer);
                    let mut response = Response::new(sink.clone());
                    response.set_header(
                        "connection",
                        if keep_alive { "keep-alive" } else { "close" },
                    );

                    let flow = app
                        .pipeline
                        .execute(request, response, Arc::clone(&terminal))
                        .await;
                    if !flow.response().headers_sent() {
                        // A middleware abandoned the chain without answering;
                        // the idle timer will eventually reap the connection.
                        warn!("pipeline finished without emitting a response");
                    }

                    if sink.is_broken() || !keep_alive {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Answers a framing error. No further bytes on this connection can be
/// trusted, so the response always closes.
async fn reject(sink: &SharedSink, status: u16, message: &str) {
    let mut response = Response::new(sink.clone());
    response.status(status).set_header("connection", "close");
    response.json(&json!({ "error": message })).await;
}

/// The pipeline terminal: dispatch through the router.
fn route_terminal(app: &Arc<App>) -> Terminal {
    let app = Arc::clone(app);
    pipeline::terminal(move |req, res| dispatch(Arc::clone(&app), req, res))
}

async fn dispatch(app: Arc<App>, mut request: crate::http::Request, mut response: Response) -> Flow {
    if app.router.is_empty() {
        if let Some(fallback) = &app.on_request {
            return fallback(request, response).await;
        }
        response.send("OK").await;
        return Flow::ok(request, response);
    }

    match app.router.resolve(request.method(), request.path()) {
        Resolution::NotFound => {
            response.status(404);
            response.json(&json!({ "error": "Not Found" })).await;
            Flow::ok(request, response)
        }
        Resolution::MethodNotAllowed { allowed } => {
            let allow = allowed
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            response.status(405).set_header("allow", allow);
            response.json(&json!({ "error": "Method Not Allowed" })).await;
            Flow::ok(request, response)
        }
        Resolution::Match {
            params,
            middleware,
            handler,
        } => {
            request.set_params(params);
            let flow = pipeline::run_stack(&middleware, request, response).await;
            // A stack error goes back to the pipeline's error flow; an
            // emitted response already resolved the request.
            if flow.error().is_some() || flow.response().headers_sent() {
                return flow;
            }
            let (request, response, _) = flow.into_parts();
            handler(request, response).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, Request};
    use crate::pipeline::{error_handler, normal};
    use crate::router::IntoHandler;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn empty_app() -> App {
        App {
            pipeline: Pipeline::new(),
            router: Router::new(),
            on_request: None,
        }
    }

    fn respond_text(tag: &'static str) -> impl IntoHandler {
        move |req: Request, mut res: Response| async move {
            res.text(tag).await;
            Flow::ok(req, res)
        }
    }

    /// Writes `requests` into the driver over an in-memory duplex stream and
    /// returns everything it wrote back.
    async fn exchange(app: App, requests: &[u8]) -> String {
        let (mut client, server_io) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(drive(server_io, None, Arc::new(app)));
        client.write_all(requests).await.unwrap();
        client.shutdown().await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn basic_get_round_trip() {
        let mut app = empty_app();
        app.router.get("/hello", |req: Request, mut res: Response| async move {
            res.json(&json!({ "message": "ok" })).await;
            Flow::ok(req, res)
        });

        let reply = exchange(
            app,
            b"GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.contains("content-type: application/json; charset=utf-8\r\n"));
        assert!(reply.contains("connection: close\r\n"));
        assert!(reply.ends_with(r#"{"message":"ok"}"#));
    }

    #[tokio::test]
    async fn path_params_and_query_reach_the_handler() {
        let mut app = empty_app();
        app.router.get("/users/:id", |req: Request, mut res: Response| async move {
            let id = req.param("id").unwrap_or("").to_owned();
            let fields = req.query_param("fields").unwrap_or("").to_owned();
            res.json(&json!({ "id": id, "fields": fields })).await;
            Flow::ok(req, res)
        });

        let reply = exchange(
            app,
            b"GET /users/42?fields=name HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(reply.ends_with(r#"{"fields":"name","id":"42"}"#));
    }

    #[tokio::test]
    async fn chunked_body_is_decoded_before_dispatch() {
        let mut app = empty_app();
        app.router.post("/echo", |req: Request, mut res: Response| async move {
            let body = String::from_utf8_lossy(req.body()).into_owned();
            res.text(body).await;
            Flow::ok(req, res)
        });

        let reply = exchange(
            app,
            b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .await;

        assert!(reply.starts_with("HTTP/1.1 200"));
        assert!(reply.ends_with("hello world"));
    }

    #[tokio::test]
    async fn pipelined_requests_answered_in_order() {
        let mut app = empty_app();
        app.router.get("/one", respond_text("first"));
        app.router.get("/two", respond_text("second"));

        let reply = exchange(
            app,
            b"GET /one HTTP/1.1\r\nHost: x\r\n\r\nGET /two HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;

        assert_eq!(reply.matches("HTTP/1.1 200").count(), 2);
        let first = reply.find("first").unwrap();
        let second = reply.find("second").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn method_mismatch_yields_405_with_allow() {
        let mut app = empty_app();
        app.router.get("/x", respond_text("get"));
        app.router.post("/x", respond_text("post"));

        let reply = exchange(app, b"DELETE /x HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        assert!(reply.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        let allow = reply
            .lines()
            .find(|l| l.starts_with("allow: "))
            .expect("allow header missing");
        assert!(allow.contains("GET"));
        assert!(allow.contains("POST"));
        assert!(reply.ends_with(r#"{"error":"Method Not Allowed"}"#));
    }

    #[tokio::test]
    async fn unknown_path_yields_404_json() {
        let mut app = empty_app();
        app.router.get("/known", respond_text("ok"));

        let reply = exchange(app, b"GET /missing HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(reply.ends_with(r#"{"error":"Not Found"}"#));
    }

    #[tokio::test]
    async fn error_middleware_answers_for_a_raising_middleware() {
        let mut app = empty_app();
        app.pipeline
            .push(normal(|req, res, next| next.fail("boom", req, res)));
        app.pipeline
            .push(error_handler(|err, req, mut res, _next| async move {
                res.status(500);
                res.json(&json!({ "error": err.message() })).await;
                Flow::ok(req, res)
            }));
        app.router.get("/hello", respond_text("unreachable"));

        let reply = exchange(app, b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        assert_eq!(reply.matches("HTTP/1.1").count(), 1);
        assert!(reply.starts_with("HTTP/1.1 500"));
        assert!(reply.ends_with(r#"{"error":"boom"}"#));
    }

    #[tokio::test]
    async fn route_stack_error_reaches_error_handlers() {
        let mut app = empty_app();
        app.pipeline
            .push(error_handler(|err, req, mut res, _next| async move {
                res.status(500);
                res.json(&json!({ "error": format!("route: {}", err.message()) }))
                    .await;
                Flow::ok(req, res)
            }));
        let failing_guard = normal(|req, res, next| next.fail("denied", req, res));
        app.router.add_with(
            Method::Get,
            "/guarded",
            vec![failing_guard],
            respond_text("unreachable"),
        );

        let reply = exchange(app, b"GET /guarded HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        assert!(reply.ends_with(r#"{"error":"route: denied"}"#));
    }

    #[tokio::test]
    async fn handler_raise_reaches_error_handlers() {
        let mut app = empty_app();
        app.pipeline
            .push(error_handler(|err, req, mut res, _next| async move {
                res.status(500);
                res.json(&json!({ "error": err.message() })).await;
                Flow::ok(req, res)
            }));
        app.router
            .get("/explode", |req: Request, res: Response| async move {
                Flow::fail(req, res, "handler exploded")
            });

        let reply = exchange(app, b"GET /explode HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        assert!(reply.ends_with(r#"{"error":"handler exploded"}"#));
    }

    #[tokio::test]
    async fn framing_error_answers_and_closes() {
        let reply = exchange(empty_app(), b"BREW /pot HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(reply.contains("connection: close\r\n"));
        assert!(reply.ends_with(r#"{"error":"Unsupported HTTP method"}"#));
    }

    #[tokio::test]
    async fn empty_router_answers_ok() {
        let reply = exchange(empty_app(), b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("\r\n\r\nOK"));
    }

    #[tokio::test]
    async fn on_request_fallback_takes_over() {
        let mut app = empty_app();
        app.on_request = Some(Arc::new(|req: Request, mut res: Response| {
            Box::pin(async move {
                res.text("fallback").await;
                Flow::ok(req, res)
            })
        }));

        let reply = exchange(app, b"GET /anything HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        assert!(reply.ends_with("fallback"));
    }

    #[tokio::test]
    async fn keep_alive_header_mirrors_disposition() {
        let mut app = empty_app();
        app.router.get("/k", respond_text("ok"));

        let reply = exchange(app, b"GET /k HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(reply.contains("connection: keep-alive\r\n"));
    }
}
