//! Request-body parsing middleware.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::http::Body;
use crate::http::parser::percent_decode;
use crate::pipeline::{Flow, NormalFn, normal};

/// Decodes the request body into [`Body`] based on the request
/// `content-type` and stores it on the request for downstream handlers.
///
/// - `application/json` — parsed into [`Body::Json`]; a malformed document
///   answers `400` immediately and the chain stops.
/// - `application/x-www-form-urlencoded` — pairs split on `&` and the first
///   `=`, percent-decoded on both sides, with `+` folded to space in values
///   (and only there — query strings keep `+` literal).
/// - Anything else with a non-empty body — [`Body::Raw`] text.
/// - Empty body — [`Body::Empty`].
pub fn body_parser() -> NormalFn {
    normal(|mut req, mut res, next| async move {
        if req.body().is_empty() {
            req.set_parsed_body(Body::Empty);
            return next.run(req, res).await;
        }

        let content_type = req
            .headers()
            .get("content-type")
            .unwrap_or_default()
            .to_owned();

        let parsed = if content_type.starts_with("application/json") {
            match serde_json::from_slice::<Value>(req.body()) {
                Ok(value) => Body::Json(value),
                Err(_) => {
                    res.status(400);
                    res.json(&json!({ "error": "Invalid JSON in request body" }))
                        .await;
                    return Flow::ok(req, res);
                }
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            Body::Form(parse_form(&String::from_utf8_lossy(req.body())))
        } else {
            Body::Raw(String::from_utf8_lossy(req.body()).into_owned())
        };

        req.set_parsed_body(parsed);
        next.run(req, res).await
    })
}

fn parse_form(raw: &str) -> HashMap<String, String> {
    let mut form = HashMap::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        form.insert(percent_decode(key), percent_decode(&value.replace('+', " ")));
    }
    form
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::http::parser::{self, Parse};
    use crate::http::response::test_io::RecordingSink;
    use crate::http::{Response, SharedSink};
    use crate::pipeline::{Pipeline, Terminal, terminal};

    fn request_from(raw: &[u8]) -> crate::http::Request {
        match parser::parse(raw) {
            Parse::Complete { request, .. } => request,
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    fn capturing_terminal(slot: &Arc<Mutex<Option<Body>>>) -> Terminal {
        let slot = Arc::clone(slot);
        terminal(move |req, mut res: Response| {
            let slot = Arc::clone(&slot);
            async move {
                *slot.lock().unwrap() = Some(req.parsed_body().clone());
                res.send("done").await;
                Flow::ok(req, res)
            }
        })
    }

    async fn parse_through(raw: &[u8]) -> (Option<Body>, String) {
        let mut pipeline = Pipeline::new();
        pipeline.push(body_parser());
        let slot = Arc::new(Mutex::new(None));
        let recorder = RecordingSink::default();
        let response = Response::new(SharedSink::new(recorder.clone()));
        pipeline
            .execute(request_from(raw), response, capturing_terminal(&slot))
            .await;
        let body = slot.lock().unwrap().clone();
        (body, recorder.text())
    }

    #[tokio::test]
    async fn json_body_parses() {
        let (body, _) = parse_through(
            b"POST /p HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"name\":\"jo\"}",
        )
        .await;
        let value = body.expect("terminal did not run");
        assert_eq!(
            value.as_json().and_then(|v| v["name"].as_str()),
            Some("jo")
        );
    }

    #[tokio::test]
    async fn invalid_json_answers_400() {
        let (body, reply) = parse_through(
            b"POST /p HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 5\r\n\r\n{oops",
        )
        .await;
        assert!(body.is_none()); // chain stopped before the terminal
        assert!(reply.starts_with("HTTP/1.1 400"));
        assert!(reply.ends_with(r#"{"error":"Invalid JSON in request body"}"#));
    }

    #[tokio::test]
    async fn form_body_decodes_plus_and_percent() {
        let (body, _) = parse_through(
            b"POST /p HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 25\r\n\r\nname=jo+smith&tag=a%26b&x",
        )
        .await;
        let body = body.expect("terminal did not run");
        let form = body.as_form().expect("expected a form body");
        assert_eq!(form.get("name").map(String::as_str), Some("jo smith"));
        assert_eq!(form.get("tag").map(String::as_str), Some("a&b"));
        assert_eq!(form.get("x").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn other_content_type_kept_raw() {
        let (body, _) = parse_through(
            b"POST /p HTTP/1.1\r\nContent-Type: text/csv\r\nContent-Length: 7\r\n\r\na,b,c\r\n",
        )
        .await;
        let body = body.expect("terminal did not run");
        assert_eq!(body.as_text(), Some("a,b,c\r\n"));
    }

    #[tokio::test]
    async fn missing_content_type_kept_raw() {
        let (body, _) =
            parse_through(b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello").await;
        assert_eq!(body.expect("terminal did not run").as_text(), Some("hello"));
    }

    #[tokio::test]
    async fn empty_body_stays_empty() {
        let (body, _) = parse_through(b"GET /p HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(body.expect("terminal did not run").is_empty());
    }
}
