//! Request/response logging middleware.

use tokio::time::Instant;
use tracing::info;

use crate::pipeline::{NormalFn, normal};

/// Logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line after the downstream chain
/// completes, in the format:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
///
/// The logger never short-circuits; it always delegates to the next layer.
pub fn logger() -> NormalFn {
    normal(|req, res, next| async move {
        let start = Instant::now();
        let method = req.method();
        let path = req.path().to_owned();

        let flow = next.run(req, res).await;

        let status = flow.response().status_code();
        info!("{} {} - {} ({:?})", method, path, status, start.elapsed());

        flow
    })
}
