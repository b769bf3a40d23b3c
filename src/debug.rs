//! Router for the debug listener. Bound to its own address so it can stay
//! off the public network.

use std::sync::Arc;

use http::{Method, StatusCode};

use crate::context::Context;
use crate::error::HandlerResult;
use crate::metrics::Metrics;
use crate::request::Request;
use crate::response::{Response, ResponseSink};
use crate::router::Router;

/// `GET /debug/metrics`: Prometheus text exposition of `metrics`.
pub fn router(metrics: Arc<Metrics>) -> Router {
    let mut router = Router::new(Vec::new());
    router.handle_direct(
        Method::GET,
        "",
        "/debug/metrics",
        move |ctx: Context, sink: ResponseSink, _: Request| expose(Arc::clone(&metrics), ctx, sink),
    );
    router
}

async fn expose(metrics: Arc<Metrics>, ctx: Context, sink: ResponseSink) -> HandlerResult {
    let body = metrics.encode()?;
    sink.write(Response::text(StatusCode::OK, body))?;
    ctx.set_status_code(StatusCode::OK);
    Ok(())
}
