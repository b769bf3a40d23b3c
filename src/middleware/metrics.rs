use std::sync::Arc;

use super::{Middleware, from_fn};
use crate::context::Context;
use crate::error::HandlerResult;
use crate::handler::{BoxedHandler, boxed};
use crate::metrics::Metrics;
use crate::request::Request;
use crate::response::ResponseSink;

const SAMPLE_EVERY: u64 = 1000;

/// Counts requests and errors. Every 1000th request also samples the number
/// of alive runtime tasks. Returns the inner result unchanged.
pub fn metrics(metrics: Arc<Metrics>) -> Middleware {
    from_fn(move |next: BoxedHandler| {
        let metrics = Arc::clone(&metrics);
        boxed(move |ctx: Context, sink: ResponseSink, req: Request| {
            count(Arc::clone(&metrics), Arc::clone(&next), ctx, sink, req)
        })
    })
}

async fn count(
    metrics: Arc<Metrics>,
    next: BoxedHandler,
    ctx: Context,
    sink: ResponseSink,
    req: Request,
) -> HandlerResult {
    let n = metrics.add_request();
    if n % SAMPLE_EVERY == 0 {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            metrics.set_workers(handle.metrics().num_alive_tasks());
        }
    }

    let result = next.call(ctx, sink, req).await;
    if result.is_err() {
        metrics.add_error();
    }
    result
}
