use std::sync::Arc;

use tracing::error;

use super::{Middleware, from_fn};
use crate::context::Context;
use crate::error::{HandlerResult, TrustedError};
use crate::handler::{BoxedHandler, boxed};
use crate::request::Request;
use crate::response::{ResponseSink, respond};

/// The single point where errors become responses.
///
/// A [`TrustedError`] from the inner chain is logged and written as the
/// response body. Any other error is logged with its cause and replaced by a
/// generic `500`. The message of every `500` is replaced by a fixed phrase
/// before it is written. Always returns `Ok(())`.
pub fn errors() -> Middleware {
    from_fn(|next: BoxedHandler| {
        boxed(move |ctx: Context, sink: ResponseSink, req: Request| {
            handle_errors(Arc::clone(&next), ctx, sink, req)
        })
    })
}

async fn handle_errors(
    next: BoxedHandler,
    ctx: Context,
    sink: ResponseSink,
    req: Request,
) -> HandlerResult {
    let Err(err) = next.call(ctx.clone(), sink.clone(), req).await else {
        return Ok(());
    };

    let mut trusted = match err.downcast::<TrustedError>() {
        Ok(trusted) => trusted,
        Err(untrusted) => {
            error!(
                trace_id = %ctx.trace_id(),
                error = %format!("{untrusted:#}"),
                "untrusted error"
            );
            TrustedError::internal()
        }
    };

    error!(
        trace_id = %ctx.trace_id(),
        code = trusted.code.as_u16(),
        location = %trusted.location(),
        message = %trusted.message,
        "handled error",
    );

    trusted.sanitize();

    if let Err(e) = respond(&ctx, &sink, trusted.code, &trusted) {
        error!(trace_id = %ctx.trace_id(), error = %e, "responding with error");
    }

    Ok(())
}
