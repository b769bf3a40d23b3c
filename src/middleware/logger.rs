use std::sync::Arc;

use tracing::info;

use super::{Middleware, from_fn};
use crate::context::Context;
use crate::error::HandlerResult;
use crate::handler::{BoxedHandler, boxed};
use crate::request::Request;
use crate::response::ResponseSink;

/// Logs one line when a request starts and one when it completes.
///
/// The inner result is passed through untouched.
pub fn logger() -> Middleware {
    from_fn(|next: BoxedHandler| {
        boxed(move |ctx: Context, sink: ResponseSink, req: Request| {
            log_request(Arc::clone(&next), ctx, sink, req)
        })
    })
}

async fn log_request(
    next: BoxedHandler,
    ctx: Context,
    sink: ResponseSink,
    req: Request,
) -> HandlerResult {
    let trace_id = ctx.trace_id();
    let method = req.method().clone();
    let path = req.path_and_query().to_owned();
    let remote_addr = req.remote_addr().map(|a| a.to_string()).unwrap_or_default();

    info!(%trace_id, %method, path = %path, remote_addr = %remote_addr, "request started");

    let result = next.call(ctx.clone(), sink, req).await;

    let status = ctx.status_code().map_or(0, |s| s.as_u16());
    let elapsed = ctx.started_at().elapsed();
    info!(
        %trace_id, %method, path = %path, remote_addr = %remote_addr, status, ?elapsed,
        "request completed"
    );

    result
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::error::TrustedError;

    fn get() -> Request {
        Request::new(
            http::Method::GET,
            "/v1/me?x=1".parse().unwrap(),
            Default::default(),
            Default::default(),
        )
    }

    async fn refuse(_: Context, _: ResponseSink, _: Request) -> HandlerResult {
        Err(TrustedError::new(StatusCode::CONFLICT, "already exists").into())
    }

    #[tokio::test]
    async fn inner_error_comes_back_unchanged() {
        let h = logger()(boxed(refuse));
        let sink = ResponseSink::new();

        let err = h.call(Context::new(), sink.clone(), get()).await.unwrap_err();
        let trusted = err.downcast::<TrustedError>().unwrap();

        assert_eq!(trusted.code, StatusCode::CONFLICT);
        assert_eq!(trusted.message, "already exists");
        assert!(sink.take().is_none());
    }

    #[tokio::test]
    async fn success_passes_through() {
        async fn fine(_: Context, _: ResponseSink, _: Request) -> HandlerResult {
            Ok(())
        }

        let h = logger()(boxed(fine));
        assert!(h.call(Context::new(), ResponseSink::new(), get()).await.is_ok());
    }
}
