//! Middleware layer.
//!
//! A middleware is a function from one handler to another: it receives the
//! rest of the chain as `next` and returns a handler that runs code before
//! and after calling it, or decides not to call it at all.
//!
//! [`chain`] composes a list of middleware so that the **first element is the
//! outermost layer**. The service stack, outermost first, is:
//!
//! ```text
//! logger → errors → metrics → panics → authenticate → authorize → handler
//! ```
//!
//! `logger` sees every request first and last. `errors` turns whatever the
//! inner layers return into a response. `panics` sits inside `metrics` so
//! a recovered panic is counted as an error.

mod authenticate;
mod authorize;
mod errors;
mod logger;
mod metrics;
mod panics;

use std::sync::Arc;

use crate::handler::BoxedHandler;

pub use authenticate::authenticate;
pub use authorize::{authorize, authorize_param};
pub use errors::errors;
pub use logger::logger;
pub use metrics::metrics;
pub use panics::panics;

/// A handler transformer.
pub type Middleware = Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static>;

/// Wraps a plain function as a [`Middleware`].
pub fn from_fn<F>(f: F) -> Middleware
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Applies `mids` to `handler`, `mids[0]` outermost.
pub fn chain(handler: BoxedHandler, mids: &[Middleware]) -> BoxedHandler {
    mids.iter().rev().fold(handler, |next, mid| mid(next))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::context::Context;
    use crate::error::HandlerResult;
    use crate::handler::boxed;
    use crate::request::Request;
    use crate::response::ResponseSink;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn recording(name: &'static str, trace: Trace) -> Middleware {
        from_fn(move |next: BoxedHandler| {
            let trace = Arc::clone(&trace);
            boxed(move |ctx: Context, sink: ResponseSink, req: Request| {
                record(name, Arc::clone(&trace), Arc::clone(&next), ctx, sink, req)
            })
        })
    }

    async fn record(
        name: &'static str,
        trace: Trace,
        next: BoxedHandler,
        ctx: Context,
        sink: ResponseSink,
        req: Request,
    ) -> HandlerResult {
        trace.lock().push(format!("{name} before"));
        let out = next.call(ctx, sink, req).await;
        trace.lock().push(format!("{name} after"));
        out
    }

    fn get(path: &str) -> Request {
        Request::new(
            http::Method::GET,
            path.parse().unwrap(),
            Default::default(),
            Default::default(),
        )
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let trace: Trace = Arc::default();

        let inner = Arc::clone(&trace);
        let handler = boxed(move |_: Context, _: ResponseSink, _: Request| {
            let inner = Arc::clone(&inner);
            async move {
                inner.lock().push("handler".to_owned());
                Ok::<_, anyhow::Error>(())
            }
        });

        let mids = [recording("A", Arc::clone(&trace)), recording("B", Arc::clone(&trace))];
        chain(handler, &mids).call(Context::new(), ResponseSink::new(), get("/")).await.unwrap();

        assert_eq!(
            *trace.lock(),
            ["A before", "B before", "handler", "B after", "A after"],
        );
    }

    #[tokio::test]
    async fn empty_chain_is_the_handler() {
        async fn ok(_: Context, sink: ResponseSink, _: Request) -> HandlerResult {
            sink.write(crate::Response::empty(http::StatusCode::ACCEPTED))?;
            Ok(())
        }

        let sink = ResponseSink::new();
        chain(boxed(ok), &[]).call(Context::new(), sink.clone(), get("/")).await.unwrap();
        assert_eq!(sink.take().unwrap().status(), http::StatusCode::ACCEPTED);
    }
}
