use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use futures::FutureExt;
use http::StatusCode;

use super::{Middleware, from_fn};
use crate::context::Context;
use crate::error::{HandlerResult, TrustedError};
use crate::handler::{BoxedHandler, boxed};
use crate::metrics::Metrics;
use crate::request::Request;
use crate::response::ResponseSink;

thread_local! {
    /// Location and backtrace of the last panic on this thread, filled by the
    /// hook and taken by the recovery boundary that caught it.
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Recovery boundary for panics raised by the inner chain.
///
/// A panic becomes a `500` [`TrustedError`] whose message records the panic
/// payload and the captured trace, for the error layer to log. The message
/// never reaches the client: every `500` is sanitized on the way out. When
/// `metrics` is given, each recovered panic is counted.
pub fn panics(metrics: Option<Arc<Metrics>>) -> Middleware {
    install_hook();

    from_fn(move |next: BoxedHandler| {
        let metrics = metrics.clone();
        boxed(move |ctx: Context, sink: ResponseSink, req: Request| {
            recover(metrics.clone(), Arc::clone(&next), ctx, sink, req)
        })
    })
}

async fn recover(
    metrics: Option<Arc<Metrics>>,
    next: BoxedHandler,
    ctx: Context,
    sink: ResponseSink,
    req: Request,
) -> HandlerResult {
    // The call itself runs inside the boundary: a handler may panic before it
    // returns a future.
    let guarded = AssertUnwindSafe(async move { next.call(ctx, sink, req).await });
    match guarded.catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let trace = LAST_PANIC
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| "unavailable".to_owned());

            if let Some(m) = &metrics {
                m.add_panic();
            }

            let message = format!("PANIC[{}] TRACE[{trace}]", payload_message(payload.as_ref()));
            Err(TrustedError::new(StatusCode::INTERNAL_SERVER_ERROR, message).into())
        }
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Chains a hook in front of the current one that stashes the panic location
/// and a backtrace for the thread that panicked.
fn install_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info.location().map(|l| l.to_string()).unwrap_or_default();
            let trace = format!("{location}\n{}", Backtrace::force_capture());
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}
