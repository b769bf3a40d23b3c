//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! Routes, middleware and the business handler at the end of a chain all
//! share one shape:
//!
//! ```text
//! (Context, ResponseSink, Request) -> Future<Output = anyhow::Result<()>>
//! ```
//!
//! Middleware wraps handlers of *different* concrete types, and the router
//! keeps every fully-wrapped chain in a single tree, so each handler is
//! erased behind [`ErasedHandler`] and shared as a [`BoxedHandler`]:
//!
//! ```text
//! async fn me(ctx, sink, req) -> HandlerResult { … }   ← user writes this
//!        ↓ boxed(me)
//! Arc::new(FnHandler(me))                            ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(ctx, sink, req)  at request time      ← one vtable dispatch
//!        ↓
//! Box::pin(me(ctx, sink, req))                       ← BoxFuture
//! ```
//!
//! The only runtime cost per layer is **one Arc clone** (atomic inc) +
//! **one virtual call**, negligible compared to network I/O.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::HandlerResult;
use crate::request::Request;
use crate::response::ResponseSink;

// ── Erased types ──────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future resolving to the handler outcome.
///
/// `Send + 'static` let tokio move the future across threads safely.
pub type BoxFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Dispatch interface every link of a chain implements.
pub trait ErasedHandler {
    fn call(&self, ctx: Context, sink: ResponseSink, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid request handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// function or closure with the signature:
///
/// ```text
/// async fn name(ctx: Context, sink: ResponseSink, req: Request) -> HandlerResult
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(Context, ResponseSink, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Context, ResponseSink, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Erases `handler` so it can be wrapped by middleware or stored in a router.
pub fn boxed(handler: impl Handler) -> BoxedHandler {
    handler.into_boxed_handler()
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype bridging a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut> ErasedHandler for FnHandler<F>
where
    F: Fn(Context, ResponseSink, Request) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: Context, sink: ResponseSink, req: Request) -> BoxFuture {
        Box::pin((self.0)(ctx, sink, req))
    }
}
