//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Every route is stored
//! fully wrapped: its own middleware first, then the router's global
//! middleware, so dispatch is a single lookup followed by a single call.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::Full;
use matchit::Router as MatchitRouter;
use tracing::{error, warn};

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler, boxed};
use crate::middleware::{Middleware, chain};
use crate::request::Request;
use crate::response::{Response, ResponseSink};

/// The application router.
///
/// Build it once at startup and pass it to [`Server::serve`](crate::Server::serve).
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    global: Vec<Middleware>,
    body_limit: usize,
}

/// Default cap on a request body, in bytes.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

impl Router {
    /// A router applying `global` to every route registered with
    /// [`handle`](Router::handle). `global[0]` is the outermost layer.
    pub fn new(global: Vec<Middleware>) -> Self {
        Self { routes: HashMap::new(), global, body_limit: DEFAULT_BODY_LIMIT }
    }

    /// Largest request body read before the chain runs. Larger bodies are
    /// answered `413` without calling any handler.
    pub fn body_limit(&mut self, bytes: usize) -> &mut Self {
        self.body_limit = bytes;
        self
    }

    /// Registers `handler` at `/{version}{path}`, wrapped by `mids` and then by
    /// the global middleware. An empty `version` registers `path` as is.
    ///
    /// Path parameters use `{name}` syntax and are read with `req.param("name")`:
    ///
    /// ```rust,no_run
    /// # use warden::{Context, HandlerResult, Request, ResponseSink, Router};
    /// # use http::Method;
    /// # async fn get_user(_: Context, _: ResponseSink, _: Request) -> HandlerResult { Ok(()) }
    /// let mut router = Router::new(vec![]);
    /// router.handle(Method::GET, "v1", "/users/{user_id}", get_user, &[]);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the path is not a valid route or conflicts with one already
    /// registered. Routes are fixed at startup, so this is a programming error.
    pub fn handle(
        &mut self,
        method: Method,
        version: &str,
        path: &str,
        handler: impl Handler,
        mids: &[Middleware],
    ) -> &mut Self {
        let wrapped = chain(chain(boxed(handler), mids), &self.global);
        self.add(method, &versioned(version, path), wrapped)
    }

    /// Registers `handler` at `/{version}{path}` with no middleware at all.
    /// Used for health probes, which must answer even when the rest of the
    /// stack is unhealthy.
    pub fn handle_direct(
        &mut self,
        method: Method,
        version: &str,
        path: &str,
        handler: impl Handler,
    ) -> &mut Self {
        self.add(method, &versioned(version, path), boxed(handler))
    }

    fn add(&mut self, method: Method, path: &str, handler: BoxedHandler) -> &mut Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    /// Routes one request and produces its response.
    ///
    /// Unknown routes answer `404` with no body, and bodies over the limit
    /// answer `413` with no body. A chain that finishes without writing a
    /// response answers `200` with no body. An error escaping the
    /// chain is logged and returned, and no response is attempted for it.
    pub async fn serve<B>(
        &self,
        req: http::Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<http::Response<Full<Bytes>>, Error>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some((handler, params)) = self.lookup(req.method(), req.uri().path()) else {
            return Ok(Response::empty(StatusCode::NOT_FOUND).into_inner());
        };

        let mut request = match Request::from_http(req, remote_addr, self.body_limit).await {
            Ok(request) => request,
            Err(Error::BodyTooLarge(limit)) => {
                warn!(peer = ?remote_addr, limit, "request body too large");
                return Ok(Response::empty(StatusCode::PAYLOAD_TOO_LARGE).into_inner());
            }
            Err(e) => return Err(e),
        };
        request.params = params;

        let ctx = Context::new();
        let sink = ResponseSink::new();

        // Dropping this future (client gone) cancels the request's token.
        let cancel_on_drop = ctx.cancel_token().clone().drop_guard();
        let result = handler.call(ctx.clone(), sink.clone(), request).await;
        cancel_on_drop.disarm();

        if let Err(err) = result {
            error!(
                trace_id = %ctx.trace_id(),
                error = %format!("{err:#}"),
                "error escaped the handler chain"
            );
            return Err(Error::Unhandled(err));
        }

        Ok(sink.take().unwrap_or_else(|| Response::empty(StatusCode::OK)).into_inner())
    }
}

/// `/{version}{path}`, or `path` alone when `version` is empty.
fn versioned(version: &str, path: &str) -> String {
    if version.is_empty() {
        return path.to_owned();
    }
    format!("/{version}{path}")
}
