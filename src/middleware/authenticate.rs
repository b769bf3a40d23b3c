use std::sync::Arc;
use std::time::Duration;

use http::header::AUTHORIZATION;
use tracing::warn;
use uuid::Uuid;

use super::{Middleware, from_fn};
use crate::auth::TokenAuthority;
use crate::context::Context;
use crate::error::{HandlerResult, TrustedError};
use crate::handler::{BoxedHandler, boxed};
use crate::request::Request;
use crate::response::ResponseSink;

/// Upper bound on one token check, independent of the request deadline.
pub(crate) const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Validates the `Authorization: Bearer <token>` header and publishes the
/// caller's user id and claims on the context handed to `next`.
///
/// Every failure, whatever the cause, is a `401` with the same message. The
/// cause is logged.
pub fn authenticate(authority: Arc<TokenAuthority>) -> Middleware {
    from_fn(move |next: BoxedHandler| {
        let authority = Arc::clone(&authority);
        boxed(move |ctx: Context, sink: ResponseSink, req: Request| {
            check_token(Arc::clone(&authority), Arc::clone(&next), ctx, sink, req)
        })
    })
}

async fn check_token(
    authority: Arc<TokenAuthority>,
    next: BoxedHandler,
    ctx: Context,
    sink: ResponseSink,
    req: Request,
) -> HandlerResult {
    let bearer = req.header(AUTHORIZATION).unwrap_or_default();

    let claims = match authority.authenticate(&ctx.with_timeout(AUTH_TIMEOUT), bearer).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(trace_id = %ctx.trace_id(), error = %e, "authentication failed");
            return Err(TrustedError::unauthenticated().into());
        }
    };

    let user_id = match Uuid::parse_str(&claims.subject) {
        Ok(id) => id,
        Err(e) => {
            warn!(trace_id = %ctx.trace_id(), error = %e, "token subject is not a user id");
            return Err(TrustedError::unauthenticated().into());
        }
    };

    next.call(ctx.with_user(user_id, claims), sink, req).await
}
