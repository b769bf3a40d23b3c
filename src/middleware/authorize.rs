use std::sync::Arc;

use tracing::warn;

use super::authenticate::AUTH_TIMEOUT;
use super::{Middleware, from_fn};
use crate::auth::TokenAuthority;
use crate::context::Context;
use crate::error::{HandlerResult, TrustedError};
use crate::handler::{BoxedHandler, boxed};
use crate::request::Request;
use crate::response::ResponseSink;

/// Where the id of the resource being accessed comes from.
#[derive(Clone, Debug)]
enum Owner {
    /// The caller acts on their own resources.
    Caller,
    /// Named path parameter of the route.
    Param(&'static str),
}

/// Checks the authenticated caller against `rule`, treating the caller as the
/// owner of the resource. Must run inside [`authenticate`](fn@super::authenticate).
pub fn authorize(authority: Arc<TokenAuthority>, rule: &'static str) -> Middleware {
    layer(authority, rule, Owner::Caller)
}

/// Like [`authorize`], with the resource owner read from the path parameter
/// `param`.
pub fn authorize_param(
    authority: Arc<TokenAuthority>,
    rule: &'static str,
    param: &'static str,
) -> Middleware {
    layer(authority, rule, Owner::Param(param))
}

fn layer(authority: Arc<TokenAuthority>, rule: &'static str, owner: Owner) -> Middleware {
    from_fn(move |next: BoxedHandler| {
        let authority = Arc::clone(&authority);
        let owner = owner.clone();
        boxed(move |ctx: Context, sink: ResponseSink, req: Request| {
            let authority = Arc::clone(&authority);
            check_rule(authority, rule, owner.clone(), Arc::clone(&next), ctx, sink, req)
        })
    })
}

async fn check_rule(
    authority: Arc<TokenAuthority>,
    rule: &'static str,
    owner: Owner,
    next: BoxedHandler,
    ctx: Context,
    sink: ResponseSink,
    req: Request,
) -> HandlerResult {
    let (Some(user_id), Some(claims)) = (ctx.user_id(), ctx.claims()) else {
        warn!(trace_id = %ctx.trace_id(), rule, "no authenticated caller in context");
        return Err(TrustedError::unauthenticated().into());
    };

    let resource_owner = match owner {
        Owner::Caller => user_id.to_string(),
        Owner::Param(name) => match req.param(name) {
            Some(id) => id.to_owned(),
            None => {
                warn!(trace_id = %ctx.trace_id(), rule, param = name, "missing resource owner");
                return Err(TrustedError::unauthenticated().into());
            }
        },
    };

    let scoped = ctx.with_timeout(AUTH_TIMEOUT);
    if let Err(e) = authority.authorize(&scoped, claims, &resource_owner, rule).await {
        warn!(trace_id = %ctx.trace_id(), rule, error = %e, "authorization denied");
        return Err(TrustedError::unauthenticated().into());
    }

    next.call(ctx, sink, req).await
}
