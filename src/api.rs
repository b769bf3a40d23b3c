//! The public API: route table and business handlers.

use std::sync::Arc;

use http::{Method, StatusCode};
use serde::Serialize;

use crate::auth::{Claims, RULE_ADMIN_OR_SUBJECT, RULE_ANY, TokenAuthority};
use crate::context::Context;
use crate::error::{HandlerResult, TrustedError};
use crate::health;
use crate::metrics::Metrics;
use crate::middleware::{authenticate, authorize, authorize_param, errors, logger, metrics, panics};
use crate::request::Request;
use crate::response::{ResponseSink, respond};
use crate::router::Router;

pub const VERSION: &str = "v1";

/// Builds the API router.
///
/// | Route | Access |
/// |---|---|
/// | `GET /v1/liveness`, `GET /v1/readiness` | open, no middleware |
/// | `GET /v1/me` | any authenticated caller |
/// | `GET /v1/users/{user_id}` | admins, or the user themself |
pub fn router(authority: Arc<TokenAuthority>, stats: Arc<Metrics>) -> Router {
    let mut router = Router::new(vec![
        logger(),
        errors(),
        metrics(Arc::clone(&stats)),
        panics(Some(stats)),
    ]);

    router.handle_direct(Method::GET, VERSION, "/liveness", health::liveness);
    router.handle_direct(Method::GET, VERSION, "/readiness", health::readiness);

    let authed = authenticate(Arc::clone(&authority));

    router.handle(
        Method::GET,
        VERSION,
        "/me",
        me,
        &[authed.clone(), authorize(Arc::clone(&authority), RULE_ANY)],
    );
    router.handle(
        Method::GET,
        VERSION,
        "/users/{user_id}",
        user,
        &[authed, authorize_param(authority, RULE_ADMIN_OR_SUBJECT, "user_id")],
    );

    router
}

/// The authenticated caller's claims.
async fn me(ctx: Context, sink: ResponseSink, _req: Request) -> HandlerResult {
    let claims = ctx.claims().ok_or_else(|| TrustedError::unauthenticated())?;
    respond(&ctx, &sink, StatusCode::OK, claims)?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct UserView<'a> {
    user_id: &'a str,
    requested_by: String,
    roles: &'a [String],
}

async fn user(ctx: Context, sink: ResponseSink, req: Request) -> HandlerResult {
    let user_id = req
        .param("user_id")
        .ok_or_else(|| TrustedError::new(StatusCode::BAD_REQUEST, "user_id is required"))?;
    let caller: &Claims = ctx.claims().ok_or_else(|| TrustedError::unauthenticated())?;

    let view = UserView {
        user_id,
        requested_by: caller.subject.clone(),
        roles: &caller.roles,
    };
    respond(&ctx, &sink, StatusCode::OK, &view)?;
    Ok(())
}
