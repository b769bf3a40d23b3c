//! # warden
//!
//! An authenticated HTTP request pipeline for Rust services behind a reverse
//! proxy.
//!
//! ## The contract
//!
//! Every request passes through the same stack, outermost first:
//!
//! ```text
//! logger → errors → metrics → panics → authenticate → authorize → handler
//! ```
//!
//! - Handlers never build an HTTP response by hand. They call [`respond`]
//!   or return an error. A [`TrustedError`] reaches the client with its
//!   code and message; anything else becomes a generic `500`.
//! - Tokens are RS-family JWTs signed with the active key of a [`KeyStore`]
//!   and carrying the key id in their header, so keys rotate without
//!   invalidating tokens already issued.
//! - Whether a token is valid, and whether its bearer may use a route, is
//!   decided by a [`PolicyEvaluator`]. Anything but an explicit `true` is a
//!   denial, and every denial looks the same to the client: `401
//!   unauthenticated`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use http::{Method, StatusCode};
//! use jsonwebtoken::Algorithm;
//! use warden::auth::{RULE_ADMIN_ONLY, RulePolicy, TokenAuthority};
//! use warden::keystore::{DirSource, KeyStore};
//! use warden::middleware::{authenticate, authorize, errors, logger};
//! use warden::{Context, HandlerResult, Request, ResponseSink, Router, Server, respond};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut keys = KeyStore::new();
//!     let active = keys.load(&DirSource::new("keys"))?;
//!     let authority = Arc::new(TokenAuthority::new(
//!         Arc::new(keys),
//!         Arc::new(RulePolicy::new("auth-service")),
//!         Algorithm::RS256,
//!         "auth-service",
//!         active,
//!     ));
//!
//!     let mut app = Router::new(vec![logger(), errors()]);
//!     app.handle(
//!         Method::GET,
//!         "v1",
//!         "/admin/stats",
//!         stats,
//!         &[authenticate(Arc::clone(&authority)), authorize(authority, RULE_ADMIN_ONLY)],
//!     );
//!
//!     Server::bind("0.0.0.0:8000".parse()?).serve(app).await?;
//!     Ok(())
//! }
//!
//! async fn stats(ctx: Context, sink: ResponseSink, _req: Request) -> HandlerResult {
//!     respond(&ctx, &sink, StatusCode::OK, &serde_json::json!({ "users": 42 }))?;
//!     Ok(())
//! }
//! ```

mod context;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod api;
pub mod auth;
pub mod config;
pub mod debug;
pub mod health;
pub mod keystore;
pub mod metrics;
pub mod middleware;

pub use context::{Context, ContextError};
pub use error::{Error, HandlerResult, INTERNAL, TrustedError, UNAUTHENTICATED};
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, boxed};
pub use request::Request;
pub use response::{Response, ResponseError, ResponseSink, respond};
pub use router::Router;
pub use server::{Server, shutdown_signal};
