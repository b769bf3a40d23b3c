//! Per-request execution context.
//!
//! A [`Context`] is created by the router for every inbound request before
//! the middleware chain runs. It carries:
//!
//! - the request metadata (trace id, start time, final status code),
//! - a cancellation token, cancelled when the connection drops the request,
//! - an optional deadline, narrowed by [`Context::with_timeout`],
//! - the caller identity, absent until `authenticate` publishes it.
//!
//! Cloning a `Context` is cheap. Clones share the metadata and the
//! cancellation token; the deadline and identity are per clone, so a
//! middleware can hand `next` a derived context without affecting its own.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use http::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Claims;

/// Why a [`Context`] stopped admitting work.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ContextError {
    #[error("request cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Data collected around a single request. Lives exactly as long as the
/// request; the status code has a single writer, [`respond`](crate::respond).
#[derive(Debug)]
struct RequestMetadata {
    trace_id: Uuid,
    started_at: Instant,
    status: AtomicU16,
}

#[derive(Clone, Debug)]
pub struct Context {
    meta: Arc<RequestMetadata>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    user_id: Option<Uuid>,
    claims: Option<Arc<Claims>>,
}

impl Context {
    /// Fresh metadata with a random trace id and the current time.
    pub fn new() -> Self {
        Self::with_cancel(CancellationToken::new())
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            meta: Arc::new(RequestMetadata {
                trace_id: Uuid::new_v4(),
                started_at: Instant::now(),
                status: AtomicU16::new(0),
            }),
            cancel,
            deadline: None,
            user_id: None,
            claims: None,
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.meta.trace_id
    }

    pub fn started_at(&self) -> Instant {
        self.meta.started_at
    }

    /// The status code written by `respond`, if a response was written.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self.meta.status.load(Ordering::Acquire) {
            0 => None,
            code => StatusCode::from_u16(code).ok(),
        }
    }

    pub(crate) fn set_status_code(&self, code: StatusCode) {
        self.meta.status.store(code.as_u16(), Ordering::Release);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A derived context whose deadline is at most `timeout` from now.
    /// An earlier deadline inherited from `self` is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(current) if current <= candidate => current,
            _ => candidate,
        };
        Self { deadline: Some(deadline), ..self.clone() }
    }

    /// `Some` once the request was cancelled or its deadline has passed.
    pub fn err(&self) -> Option<ContextError> {
        if self.cancel.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drives `fut` until it completes, the request is cancelled, or the
    /// deadline passes, whichever comes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            () = self.cancel.cancelled() => Err(ContextError::Cancelled),
            () = deadline => Err(ContextError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }

    // ── Caller identity ───────────────────────────────────────────────────────

    /// Publishes the authenticated caller for everything further down the chain.
    pub fn with_user(self, user_id: Uuid, claims: Claims) -> Self {
        Self { user_id: Some(user_id), claims: Some(Arc::new(claims)), ..self }
    }

    /// `None` until `authenticate` has run.
    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    /// `None` until `authenticate` has run.
    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_deref()
    }
}

impl Default for Context {
    fn default() -> Self { Self::new() }
}
