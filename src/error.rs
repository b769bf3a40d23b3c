//! Error types.
//!
//! Two families live here:
//!
//! - [`TrustedError`] is the error a handler returns on purpose. It carries
//!   the status code and a message that is safe to show to the caller.
//!   Anything a handler returns that is *not* a `TrustedError` is treated as
//!   untrusted and collapsed into a generic `500` by
//!   [`middleware::errors`](crate::middleware::errors).
//! - [`Error`] surfaces infrastructure failures: binding a port, reading a
//!   request body, or an error that escaped the middleware chain.

use std::collections::BTreeMap;
use std::panic::Location;

use http::StatusCode;
use serde::{Serialize, Serializer};

/// Handlers return `anyhow::Result<()>`. A [`TrustedError`] travels inside the
/// `anyhow::Error` and is recovered with `downcast`.
pub type HandlerResult = anyhow::Result<()>;

// ── TrustedError ──────────────────────────────────────────────────────────────

/// An error whose message may be shown to the external caller.
///
/// The caller location is captured with `#[track_caller]` so the error layer
/// can log where the error was raised. It is never serialized.
#[derive(Clone, Debug, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct TrustedError {
    #[serde(serialize_with = "serialize_code")]
    pub code: StatusCode,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(skip)]
    location: &'static Location<'static>,
}

impl TrustedError {
    #[track_caller]
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: BTreeMap::new(),
            location: Location::caller(),
        }
    }

    /// `401` with the fixed message shared by every authentication and
    /// authorization denial.
    #[track_caller]
    pub fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, UNAUTHENTICATED)
    }

    /// `500` with the generic message.
    #[track_caller]
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL)
    }

    /// Attach a per-field detail, e.g. a validation failure on `email`.
    pub fn with_field(mut self, field: impl Into<String>, detail: impl Into<String>) -> Self {
        self.fields.insert(field.into(), detail.into());
        self
    }

    /// `file:line` where the error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Replaces the message with the generic phrase when the code is `500`.
    pub(crate) fn sanitize(&mut self) {
        if self.code == StatusCode::INTERNAL_SERVER_ERROR {
            self.message = INTERNAL.to_owned();
            self.fields.clear();
        }
    }
}

/// Message of every `401` produced by the security middleware.
pub const UNAUTHENTICATED: &str = "unauthenticated";

/// Message of every `500` that leaves the process.
pub const INTERNAL: &str = "Internal Server Error";

fn serialize_code<S: Serializer>(code: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(code.as_u16())
}

// ── Error ─────────────────────────────────────────────────────────────────────

/// The error type returned by warden's fallible infrastructure operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("reading request body: {0}")]
    Body(Box<dyn std::error::Error + Send + Sync>),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("handler chain returned an error: {0:#}")]
    Unhandled(anyhow::Error),

    #[error("graceful shutdown did not finish within {0:?}")]
    ShutdownTimeout(std::time::Duration),
}
