//! Outgoing HTTP response, the per-request response sink, and [`respond`].
//!
//! Handlers never return a response value. They write one into the
//! [`ResponseSink`] they were given, usually through [`respond`], and return
//! `Ok(())`. The router takes the response out of the sink once the whole
//! middleware chain has unwound. A sink accepts exactly one response.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use parking_lot::Mutex;
use serde::Serialize;

use crate::context::Context;

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Response {
    /// `application/json` body.
    pub fn json(status: StatusCode, body: Vec<u8>) -> Self {
        Self::with_content_type(status, "application/json", body)
    }

    /// `text/plain; charset=utf-8` body.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::with_content_type(status, "text/plain; charset=utf-8", body.into().into_bytes())
    }

    /// Response with no body.
    pub fn empty(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: Bytes::new() }
    }

    fn with_content_type(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self { status, headers, body: Bytes::from(body) }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

// ── ResponseSink ──────────────────────────────────────────────────────────────

/// Why a response could not be written.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("client cancelled the request")]
    ClientCancelled,
    #[error("a response was already written for this request")]
    AlreadyWritten,
    #[error("marshal: {0}")]
    Marshal(#[from] serde_json::Error),
}

/// One-shot slot the handler chain writes its response into.
///
/// Clones share the slot: the error layer and the business handler hold the
/// same sink, and whichever writes first wins.
#[derive(Clone, Debug, Default)]
pub struct ResponseSink {
    slot: Arc<Mutex<Option<Response>>>,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `response`. Fails if a response was already stored.
    pub fn write(&self, response: Response) -> Result<(), ResponseError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(ResponseError::AlreadyWritten);
        }
        *slot = Some(response);
        Ok(())
    }

    pub fn is_written(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Removes the stored response. Called by the router once the chain is done.
    pub fn take(&self) -> Option<Response> {
        self.slot.lock().take()
    }
}

// ── respond ───────────────────────────────────────────────────────────────────

/// Serializes `data` as the JSON body of a `status` response.
///
/// `204 No Content` writes no body whatever `data` is. Fails when the client
/// already went away, when serialization fails, or when the sink already
/// holds a response. On success the status code is recorded in the request
/// metadata.
pub fn respond<T>(
    ctx: &Context,
    sink: &ResponseSink,
    status: StatusCode,
    data: &T,
) -> Result<(), ResponseError>
where
    T: Serialize + ?Sized,
{
    if ctx.cancel_token().is_cancelled() {
        return Err(ResponseError::ClientCancelled);
    }

    let response = if status == StatusCode::NO_CONTENT {
        Response::empty(status)
    } else {
        Response::json(status, serde_json::to_vec(data)?)
    };

    sink.write(response)?;
    ctx.set_status_code(status);
    Ok(())
}
