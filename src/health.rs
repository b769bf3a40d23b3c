//! Kubernetes health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/v1/liveness` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/v1/readiness` | Can the pod serve traffic? Failure → no traffic. |
//!
//! Both are registered with [`Router::handle_direct`](crate::Router::handle_direct),
//! outside the global middleware and without authentication.

use std::env;

use http::StatusCode;
use serde::Serialize;

use crate::context::Context;
use crate::error::HandlerResult;
use crate::request::Request;
use crate::response::{Response, ResponseSink, respond};

/// Build tag reported by the liveness probe.
pub const BUILD: &str = match option_env!("WARDEN_BUILD") {
    Some(build) => build,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Debug, Serialize)]
struct Info {
    status: &'static str,
    build: &'static str,
    host: String,
    name: String,
    #[serde(rename = "podIP")]
    pod_ip: String,
    node: String,
    namespace: String,
    workers: usize,
}

/// Liveness probe. Always `200` with information about the pod; if the
/// process can answer HTTP at all, it is alive.
pub async fn liveness(ctx: Context, sink: ResponseSink, _req: Request) -> HandlerResult {
    let info = Info {
        status: "up",
        build: BUILD,
        host: env::var("HOSTNAME").unwrap_or_else(|_| "unavailable".to_owned()),
        name: env::var("KUBERNETES_NAME").unwrap_or_default(),
        pod_ip: env::var("KUBERNETES_POD_IP").unwrap_or_default(),
        node: env::var("KUBERNETES_NODE_NAME").unwrap_or_default(),
        namespace: env::var("KUBERNETES_NAMESPACE").unwrap_or_default(),
        workers: tokio::runtime::Handle::try_current().map_or(0, |h| h.metrics().num_workers()),
    };

    respond(&ctx, &sink, StatusCode::OK, &info)?;
    Ok(())
}

/// Readiness probe. `200` with no body.
///
/// Replace it with a handler that checks dependencies (database
/// connections, downstream services) once the service has any.
pub async fn readiness(ctx: Context, sink: ResponseSink, _req: Request) -> HandlerResult {
    sink.write(Response::empty(StatusCode::OK))?;
    ctx.set_status_code(StatusCode::OK);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get() -> Request {
        Request::new(
            http::Method::GET,
            "/v1/liveness".parse().unwrap(),
            Default::default(),
            Default::default(),
        )
    }

    #[tokio::test]
    async fn liveness_reports_up() {
        let sink = ResponseSink::new();
        liveness(Context::new(), sink.clone(), get()).await.unwrap();

        let res = sink.take().unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "up");
        assert_eq!(body["build"], BUILD);
        assert!(body["workers"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn readiness_is_empty_200() {
        let ctx = Context::new();
        let sink = ResponseSink::new();
        readiness(ctx.clone(), sink.clone(), get()).await.unwrap();

        let res = sink.take().unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.body().is_empty());
        assert_eq!(ctx.status_code(), Some(StatusCode::OK));
    }
}
