//! warden service binary.
//!
//! Serves the public API and, on a separate address, the debug endpoints.
//! Configuration comes from `WARDEN_`-prefixed environment variables; see
//! [`warden::config`].

use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warden::auth::{RulePolicy, TokenAuthority};
use warden::config::Config;
use warden::keystore::{DirSource, KeyStore};
use warden::metrics::Metrics;
use warden::{Server, api, debug, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    init_tracing(&cfg);

    let workers = tokio::runtime::Handle::current().metrics().num_workers();
    info!(service = "warden", build = %cfg.build, workers, "startup");

    // ── Auth ─────────────────────────────────────────────────────────────────
    let mut keys = KeyStore::new();
    let active_kid = keys
        .load(&DirSource::new(&cfg.auth.keys_dir))
        .with_context(|| format!("loading keys from {}", cfg.auth.keys_dir.display()))?;
    info!(keys = keys.len(), active_kid = %active_kid, "keystore loaded");

    let authority = Arc::new(TokenAuthority::new(
        Arc::new(keys),
        Arc::new(RulePolicy::new(&cfg.auth.issuer)),
        cfg.auth.signing_method,
        &cfg.auth.issuer,
        active_kid,
    ));

    let metrics = Arc::new(Metrics::new().context("registering metrics")?);

    // ── Servers ──────────────────────────────────────────────────────────────
    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            shutdown_signal().await;
            stop.cancel();
        }
    });

    let mut api_router = api::router(authority, Arc::clone(&metrics));
    api_router.body_limit(cfg.web.body_limit);

    let api_server = Server::bind(cfg.web.api_host)
        .read_timeout(cfg.web.read_timeout)
        .write_timeout(cfg.web.write_timeout)
        .shutdown_timeout(cfg.web.shutdown_timeout)
        .serve_with_shutdown(api_router, stop.clone().cancelled_owned());

    let debug_server = Server::bind(cfg.web.debug_host)
        .shutdown_timeout(cfg.web.shutdown_timeout)
        .serve_with_shutdown(debug::router(metrics), stop.cancelled_owned());

    tokio::try_join!(api_server, debug_server)?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.is_development() {
        builder.init();
    } else {
        builder.json().init();
    }
}
