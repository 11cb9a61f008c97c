//! Daemon lifecycle: stores, TLS, metrics, RPC server, shutdown

use anyhow::{Context, Result};
use quire_core::config::QuireConfig;
use quire_crypto::KdfParams;
use quire_rpc::{RpcMetrics, ServerContext};
use quire_store::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::HealthState;

pub async fn run(config: QuireConfig) -> Result<()> {
    info!("daemon starting");

    // ── Stores ───────────────────────────────────────────────────────────
    let params = KdfParams {
        log_n: config.crypto.scrypt_log_n,
        r: config.crypto.scrypt_r,
        p: config.crypto.scrypt_p,
    };
    params.validate().context("[crypto] section")?;

    let data_dir = &config.storage.data_dir;
    let stores = Arc::new(
        Registry::new(data_dir, params)
            .with_context(|| format!("data directory {}", data_dir.display()))?,
    );
    stores.master().context("opening master store")?;
    info!(data_dir = %data_dir.display(), "master store open");

    // ── Transport ────────────────────────────────────────────────────────
    let tls = quire_rpc::bootstrap(&config.cert_path(), &config.tls.extra_hosts)
        .context("TLS bootstrap")?;

    // ── Metrics ──────────────────────────────────────────────────────────
    let rpc_metrics = RpcMetrics::default();
    let mut registry = crate::metrics::Registry::default();
    rpc_metrics.register(&mut registry);
    rpc_metrics.set_open_handles(stores.handle_count());

    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            stores: Arc::clone(&stores),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    // ── RPC ──────────────────────────────────────────────────────────────
    let listener = TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("rpc bind {}", config.daemon.listen))?;
    let ctx = Arc::new(
        ServerContext::new(Arc::clone(&stores))
            .with_metrics(rpc_metrics)
            .with_token_limit(config.daemon.max_tokens),
    );
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(quire_rpc::serve(
        listener,
        Arc::clone(&tls.config),
        ctx,
        shutdown.clone(),
    ));

    notify_ready();

    wait_for_signal().await;
    info!("shutting down");
    shutdown.cancel();
    if let Err(e) = server.await {
        error!("rpc server task: {e}");
    }
    stores.close_all();
    info!("daemon stopped");

    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("cannot install SIGTERM handler: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
    }
}

fn notify_ready() {
    // sd_notify(READY=1) via $NOTIFY_SOCKET; no-op outside systemd
    #[cfg(unix)]
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
