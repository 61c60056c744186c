mod cli;
mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use crawld_api::{BasicAuth, DaemonApiAdapter, HttpApi};
use crawld_core::{
    Daemon, FsPackageStorage, PackageStorage, ProjectQueues, RunnerEnvironment, Subscribe,
};
use crawld_observe::{Journal, logger_init};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{cli::Cli, config::DaemonConfig};

// The logger reads the local UTC offset, which is only possible while the
// process is still single-threaded, so it is set up before the runtime starts.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = cli.resolve()?;
    logger_init(&cfg.logger)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(run(cfg))
}

async fn run(cfg: DaemonConfig) -> anyhow::Result<()> {
    let addr = cfg.bind_addr()?;
    info!(
        target: "crawld.agentd",
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        dbs_dir = %cfg.queue.dbs_dir.display(),
        eggs_dir = %cfg.packages.eggs_dir.display(),
        logs_dir = %cfg.runner.logs_dir.display(),
        "starting crawld"
    );

    let packages: Arc<dyn PackageStorage> = Arc::new(FsPackageStorage::from_config(&cfg.packages));
    let queues = ProjectQueues::open(&cfg.queue.dbs_dir)
        .with_context(|| format!("opening queues in {}", cfg.queue.dbs_dir.display()))?;
    let environment = Arc::new(RunnerEnvironment::new(cfg.runner.clone()));
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Journal::new())];

    let (daemon, handle) = Daemon::new(
        queues,
        &cfg.launcher,
        &cfg.queue.poller(),
        packages.clone(),
        environment,
        subscribers,
    )?;

    let shutdown = CancellationToken::new();
    let daemon_task = tokio::spawn(daemon.run(shutdown.clone()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let mut api = HttpApi::new(Arc::new(DaemonApiAdapter::new(handle, packages)));
    match cfg.http.credentials() {
        Some((username, password)) => {
            api = api.with_basic_auth(BasicAuth::new(username, password)?);
            info!(target: "crawld.agentd", username, "basic auth enabled");
        }
        None => warn!(target: "crawld.agentd", "basic auth disabled; the api is open to anyone who can reach it"),
    }
    let router = api.router();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(target: "crawld.agentd", %addr, "http api listening");

    let server_token = shutdown.clone();
    let served = crawld_api::axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await;

    // The server may also stop on its own error; the daemon follows it down.
    shutdown.cancel();
    daemon_task.await.context("daemon task panicked")?;
    served.context("http server failed")?;

    info!(target: "crawld.agentd", "crawld stopped");
    Ok(())
}

/// Resolves on ctrl-c, or on SIGTERM where there is one.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(target: "crawld.agentd", "interrupt received; shutting down"),
            Err(e) => {
                error!(target: "crawld.agentd", error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                info!(target: "crawld.agentd", "SIGTERM received; shutting down");
            }
            Err(e) => {
                error!(target: "crawld.agentd", error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::shutdown_signal;

    #[tokio::test]
    async fn sigterm_ends_the_wait() {
        let waiter = tokio::spawn(shutdown_signal());
        // Let the handler get installed before the signal goes out.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        // SAFETY: signals our own process, which now handles SIGTERM.
        let rc = unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
        assert_eq!(rc, 0);

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("SIGTERM did not end the wait")
            .unwrap();
    }
}
