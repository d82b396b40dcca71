mod cli;
mod config;
mod lifecycle;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use audit_log::{AuditSink, AuditStore};
use gate_tunnel::{GateServer, RelayService, Tunnel, TunnelService};

use crate::cli::{Cli, Mode};
use crate::lifecycle::{run_connection, run_connection_threaded, AgentCommand};

/// Standard input is read on a blocking thread that cannot be interrupted;
/// don't let it hold the process open at exit.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound on waiting for buffered audit records at exit.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// AgentService
// ---------------------------------------------------------------------------

/// Serves each inbound tunnel with its own agent process, audited into the
/// shared store.
struct AgentService {
    agent: AgentCommand,
    store: Arc<dyn AuditStore>,
}

#[async_trait]
impl TunnelService for AgentService {
    async fn serve_tunnel(&self, tunnel: Tunnel, cancel: CancellationToken) -> Result<()> {
        let (rx, tx) = tunnel.into_io();
        let store = Some(Arc::clone(&self.store));
        run_connection_threaded(self.agent.clone(), rx, tx, store, cancel).await
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")?;
    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(cli: Cli) -> Result<()> {
    // 1. Load config; the CLI level wins over the configured one.
    let (cfg, config_path) = config::load_or_default(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| cfg.logging.level.clone());

    // 2. Logging goes to stderr: stdout carries protocol bytes.
    init_tracing(&level, cli.log_json);

    let mode = cli.mode();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = ?config_path,
        ?mode,
        "acp-gate starting"
    );

    // 3. Shutdown signal (ctrl_c + SIGTERM) cancels the root token.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_cancel.cancel();
    });

    // 4. Run the selected mode.
    match mode {
        Mode::Local => {
            let agent = resolve_agent(&cli, &cfg)?;
            let (sink, writer) = open_audit(&cli.audit_db).await?;
            let store: Arc<dyn AuditStore> = Arc::new(sink);

            let result = run_connection(
                &agent,
                tokio::io::stdin(),
                tokio::io::stdout(),
                Some(store),
                cancel,
            )
            .await;
            drain_audit(writer).await;
            result
        }

        Mode::Server { listen } => {
            let agent = resolve_agent(&cli, &cfg)?;
            let (sink, writer) = open_audit(&cli.audit_db).await?;
            let server = GateServer::bind(&cli::bind_addr(&listen)).await?;

            info!(
                listen = %listen,
                agent = %agent.program.display(),
                "serving agent over tunnels"
            );
            let service = Arc::new(AgentService {
                agent,
                store: Arc::new(sink),
            });
            let result = server.serve(service, cancel).await;
            drain_audit(writer).await;
            result.map_err(Into::into)
        }

        Mode::Client { connect } => {
            let tunnel = gate_tunnel::dial(&connect).await?;
            info!(remote = %connect, "connected to remote gate");
            gate_tunnel::bridge(
                (tokio::io::stdin(), tokio::io::stdout()),
                tunnel.into_io(),
                cancel,
            )
            .await
            .context("tunnel bridge failed")
        }

        Mode::Relay { listen, connect } => {
            let server = GateServer::bind(&cli::bind_addr(&listen)).await?;
            info!(listen = %listen, remote = %connect, "relaying tunnels");
            server
                .serve(Arc::new(RelayService::new(connect)), cancel)
                .await?;
            Ok(())
        }
    }
}

fn resolve_agent(cli: &Cli, cfg: &config::Config) -> Result<AgentCommand> {
    config::resolve(
        cfg,
        cli.agent_name.as_deref(),
        cli.agent_cmd.as_deref(),
        &cli.agent_args,
    )
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if json {
        builder.json().with_thread_ids(true).init();
    } else {
        builder.init();
    }
}

async fn open_audit(path: &Path) -> Result<(AuditSink, JoinHandle<()>)> {
    let opened = AuditSink::open(path)
        .await
        .with_context(|| format!("failed to open audit log {}", path.display()))?;
    info!(path = %path.display(), "audit log opened");
    Ok(opened)
}

/// Wait for the writer task to flush once every sink handle is gone.
async fn drain_audit(writer: JoinHandle<()>) {
    match tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%e, "audit writer task failed"),
        Err(_) => warn!("audit log still busy at shutdown"),
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(%e, "failed to register SIGTERM handler");
                ctrl_c.await;
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received SIGINT (ctrl-c)");
    }
}
