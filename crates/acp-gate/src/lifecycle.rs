use std::collections::BTreeMap;
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::{JoinError, LocalSet};
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use acp_proxy::{acp, ProxyAgent, ProxyClient};
use audit_log::AuditStore;

/// How long a terminated agent gets to exit before we stop waiting.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an agent that closed its stdout gets to report an exit status.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// A fully resolved agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Overlay on the inherited environment.
    pub env: BTreeMap<String, String>,
}

struct Spawned {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

fn spawn_agent(agent: &AgentCommand) -> Result<Spawned> {
    let mut cmd = Command::new(&agent.program);
    cmd.args(&agent.args)
        .envs(&agent.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn agent: {}", agent.program.display()))?;

    match (child.stdin.take(), child.stdout.take()) {
        (Some(stdin), Some(stdout)) => Ok(Spawned {
            child,
            stdin,
            stdout,
        }),
        _ => {
            let _ = child.start_kill();
            bail!("agent {} started without stdio pipes", agent.program.display())
        }
    }
}

/// Which completion signal ended a connection.
#[derive(Debug)]
enum Ended {
    Cancelled,
    UpstreamDone,
    DownstreamDone,
    Exited(io::Result<ExitStatus>),
}

/// Serve one upstream peer with a freshly spawned agent.
///
/// The proxies are wired to each other before either side's I/O starts. The
/// connection then ends on the first of: `cancel` firing, the upstream
/// stream finishing, the agent's stdout finishing, the agent exiting. A
/// non-success agent exit is an error whichever signal came first. An agent
/// still running at the end is killed and reaped (bounded by
/// [`TERMINATE_TIMEOUT`]).
///
/// The ACP connections are `!Send`; this future runs them on its own
/// [`LocalSet`]. Use [`run_connection_threaded`] where a `Send` future is
/// needed.
pub async fn run_connection<R, W>(
    agent: &AgentCommand,
    upstream_rx: R,
    upstream_tx: W,
    store: Option<Arc<dyn AuditStore>>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + 'static,
    W: AsyncWrite + Unpin + 'static,
{
    let spawned = spawn_agent(agent)?;
    info!(
        pid = ?spawned.child.id(),
        program = %agent.program.display(),
        "agent started"
    );
    LocalSet::new()
        .run_until(proxy_until_done(spawned, upstream_rx, upstream_tx, store, cancel))
        .await
}

/// [`run_connection`] on a dedicated thread with its own current-thread
/// runtime.
pub async fn run_connection_threaded<R, W>(
    agent: AgentCommand,
    upstream_rx: R,
    upstream_tx: W,
    store: Option<Arc<dyn AuditStore>>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("acp-connection".to_string())
        .spawn(move || {
            let result = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start the connection runtime")
                .and_then(|rt| {
                    rt.block_on(run_connection(&agent, upstream_rx, upstream_tx, store, cancel))
                });
            let _ = done_tx.send(result);
        })
        .context("failed to start the connection thread")?;
    done_rx
        .await
        .context("connection thread ended without a result")?
}

async fn proxy_until_done<R, W>(
    spawned: Spawned,
    upstream_rx: R,
    upstream_tx: W,
    store: Option<Arc<dyn AuditStore>>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + 'static,
    W: AsyncWrite + Unpin + 'static,
{
    let Spawned {
        mut child,
        stdin,
        stdout,
    } = spawned;

    let proxy_agent = Rc::new(ProxyAgent::new());
    let proxy_client = Rc::new(ProxyClient::new());
    if let Some(store) = store {
        proxy_agent.set_store(Arc::clone(&store));
        proxy_client.set_store(store);
    }

    let (upstream, up_io) = acp::AgentSideConnection::new(
        proxy_agent.clone(),
        upstream_tx.compat_write(),
        upstream_rx.compat(),
        |fut| {
            tokio::task::spawn_local(fut);
        },
    );
    let (downstream, down_io) = acp::ClientSideConnection::new(
        proxy_client.clone(),
        stdin.compat_write(),
        stdout.compat(),
        |fut| {
            tokio::task::spawn_local(fut);
        },
    );
    proxy_agent.set_downstream(Rc::new(downstream));
    proxy_client.set_upstream(Rc::new(upstream));

    let mut up_task = tokio::task::spawn_local(up_io);
    let mut down_task = tokio::task::spawn_local(down_io);

    let ended = tokio::select! {
        _ = cancel.cancelled() => Ended::Cancelled,
        joined = &mut up_task => {
            log_io_end("upstream", joined);
            Ended::UpstreamDone
        }
        joined = &mut down_task => {
            log_io_end("downstream", joined);
            Ended::DownstreamDone
        }
        status = child.wait() => Ended::Exited(status),
    };

    up_task.abort();
    down_task.abort();
    debug!(
        cause = ?ended,
        capabilities = ?proxy_agent.capabilities().iter().collect::<Vec<_>>(),
        "connection finished"
    );

    let status = match ended {
        Ended::Exited(status) => Some(status.context("failed to wait on agent")?),
        // A closed stdout usually means the agent is on its way out.
        Ended::DownstreamDone => match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(status) => Some(status.context("failed to wait on agent")?),
            Err(_) => None,
        },
        Ended::Cancelled | Ended::UpstreamDone => {
            child.try_wait().context("failed to poll agent status")?
        }
    };

    match status {
        Some(status) if !status.success() => bail!("agent exited with {status}"),
        Some(_) => {
            info!("agent exited");
            Ok(())
        }
        None => {
            terminate(&mut child).await;
            Ok(())
        }
    }
}

fn log_io_end<E: Display>(side: &str, joined: std::result::Result<Result<(), E>, JoinError>) {
    match joined {
        Ok(Ok(())) => debug!(side, "stream finished"),
        Ok(Err(e)) => warn!(side, %e, "stream failed"),
        Err(e) => error!(side, %e, "stream task failed"),
    }
}

/// Kill the agent and wait a bounded time for it to be reaped.
async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        // Already exited and reaped.
        debug!(%e, "agent not killed");
        return;
    }
    match tokio::time::timeout(TERMINATE_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "agent terminated"),
        Ok(Err(e)) => warn!(%e, "error waiting for agent after kill"),
        Err(_) => warn!(
            timeout_secs = TERMINATE_TIMEOUT.as_secs(),
            "agent did not exit after kill"
        ),
    }
}
