use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "acp-gate", version, about = "Auditing proxy for the Agent Client Protocol")]
pub struct Cli {
    /// Path to the JSON configuration file. Without it the first existing
    /// acp-gate/config.json under $XDG_CONFIG_HOME or ~/.config is used.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Agent server entry to use from the configuration file
    #[arg(long)]
    pub agent_name: Option<String>,

    /// Agent command (overrides the configured command)
    #[arg(long)]
    pub agent_cmd: Option<String>,

    /// Extra argument for the agent; repeatable, appended after the
    /// configured arguments
    #[arg(long = "agent-arg", allow_hyphen_values = true)]
    pub agent_args: Vec<String>,

    /// Path to the JSON-lines audit log
    #[arg(long, default_value = "audit.jsonl")]
    pub audit_db: PathBuf,

    /// Accept tunnels on this address
    #[arg(long)]
    pub listen: Option<String>,

    /// Dial a remote gate at this address (host:port or http:// URL)
    #[arg(long)]
    pub connect: Option<String>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

/// What this process does, decided by `--listen` and `--connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Spawn the agent and proxy it over stdio.
    Local,
    /// Accept tunnels; spawn an agent per tunnel.
    Server { listen: String },
    /// Carry stdio over a tunnel to a remote gate.
    Client { connect: String },
    /// Accept tunnels and forward each to another gate.
    Relay { listen: String, connect: String },
}

impl Cli {
    pub fn mode(&self) -> Mode {
        match (self.listen.clone(), self.connect.clone()) {
            (None, None) => Mode::Local,
            (Some(listen), None) => Mode::Server { listen },
            (None, Some(connect)) => Mode::Client { connect },
            (Some(listen), Some(connect)) => Mode::Relay { listen, connect },
        }
    }
}

/// Address to bind for `--listen`. A bare `:port` listens on every
/// interface.
pub fn bind_addr(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    }
}
