use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use crate::lifecycle::AgentCommand;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent_servers: BTreeMap<String, AgentServer>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One agent executable with its arguments and environment overlay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentServer {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a JSON file.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    Ok(config)
}

/// Load the explicitly given file, or else the first default location that
/// exists. With neither, the empty configuration is returned.
pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<(Config, Option<PathBuf>)> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_default_config(),
    };
    match path {
        Some(path) => Ok((load(&path)?, Some(path))),
        None => Ok((Config::default(), None)),
    }
}

/// Candidate config locations, most preferred first.
pub fn default_config_paths() -> Vec<PathBuf> {
    let xdg = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    candidate_paths(xdg.as_deref(), dirs::home_dir().as_deref())
}

fn candidate_paths(xdg: Option<&Path>, home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(xdg) = xdg {
        paths.push(xdg.join(".acp-gate").join("config.json"));
        paths.push(xdg.join("acp-gate").join("config.json"));
    }
    if let Some(home) = home {
        let base = home.join(".config");
        paths.push(base.join(".acp-gate").join("config.json"));
        paths.push(base.join("acp-gate").join("config.json"));
    }
    paths
}

pub fn find_default_config() -> Option<PathBuf> {
    default_config_paths().into_iter().find(|p| p.is_file())
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Work out the agent to spawn from the config and command-line overrides.
///
/// * `name` picks an entry; an unknown name is an error. Without a name, a
///   config with exactly one entry uses that entry.
/// * `cli_cmd` replaces the entry's command.
/// * Arguments are the entry's followed by `cli_args`.
/// * The entry's env is an overlay on the inherited environment.
pub fn resolve(
    config: &Config,
    name: Option<&str>,
    cli_cmd: Option<&str>,
    cli_args: &[String],
) -> anyhow::Result<AgentCommand> {
    let entry = match name {
        Some(name) => config
            .agent_servers
            .get(name)
            .cloned()
            .with_context(|| format!("agent {name:?} not found in config"))?,
        None if config.agent_servers.len() == 1 => config
            .agent_servers
            .values()
            .next()
            .cloned()
            .unwrap_or_default(),
        None => AgentServer::default(),
    };

    let command = cli_cmd
        .filter(|c| !c.is_empty())
        .unwrap_or(entry.command.as_str());
    if command.is_empty() {
        bail!("no agent command provided (use --agent-cmd or a config file)");
    }

    let mut args = entry.args;
    args.extend(cli_args.iter().cloned());

    Ok(AgentCommand {
        program: expand_user(command, dirs::home_dir().as_deref()),
        args,
        env: entry.env,
    })
}

/// Expand a leading `~` or `~/` to the home directory. `~user` forms are
/// left alone.
fn expand_user(path: &str, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(path);
    };
    if path == "~" {
        return home.to_path_buf();
    }
    match path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}
