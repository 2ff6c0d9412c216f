//! Configuration management for pmdeck.
//!
//! This module defines the structure of the optional `pmdeck.toml` file and the
//! resolved [`Settings`] handed to every component at startup. Values are layered:
//! command-line flag, then environment variable, then config file, then default.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::exec::CommandSpec;

pub const DEFAULT_PORT: u16 = 3002;
pub const DEFAULT_MANIFEST: &str = "package.json";

/// Top-level structure of `pmdeck.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to listen on (default: 0.0.0.0).
    pub bind: Option<IpAddr>,
    /// Port to listen on (default: 3002).
    pub port: Option<u16>,
    /// Directory holding `<name>-out.log` / `<name>-error.log`.
    pub log_dir: Option<PathBuf>,
    /// Manifest consulted before install/build/deploy (default: package.json).
    pub manifest: Option<String>,
    /// Command lines for the external tools.
    pub tools: Option<ToolsConfig>,
    /// Per-action time budgets.
    pub timeouts: Option<TimeoutsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    pub pm2: Option<String>,
    pub git: Option<String>,
    pub npm: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    pub list_secs: Option<u64>,
    pub lifecycle_secs: Option<u64>,
    pub pull_secs: Option<u64>,
    pub install_secs: Option<u64>,
    pub build_secs: Option<u64>,
    pub deploy_secs: Option<u64>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// An external tool invocation prefix, e.g. `pm2` or `npx pm2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts =
            shell_words::split(raw).with_context(|| format!("failed to parse tool command {}", raw))?;
        if parts.is_empty() {
            return Err(anyhow!("empty tool command"));
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }

    /// Starts a [`CommandSpec`] for this tool; callers append the action arguments.
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(self.program.clone()).args(self.args.iter().cloned())
    }
}

/// Wall-clock budgets for each kind of external command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub list: Duration,
    pub lifecycle: Duration,
    pub pull: Duration,
    pub install: Duration,
    pub build: Duration,
    pub deploy: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(30),
            lifecycle: Duration::from_secs(60),
            pull: Duration::from_secs(120),
            install: Duration::from_secs(300),
            build: Duration::from_secs(600),
            deploy: Duration::from_secs(900),
        }
    }
}

impl Timeouts {
    fn from_config(config: Option<&TimeoutsConfig>) -> Self {
        let defaults = Self::default();
        let Some(config) = config else {
            return defaults;
        };
        let pick = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_secs).unwrap_or(fallback)
        };
        Self {
            list: pick(config.list_secs, defaults.list),
            lifecycle: pick(config.lifecycle_secs, defaults.lifecycle),
            pull: pick(config.pull_secs, defaults.pull),
            install: pick(config.install_secs, defaults.install),
            build: pick(config.build_secs, defaults.build),
            deploy: pick(config.deploy_secs, defaults.deploy),
        }
    }
}

/// Values supplied on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub log_dir: Option<PathBuf>,
}

/// Fully resolved runtime configuration. Built once at startup, read-only afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: IpAddr,
    pub port: u16,
    pub log_dir: PathBuf,
    pub manifest: String,
    pub pm2: ToolCommand,
    pub git: ToolCommand,
    pub npm: ToolCommand,
    pub timeouts: Timeouts,
}

impl Settings {
    /// Resolves settings from CLI overrides, the environment and the config file.
    ///
    /// `env` is a lookup function so tests can supply a fixed environment.
    pub fn resolve<F>(cli: Overrides, config: Config, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_port = match env("PMDECK_PORT") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .with_context(|| format!("invalid PMDECK_PORT {}", raw))?,
            ),
            None => None,
        };
        let port = cli.port.or(env_port).or(config.port).unwrap_or(DEFAULT_PORT);
        let bind = cli
            .bind
            .or(config.bind)
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let log_dir = cli
            .log_dir
            .or_else(|| env("PMDECK_LOG_DIR").map(PathBuf::from))
            .or(config.log_dir)
            .or_else(|| default_log_dir(&env))
            .ok_or_else(|| anyhow!("cannot determine log directory; set PMDECK_LOG_DIR"))?;

        let tools = config.tools.unwrap_or_default();
        let tool = |value: Option<String>, fallback: &str| -> Result<ToolCommand> {
            ToolCommand::parse(value.as_deref().unwrap_or(fallback))
        };

        Ok(Self {
            bind,
            port,
            log_dir,
            manifest: config
                .manifest
                .unwrap_or_else(|| DEFAULT_MANIFEST.to_string()),
            pm2: tool(tools.pm2, "pm2")?,
            git: tool(tools.git, "git")?,
            npm: tool(tools.npm, "npm")?,
            timeouts: Timeouts::from_config(config.timeouts.as_ref()),
        })
    }
}

// PM2 keeps its logs under $PM2_HOME/logs, defaulting to ~/.pm2/logs.
fn default_log_dir<F>(env: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(home) = env("PM2_HOME") {
        return Some(PathBuf::from(home).join("logs"));
    }
    env("HOME").map(|home| PathBuf::from(home).join(".pm2").join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
bind = "127.0.0.1"
port = 4000
log_dir = "/var/log/pm2"
manifest = "package.json"

[tools]
pm2 = "npx pm2"
npm = "pnpm"

[timeouts]
pull_secs = 30
deploy_secs = 1800
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.port, Some(4000));
        assert_eq!(config.log_dir.as_deref(), Some(Path::new("/var/log/pm2")));
        let tools = config.tools.as_ref().unwrap();
        assert_eq!(tools.pm2.as_deref(), Some("npx pm2"));
        assert_eq!(tools.git, None);
        assert_eq!(config.timeouts.as_ref().unwrap().deploy_secs, Some(1800));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("prot = 3000").is_err());
    }

    #[test]
    fn defaults_follow_pm2_layout() {
        let settings =
            Settings::resolve(Overrides::default(), Config::default(), env_of(&[("HOME", "/home/deploy")]))
                .unwrap();
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.log_dir, PathBuf::from("/home/deploy/.pm2/logs"));
        assert_eq!(settings.manifest, "package.json");
        assert_eq!(settings.pm2.program, "pm2");
        assert_eq!(settings.timeouts, Timeouts::default());

        let settings = Settings::resolve(
            Overrides::default(),
            Config::default(),
            env_of(&[("HOME", "/home/deploy"), ("PM2_HOME", "/opt/pm2")]),
        )
        .unwrap();
        assert_eq!(settings.log_dir, PathBuf::from("/opt/pm2/logs"));
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let config = Config {
            port: Some(4000),
            log_dir: Some(PathBuf::from("/from/file")),
            ..Config::default()
        };
        let env = env_of(&[("PMDECK_PORT", "5000"), ("PMDECK_LOG_DIR", "/from/env")]);

        let settings = Settings::resolve(Overrides::default(), config.clone(), &env).unwrap();
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.log_dir, PathBuf::from("/from/env"));

        let cli = Overrides {
            port: Some(6000),
            log_dir: Some(PathBuf::from("/from/cli")),
            ..Overrides::default()
        };
        let settings = Settings::resolve(cli, config, &env).unwrap();
        assert_eq!(settings.port, 6000);
        assert_eq!(settings.log_dir, PathBuf::from("/from/cli"));
    }

    #[test]
    fn invalid_env_port_is_an_error() {
        let result = Settings::resolve(
            Overrides::default(),
            Config::default(),
            env_of(&[("HOME", "/root"), ("PMDECK_PORT", "http")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn tool_commands_split_like_a_shell() {
        let tool = ToolCommand::parse("npx --yes pm2").unwrap();
        assert_eq!(tool.program, "npx");
        assert_eq!(tool.args, vec!["--yes", "pm2"]);
        let spec = tool.command().arg("jlist");
        assert_eq!(spec.args, vec!["--yes", "pm2", "jlist"]);
        assert!(ToolCommand::parse("   ").is_err());
    }

    #[test]
    fn partial_timeouts_keep_defaults() {
        let config = TimeoutsConfig {
            install_secs: Some(60),
            ..TimeoutsConfig::default()
        };
        let timeouts = Timeouts::from_config(Some(&config));
        assert_eq!(timeouts.install, Duration::from_secs(60));
        assert_eq!(timeouts.build, Duration::from_secs(600));
    }
}
