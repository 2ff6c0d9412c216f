//! Source pull, dependency install, build and deploy against a process's
//! working directory.
//!
//! Nothing is remembered between invocations. Each action re-resolves the
//! working directory from a fresh process listing and re-checks its
//! prerequisites on disk before any command is spawned.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{Settings, Timeouts, ToolCommand};
use crate::errors::{DashError, Result};
use crate::exec::{CommandRunner, CommandSpec};
use crate::outcome::ActionOutcome;
use crate::supervisor::Supervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    PullSource,
    InstallDependencies,
    Build,
    Deploy,
}

impl DeployAction {
    /// Route segment and `action` field value.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployAction::PullSource => "git-pull",
            DeployAction::InstallDependencies => "npm-install",
            DeployAction::Build => "npm-build",
            DeployAction::Deploy => "npm-deploy",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DeployAction::PullSource => "Git pull",
            DeployAction::InstallDependencies => "NPM install",
            DeployAction::Build => "NPM build",
            DeployAction::Deploy => "NPM deploy",
        }
    }

    /// Manifest script the action runs, if any.
    pub fn script(&self) -> Option<&'static str> {
        match self {
            DeployAction::Build => Some("build"),
            DeployAction::Deploy => Some("deploy"),
            DeployAction::PullSource | DeployAction::InstallDependencies => None,
        }
    }

    fn needs_manifest(&self) -> bool {
        !matches!(self, DeployAction::PullSource)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    scripts: Option<HashMap<String, Value>>,
}

pub struct DeployRunner {
    supervisor: Arc<Supervisor>,
    runner: Arc<dyn CommandRunner>,
    git: ToolCommand,
    npm: ToolCommand,
    manifest: String,
    timeouts: Timeouts,
}

impl DeployRunner {
    pub fn new(
        supervisor: Arc<Supervisor>,
        runner: Arc<dyn CommandRunner>,
        settings: &Settings,
    ) -> Self {
        Self {
            supervisor,
            runner,
            git: settings.git.clone(),
            npm: settings.npm.clone(),
            manifest: settings.manifest.clone(),
            timeouts: settings.timeouts,
        }
    }

    /// Runs `action` for process `name`.
    ///
    /// Prerequisite failures are returned as errors and no command is spawned.
    /// Once the command has run, its outcome is returned as-is, failed or not.
    pub async fn run(&self, name: &str, action: DeployAction) -> Result<ActionOutcome> {
        let record = self.supervisor.find_process(name).await?;
        let dir = record
            .working_directory
            .ok_or_else(|| DashError::NoWorkingDirectory(name.to_string()))?;
        if !dir.is_dir() {
            warn!(process = %name, dir = %dir.display(), "working directory missing");
            return Err(DashError::DirectoryMissing(dir));
        }
        if action.needs_manifest() {
            self.check_manifest(name, &dir, action.script())?;
        }

        let (command, budget) = self.command_for(action);
        let command = command.current_dir(&dir);
        info!(
            process = %name,
            action = action.as_str(),
            dir = %dir.display(),
            "running deployment action"
        );
        let outcome = self.runner.run(&command, Some(budget)).await;
        Ok(outcome.in_directory(dir))
    }

    fn command_for(&self, action: DeployAction) -> (CommandSpec, Duration) {
        match action {
            DeployAction::PullSource => (self.git.command().arg("pull"), self.timeouts.pull),
            DeployAction::InstallDependencies => {
                (self.npm.command().arg("install"), self.timeouts.install)
            }
            DeployAction::Build => (self.npm.command().args(["run", "build"]), self.timeouts.build),
            DeployAction::Deploy => {
                (self.npm.command().args(["run", "deploy"]), self.timeouts.deploy)
            }
        }
    }

    fn check_manifest(&self, name: &str, dir: &Path, script: Option<&str>) -> Result<()> {
        let path = dir.join(&self.manifest);
        if !path.is_file() {
            return Err(DashError::ManifestMissing {
                file: self.manifest.clone(),
                dir: dir.to_path_buf(),
            });
        }
        let Some(script) = script else {
            return Ok(());
        };

        let invalid = |reason: String| DashError::ManifestInvalid {
            file: self.manifest.clone(),
            dir: dir.to_path_buf(),
            reason,
        };
        let raw = std::fs::read_to_string(&path).map_err(|err| invalid(err.to_string()))?;
        let manifest: Manifest = serde_json::from_str(&raw).map_err(|err| invalid(err.to_string()))?;

        let declared = manifest
            .scripts
            .as_ref()
            .and_then(|scripts| scripts.get(script))
            .and_then(Value::as_str)
            .is_some_and(|body| !body.trim().is_empty());
        if !declared {
            return Err(DashError::ScriptMissing {
                script: script.to_string(),
                file: self.manifest.clone(),
                process: name.to_string(),
            });
        }
        Ok(())
    }
}
