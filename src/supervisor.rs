//! Client for the process supervisor (PM2).
//!
//! The supervisor is authoritative for everything: the client keeps no local
//! state, every listing is a fresh `pm2 jlist`, and lifecycle actions are passed
//! straight through by name.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{Settings, ToolCommand};
use crate::errors::{DashError, Result};
use crate::exec::CommandRunner;
use crate::outcome::ActionOutcome;
use crate::process::{parse_process_list, ProcessRecord};

/// Actions the supervisor applies to a running service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Stop,
    Restart,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Restart => "restart",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "started",
            LifecycleAction::Stop => "stopped",
            LifecycleAction::Restart => "restarted",
        }
    }
}

impl FromStr for LifecycleAction {
    type Err = DashError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "start" => Ok(LifecycleAction::Start),
            "stop" => Ok(LifecycleAction::Stop),
            "restart" => Ok(LifecycleAction::Restart),
            other => Err(DashError::InvalidAction(other.to_string())),
        }
    }
}

pub struct Supervisor {
    runner: Arc<dyn CommandRunner>,
    pm2: ToolCommand,
    list_timeout: Duration,
    lifecycle_timeout: Duration,
}

impl Supervisor {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self {
            runner,
            pm2: settings.pm2.clone(),
            list_timeout: settings.timeouts.list,
            lifecycle_timeout: settings.timeouts.lifecycle,
        }
    }

    /// Snapshot of every supervised process.
    pub async fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let command = self.pm2.command().arg("jlist");
        let outcome = self.runner.run(&command, Some(self.list_timeout)).await;
        if !outcome.succeeded {
            let message = outcome
                .error_message
                .unwrap_or_else(|| "process list failed".to_string());
            warn!(error = %message, "process list unavailable");
            return Err(DashError::DirectoryUnavailable(message));
        }
        parse_process_list(&outcome.stdout).map_err(|err| {
            warn!(error = %err, "unparsable process list");
            DashError::DirectoryUnavailable(format!("unparsable process list: {}", err))
        })
    }

    /// Looks up one process by name in a fresh listing.
    pub async fn find_process(&self, name: &str) -> Result<ProcessRecord> {
        self.list_processes()
            .await?
            .into_iter()
            .find(|record| record.name == name)
            .ok_or_else(|| DashError::ProcessNotFound(name.to_string()))
    }

    /// Issues exactly one `pm2 <action> <name>`. Whether `name` exists is for the
    /// supervisor to decide; see [`crate::outcome::names_unknown_process`].
    pub async fn apply_lifecycle_action(&self, name: &str, action: LifecycleAction) -> ActionOutcome {
        info!(process = %name, action = action.as_str(), "applying lifecycle action");
        let command = self.pm2.command().arg(action.as_str()).arg(name);
        self.runner.run(&command, Some(self.lifecycle_timeout)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::config::{Config, Overrides};
    use crate::exec::{CommandSpec, RunFuture};
    use crate::outcome::Failure;

    /// Replays canned outcomes in order and records every command it was given.
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        replies: Mutex<VecDeque<ActionOutcome>>,
        pub(crate) calls: Mutex<Vec<(CommandSpec, Option<Duration>)>>,
    }

    impl ScriptedRunner {
        pub(crate) fn with_replies(replies: Vec<ActionOutcome>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> Vec<(CommandSpec, Option<Duration>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run<'a>(&'a self, command: &'a CommandSpec, timeout: Option<Duration>) -> RunFuture<'a> {
            self.calls.lock().unwrap().push((command.clone(), timeout));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected command");
            Box::pin(async move { reply })
        }
    }

    pub(crate) fn test_settings() -> Settings {
        Settings::resolve(Overrides::default(), Config::default(), |key| {
            (key == "HOME").then(|| "/home/deploy".to_string())
        })
        .unwrap()
    }

    pub(crate) fn ok(stdout: &str) -> ActionOutcome {
        ActionOutcome::success(stdout.to_string(), String::new())
    }

    pub(crate) fn exit_1(stderr: &str) -> ActionOutcome {
        ActionOutcome::failed(
            Failure::Exit { code: Some(1) },
            "exited with status 1".into(),
            String::new(),
            stderr.to_string(),
        )
    }

    #[tokio::test]
    async fn lists_processes_with_jlist() {
        let runner = ScriptedRunner::with_replies(vec![ok(
            r#"[{"name":"api","pm_id":0,"pm2_env":{"status":"online","pm_cwd":"/srv/api"}}]"#,
        )]);
        let supervisor = Supervisor::new(runner.clone(), &test_settings());

        let records = supervisor.list_processes().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "api");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, CommandSpec::new("pm2").arg("jlist"));
        assert_eq!(calls[0].1, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn unreachable_or_garbled_supervisor_is_directory_unavailable() {
        let runner = ScriptedRunner::with_replies(vec![
            exit_1("connect ENOENT /root/.pm2/rpc.sock"),
            ok("not json at all"),
        ]);
        let supervisor = Supervisor::new(runner, &test_settings());

        let err = supervisor.list_processes().await.unwrap_err();
        assert_eq!(err.code(), "DirectoryUnavailable");
        let err = supervisor.list_processes().await.unwrap_err();
        assert_eq!(err.code(), "DirectoryUnavailable");
        assert!(err.to_string().contains("unparsable"));
    }

    #[tokio::test]
    async fn find_process_reports_missing_names() {
        let runner = ScriptedRunner::with_replies(vec![ok("[]")]);
        let supervisor = Supervisor::new(runner, &test_settings());
        let err = supervisor.find_process("ghost").await.unwrap_err();
        assert!(matches!(err, DashError::ProcessNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn lifecycle_actions_issue_exactly_one_command() {
        for action in [
            LifecycleAction::Start,
            LifecycleAction::Stop,
            LifecycleAction::Restart,
        ] {
            let runner = ScriptedRunner::with_replies(vec![ok("[PM2] Done.")]);
            let supervisor = Supervisor::new(runner.clone(), &test_settings());
            let outcome = supervisor.apply_lifecycle_action("api", action).await;
            assert!(outcome.succeeded);

            let calls = runner.calls();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].0, CommandSpec::new("pm2").args([action.as_str(), "api"]));
            assert_eq!(calls[0].1, Some(Duration::from_secs(60)));
        }
    }

    #[tokio::test]
    async fn lifecycle_failure_is_returned_not_raised() {
        let runner = ScriptedRunner::with_replies(vec![exit_1(
            "[PM2][ERROR] Process or Namespace ghost not found",
        )]);
        let supervisor = Supervisor::new(runner, &test_settings());
        let outcome = supervisor
            .apply_lifecycle_action("ghost", LifecycleAction::Restart)
            .await;
        assert!(!outcome.succeeded);
        assert!(outcome.stderr.contains("not found"));
    }

    #[test]
    fn parses_lifecycle_actions() {
        assert_eq!("restart".parse::<LifecycleAction>().unwrap(), LifecycleAction::Restart);
        let err = "reload".parse::<LifecycleAction>().unwrap_err();
        assert_eq!(err.code(), "InvalidAction");
    }
}
