//! Data structures describing supervised processes.
//!
//! PM2's `jlist` report is a JSON array of very wide objects; only the handful of
//! fields the dashboard shows are decoded, everything else is ignored.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize, Serializer};

/// Lifecycle status as reported by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Online,
    Stopping,
    Stopped,
    Launching,
    Errored,
    OneLaunchStatus,
    WaitingRestart,
    Unknown,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Online => "online",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Launching => "launching",
            ProcessStatus::Errored => "errored",
            ProcessStatus::OneLaunchStatus => "one-launch-status",
            ProcessStatus::WaitingRestart => "waiting restart",
            ProcessStatus::Unknown => "unknown",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ProcessStatus::Online)
    }
}

impl From<&str> for ProcessStatus {
    fn from(value: &str) -> Self {
        match value {
            "online" => ProcessStatus::Online,
            "stopping" => ProcessStatus::Stopping,
            "stopped" => ProcessStatus::Stopped,
            "launching" => ProcessStatus::Launching,
            "errored" => ProcessStatus::Errored,
            "one-launch-status" => ProcessStatus::OneLaunchStatus,
            "waiting restart" => ProcessStatus::WaitingRestart,
            _ => ProcessStatus::Unknown,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProcessStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One supervised process, as of the listing that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub name: String,
    pub id: u32,
    pub status: ProcessStatus,
    pub restart_count: u64,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub working_directory: Option<PathBuf>,
    /// OS pid while running.
    pub pid: Option<u32>,
    /// Start time of the current run, epoch milliseconds.
    pub started_at_ms: Option<u64>,
}

impl ProcessRecord {
    pub fn memory_mb(&self) -> u64 {
        (self.memory_bytes as f64 / 1024.0 / 1024.0).round() as u64
    }
}

#[derive(Debug, Deserialize)]
struct RawProcess {
    name: String,
    pm_id: u32,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    monit: Option<RawMonit>,
    #[serde(default)]
    pm2_env: Option<RawEnv>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMonit {
    #[serde(default)]
    memory: Option<u64>,
    #[serde(default)]
    cpu: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    restart_time: Option<u64>,
    #[serde(default)]
    pm_cwd: Option<String>,
    #[serde(default)]
    pm_uptime: Option<u64>,
}

impl From<RawProcess> for ProcessRecord {
    fn from(raw: RawProcess) -> Self {
        let monit = raw.monit.unwrap_or_default();
        let env = raw.pm2_env.unwrap_or_default();
        Self {
            name: raw.name,
            id: raw.pm_id,
            status: env
                .status
                .as_deref()
                .map(ProcessStatus::from)
                .unwrap_or(ProcessStatus::Unknown),
            restart_count: env.restart_time.unwrap_or(0),
            cpu_percent: monit.cpu.unwrap_or(0.0),
            memory_bytes: monit.memory.unwrap_or(0),
            working_directory: env
                .pm_cwd
                .filter(|cwd| !cwd.trim().is_empty())
                .map(PathBuf::from),
            pid: raw.pid.filter(|pid| *pid > 0),
            started_at_ms: env.pm_uptime,
        }
    }
}

/// Parses the supervisor's machine-readable process report.
///
/// PM2 may print notices such as `[PM2] Spawning PM2 daemon` before the JSON when
/// its daemon was not yet running; those lines are skipped.
pub fn parse_process_list(stdout: &str) -> serde_json::Result<Vec<ProcessRecord>> {
    let raw: Vec<RawProcess> = match serde_json::from_str(stdout.trim()) {
        Ok(raw) => raw,
        Err(err) => {
            let Some(start) = json_start(stdout) else {
                return Err(err);
            };
            serde_json::from_str(stdout[start..].trim())?
        }
    };
    Ok(raw.into_iter().map(ProcessRecord::from).collect())
}

// Offset of the first line that opens a JSON array (`[`, `[]` or `[{`).
fn json_start(stdout: &str) -> Option<usize> {
    let mut offset = 0;
    for line in stdout.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix('[') {
            if matches!(rest.trim_start().chars().next(), None | Some('{') | Some(']')) {
                return Some(offset + line.len() - trimmed.len());
            }
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const JLIST: &str = r#"[
      {"pid": 4242, "name": "api", "pm_id": 0,
       "monit": {"memory": 52428800, "cpu": 1.5},
       "pm2_env": {"status": "online", "restart_time": 3, "pm_cwd": "/srv/api",
                   "pm_uptime": 1700000000000, "exec_mode": "fork_mode", "unstable_restarts": 0}},
      {"pid": 0, "name": "worker", "pm_id": 1,
       "monit": {"memory": 0, "cpu": 0},
       "pm2_env": {"status": "stopped", "restart_time": 0}}
    ]"#;

    #[test]
    fn decodes_jlist_fields() {
        let records = parse_process_list(JLIST).unwrap();
        assert_eq!(records.len(), 2);

        let api = &records[0];
        assert_eq!(api.name, "api");
        assert_eq!(api.id, 0);
        assert_eq!(api.status, ProcessStatus::Online);
        assert_eq!(api.restart_count, 3);
        assert_eq!(api.memory_mb(), 50);
        assert_eq!(api.working_directory, Some(PathBuf::from("/srv/api")));
        assert_eq!(api.pid, Some(4242));

        let worker = &records[1];
        assert_eq!(worker.status, ProcessStatus::Stopped);
        assert_eq!(worker.working_directory, None);
        assert_eq!(worker.pid, None);
    }

    #[test]
    fn skips_daemon_banner() {
        let stdout = format!(
            "[PM2] Spawning PM2 daemon with pm2_home=/root/.pm2\n[PM2] PM2 Successfully daemonized\n{}",
            JLIST
        );
        let records = parse_process_list(&stdout).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "worker");

        assert!(parse_process_list("[PM2] Spawning PM2 daemon\n[]\n").unwrap().is_empty());
    }

    #[test]
    fn unknown_status_is_preserved_as_unknown() {
        let records =
            parse_process_list(r#"[{"name":"x","pm_id":7,"pm2_env":{"status":"paused"}}]"#).unwrap();
        assert_eq!(records[0].status, ProcessStatus::Unknown);
        assert_eq!(records[0].cpu_percent, 0.0);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_process_list("").is_err());
        assert!(parse_process_list("pm2: command not found").is_err());
    }

    #[test]
    fn serializes_status_as_supervisor_string() {
        let records = parse_process_list(JLIST).unwrap();
        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json["status"], "online");
        assert_eq!(json["restartCount"], 3);
        assert_eq!(json["workingDirectory"], "/srv/api");
    }
}
