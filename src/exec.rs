//! External command execution.
//!
//! Commands are spawned directly from an argument vector (never through a shell),
//! with stdout and stderr captured concurrently. On Unix each child leads its own
//! process group so that a timeout can take down everything it started, not just
//! the immediate child.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::outcome::{ActionOutcome, Failure};

/// How long to keep draining output pipes after the child has gone.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);
/// How long to wait for a killed child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// A fully-formed command: program, arguments and optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Human-readable rendering used in logs and error messages.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.as_str());
        parts.extend(self.args.iter().map(String::as_str));
        shell_words::join(parts)
    }
}

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = ActionOutcome> + Send + 'a>>;

/// Runs commands on behalf of the supervisor client and the deployment runner.
///
/// Production code uses [`SystemRunner`]; tests substitute a scripted runner that
/// records invocations instead of spawning processes.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, command: &'a CommandSpec, timeout: Option<Duration>) -> RunFuture<'a>;
}

/// Spawns real operating-system processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run<'a>(&'a self, command: &'a CommandSpec, timeout: Option<Duration>) -> RunFuture<'a> {
        Box::pin(run_command(command, timeout))
    }
}

/// Runs `spec` to completion or until `timeout` elapses.
///
/// Never returns an error: spawn failures, non-zero exits and timeouts are all
/// reported through the returned [`ActionOutcome`].
pub async fn run_command(spec: &CommandSpec, timeout: Option<Duration>) -> ActionOutcome {
    let label = spec.display();
    let started = Instant::now();

    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command.kill_on_drop(true);

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| {
            let _ = libc::setpgid(0, 0);
            Ok(())
        });
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(command = %label, error = %err, "failed to spawn command");
            return ActionOutcome::failed(
                Failure::Spawn,
                format!("failed to start `{}`: {}", label, err),
                String::new(),
                String::new(),
            );
        }
    };
    info!(command = %label, pid = child.id().unwrap_or(0), "spawned command");

    let stdout = child.stdout.take().map(StreamCapture::start);
    let stderr = child.stderr.take().map(StreamCapture::start);

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
        None => Some(child.wait().await),
    };

    let Some(waited) = waited else {
        let budget = timeout.unwrap_or_default();
        terminate_tree(&mut child).await;
        let (stdout, stderr) = tokio::join!(collect(stdout), collect(stderr));
        warn!(
            command = %label,
            budget_ms = budget.as_millis() as u64,
            "command timed out; process tree killed"
        );
        return ActionOutcome::failed(
            Failure::TimedOut { budget },
            format!("`{}` timed out after {}", label, format_budget(budget)),
            stdout,
            stderr,
        );
    };

    let (stdout, stderr) = tokio::join!(collect(stdout), collect(stderr));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let status = match waited {
        Ok(status) => status,
        Err(err) => {
            warn!(command = %label, error = %err, "failed waiting for command");
            return ActionOutcome::failed(
                Failure::Spawn,
                format!("failed waiting for `{}`: {}", label, err),
                stdout,
                stderr,
            );
        }
    };

    let code = status.code();
    info!(
        command = %label,
        exit_code = code.unwrap_or(-1),
        success = status.success(),
        elapsed_ms,
        "command exited"
    );
    debug!(
        command = %label,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        "captured command output"
    );

    if status.success() {
        return ActionOutcome::success(stdout, stderr);
    }
    let message = match code {
        Some(code) => format!("`{}` exited with status {}", label, code),
        None => format!("`{}` was terminated by a signal", label),
    };
    ActionOutcome::failed(Failure::Exit { code }, message, stdout, stderr)
}

// Kill the child's whole process group, then reap the child itself.
async fn terminate_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "child already gone");
    }
    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!(error = %err, "failed to reap killed command"),
        Err(_) => warn!("killed command was not reaped in time"),
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    unsafe {
        let pid = pid as i32;
        let _ = libc::kill(-pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

// Output is appended to a shared buffer as it arrives, so whatever was read
// survives even if the reader task has to be abandoned.
struct StreamCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl StreamCapture {
    fn start<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(read_stream(reader, buf.clone()));
        Self { buf, task }
    }

    fn take_text(&self) -> String {
        let bytes = std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner));
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn read_stream<R>(mut reader: R, buf: Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut guard = buf.lock().unwrap_or_else(PoisonError::into_inner);
                guard.extend_from_slice(&chunk[..n]);
            }
            Err(err) => {
                debug!(error = %err, "output pipe closed with error");
                break;
            }
        }
    }
}

// A background process started by the command (`server &`) can hold a pipe open
// long after the command itself exited, so draining is bounded. Whatever arrived
// before the grace period ran out is kept.
async fn collect(capture: Option<StreamCapture>) -> String {
    let Some(mut capture) = capture else {
        return String::new();
    };
    match tokio::time::timeout(OUTPUT_GRACE, &mut capture.task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "output reader task failed"),
        Err(_) => {
            capture.task.abort();
            debug!("output pipe still held open after exit; keeping partial output");
        }
    }
    capture.take_text()
}

fn format_budget(budget: Duration) -> String {
    if budget.as_secs() > 0 && budget.subsec_millis() == 0 {
        format!("{}s", budget.as_secs())
    } else {
        format!("{}ms", budget.as_millis())
    }
}
