//! Worker process supervision
//!
//! Launches configured worker processes with piped stdio, drains their stderr
//! into the log and stops them with an interrupt followed by a forced kill.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::constants;
use crate::error::LaunchError;

/// How to launch one worker. Built from configuration and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
    pub enabled: bool,
}

impl WorkerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: PathBuf::from("."),
            enabled: true,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }
}

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl WorkerState {
    pub fn display(&self) -> &'static str {
        match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Failed => "failed",
        }
    }
}

/// Handle returned from a successful start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub name: String,
    pub pid: Option<u32>,
}

/// The worker's stdin/stdout, handed to a session exactly once
pub struct WorkerStdio {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

struct WorkerProcess {
    child: Child,
    pid: Option<u32>,
    started_at: Instant,
    running: bool,
    exit_status: Option<ExitStatus>,
    stdio: Option<WorkerStdio>,
    stderr_task: Option<JoinHandle<()>>,
}

impl WorkerProcess {
    /// Running flag set and no exit status observed yet
    fn poll_running(&mut self) -> bool {
        if !self.running || self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                self.running = false;
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll worker status");
                self.running = false;
                false
            }
        }
    }
}

#[derive(Default)]
struct Workers {
    live: HashMap<String, WorkerProcess>,
    states: HashMap<String, WorkerState>,
    exit_status: HashMap<String, ExitStatus>,
}

impl Workers {
    fn set_state(&mut self, name: &str, state: WorkerState) {
        self.states.insert(name.to_string(), state);
    }
}

/// Owns every worker process. The lock is never held across an await.
pub struct ProcessSupervisor {
    specs: Vec<WorkerSpec>,
    workers: Mutex<Workers>,
    grace_period: Duration,
    settle_delay: Duration,
}

impl ProcessSupervisor {
    /// Track the enabled specs, in the order given
    pub fn new(specs: Vec<WorkerSpec>) -> Self {
        let specs = specs
            .into_iter()
            .filter(|spec| {
                if !spec.enabled {
                    tracing::info!(worker = %spec.name, "Worker is disabled in config");
                }
                spec.enabled
            })
            .collect();

        Self {
            specs,
            workers: Mutex::new(Workers::default()),
            grace_period: constants::process::STOP_GRACE_PERIOD,
            settle_delay: constants::process::LAUNCH_SETTLE_DELAY,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Configured worker names in configuration order
    pub fn worker_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn spec(&self, name: &str) -> Option<&WorkerSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Launch a worker with piped stdio. A worker that is already running is left alone.
    pub fn start(&self, spec: &WorkerSpec) -> Result<WorkerHandle, LaunchError> {
        {
            let mut workers = self.workers.lock();
            if let Some(worker) = workers.live.get_mut(&spec.name) {
                if worker.poll_running() {
                    tracing::warn!(worker = %spec.name, "Worker is already running");
                    return Ok(WorkerHandle {
                        name: spec.name.clone(),
                        pid: worker.pid,
                    });
                }
            }
            if let Some(stale) = workers.live.remove(&spec.name) {
                if let Some(task) = stale.stderr_task {
                    task.abort();
                }
            }
            workers.set_state(&spec.name, WorkerState::Starting);
        }

        tracing::info!(worker = %spec.name, "Starting worker");
        tracing::debug!(
            worker = %spec.name,
            command = %spec.command,
            args = ?spec.args,
            working_dir = ?spec.working_dir,
            "Worker command"
        );

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(worker = %spec.name, error = %e, "Failed to start worker");
                self.workers.lock().set_state(&spec.name, WorkerState::Failed);
                let missing_binary =
                    e.kind() == std::io::ErrorKind::NotFound && spec.working_dir.is_dir();
                return Err(if missing_binary {
                    LaunchError::CommandNotFound {
                        command: spec.command.clone(),
                    }
                } else {
                    LaunchError::Spawn {
                        command: spec.command.clone(),
                        source: e,
                    }
                });
            }
        };

        let pid = child.id();
        let stdio = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => Some(WorkerStdio { stdin, stdout }),
            _ => None,
        };
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| drain_stderr(spec.name.clone(), stderr));

        let Some(stdio) = stdio else {
            self.workers.lock().set_state(&spec.name, WorkerState::Failed);
            return Err(LaunchError::MissingStream {
                name: spec.name.clone(),
                stream: "stdio",
            });
        };

        let worker = WorkerProcess {
            child,
            pid,
            started_at: Instant::now(),
            running: true,
            exit_status: None,
            stdio: Some(stdio),
            stderr_task,
        };

        let mut workers = self.workers.lock();
        workers.live.insert(spec.name.clone(), worker);
        workers.exit_status.remove(&spec.name);
        workers.set_state(&spec.name, WorkerState::Running);

        tracing::info!(worker = %spec.name, pid = ?pid, "Worker started");

        Ok(WorkerHandle {
            name: spec.name.clone(),
            pid,
        })
    }

    /// Start a configured worker by name
    pub fn start_worker(&self, name: &str) -> bool {
        let Some(spec) = self.spec(name) else {
            tracing::error!(worker = %name, "Worker not found in configuration");
            return false;
        };
        self.start(spec).is_ok()
    }

    /// Start every configured worker. Failures are reported per worker.
    pub async fn start_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();

        for (i, spec) in self.specs.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settle_delay).await;
            }
            let ok = self.start(spec).is_ok();
            results.insert(spec.name.clone(), ok);
        }

        results
    }

    /// Interrupt, wait for the grace period, then kill.
    ///
    /// Returns true once the worker is stopped, including when it was never
    /// running. Returns false only for a name the supervisor has never seen.
    pub async fn stop(&self, name: &str) -> bool {
        let worker = {
            let mut workers = self.workers.lock();
            match workers.live.remove(name) {
                Some(worker) => {
                    workers.set_state(name, WorkerState::Stopping);
                    worker
                }
                None => {
                    let known = self.spec(name).is_some() || workers.states.contains_key(name);
                    if known {
                        tracing::debug!(worker = %name, "Worker is not running");
                    } else {
                        tracing::error!(worker = %name, "Worker not found in configuration");
                    }
                    return known;
                }
            }
        };

        let WorkerProcess {
            mut child,
            pid,
            started_at,
            exit_status,
            stdio,
            stderr_task,
            ..
        } = worker;

        // Closing stdin lets well-behaved workers exit on their own
        drop(stdio);

        let status = match exit_status {
            Some(status) => Some(status),
            None => {
                tracing::info!(worker = %name, "Stopping worker");
                terminate(&mut child, pid, name);

                match tokio::time::timeout(self.grace_period, child.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(e)) => {
                        tracing::warn!(worker = %name, error = %e, "Failed to wait for worker");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(
                            worker = %name,
                            "Worker did not terminate gracefully, killing"
                        );
                        if let Err(e) = child.kill().await {
                            tracing::warn!(worker = %name, error = %e, "Failed to kill worker");
                        }
                        child.try_wait().ok().flatten()
                    }
                }
            }
        };

        if let Some(task) = stderr_task {
            task.abort();
        }

        let mut workers = self.workers.lock();
        if let Some(status) = status {
            workers.exit_status.insert(name.to_string(), status);
        }
        workers.set_state(name, WorkerState::Stopped);

        tracing::info!(
            worker = %name,
            uptime_ms = started_at.elapsed().as_millis() as u64,
            status = ?status,
            "Worker stopped"
        );
        true
    }

    /// Stop a configured worker by name
    pub async fn stop_worker(&self, name: &str) -> bool {
        if self.spec(name).is_none() {
            tracing::error!(worker = %name, "Worker not found in configuration");
            return false;
        }
        self.stop(name).await
    }

    /// Stop every tracked worker, best effort
    pub async fn stop_all(&self) -> HashMap<String, bool> {
        let mut names = self.worker_names();
        {
            let workers = self.workers.lock();
            for name in workers.live.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }

        let mut results = HashMap::new();
        for name in names {
            let ok = self.stop(&name).await;
            results.insert(name, ok);
        }
        results
    }

    /// Handle exists, marked running, and no exit status observed
    pub fn is_running(&self, name: &str) -> bool {
        let mut workers = self.workers.lock();
        let running = workers
            .live
            .get_mut(name)
            .map(WorkerProcess::poll_running)
            .unwrap_or(false);

        if !running {
            let exited = workers
                .live
                .get(name)
                .and_then(|w| w.exit_status)
                .map(|status| (status, workers.states.get(name).copied()));
            if let Some((status, Some(WorkerState::Running))) = exited {
                tracing::warn!(worker = %name, status = %status, "Worker exited unexpectedly");
                workers.exit_status.insert(name.to_string(), status);
                workers.set_state(name, WorkerState::Stopped);
            } else if workers
                .live
                .get(name)
                .is_some_and(|w| w.exit_status.is_none())
                && workers.states.get(name) == Some(&WorkerState::Running)
            {
                // Status could not be polled; stop trusting the handle
                workers.set_state(name, WorkerState::Failed);
            }
        }
        running
    }

    /// Running workers in configuration order
    pub fn running_workers(&self) -> Vec<String> {
        self.worker_names()
            .into_iter()
            .filter(|name| self.is_running(name))
            .collect()
    }

    pub fn state(&self, name: &str) -> WorkerState {
        self.is_running(name);
        self.workers
            .lock()
            .states
            .get(name)
            .copied()
            .unwrap_or(WorkerState::Stopped)
    }

    pub fn pid(&self, name: &str) -> Option<u32> {
        self.workers.lock().live.get(name).and_then(|w| w.pid)
    }

    /// Last exit status observed for the worker
    pub fn exit_status(&self, name: &str) -> Option<ExitStatus> {
        let workers = self.workers.lock();
        workers
            .live
            .get(name)
            .and_then(|w| w.exit_status)
            .or_else(|| workers.exit_status.get(name).copied())
    }

    /// Hand the worker's stdin/stdout to a caller. Succeeds once per launch.
    pub fn take_stdio(&self, name: &str) -> Result<WorkerStdio, LaunchError> {
        let mut workers = self.workers.lock();
        let worker = workers
            .live
            .get_mut(name)
            .ok_or_else(|| LaunchError::UnknownWorker(name.to_string()))?;
        worker.stdio.take().ok_or_else(|| LaunchError::MissingStream {
            name: name.to_string(),
            stream: "stdio",
        })
    }
}

/// Log each stderr line under the worker's name until the stream closes
fn drain_stderr(name: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        tracing::debug!(worker = %name, "{}", line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(worker = %name, error = %e, "Stderr drain ended");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn terminate(_child: &mut Child, pid: Option<u32>, name: &str) {
    let Some(pid) = pid.filter(|p| *p <= i32::MAX as u32) else {
        return;
    };
    // SAFETY: sending SIGTERM to a pid we spawned and have not yet reaped.
    // The pid is guarded to fit in i32.
    let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(worker = %name, pid, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _pid: Option<u32>, name: &str) {
    // No interrupt signal; fall back to an immediate kill
    if let Err(e) = child.start_kill() {
        tracing::debug!(worker = %name, error = %e, "Failed to kill worker");
    }
}
