//! One supervised child process.
//!
//! # Responsibilities
//! - Spawn the child in its own process group with its port in the environment
//! - Drain stdout/stderr continuously, re-emitting lines tagged by service
//! - Poll liveness and report an unexpected exit to the control loop
//! - On request, stop the child: SIGTERM to the group, grace period, SIGKILL
//!
//! # Design Decisions
//! - Output pumping and liveness monitoring are separate tasks
//! - Exits are reported over a channel, never through shared flags
//! - The monitor task owns the `Child` and returns the final record

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

/// Fallback grace period when a handle is dropped without `stop`.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Everything needed to launch one child.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub key: String,
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Port the child will listen on, reconciled before launch.
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    /// Exited on its own.
    Exited { code: Option<i32> },
    /// Stopped by SIGTERM within the grace period.
    Terminated,
    /// Force-killed after the grace period.
    Killed,
}

#[derive(Debug, Clone)]
pub struct ChildProcessRecord {
    pub service_key: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub last_seen_alive: DateTime<Utc>,
    pub state: ChildState,
}

/// Messages from monitor tasks to the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    Exited { key: String, code: Option<i32> },
}

/// Control loop's handle on a running child.
pub struct ChildHandle {
    pub key: String,
    pub pid: Option<u32>,
    stop: Option<oneshot::Sender<Duration>>,
    task: JoinHandle<ChildProcessRecord>,
    fallback: ChildProcessRecord,
}

impl ChildHandle {
    /// Stop the child (if still running) and return its final record.
    pub async fn stop(mut self, grace: Duration) -> ChildProcessRecord {
        if let Some(tx) = self.stop.take() {
            // Closed when the child already exited; the task still holds the record.
            let _ = tx.send(grace);
        }
        match self.task.await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(service = %self.key, error = %e, "Child monitor task failed");
                let mut record = self.fallback;
                record.state = ChildState::Exited { code: None };
                record
            }
        }
    }
}

/// Launch `spec` and start its output pumps and monitor.
pub fn spawn_child(
    spec: &ProcessSpec,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<FleetEvent>,
) -> io::Result<ChildHandle> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    let pid = child.id();
    let now = Utc::now();
    let record = ChildProcessRecord {
        service_key: spec.key.clone(),
        pid,
        started_at: now,
        last_seen_alive: now,
        state: ChildState::Running,
    };

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_output(spec.key.clone(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_output(spec.key.clone(), "stderr", stderr));
    }

    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(monitor(child, record.clone(), poll_interval, stop_rx, events));

    Ok(ChildHandle {
        key: spec.key.clone(),
        pid,
        stop: Some(stop_tx),
        task,
        fallback: record,
    })
}

/// Re-emit each output line under the service's label. Reads until EOF so
/// the child never blocks on a full pipe.
async fn pump_output<R>(service: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    tracing::info!(target: "fleet::child", service = %service, stream, "{}", text);
                }
            }
            Err(e) => {
                tracing::warn!(service = %service, stream, error = %e, "Output stream error");
                break;
            }
        }
    }
}

/// Reports the child as gone unless the monitor was told to stop it. Fires
/// on every exit path of the monitor task, a panic included.
struct ExitNotice {
    key: String,
    code: Option<i32>,
    events: Option<mpsc::UnboundedSender<FleetEvent>>,
}

impl ExitNotice {
    fn disarm(&mut self) {
        self.events = None;
    }
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        if let Some(events) = self.events.take() {
            let _ = events.send(FleetEvent::Exited {
                key: std::mem::take(&mut self.key),
                code: self.code,
            });
        }
    }
}

async fn monitor(
    mut child: Child,
    mut record: ChildProcessRecord,
    poll_interval: Duration,
    mut stop_rx: oneshot::Receiver<Duration>,
    events: mpsc::UnboundedSender<FleetEvent>,
) -> ChildProcessRecord {
    let mut notice = ExitNotice {
        key: record.service_key.clone(),
        code: None,
        events: Some(events),
    };
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => match child.try_wait() {
                Ok(None) => record.last_seen_alive = Utc::now(),
                Ok(Some(status)) => {
                    let code = status.code();
                    tracing::error!(service = %record.service_key, pid = ?record.pid, code = ?code, "Child stopped unexpectedly");
                    record.state = ChildState::Exited { code };
                    notice.code = code;
                    return record;
                }
                Err(e) => {
                    tracing::warn!(service = %record.service_key, error = %e, "Liveness check failed");
                }
            },
            grace = &mut stop_rx => {
                notice.disarm();
                let grace = grace.unwrap_or(DEFAULT_GRACE);
                record.state = stop_child(&mut child, &record.service_key, grace).await;
                return record;
            }
        }
    }
}

fn exit_state(status: ExitStatus) -> ChildState {
    ChildState::Exited {
        code: status.code(),
    }
}

/// SIGTERM the child's process group, wait up to `grace`, then SIGKILL.
async fn stop_child(child: &mut Child, service: &str, grace: Duration) -> ChildState {
    if let Ok(Some(status)) = child.try_wait() {
        return exit_state(status);
    }

    tracing::info!(service, pid = ?child.id(), "Stopping child");

    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!(service, pid, error = %e, "SIGTERM to process group failed");
            }
        }

        match time::timeout(grace, child.wait()).await {
            Ok(Ok(_)) => return ChildState::Terminated,
            Ok(Err(e)) => tracing::warn!(service, error = %e, "Waiting for child failed"),
            Err(_) => tracing::warn!(service, grace_secs = grace.as_secs(), "Child ignored SIGTERM, force killing"),
        }

        if let Some(pid) = child.id() {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        tracing::warn!(service, error = %e, "Force kill failed");
    }
    ChildState::Killed
}
