//! Process lifecycle for daemon-backed nodes
//!
//! A node's daemon is tracked entirely through files in the node directory
//! (`daemon.pid`, `daemon.stdout`, `daemon.stderr`), so a later invocation of
//! the tool can find and stop a daemon started by an earlier one.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

use shared::{node_debug, node_info, node_warn};

use crate::error::{TestbedError, TestbedResult};

pub const PID_FILE: &str = "daemon.pid";
pub const STDOUT_FILE: &str = "daemon.stdout";
pub const STDERR_FILE: &str = "daemon.stderr";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One rung of the shutdown ladder: send `signal`, then wait up to `timeout`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationStep {
    pub signal: Signal,
    pub timeout: Duration,
}

impl EscalationStep {
    pub const fn new(signal: Signal, timeout: Duration) -> Self {
        Self { signal, timeout }
    }
}

/// TERM/1s, TERM/2s, QUIT/5s, KILL/5s
pub fn default_escalation() -> Vec<EscalationStep> {
    vec![
        EscalationStep::new(Signal::SIGTERM, Duration::from_secs(1)),
        EscalationStep::new(Signal::SIGTERM, Duration::from_secs(2)),
        EscalationStep::new(Signal::SIGQUIT, Duration::from_secs(5)),
        EscalationStep::new(Signal::SIGKILL, Duration::from_secs(5)),
    ]
}

/// What a completed stop did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub pid: i32,
    /// Signals actually delivered, in order
    pub signals: Vec<Signal>,
}

/// Spawns, checks and stops the daemon owned by one node directory
#[derive(Debug)]
pub struct ProcessLifecycle {
    dir: PathBuf,
    escalation: Vec<EscalationStep>,
    poll_interval: Duration,
    /// Present only when the daemon was spawned by this process
    child: Mutex<Option<Child>>,
}

impl ProcessLifecycle {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            escalation: default_escalation(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            child: Mutex::new(None),
        }
    }

    pub fn with_escalation(mut self, escalation: Vec<EscalationStep>) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.dir.join(STDOUT_FILE)
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.dir.join(STDERR_FILE)
    }

    fn label(&self) -> String {
        self.dir.display().to_string()
    }

    /// Recorded daemon pid, `None` when no pid file exists
    pub async fn read_pid(&self) -> TestbedResult<Option<i32>> {
        match tokio::fs::read_to_string(self.pid_path()).await {
            Ok(raw) => raw.trim().parse::<i32>().map(Some).map_err(|_| {
                TestbedError::process(format!(
                    "corrupt pid file {}: {:?}",
                    self.pid_path().display(),
                    raw.trim()
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// True when a pid is recorded and that process still exists
    pub async fn is_running(&self) -> TestbedResult<bool> {
        let Some(pid) = self.read_pid().await? else {
            return Ok(false);
        };

        let mut child = self.child.lock().await;
        if let Some(handle) = child.as_mut().filter(|c| c.id() == Some(pid as u32)) {
            return Ok(handle.try_wait()?.is_none());
        }
        drop(child);

        process_exists(pid)
    }

    /// Launch `cmd` as this node's daemon
    ///
    /// Output goes to the capture files, the process gets its own process
    /// group, and the pid is recorded before returning.
    pub async fn spawn(&self, mut cmd: Command) -> TestbedResult<u32> {
        let stdout = tokio::fs::File::create(self.stdout_path()).await?.into_std().await;
        let stderr = tokio::fs::File::create(self.stderr_path()).await?.into_std().await;

        cmd.current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);

        let child = cmd.spawn().map_err(|e| {
            TestbedError::process(format!("failed to spawn daemon in {}: {e}", self.label()))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| TestbedError::process("daemon exited before its pid was recorded"))?;

        tokio::fs::write(self.pid_path(), pid.to_string()).await?;
        *self.child.lock().await = Some(child);

        node_info!(self.label(), pid, "daemon spawned");
        Ok(pid)
    }

    /// Run the escalation ladder until the daemon is gone
    ///
    /// The pid file is removed afterwards whether or not shutdown succeeded.
    pub async fn stop(&self) -> TestbedResult<StopReport> {
        let pid = self.read_pid().await?.ok_or_else(|| TestbedError::NotRunning {
            dir: self.label(),
        })?;

        let outcome = self.escalate(pid).await;
        self.remove_pid_file().await?;
        outcome
    }

    /// Deliver the first signal of the ladder without waiting for exit
    pub async fn signal_only(&self) -> TestbedResult<()> {
        let pid = self.read_pid().await?.ok_or_else(|| TestbedError::NotRunning {
            dir: self.label(),
        })?;
        let first = self
            .escalation
            .first()
            .map(|step| step.signal)
            .unwrap_or(Signal::SIGTERM);

        match signal::kill(Pid::from_raw(pid), first) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => self.remove_pid_file().await,
            Err(e) => Err(e.into()),
        }
    }

    async fn escalate(&self, pid: i32) -> TestbedResult<StopReport> {
        let mut report = StopReport {
            pid,
            signals: Vec::new(),
        };

        for step in &self.escalation {
            match signal::kill(Pid::from_raw(pid), step.signal) {
                Ok(()) => report.signals.push(step.signal),
                Err(Errno::ESRCH) => {
                    node_debug!(self.label(), pid, "daemon already gone");
                    return Ok(report);
                }
                Err(e) => {
                    return Err(TestbedError::process(format!(
                        "error killing daemon {}: {e}",
                        self.label()
                    )))
                }
            }
            node_debug!(self.label(), pid, signal = ?step.signal, timeout = ?step.timeout, "signal sent");

            if self.wait_for_exit(pid, Some(step.timeout)).await? {
                return Ok(report);
            }
            node_warn!(self.label(), pid, signal = ?step.signal, "daemon still running, escalating");
        }

        self.wait_for_exit(pid, None).await?;
        Ok(report)
    }

    /// Wait until `pid` exits; `false` when `limit` elapsed first
    ///
    /// An owned child is taken out of its slot for the wait so status checks
    /// are not blocked behind it, and put back if it outlives `limit`.
    async fn wait_for_exit(&self, pid: i32, limit: Option<Duration>) -> TestbedResult<bool> {
        let owned = {
            let mut slot = self.child.lock().await;
            if slot.as_ref().is_some_and(|c| c.id() == Some(pid as u32)) {
                slot.take()
            } else {
                None
            }
        };

        if let Some(mut handle) = owned {
            let exited = match limit {
                Some(limit) => match timeout(limit, handle.wait()).await {
                    Ok(status) => {
                        status?;
                        true
                    }
                    Err(_) => false,
                },
                None => {
                    handle.wait().await?;
                    true
                }
            };
            if !exited {
                self.child.lock().await.get_or_insert(handle);
            }
            return Ok(exited);
        }

        let deadline = limit.map(|limit| Instant::now() + limit);
        loop {
            if !process_exists(pid)? {
                return Ok(true);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(false);
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn remove_pid_file(&self) -> TestbedResult<()> {
        match tokio::fs::remove_file(self.pid_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Signal-0 liveness check; a process owned by another user still counts as alive
pub fn process_exists(pid: i32) -> TestbedResult<bool> {
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(Errno::EPERM) => Ok(true),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(body: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(body);
        cmd
    }

    #[tokio::test]
    async fn test_stop_without_pid_file_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = ProcessLifecycle::new(dir.path());

        let err = lifecycle.stop().await.unwrap_err();
        assert!(err.is_not_running());
        assert!(!lifecycle.is_running().await.unwrap());
    }

    #[tokio::test]
    async fn test_spawn_records_pid_and_captures() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = ProcessLifecycle::new(dir.path());

        let pid = lifecycle
            .spawn(script("echo started; echo oops >&2; exec sleep 30"))
            .await
            .unwrap();
        assert_eq!(lifecycle.read_pid().await.unwrap(), Some(pid as i32));
        assert!(lifecycle.is_running().await.unwrap());

        let report = lifecycle.stop().await.unwrap();
        assert_eq!(report.signals, vec![Signal::SIGTERM]);
        assert!(!lifecycle.pid_path().exists());

        let stdout = std::fs::read_to_string(lifecycle.stdout_path()).unwrap();
        let stderr = std::fs::read_to_string(lifecycle.stderr_path()).unwrap();
        assert_eq!(stdout, "started\n");
        assert_eq!(stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_escalates_to_quit_when_term_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = ProcessLifecycle::new(dir.path()).with_escalation(vec![
            EscalationStep::new(Signal::SIGTERM, Duration::from_millis(200)),
            EscalationStep::new(Signal::SIGTERM, Duration::from_millis(200)),
            EscalationStep::new(Signal::SIGQUIT, Duration::from_secs(5)),
            EscalationStep::new(Signal::SIGKILL, Duration::from_secs(5)),
        ]);

        lifecycle
            .spawn(script(
                "trap '' TERM; trap 'exit 0' QUIT; echo ready; while true; do sleep 0.05; done",
            ))
            .await
            .unwrap();

        // Let the shell install its traps before signalling.
        let deadline = Instant::now() + Duration::from_secs(5);
        while std::fs::read_to_string(lifecycle.stdout_path()).unwrap_or_default().is_empty() {
            assert!(Instant::now() < deadline, "script never became ready");
            sleep(Duration::from_millis(20)).await;
        }

        let report = lifecycle.stop().await.unwrap();
        assert_eq!(
            report.signals,
            vec![Signal::SIGTERM, Signal::SIGTERM, Signal::SIGQUIT]
        );
        assert!(!report.signals.contains(&Signal::SIGKILL));
        assert!(!lifecycle.pid_path().exists());
    }

    #[tokio::test]
    async fn test_status_answers_while_stop_waits() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = ProcessLifecycle::new(dir.path()).with_escalation(vec![
            EscalationStep::new(Signal::SIGTERM, Duration::from_millis(600)),
            EscalationStep::new(Signal::SIGKILL, Duration::from_secs(5)),
        ]);
        lifecycle
            .spawn(script("trap '' TERM; echo ready; while true; do sleep 0.05; done"))
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while std::fs::read_to_string(lifecycle.stdout_path()).unwrap_or_default().is_empty() {
            assert!(Instant::now() < deadline, "script never became ready");
            sleep(Duration::from_millis(20)).await;
        }

        // Act: ask for status while the first step is still waiting
        let (stopped, running) = tokio::join!(lifecycle.stop(), async {
            sleep(Duration::from_millis(100)).await;
            timeout(Duration::from_millis(200), lifecycle.is_running()).await
        });

        // Assert
        assert!(running.expect("status blocked behind stop").unwrap());
        assert_eq!(stopped.unwrap().signals, vec![Signal::SIGTERM, Signal::SIGKILL]);
        assert!(!lifecycle.pid_path().exists());
    }

    #[tokio::test]
    async fn test_stop_of_foreign_pid_polls_for_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut sleeper = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(dir.path().join(PID_FILE), sleeper.id().to_string()).unwrap();

        let reaper = std::thread::spawn(move || sleeper.wait());
        let lifecycle = ProcessLifecycle::new(dir.path());
        let report = lifecycle.stop().await.unwrap();

        assert_eq!(report.signals, vec![Signal::SIGTERM]);
        assert!(reaper.join().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_signal_only_keeps_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = ProcessLifecycle::new(dir.path());
        lifecycle.spawn(script("exec sleep 30")).await.unwrap();

        lifecycle.signal_only().await.unwrap();
        assert!(lifecycle.pid_path().exists());

        // The full stop still succeeds and cleans up.
        lifecycle.stop().await.unwrap();
        assert!(!lifecycle.pid_path().exists());
    }

    #[test]
    fn test_default_escalation_ladder() {
        let ladder = default_escalation();
        let pairs: Vec<(Signal, u64)> = ladder.iter().map(|s| (s.signal, s.timeout.as_secs())).collect();
        assert_eq!(
            pairs,
            vec![
                (Signal::SIGTERM, 1),
                (Signal::SIGTERM, 2),
                (Signal::SIGQUIT, 5),
                (Signal::SIGKILL, 5),
            ]
        );
    }
}
