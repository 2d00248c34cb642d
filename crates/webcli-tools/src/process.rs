//! Foreground subprocess lifecycle: spawn, stream, interrupt, reap.
//!
//! A session may own at most one [`ForegroundJob`] at a time, tracked by its
//! [`JobSlot`]. The child is always spawned directly (no shell) and is
//! guaranteed not to outlive its owning session: interrupt and teardown both
//! escalate from SIGTERM to SIGKILL after a bounded grace period and reap
//! the process.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Grace period between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on waiting for the pump task during teardown.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

/// Streamed output lines longer than this are clipped.
const MAX_LINE_CHARS: usize = 2000;

/// Record of a running foreground subprocess, owned by exactly one session.
#[derive(Debug)]
pub struct ForegroundJob {
    pid: Option<u32>,
    command_line: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl ForegroundJob {
    /// OS pid, if the child had not already exited at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The full command line, for audit logging.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Ask the job to stop. The pump task escalates to SIGKILL if the
    /// process ignores the graceful signal.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    /// True once the pump task has exited, i.e. the child is reaped.
    pub fn is_finished(&self) -> bool {
        self.pump.is_finished()
    }

    /// Cancel the job and wait until the child has been reaped.
    ///
    /// Called on session teardown; after this returns no process owned by
    /// the session is left running.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_WAIT, &mut self.pump)
            .await
            .is_err()
        {
            warn!(pid = ?self.pid, "job pump did not stop in time; aborting it");
            self.pump.abort();
            let _ = self.pump.await;
        }
    }
}

/// Tracks the single foreground job a session may own.
///
/// Slots hand out a sequence token on registration so that a stale
/// completion notification can never clear a newer job.
#[derive(Default)]
pub struct JobSlot {
    seq: u64,
    current: Option<(u64, ForegroundJob)>,
}

impl JobSlot {
    /// True while an unfinished job is registered.
    pub fn busy(&self) -> bool {
        matches!(&self.current, Some((_, job)) if !job.is_finished())
    }

    /// Register a job. Fails with [`Error::Busy`] while one is running; the
    /// rejected job is cancelled so its process cannot linger unowned.
    pub fn put(&mut self, job: ForegroundJob) -> Result<u64> {
        if self.busy() {
            job.interrupt();
            return Err(Error::Busy);
        }
        self.seq += 1;
        self.current = Some((self.seq, job));
        Ok(self.seq)
    }

    /// Signal the running job, if any. Returns whether one was signalled.
    pub fn interrupt(&self) -> bool {
        match &self.current {
            Some((_, job)) if !job.is_finished() => {
                job.interrupt();
                true
            }
            _ => false,
        }
    }

    /// Release the slot for the given token. A mismatched token (the slot
    /// was already reused) leaves the slot untouched.
    pub fn clear(&mut self, seq: u64) -> Option<ForegroundJob> {
        match &self.current {
            Some((s, _)) if *s == seq => self.current.take().map(|(_, job)| job),
            _ => None,
        }
    }

    /// Remove whatever job is registered, finished or not.
    pub fn take(&mut self) -> Option<ForegroundJob> {
        self.current.take().map(|(_, job)| job)
    }

    /// Audit command line of the registered job.
    pub fn command_line(&self) -> Option<&str> {
        self.current.as_ref().map(|(_, job)| job.command_line())
    }
}

/// Spawn `program` with a validated argv and stream its stdout and stderr
/// line-by-line into `lines`.
///
/// Stderr lines are user-visible output, not a fault. The channel closes
/// after a final status line once the child has been reaped.
pub fn spawn_streaming(
    program: &Path,
    args: &[String],
    label: &str,
    lines: mpsc::UnboundedSender<String>,
) -> Result<ForegroundJob> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        warn!(tool = label, error = %e, "spawn failed");
        Error::Launch(label.to_string())
    })?;
    let pid = child.id();
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(Error::Launch(label.to_string()));
    };

    let command_line = std::iter::once(program.display().to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");

    let cancel = CancellationToken::new();
    let pump = tokio::spawn(pump_child(
        child,
        stdout,
        stderr,
        label.to_string(),
        lines,
        cancel.clone(),
    ));

    debug!(tool = label, pid = ?pid, "foreground job started");
    Ok(ForegroundJob {
        pid,
        command_line,
        started_at: Utc::now(),
        cancel,
        pump,
    })
}

/// Combined output of a short-lived tool invocation.
#[derive(Debug)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Run `program` to completion with a bounded timeout and capture both
/// output streams. Used by the service and firewall runners.
pub async fn run_captured(
    program: &Path,
    args: &[String],
    label: &str,
    timeout_secs: u64,
) -> Result<CapturedOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        warn!(tool = label, error = %e, "spawn failed");
        Error::Launch(label.to_string())
    })?;

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| Error::Timeout(timeout_secs))?
        .map_err(|e| {
            warn!(tool = label, error = %e, "wait failed");
            Error::Launch(label.to_string())
        })?;

    Ok(CapturedOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Stream both pipes until EOF or cancellation, then reap the child and
/// emit a final status line.
async fn pump_child(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    label: String,
    lines: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) {
    let mut out = BufReader::new(stdout).lines();
    let mut err = BufReader::new(stderr).lines();
    let mut out_open = true;
    let mut err_open = true;
    let mut interrupted = false;

    let status = loop {
        if !out_open && !err_open {
            break child.wait().await;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                interrupted = true;
                break terminate_with_grace(&mut child).await;
            }
            line = out.next_line(), if out_open => match line {
                Ok(Some(l)) => {
                    let _ = lines.send(clip_line(l));
                }
                _ => out_open = false,
            },
            line = err.next_line(), if err_open => match line {
                Ok(Some(l)) => {
                    let _ = lines.send(clip_line(l));
                }
                _ => err_open = false,
            },
        }
    };

    match status {
        Ok(status) if interrupted => {
            debug!(tool = %label, %status, "job interrupted");
            let _ = lines.send(format!("⚠️ {label} interrupted."));
        }
        Ok(status) => {
            debug!(tool = %label, %status, "job finished");
            let _ = lines.send(format!(
                "✅ {label} finished (exit code {})",
                status.code().unwrap_or(-1)
            ));
        }
        Err(e) => {
            warn!(tool = %label, error = %e, "failed to reap job");
            let _ = lines.send(format!("⚠️ {label} terminated with an error"));
        }
    }
}

/// SIGTERM, bounded grace, then SIGKILL. Always reaps the child.
async fn terminate_with_grace(child: &mut Child) -> std::io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
            // ESRCH here just means the process already exited.
            debug!(error = %e, "SIGTERM delivery failed");
        }
    }
    match tokio::time::timeout(TERM_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("process ignored SIGTERM; sending SIGKILL");
            let _ = child.start_kill();
            child.wait().await
        }
    }
}

fn clip_line(line: String) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        return line;
    }
    let mut clipped: String = line.chars().take(MAX_LINE_CHARS).collect();
    clipped.push_str("…[truncated]");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn echo() -> PathBuf {
        PathBuf::from("/bin/echo")
    }

    fn sleep_bin() -> PathBuf {
        PathBuf::from("/bin/sleep")
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn streams_stdout_and_reports_exit() {
        let (tx, rx) = mpsc::unbounded_channel();
        let args = vec!["hello world".to_string()];
        let job = spawn_streaming(&echo(), &args, "echo", tx).unwrap();
        assert!(job.pid().is_some());

        let lines = drain(rx).await;
        assert_eq!(lines[0], "hello world");
        assert!(lines.last().unwrap().contains("finished (exit code 0)"));
    }

    #[tokio::test]
    async fn interrupt_stops_a_long_job_quickly() {
        let (tx, rx) = mpsc::unbounded_channel();
        let args = vec!["30".to_string()];
        let job = spawn_streaming(&sleep_bin(), &args, "sleep", tx).unwrap();

        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(100)).await;
        job.interrupt();

        let lines = drain(rx).await;
        assert!(lines.last().unwrap().contains("interrupted"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn shutdown_reaps_a_running_child() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let args = vec!["30".to_string()];
        let job = spawn_streaming(&sleep_bin(), &args, "sleep", tx).unwrap();

        let started = Instant::now();
        job.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn spawn_failure_is_a_launch_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = spawn_streaming(Path::new("/nonexistent/tool"), &[], "tool", tx).unwrap_err();
        assert!(matches!(err, Error::Launch(_)));
    }

    #[tokio::test]
    async fn slot_rejects_a_second_job() {
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let first = spawn_streaming(&sleep_bin(), &["30".to_string()], "sleep", tx1).unwrap();
        let second = spawn_streaming(&sleep_bin(), &["30".to_string()], "sleep", tx2).unwrap();

        let mut slot = JobSlot::default();
        slot.put(first).unwrap();
        assert!(slot.busy());

        let err = slot.put(second).unwrap_err();
        assert!(matches!(err, Error::Busy));

        // interrupt frees the slot once the job winds down
        assert!(slot.interrupt());
        if let Some(job) = slot.take() {
            job.shutdown().await;
        }
        assert!(!slot.busy());
    }

    #[tokio::test]
    async fn stale_token_does_not_clear_a_newer_job() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let job = spawn_streaming(&sleep_bin(), &["30".to_string()], "sleep", tx).unwrap();

        let mut slot = JobSlot::default();
        let seq = slot.put(job).unwrap();
        assert!(slot.clear(seq + 1).is_none());
        assert!(slot.busy());

        if let Some(job) = slot.take() {
            job.shutdown().await;
        }
    }

    #[tokio::test]
    async fn run_captured_returns_combined_output() {
        let out = run_captured(&echo(), &["hi".to_string()], "echo", 5)
            .await
            .unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn run_captured_times_out() {
        let err = run_captured(&sleep_bin(), &["5".to_string()], "sleep", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(1)));
    }

    #[test]
    fn long_lines_are_clipped() {
        let line = "x".repeat(MAX_LINE_CHARS + 10);
        let clipped = clip_line(line);
        assert!(clipped.ends_with("…[truncated]"));
    }
}
