//! Captured command execution shared by the node variants

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{TestbedError, TestbedResult};
use crate::types::{ExecContext, Output, SIGNALED_EXIT_CODE};

/// How long readers may keep draining pipes after a timed-out command is killed
const DRAIN_GRACE: Duration = Duration::from_millis(200);

type Capture = Arc<Mutex<Vec<u8>>>;

/// Build a command from an argument vector
pub fn command_from(args: &[String]) -> TestbedResult<Command> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| TestbedError::validation("no command given"))?;
    let mut cmd = Command::new(program);
    cmd.args(rest);
    Ok(cmd)
}

/// Run `cmd` to completion, capturing stdout, stderr and exit code
///
/// A deadline in `ctx` kills the command's process group when it expires; the
/// result is then an [`Output`] carrying whatever was written so far, a
/// timeout error and the timeout exit code. A non-zero exit is returned as-is
/// for the caller to judge.
pub async fn capture_output(
    mut cmd: Command,
    ctx: ExecContext,
    stdin: Option<Vec<u8>>,
    args: Vec<String>,
) -> TestbedResult<Output> {
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| TestbedError::process(format!("failed to run {:?}: {e}", args.join(" "))))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // Feed stdin concurrently so a chatty command can't deadlock on full pipes.
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&input).await {
                debug!("stdin closed early: {}", e);
            }
        });
    }

    let stdout = Capture::default();
    let stderr = Capture::default();
    let readers = [
        spawn_reader(child.stdout.take(), Arc::clone(&stdout)),
        spawn_reader(child.stderr.take(), Arc::clone(&stderr)),
    ];

    let status = match ctx.timeout {
        Some(limit) => match timeout(limit, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                warn!("command {:?} exceeded its {:?} deadline", args.join(" "), limit);
                kill_group(&mut child).await;
                None
            }
        },
        None => Some(child.wait().await?),
    };

    for mut reader in readers {
        if status.is_some() {
            if let Err(e) = reader.await {
                debug!("output reader failed: {}", e);
            }
        } else if timeout(DRAIN_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
    }

    let stdout = std::mem::take(&mut *stdout.lock().await);
    let stderr = std::mem::take(&mut *stderr.lock().await);
    Ok(match (status, ctx.timeout) {
        (Some(status), _) => Output::new(args, stdout, stderr, status.code().unwrap_or(SIGNALED_EXIT_CODE)),
        (None, limit) => Output {
            stdout,
            stderr,
            ..Output::timed_out(args, limit.unwrap_or_default())
        },
    })
}

/// Copy a pipe into `sink` until it closes
fn spawn_reader<R>(pipe: Option<R>, sink: Capture) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => sink.lock().await.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!("output pipe read failed: {}", e);
                    break;
                }
            }
        }
    })
}

/// Kill the command and anything it started, then reap it
async fn kill_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Err(e) = signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg {} failed: {}", pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("kill after deadline failed: {}", e);
    }
}
