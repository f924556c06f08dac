use std::{
    io::Read,
    path::Path,
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Last non-empty stderr line, or stdout when stderr is silent.
    #[must_use]
    pub fn summary(&self) -> String {
        let pick = |text: &str| {
            text.lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(ToString::to_string)
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| format!("exited with status {}", self.code))
    }
}

/// Execute a program and capture stdout/stderr.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or the I/O streams cannot
/// be read entirely.
pub fn run_command(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> Result<RunOutput> {
    let mut child = spawn_captured(program, args, envs, cwd)?;
    let (stdout_handle, stderr_handle) = capture_streams(&mut child, program)?;
    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {program}"))?;
    finish(status.code().unwrap_or(-1), stdout_handle, stderr_handle)
}

/// Like [`run_command`], killing the child once `timeout` elapses.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned, its streams cannot be read,
/// or it is still running at the deadline.
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
    timeout: Duration,
) -> Result<RunOutput> {
    let mut child = spawn_captured(program, args, envs, cwd)?;
    let (stdout_handle, stderr_handle) = capture_streams(&mut child, program)?;
    let deadline = Instant::now() + timeout;
    let code = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("failed to wait for {program}"))?
        {
            break status.code().unwrap_or(-1);
        }
        if Instant::now() >= deadline {
            debug!(program, timeout_secs = timeout.as_secs(), "killing timed out process");
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!(
                "{program} did not finish within {}s",
                timeout.as_secs()
            ));
        }
        thread::sleep(POLL_INTERVAL);
    };
    finish(code, stdout_handle, stderr_handle)
}

type StreamHandle = JoinHandle<Result<String>>;

fn spawn_captured(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> Result<Child> {
    let mut command = Command::new(program);
    command.args(args);
    for (key, value) in envs {
        command.env(key, value);
    }
    command.current_dir(cwd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    debug!(program, ?args, cwd = %cwd.display(), "running command");
    command
        .spawn()
        .with_context(|| format!("failed to start {program}"))
}

fn capture_streams(child: &mut Child, program: &str) -> Result<(StreamHandle, StreamHandle)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout missing for {program}"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr missing for {program}"))?;
    let stdout_handle = thread::spawn(move || read_to_string_limited(stdout));
    let stderr_handle = thread::spawn(move || read_to_string_limited(stderr));
    Ok((stdout_handle, stderr_handle))
}

fn finish(code: i32, stdout: StreamHandle, stderr: StreamHandle) -> Result<RunOutput> {
    let stdout = stdout
        .join()
        .map_err(|_| anyhow!("stdout thread panicked"))??;
    let stderr = stderr
        .join()
        .map_err(|_| anyhow!("stderr thread panicked"))??;
    Ok(RunOutput {
        code,
        stdout,
        stderr,
    })
}

fn read_to_string_limited(mut reader: impl Read) -> Result<String> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        let room = MAX_CAPTURE_BYTES.saturating_sub(buffer.len());
        if room < read {
            truncated = true;
        }
        buffer.extend_from_slice(&chunk[..read.min(room)]);
    }
    let mut text = String::from_utf8_lossy(&buffer).to_string();
    if truncated {
        text.push_str("\n[...truncated...]\n");
    }
    Ok(text)
}
