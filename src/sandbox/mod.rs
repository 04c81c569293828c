//! Runs untrusted snippets in a separate interpreter process.
//!
//! Each call spawns a fresh `<interpreter> -c <code>` child with no stdin. The
//! child leads its own process group on unix, and the whole group is killed
//! if it outlives the wall-clock budget, so forked helpers die with it. Every
//! outcome, including spawn failures and timeouts, comes back as text.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

pub const DEFAULT_INTERPRETER: &str = "python3";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeExecutor {
    interpreter: String,
    timeout: Duration,
}

impl Default for CodeExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER, DEFAULT_TIMEOUT)
    }
}

impl CodeExecutor {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns stdout if non-empty, else stderr (possibly empty). Single attempt.
    pub async fn execute(&self, code: &str) -> String {
        tracing::debug!(
            interpreter = %self.interpreter,
            timeout_ms = self.timeout.as_millis() as u64,
            bytes = code.len(),
            "executing code"
        );

        let mut command = Command::new(&self.interpreter);
        command
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let child = command.spawn();

        let child = match child {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!("failed to spawn {}: {err}", self.interpreter);
                return failure_message(&err);
            }
        };

        let pid = child.id();
        // Dropping the wait future on timeout drops the child, which kills it.
        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                tracing::debug!(status = %output.status, "execution finished");
                select_output(&output.stdout, &output.stderr)
            }
            Ok(Err(err)) => failure_message(&err),
            Err(_) => {
                tracing::warn!("execution exceeded {:?}, child killed", self.timeout);
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                timeout_message(self.timeout)
            }
        }
    }
}

fn select_output(stdout: &[u8], stderr: &[u8]) -> String {
    if stdout.is_empty() {
        String::from_utf8_lossy(stderr).into_owned()
    } else {
        String::from_utf8_lossy(stdout).into_owned()
    }
}

#[cfg(unix)]
fn kill_process_group(leader: u32) {
    let Ok(pgid) = libc::pid_t::try_from(leader) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid only sends a signal to that group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        tracing::debug!(
            pgid,
            "process group already gone: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: u32) {}

fn failure_message(err: &dyn std::fmt::Display) -> String {
    format!("Error executing code: {err}")
}

pub fn timeout_message(limit: Duration) -> String {
    let millis = limit.as_millis();
    if millis % 1000 == 0 {
        let secs = millis / 1000;
        let unit = if secs == 1 { "second" } else { "seconds" };
        format!("Execution timed out after {secs} {unit}.")
    } else {
        format!("Execution timed out after {:.1} seconds.", limit.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::{CodeExecutor, DEFAULT_TIMEOUT, select_output, timeout_message};
    use std::time::{Duration, Instant};

    fn shell(timeout: Duration) -> CodeExecutor {
        CodeExecutor::new("sh", timeout)
    }

    #[test]
    fn default_budget_is_ten_seconds() {
        assert_eq!(CodeExecutor::default().timeout(), DEFAULT_TIMEOUT);
        insta::assert_snapshot!(timeout_message(DEFAULT_TIMEOUT), @"Execution timed out after 10 seconds.");
    }

    #[test]
    fn timeout_message_formats_fractional_and_singular_limits() {
        assert_eq!(
            timeout_message(Duration::from_secs(1)),
            "Execution timed out after 1 second."
        );
        assert_eq!(
            timeout_message(Duration::from_millis(300)),
            "Execution timed out after 0.3 seconds."
        );
    }

    #[test]
    fn stdout_wins_over_stderr() {
        assert_eq!(select_output(b"out", b"err"), "out");
        assert_eq!(select_output(b"", b"err"), "err");
        assert_eq!(select_output(b"", b""), "");
    }

    #[tokio::test]
    async fn execute_returns_stdout_exactly() {
        let out = shell(DEFAULT_TIMEOUT)
            .execute("printf 'hello\\n'; echo warn >&2")
            .await;
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn execute_falls_back_to_stderr() {
        let out = shell(DEFAULT_TIMEOUT)
            .execute("echo 'NameError: x' >&2; exit 1")
            .await;
        assert_eq!(out, "NameError: x\n");
    }

    #[tokio::test]
    async fn execute_returns_empty_when_silent() {
        assert_eq!(shell(DEFAULT_TIMEOUT).execute("true").await, "");
    }

    #[tokio::test]
    async fn execute_kills_long_running_code() {
        let started = Instant::now();
        let out = shell(Duration::from_millis(300)).execute("sleep 5").await;
        assert_eq!(out, "Execution timed out after 0.3 seconds.");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    /// Zombies count as gone: nobody may be left to reap them in a container.
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
            stat.rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z'))
        })
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_also_kills_forked_children() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("child.pid");
        let code = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

        let out = shell(Duration::from_millis(500)).execute(&code).await;
        assert_eq!(out, "Execution timed out after 0.5 seconds.");

        let pid = std::fs::read_to_string(&pid_file).expect("pid file");
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(3);
        while is_running(pid) {
            assert!(Instant::now() < deadline, "forked child {pid} survived the timeout");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn execute_reports_missing_interpreter() {
        let out = CodeExecutor::new("/nonexistent/neurocode-python", DEFAULT_TIMEOUT)
            .execute("print(1)")
            .await;
        assert!(out.starts_with("Error executing code: "), "got {out:?}");
    }

    #[tokio::test]
    async fn each_call_gets_a_fresh_process() {
        let executor = shell(DEFAULT_TIMEOUT);
        assert_eq!(executor.execute("x=1; echo ${x}").await, "1\n");
        assert_eq!(executor.execute("echo \"[${x}]\"").await, "[]\n");
    }
}
