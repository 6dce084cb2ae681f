//! Shell command execution with captured output and an optional hard deadline
//!
//! Commands are handed to a shell as a single command line so that callers can
//! prepend environment setup (e.g. `source setup.sh; `) without caring about
//! how it is interpreted. The child runs in its own process group; when a
//! deadline expires the whole group is killed, not just the shell.

use std::future::Future;
use std::time::Duration;

/// Exit status and captured output of a finished command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, -1 if the process was terminated by a signal
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stdout followed by stderr, the way copy tools are usually diagnosed
    #[must_use]
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to run {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command {command:?} timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Runs a shell command line and captures `(exit code, stdout, stderr)`.
///
/// A `timeout` of `None` means the command may run for as long as it needs.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<ExecOutput, ExecError>> + Send;
}

/// [`Executor`] backed by a local shell (`bash -c` by default)
#[derive(Clone, Debug)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("bash")
    }
}

/// Quote `s` for use as a single word in a shell command line
#[must_use]
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.' | ':' | '=' | '+' | ',' | '@')
        })
    {
        return s.to_owned();
    }
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    let pgid = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(errno) = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL) {
        // the group may already be gone
        tracing::debug!("failed to kill process group {pgid}: {errno}");
    }
}

impl Executor for ShellExecutor {
    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, ExecError> {
        tracing::debug!("executing with {}: {command}", self.shell);
        let child = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                command: command.to_string(),
                source,
            })?;
        let pid = child.id();
        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    tracing::warn!("command exceeded {limit:?}, killing it: {command}");
                    kill_process_group(pid);
                    return Err(ExecError::TimedOut {
                        command: command.to_string(),
                        timeout: limit,
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|source| ExecError::Spawn {
            command: command.to_string(),
            source,
        })?;
        let result = ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!("command exited with {}", result.status);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(shell_quote("root://host//a/b.root"), "root://host//a/b.root");
        assert_eq!(shell_quote("/work dir/a.root"), "'/work dir/a.root'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[tokio::test]
    async fn quoted_words_survive_the_shell() {
        let executor = ShellExecutor::default();
        let word = "a b;'c'$HOME";
        let output = executor
            .execute(&format!("printf %s {}", shell_quote(word)), None)
            .await
            .unwrap();
        assert_eq!(output.stdout, word);
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let executor = ShellExecutor::default();
        let output = executor.execute("echo hello", None).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "");
    }

    #[tokio::test]
    async fn captures_stderr_of_failing_command() {
        let executor = ShellExecutor::default();
        let output = executor
            .execute("echo out; echo 'No space left on device' >&2; exit 3", None)
            .await
            .unwrap();
        assert_eq!(output.status, 3);
        assert!(!output.success());
        assert_eq!(output.combined(), "out\nNo space left on device\n");
    }

    #[tokio::test]
    async fn deadline_kills_the_command() {
        let executor = ShellExecutor::default();
        let started = std::time::Instant::now();
        let result = executor
            .execute("sleep 1; sleep 30", Some(Duration::from_millis(200)))
            .await;
        assert!(matches!(result, Err(ExecError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn fast_command_finishes_within_deadline() {
        let executor = ShellExecutor::default();
        let output = executor
            .execute("true", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(output.success());
    }

    #[tokio::test]
    async fn missing_shell_is_a_spawn_error() {
        let executor = ShellExecutor::new("/nonexistent/shell");
        let result = executor.execute("true", None).await;
        assert!(matches!(result, Err(ExecError::Spawn { .. })));
    }
}
