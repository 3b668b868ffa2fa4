use core::fmt::Debug;
use core::time::Duration;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::errors::CommandFailure;
use crate::{ControlError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CommandOutput {
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: 0,
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs a shell command on a named host.
///
/// Implementations only fail for transport problems. A command that ran and
/// exited non-zero is a successful `execute` whose output carries the code.
#[async_trait]
pub trait CommandExecutor: Debug + Send + Sync {
    async fn execute(&self, target: &str, command: &str) -> Result<CommandOutput>;
}

/// Runs commands over `ssh` in batch mode.
#[derive(Clone, Debug)]
pub struct SshExecutor {
    user: String,
    options: Vec<String>,
    timeout: Option<Duration>,
}

impl SshExecutor {
    #[must_use]
    pub const fn new(user: String, options: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            user,
            options,
            timeout,
        }
    }

    fn command(&self, target: &str, command: &str) -> Command {
        let mut ssh = Command::new("ssh");
        let _ignored = ssh.args(["-o", "BatchMode=yes"]);
        for option in &self.options {
            let _ignored = ssh.args(["-o", option]);
        }
        let _ignored = ssh.arg(format!("{}@{target}", self.user)).arg(command);
        ssh
    }
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    async fn execute(&self, target: &str, command: &str) -> Result<CommandOutput> {
        spawn(self.command(target, command), target, self.timeout).await
    }
}

/// Runs commands addressed to `local_host` with `sh -c` on this machine and
/// hands every other target to `remote`. Used when the control host is itself
/// the admin node.
#[derive(Clone, Debug)]
pub struct LocalShellExecutor {
    local_host: String,
    remote: SshExecutor,
    timeout: Option<Duration>,
}

impl LocalShellExecutor {
    #[must_use]
    pub const fn new(local_host: String, remote: SshExecutor, timeout: Option<Duration>) -> Self {
        Self {
            local_host,
            remote,
            timeout,
        }
    }

    fn is_local(&self, target: &str) -> bool {
        target == self.local_host
    }
}

#[async_trait]
impl CommandExecutor for LocalShellExecutor {
    async fn execute(&self, target: &str, command: &str) -> Result<CommandOutput> {
        if !self.is_local(target) {
            return self.remote.execute(target, command).await;
        }

        let mut sh = Command::new("sh");
        let _ignored = sh.arg("-c").arg(command);
        spawn(sh, target, self.timeout).await
    }
}

async fn spawn(
    mut command: Command,
    target: &str,
    limit: Option<Duration>,
) -> Result<CommandOutput> {
    let _ignored = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = command.output();

    let output = match limit {
        Some(limit) => timeout(limit, output)
            .await
            .map_err(|elapsed| ControlError::Transport {
                target: target.to_owned(),
                source: elapsed.into(),
            })?,
        None => output.await,
    }
    .map_err(|source| ControlError::Transport {
        target: target.to_owned(),
        source,
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code().unwrap_or(-1),
    })
}

/// Runs `command` on `target` and returns its stdout.
///
/// A non-zero exit status is the only failure signal; stderr is reported but
/// never inspected.
pub async fn run_command(
    executor: &dyn CommandExecutor,
    sink: &dyn DiagnosticSink,
    target: &str,
    command: &str,
) -> Result<String> {
    debug!(%target, %command, "running");

    let output = executor.execute(target, command).await?;

    sink.record(DiagnosticEvent::CommandCompleted {
        target: target.to_owned(),
        command: command.to_owned(),
        code: output.code,
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
    });

    if !output.success() {
        return Err(CommandFailure {
            target: target.to_owned(),
            command: command.to_owned(),
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
        .into());
    }

    Ok(output.stdout)
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedExecutor;
    use super::*;
    use crate::diagnostics::MemorySink;

    #[tokio::test]
    async fn test_non_zero_exit_is_command_failure() {
        let executor = ScriptedExecutor::new();
        let _ignored = executor.on(
            "osd pool create",
            vec![CommandOutput {
                stdout: "partial".to_owned(),
                stderr: "Error EINVAL: bad pg_num".to_owned(),
                code: 22,
            }],
        );
        let sink = MemorySink::new();

        let err = run_command(&executor, &sink, "node1", "ceph osd pool create x 0")
            .await
            .expect_err("non-zero exit fails");

        let ControlError::Command(failure) = err else {
            panic!("expected a command failure, got {err:?}");
        };
        assert_eq!(failure.code, 22, "exit code is kept");
        assert_eq!(failure.target, "node1", "target is kept");
        assert_eq!(failure.stdout, "partial", "stdout is kept");
        assert_eq!(failure.stderr, "Error EINVAL: bad pg_num", "stderr is kept");
        assert_eq!(sink.events().len(), 1, "the completion is reported");
    }

    #[tokio::test]
    async fn test_stderr_alone_is_not_failure() {
        let executor = ScriptedExecutor::new();
        let _ignored = executor.on(
            "status",
            vec![CommandOutput {
                stdout: "HEALTH_OK".to_owned(),
                stderr: "warning: permanently added host key".to_owned(),
                code: 0,
            }],
        );
        let sink = MemorySink::new();

        let stdout = run_command(&executor, &sink, "node1", "ceph status")
            .await
            .expect("zero exit succeeds");

        assert_eq!(stdout, "HEALTH_OK", "stdout is returned");
    }

    fn local_executor() -> LocalShellExecutor {
        LocalShellExecutor::new(
            "admin.example.com".to_owned(),
            SshExecutor::new("ubuntu".to_owned(), vec![], None),
            Some(Duration::from_secs(10)),
        )
    }

    #[test]
    fn test_local_shell_executor_routes_other_hosts_remotely() {
        let executor = local_executor();

        assert!(executor.is_local("admin.example.com"), "admin runs locally");
        assert!(
            !executor.is_local("node2.example.com"),
            "other hosts are not run on this machine"
        );
        assert!(
            !executor.is_local("admin"),
            "only an exact host name match is local"
        );
    }

    #[tokio::test]
    async fn test_local_shell_executor_captures_streams() {
        let executor = local_executor();

        let output = executor
            .execute("admin.example.com", "echo out; echo err >&2; exit 3")
            .await
            .expect("sh spawns");

        assert_eq!(output.stdout.trim(), "out", "stdout captured");
        assert_eq!(output.stderr.trim(), "err", "stderr captured");
        assert_eq!(output.code, 3, "exit status captured");
    }

    #[test]
    fn test_ssh_command_line() {
        let executor = SshExecutor::new(
            "ubuntu".to_owned(),
            vec!["StrictHostKeyChecking=no".to_owned()],
            None,
        );
        let command = executor.command("node1.example.com", "ceph status");
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=no",
                "ubuntu@node1.example.com",
                "ceph status",
            ],
            "ssh is invoked non-interactively as the configured user"
        );
    }
}
