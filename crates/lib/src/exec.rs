//! Execution layer for the external manager binary.
//! No shell is used; arguments are passed as a list to avoid injection.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Docker CLI plugin directories prepended to DOCKER_CLI_PLUGIN_EXTRA_DIRS so `docker compose` resolves under systemd.
pub const DOCKER_PLUGIN_DIRS: &str =
    "/usr/libexec/docker/cli-plugins:/usr/lib/docker/cli-plugins:/usr/local/lib/docker/cli-plugins";

/// Captured result of one manager invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Process exit code; None when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("manager i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Runs manager subcommands. Implemented by [`ManagerCli`]; tests substitute a recorder.
#[async_trait]
pub trait ManagerRunner: Send + Sync {
    /// Run `<binary> args...` once, feeding `stdin` when given. Non-zero exit is not an error.
    async fn invoke(
        &self,
        args: &[String],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<Invocation, ExecError>;
}

/// Environment overrides applied on top of the inherited environment.
/// `existing_plugin_dirs` is the current DOCKER_CLI_PLUGIN_EXTRA_DIRS value, if any.
pub fn manager_env(existing_plugin_dirs: Option<&str>) -> [(&'static str, String); 3] {
    [
        (
            "DOCKER_CLI_PLUGIN_EXTRA_DIRS",
            format!("{}:{}", DOCKER_PLUGIN_DIRS, existing_plugin_dirs.unwrap_or("")),
        ),
        ("COMPOSE_DOCKER_CLI_BUILD", "0".to_string()),
        ("DOCKER_BUILDKIT", "0".to_string()),
    ]
}

/// The manager executable on disk.
#[derive(Debug, Clone)]
pub struct ManagerCli {
    binary: PathBuf,
}

impl ManagerCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }

    fn command(&self, args: &[String], with_stdin: bool) -> Command {
        let existing = std::env::var("DOCKER_CLI_PLUGIN_EXTRA_DIRS").ok();
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .envs(manager_env(existing.as_deref()))
            .stdin(if with_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[String], stdin: Option<&str>) -> Result<Invocation, ExecError> {
        let mut child = self
            .command(args, stdin.is_some())
            .spawn()
            .map_err(|source| ExecError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            match pipe.write_all(input.as_bytes()).await {
                Ok(()) => {}
                // The manager may exit before reading all answers; its output says why.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    log::debug!("manager closed stdin early: {}", e);
                }
                Err(e) => return Err(ExecError::Io(e)),
            }
            drop(pipe);
        }
        let output = child.wait_with_output().await?;
        Ok(Invocation {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl ManagerRunner for ManagerCli {
    async fn invoke(
        &self,
        args: &[String],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<Invocation, ExecError> {
        let subcommand = args.first().map(String::as_str).unwrap_or("");
        let started = Instant::now();
        // Dropping the timed-out future drops the child, and kill_on_drop reaps it.
        let result = match tokio::time::timeout(timeout, self.run(args, stdin)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "manager {} timed out after {}s",
                    subcommand,
                    timeout.as_secs()
                );
                return Err(ExecError::Timeout(timeout));
            }
        };
        match &result {
            Ok(inv) => log::info!(
                "manager {} exited with {:?} in {}ms",
                subcommand,
                inv.exit_code,
                started.elapsed().as_millis()
            ),
            Err(e) => log::warn!("manager {} failed: {}", subcommand, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_prepends_plugin_dirs_to_existing_value() {
        let env = manager_env(Some("/home/me/plugins"));
        assert_eq!(env[0].0, "DOCKER_CLI_PLUGIN_EXTRA_DIRS");
        assert_eq!(
            env[0].1,
            format!("{}:/home/me/plugins", DOCKER_PLUGIN_DIRS)
        );
        assert_eq!(env[1], ("COMPOSE_DOCKER_CLI_BUILD", "0".to_string()));
        assert_eq!(env[2], ("DOCKER_BUILDKIT", "0".to_string()));
    }

    #[test]
    fn env_without_existing_value_keeps_trailing_separator() {
        let env = manager_env(None);
        assert_eq!(env[0].1, format!("{}:", DOCKER_PLUGIN_DIRS));
    }

    #[test]
    fn signal_termination_is_not_success() {
        let inv = Invocation {
            exit_code: None,
            ..Default::default()
        };
        assert!(!inv.success());
        assert!(Invocation {
            exit_code: Some(0),
            ..Default::default()
        }
        .success());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let cli = ManagerCli::new("/nonexistent/wingsbot-manager-test");
        let err = cli
            .invoke(&["list".to_string()], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
