use crate::config::DEFAULT_CONTAINER_RUNTIME;
use crate::error::ContainerError;
use crate::process::{run_process, supervisor_budget, ProcessOutcome, TOOL_KILL_GRACE};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;

/// The subset of container handling a run needs. Containers are started and
/// removed elsewhere; implementations only act on a running container id.
pub trait ContainerOps: Send + Sync {
    fn copy_file_from_container(
        &self,
        container_id: &str,
        source: &Path,
        dest: &Path,
    ) -> Result<(), ContainerError>;

    fn copy_file_to_container(
        &self,
        container_id: &str,
        source: &Path,
        dest: &Path,
    ) -> Result<(), ContainerError>;

    /// Run a shell command in the container with combined output appended to
    /// the host file `log_path`. `timeout` is the tool budget and must be
    /// enforced inside the container: killing a host-side client does not
    /// stop the process it started there.
    fn run_command_in_container(
        &self,
        container_id: &str,
        command: &str,
        log_path: &Path,
        working_dir: Option<&Path>,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutcome, ContainerError>;
}

/// Drives containers through the `docker` (or compatible) command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    runtime: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(DEFAULT_CONTAINER_RUNTIME)
    }
}

impl DockerCli {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    /// `docker exec` of `sh -c command`, wrapped in the container's own
    /// `timeout` when a budget is given.
    pub fn exec_command(
        &self,
        container_id: &str,
        command: &str,
        working_dir: Option<&Path>,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Command {
        let mut cmd = Command::new(&self.runtime);
        cmd.arg("exec");
        if let Some(dir) = working_dir {
            cmd.arg("-w").arg(dir);
        }
        for (key, value) in env {
            cmd.arg("-e").arg(format!("{}={}", key, value));
        }
        cmd.arg(container_id);
        if let Some(budget) = timeout {
            cmd.arg("timeout")
                .arg("-k")
                .arg(format!("{}s", TOOL_KILL_GRACE.as_secs()))
                .arg(format!("{}s", budget.as_secs().max(1)));
        }
        cmd.arg("sh").arg("-c").arg(command);
        cmd
    }

    pub fn cp_command(&self, from: &str, to: &str) -> Command {
        let mut cmd = Command::new(&self.runtime);
        cmd.arg("cp").arg(from).arg(to);
        cmd
    }

    fn run_cp(&self, container_id: &str, from: String, to: String) -> Result<(), ContainerError> {
        debug!(runtime = %self.runtime, from = %from, to = %to, "container copy");
        let mut cmd = self.cp_command(&from, &to);
        cmd.stdin(Stdio::null());
        let output = cmd.output().map_err(|source| ContainerError::RuntimeSpawn {
            runtime: self.runtime.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                runtime: self.runtime.clone(),
                action: "cp",
                container_id: container_id.to_string(),
                status: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl ContainerOps for DockerCli {
    fn copy_file_from_container(
        &self,
        container_id: &str,
        source: &Path,
        dest: &Path,
    ) -> Result<(), ContainerError> {
        self.run_cp(
            container_id,
            format!("{}:{}", container_id, source.display()),
            dest.display().to_string(),
        )
    }

    fn copy_file_to_container(
        &self,
        container_id: &str,
        source: &Path,
        dest: &Path,
    ) -> Result<(), ContainerError> {
        self.run_cp(
            container_id,
            source.display().to_string(),
            format!("{}:{}", container_id, dest.display()),
        )
    }

    fn run_command_in_container(
        &self,
        container_id: &str,
        command: &str,
        log_path: &Path,
        working_dir: Option<&Path>,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutcome, ContainerError> {
        let cmd = self.exec_command(container_id, command, working_dir, env, timeout);
        run_process(cmd, log_path, supervisor_budget(timeout)).map_err(|source| {
            ContainerError::Log {
                path: log_path.to_path_buf(),
                source,
            }
        })
    }
}
