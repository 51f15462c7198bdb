//! Contract between the run lifecycle and per-tool drivers.
//!
//! A driver builds and runs its command in `invoke`, and may replace the
//! default `analyse_output` and `save_artifacts`. Drivers only see paths
//! through [`ToolRunContext`]; they never rebuild them from roots.

use crate::bug::{BugMetadata, RunConfig};
use crate::container::ContainerOps;
use crate::error::ArchiveError;
use crate::fsutil::{
    append_line, copy_dir_recursive, count_files, ensure_dir, join_under, read_lines,
    remove_path, write_lines, LogEncoding,
};
use crate::layout::DirectoryLayout;
use crate::process::{self, ProcessOutcome, ToolExecutionStatus};
use crate::stats::RunStats;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub trait RepairTool: Send {
    /// Lower-case tool name; also the folder name under `patches`.
    fn name(&self) -> &str;

    /// Where the tool writes its patches, given the active output directory.
    fn patch_dir(&self, dir_output: &Path) -> PathBuf {
        dir_output.join("patches")
    }

    /// Build and run the tool command. Exit codes are recorded through
    /// [`ToolRunContext::process_status`]; `Err` is reserved for failures
    /// that leave nothing to analyse.
    fn invoke(
        &self,
        ctx: &mut ToolRunContext,
        bug: &BugMetadata,
        config: &RunConfig,
    ) -> anyhow::Result<()>;

    fn analyse_output(
        &self,
        ctx: &ToolRunContext,
        _bug_id: &str,
        _failing_tests: &[String],
        stats: RunStats,
    ) -> RunStats {
        count_generated_patches(ctx, stats)
    }

    fn save_artifacts(&self, ctx: &ToolRunContext) -> Result<(), ArchiveError> {
        archive_patches(ctx)
    }
}

/// Live state of one tool invocation.
pub struct ToolRunContext {
    pub tool_name: String,
    pub bug_id: String,
    pub layout: DirectoryLayout,
    pub container_id: Option<String>,
    /// Host path of the combined stdout/stderr log.
    pub log_output_path: PathBuf,
    pub dir_expr: PathBuf,
    pub dir_setup: PathBuf,
    pub dir_output: PathBuf,
    pub dir_logs: PathBuf,
    pub dir_patch: PathBuf,
    pub dir_instrumentation: Option<PathBuf>,
    /// The tool's own budget. The supervisor deadline trails it by
    /// [`process::supervisor_budget`].
    pub time_budget: Option<Duration>,
    pub log_encoding: LogEncoding,
    pub last_outcome: Option<ProcessOutcome>,
    pub last_status: Option<ToolExecutionStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    containers: Arc<dyn ContainerOps>,
}

impl ToolRunContext {
    /// Paths come from the container namespace when a container id is set.
    pub fn new(
        tool: &dyn RepairTool,
        bug_id: &str,
        layout: DirectoryLayout,
        container_id: Option<String>,
        containers: Arc<dyn ContainerOps>,
    ) -> Self {
        let (dir_expr, dir_setup, dir_output, dir_logs, dir_instrumentation) =
            if container_id.is_some() {
                (
                    layout.container.experiment.clone(),
                    layout.container.setup.clone(),
                    layout.container.artifacts.clone(),
                    layout.container.logs.clone(),
                    layout.container.instrumentation.clone(),
                )
            } else {
                (
                    layout.local.experiment.clone(),
                    layout.local.setup.clone(),
                    layout.local.artifacts.clone(),
                    layout.local.logs.clone(),
                    layout.local.instrumentation.clone(),
                )
            };
        let dir_patch = tool.patch_dir(&dir_output);
        let log_output_path = layout
            .local
            .logs
            .join(format!("{}-{}-output.log", tool.name(), bug_id));
        Self {
            tool_name: tool.name().to_string(),
            bug_id: bug_id.to_string(),
            layout,
            container_id,
            log_output_path,
            dir_expr,
            dir_setup,
            dir_output,
            dir_logs,
            dir_patch,
            dir_instrumentation,
            time_budget: None,
            log_encoding: LogEncoding::default(),
            last_outcome: None,
            last_status: None,
            started_at: None,
            finished_at: None,
            containers,
        }
    }

    pub fn is_containerized(&self) -> bool {
        self.container_id.is_some()
    }

    pub fn containers(&self) -> &dyn ContainerOps {
        self.containers.as_ref()
    }

    /// Host location of a path in the active namespace. The container's
    /// `/output` and `/logs` are bind mounts of the run's artifacts and logs
    /// directories; experiment and setup trees are mounted at their container
    /// roles. Paths outside those mounts map to themselves.
    pub fn host_path(&self, path: &Path) -> PathBuf {
        if !self.is_containerized() {
            return path.to_path_buf();
        }
        let container = &self.layout.container;
        let local = &self.layout.local;
        for (container_root, host_root) in [
            (&container.artifacts, &local.artifacts),
            (&container.logs, &local.logs),
            (&container.experiment, &local.experiment),
            (&container.setup, &local.setup),
        ] {
            if let Ok(rest) = path.strip_prefix(container_root) {
                return join_under(host_root, &rest.to_string_lossy());
            }
        }
        path.to_path_buf()
    }

    /// Run `command` locally or in the container, appending its output to
    /// the run log. Never fails: problems become a `SpawnFailed` outcome.
    pub fn run_command(
        &mut self,
        command: &str,
        working_dir: Option<&Path>,
        env: &BTreeMap<String, String>,
    ) -> ProcessOutcome {
        info!(tool = %self.tool_name, command = %command, "invoking tool command");
        let outcome = match &self.container_id {
            Some(container_id) => self
                .containers
                .run_command_in_container(
                    container_id,
                    command,
                    &self.log_output_path,
                    working_dir,
                    env,
                    self.time_budget,
                )
                .map_err(|e| e.to_string()),
            None => process::run_command(
                command,
                &self.log_output_path,
                working_dir,
                env,
                process::supervisor_budget(self.time_budget),
            )
            .map_err(|e| e.to_string()),
        };
        let outcome = outcome.unwrap_or_else(|message| {
            warn!(tool = %self.tool_name, error = %message, "command could not be started");
            ProcessOutcome::SpawnFailed { message }
        });
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    /// Classify and record the outcome of the last command.
    pub fn process_status(&mut self, outcome: &ProcessOutcome) -> ToolExecutionStatus {
        let status = process::process_status(outcome);
        match status {
            ToolExecutionStatus::Success => {
                debug!(tool = %self.tool_name, "tool finished successfully")
            }
            other => warn!(
                tool = %self.tool_name,
                status = other.as_str(),
                outcome = ?outcome,
                "tool did not finish cleanly"
            ),
        }
        self.last_status = Some(status);
        status
    }

    /// Write a wall-clock marker as a line of the run log and remember it.
    pub fn timestamp_log_start(&mut self) {
        let now = Utc::now();
        self.started_at = Some(now);
        self.write_log_marker(now);
    }

    pub fn timestamp_log_end(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.write_log_marker(now);
    }

    fn write_log_marker(&self, at: DateTime<Utc>) {
        if let Err(e) = append_line(&self.log_output_path, &at.to_rfc3339()) {
            warn!(log = %self.log_output_path.display(), error = %e, "cannot write log timestamp");
        }
    }

    /// Write `lines` to `path` in the active namespace. Container paths
    /// without a host mount are staged on the host and copied in.
    pub fn write_file<S: AsRef<str>>(&self, lines: &[S], path: &Path) -> anyhow::Result<()> {
        let host = self.host_path(path);
        let container_id = match &self.container_id {
            Some(id) if host == path => id,
            _ => {
                write_lines(lines, &host)?;
                return Ok(());
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "staged".to_string());
        let staging = self.staging_dir();
        let staged = staging.join(file_name);
        write_lines(lines, &staged)?;
        let copied = self
            .containers
            .copy_file_to_container(container_id, &staged, path);
        if let Err(e) = remove_path(&staging) {
            warn!(path = %staging.display(), error = %e, "cannot remove staging directory");
        }
        copied?;
        Ok(())
    }

    // Outside every container mount, so staging never shows up as output.
    fn staging_dir(&self) -> PathBuf {
        match &self.layout.local.results {
            Some(results) => results.join(".staging"),
            None => std::env::temp_dir().join(format!(
                "repairlab-staging-{}-{}",
                self.tool_name,
                std::process::id()
            )),
        }
    }

    pub fn read_log(&self) -> io::Result<Vec<String>> {
        read_lines(&self.log_output_path, self.log_encoding)
    }

    pub fn host_patch_dir(&self) -> PathBuf {
        self.host_path(&self.dir_patch)
    }
}

/// Default analysis: every regular file in the patch directory is one
/// generated patch. A missing directory counts as zero.
pub fn count_generated_patches(ctx: &ToolRunContext, mut stats: RunStats) -> RunStats {
    let dir = ctx.host_patch_dir();
    match count_files(&dir) {
        Ok(count) => stats.patch_stats.generated = count as u64,
        Err(e) => warn!(dir = %dir.display(), error = %e, "cannot list patch directory"),
    }
    stats
}

/// Replace `patches/{tool}` with the current run's patch directory.
pub fn archive_patches(ctx: &ToolRunContext) -> Result<(), ArchiveError> {
    let base = &ctx.layout.local.patches;
    if !base.is_dir() {
        warn!(dir = %base.display(), "patch archive root missing, skipping");
        return Ok(());
    }
    let dest = base.join(&ctx.tool_name);
    remove_path(&dest).map_err(|source| ArchiveError::Reset {
        path: dest.clone(),
        source,
    })?;

    if let Some(container_id) = &ctx.container_id {
        ctx.containers()
            .copy_file_from_container(container_id, &ctx.dir_patch, &dest)?;
    } else if ctx.dir_patch.is_dir() {
        copy_dir_recursive(&ctx.dir_patch, &dest).map_err(|source| ArchiveError::Copy {
            from: ctx.dir_patch.clone(),
            to: dest.clone(),
            source,
        })?;
    } else {
        ensure_dir(&dest).map_err(|source| ArchiveError::Reset {
            path: dest.clone(),
            source,
        })?;
    }
    info!(dest = %dest.display(), "archived patches");
    Ok(())
}
