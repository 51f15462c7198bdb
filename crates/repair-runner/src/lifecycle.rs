//! One run of one tool against one bug:
//! `Idle → Prepared → Running → Completed → Analyzed → Archived`.
//!
//! Layout and archive failures move the run to `Failed`. Tool exit codes
//! never do; a crashed or timed-out tool still gets analysed and archived.

use crate::bug::{BugMetadata, RunConfig};
use crate::container::ContainerOps;
use crate::error::{ArchiveError, LayoutError, LifecycleError};
use crate::fsutil::{atomic_write_json_pretty, ensure_dir, LogEncoding};
use crate::layout::{DirectoryLayout, LayoutResolver};
use crate::process::{process_status, ProcessOutcome, ToolExecutionStatus};
use crate::stats::RunStats;
use crate::tool::{RepairTool, ToolRunContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::sync::Arc;
use tracing::{info, info_span, warn, Span};

pub const RUN_RECORD_FILE: &str = "stats.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Prepared,
    Running,
    Completed(ToolExecutionStatus),
    Analyzed,
    Archived,
    Failed,
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Prepared => "prepared",
            RunState::Running => "running",
            RunState::Completed(_) => "completed",
            RunState::Analyzed => "analyzed",
            RunState::Archived => "archived",
            RunState::Failed => "failed",
        }
    }
}

/// Summary persisted to `results/stats.json` and returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tool: String,
    pub bug_id: String,
    pub run_id: Option<String>,
    pub status: Option<ToolExecutionStatus>,
    pub outcome: Option<ProcessOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub log_path: Option<String>,
    pub stats: RunStats,
}

pub struct ToolRun {
    tool: Box<dyn RepairTool>,
    containers: Arc<dyn ContainerOps>,
    log_encoding: LogEncoding,
    state: RunState,
    ctx: Option<ToolRunContext>,
    stats: RunStats,
    span: Span,
}

impl ToolRun {
    pub fn new(tool: Box<dyn RepairTool>, containers: Arc<dyn ContainerOps>) -> Self {
        let span = info_span!("tool_run", tool = %tool.name());
        Self {
            tool,
            containers,
            log_encoding: LogEncoding::default(),
            state: RunState::Idle,
            ctx: None,
            stats: RunStats::new(),
            span,
        }
    }

    pub fn with_log_encoding(mut self, encoding: LogEncoding) -> Self {
        self.log_encoding = encoding;
        self
    }

    pub fn tool(&self) -> &dyn RepairTool {
        self.tool.as_ref()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn context(&self) -> Option<&ToolRunContext> {
        self.ctx.as_ref()
    }

    fn expect_state(&self, step: &'static str, allowed: bool) -> Result<(), LifecycleError> {
        if allowed {
            Ok(())
        } else {
            Err(LifecycleError::InvalidState {
                step,
                state: self.state.name(),
            })
        }
    }

    /// Bind a resolved layout to this run and make sure the tool's patch
    /// directory exists on the host side.
    pub fn prepare(
        &mut self,
        layout: DirectoryLayout,
        bug: &BugMetadata,
        config: &RunConfig,
    ) -> Result<(), LifecycleError> {
        self.expect_state("prepare", self.state == RunState::Idle)?;
        let span = info_span!(
            parent: &self.span,
            "prepare",
            bug = %bug.bug_id,
            run_id = layout.run_id().as_deref().unwrap_or("-")
        );
        let _guard = span.enter();

        let mut ctx = ToolRunContext::new(
            self.tool.as_ref(),
            &bug.bug_id,
            layout,
            config.container_id.clone(),
            Arc::clone(&self.containers),
        );
        ctx.time_budget = config.time_budget();
        ctx.log_encoding = self.log_encoding;

        let host_patch = ctx.host_patch_dir();
        for dir in [ctx.layout.local.logs.clone(), host_patch] {
            if let Err(source) = ensure_dir(&dir) {
                self.state = RunState::Failed;
                return Err(LayoutError::CreateDir { path: dir, source }.into());
            }
        }
        info!(
            containerized = ctx.is_containerized(),
            dir_patch = %ctx.dir_patch.display(),
            "run prepared"
        );
        self.ctx = Some(ctx);
        self.state = RunState::Prepared;
        Ok(())
    }

    pub fn invoke(
        &mut self,
        bug: &BugMetadata,
        config: &RunConfig,
    ) -> Result<ToolExecutionStatus, LifecycleError> {
        self.expect_state("invoke", self.state == RunState::Prepared)?;
        let span = self.span.clone();
        let _guard = span.enter();
        let ctx = match self.ctx.as_mut() {
            Some(ctx) => ctx,
            None => {
                return Err(LifecycleError::InvalidState {
                    step: "invoke",
                    state: self.state.name(),
                })
            }
        };

        self.state = RunState::Running;
        let wall_start = Utc::now();
        let result = self.tool.invoke(ctx, bug, config);
        if ctx.started_at.is_none() {
            ctx.started_at = Some(wall_start);
        }
        if ctx.finished_at.is_none() {
            ctx.finished_at = Some(Utc::now());
        }
        if let Err(e) = result {
            self.state = RunState::Failed;
            return Err(LifecycleError::Invocation {
                tool: self.tool.name().to_string(),
                source: e.into(),
            });
        }

        let status = match (ctx.last_status, ctx.last_outcome.as_ref()) {
            (Some(status), _) => status,
            (None, Some(outcome)) => process_status(outcome),
            (None, None) => {
                warn!("tool ran no command; recording tool_error");
                ToolExecutionStatus::ToolError
            }
        };
        ctx.last_status = Some(status);
        info!(status = status.as_str(), log = %ctx.log_output_path.display(), "tool completed");
        self.state = RunState::Completed(status);
        Ok(status)
    }

    /// Never fails on missing output; the stats only degrade.
    pub fn analyse_output(
        &mut self,
        bug: &BugMetadata,
    ) -> Result<&RunStats, LifecycleError> {
        self.expect_state(
            "analyse_output",
            matches!(self.state, RunState::Completed(_)),
        )?;
        let span = self.span.clone();
        let _guard = span.enter();
        if let Some(ctx) = self.ctx.as_ref() {
            let stats = std::mem::take(&mut self.stats);
            self.stats = self
                .tool
                .analyse_output(ctx, &bug.bug_id, &bug.failing_tests, stats);
            info!(
                generated = self.stats.patch_stats.generated,
                plausible = self.stats.patch_stats.plausible,
                enumerations = self.stats.patch_stats.enumerations,
                "output analysed"
            );
        }
        self.state = RunState::Analyzed;
        Ok(&self.stats)
    }

    /// Archive patches and write the run record. Safe to repeat.
    pub fn save_artifacts(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(
            "save_artifacts",
            matches!(self.state, RunState::Analyzed | RunState::Archived),
        )?;
        let span = self.span.clone();
        let _guard = span.enter();
        let result = match self.ctx.as_ref() {
            Some(ctx) => self
                .tool
                .save_artifacts(ctx)
                .and_then(|()| write_run_record(ctx, &self.report())),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                self.state = RunState::Archived;
                Ok(())
            }
            Err(e) => {
                self.state = RunState::Failed;
                Err(e.into())
            }
        }
    }

    pub fn report(&self) -> RunReport {
        let ctx = self.ctx.as_ref();
        let started_at = ctx.and_then(|c| c.started_at);
        let finished_at = ctx.and_then(|c| c.finished_at);
        let duration_secs = match (started_at, finished_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
            }
            _ => None,
        };
        RunReport {
            tool: self.tool.name().to_string(),
            bug_id: ctx.map(|c| c.bug_id.clone()).unwrap_or_default(),
            run_id: ctx.and_then(|c| c.layout.run_id()),
            status: ctx.and_then(|c| c.last_status),
            outcome: ctx.and_then(|c| c.last_outcome.clone()),
            started_at,
            finished_at,
            duration_secs,
            log_path: ctx.map(|c| c.log_output_path.display().to_string()),
            stats: self.stats.clone(),
        }
    }
}

/// Copy the tool log next to the stats in the run's results directory.
fn write_run_record(ctx: &ToolRunContext, report: &RunReport) -> Result<(), ArchiveError> {
    let results = match ctx.layout.local.results.as_ref() {
        Some(results) => results,
        None => return Ok(()),
    };
    let record_path = results.join(RUN_RECORD_FILE);
    let value = serde_json::to_value(report).map_err(|e| ArchiveError::Record {
        path: record_path.clone(),
        source: e.into(),
    })?;
    atomic_write_json_pretty(&record_path, &value).map_err(|source| ArchiveError::Record {
        path: record_path.clone(),
        source,
    })?;
    if ctx.log_output_path.is_file() {
        if let Some(name) = ctx.log_output_path.file_name() {
            let dest = results.join(name);
            fs::copy(&ctx.log_output_path, &dest).map_err(|source| ArchiveError::Copy {
                from: ctx.log_output_path.clone(),
                to: dest.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Resolve the layout for `tool` and drive every lifecycle step.
pub fn execute_run(
    resolver: &LayoutResolver<'_>,
    tool: Box<dyn RepairTool>,
    containers: Arc<dyn ContainerOps>,
    bug: &BugMetadata,
    config: &RunConfig,
    log_encoding: LogEncoding,
) -> Result<RunReport, LifecycleError> {
    let coords = bug.coordinates()?;
    let hash = config.content_hash(tool.name(), bug);
    let layout = resolver
        .tool_dir_info(&coords, &config.tag, &config.task_identifier, &hash)?
        .with_instrumentation(tool.name());

    let mut run = ToolRun::new(tool, containers).with_log_encoding(log_encoding);
    run.prepare(layout, bug, config)?;
    run.invoke(bug, config)?;
    run.analyse_output(bug)?;
    run.save_artifacts()?;
    Ok(run.report())
}
