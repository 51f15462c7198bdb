//! Mapping from (benchmark, subject, bug, tool run) to the host and
//! container directory trees a run works in.
//!
//! Role directory names (`bugs`, `patches`, `localization`, `selection`,
//! `validation`) and run directory names are read by result harvesters and
//! must stay stable.

use crate::config::RootPaths;
use crate::digest::{run_dir_name, ContentHash};
use crate::error::LayoutError;
use crate::fsutil::{ensure_dir, fresh_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONTAINER_SETUP_ROOT: &str = "/setup";
pub const CONTAINER_LOGS: &str = "/logs";
pub const CONTAINER_OUTPUT: &str = "/output";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugCoordinates {
    pub benchmark: String,
    pub subject: String,
    pub bug: String,
}

impl BugCoordinates {
    pub fn new(
        benchmark: impl Into<String>,
        subject: impl Into<String>,
        bug: impl Into<String>,
    ) -> Result<Self, LayoutError> {
        let coords = Self {
            benchmark: benchmark.into(),
            subject: subject.into(),
            bug: bug.into(),
        };
        check_component("benchmark", &coords.benchmark)?;
        check_component("subject", &coords.subject)?;
        check_component("bug", &coords.bug)?;
        Ok(coords)
    }

    fn rel(&self) -> PathBuf {
        Path::new(&self.benchmark)
            .join(&self.subject)
            .join(&self.bug)
    }

    fn subject_rel(&self) -> PathBuf {
        Path::new(&self.benchmark).join(&self.subject)
    }
}

fn check_component(name: &'static str, value: &str) -> Result<(), LayoutError> {
    if value.is_empty() || value == "." || value == ".." || value.contains('/') {
        return Err(LayoutError::InvalidComponent {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Host-side roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDirs {
    pub logs: PathBuf,
    pub artifacts: PathBuf,
    pub experiment: PathBuf,
    pub setup: PathBuf,
    pub base: PathBuf,
    pub aux: PathBuf,
    pub patches: PathBuf,
    pub localization: PathBuf,
    pub selection: PathBuf,
    pub validation: PathBuf,
    pub bugs: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumentation: Option<PathBuf>,
}

/// Roles as a tool running inside the container sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDirs {
    pub logs: PathBuf,
    pub artifacts: PathBuf,
    pub experiment: PathBuf,
    pub setup: PathBuf,
    pub base: PathBuf,
    pub aux: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumentation: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryLayout {
    pub local: LocalDirs,
    pub container: ContainerDirs,
}

impl DirectoryLayout {
    /// Add the per-tool `instrumentation` staging folder under `setup` in
    /// both namespaces.
    pub fn with_instrumentation(mut self, tool_name: &str) -> Self {
        let folder = tool_name.to_lowercase();
        self.local.instrumentation = Some(self.local.setup.join(&folder));
        self.container.instrumentation = Some(self.container.setup.join(&folder));
        self
    }

    /// Run directory name when the layout has been extended for a tool.
    pub fn run_id(&self) -> Option<String> {
        self.local
            .results
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
    }
}

/// Resolves layouts against one set of roots. Holds no state between calls.
#[derive(Debug, Clone, Copy)]
pub struct LayoutResolver<'a> {
    roots: &'a RootPaths,
}

impl<'a> LayoutResolver<'a> {
    pub fn new(roots: &'a RootPaths) -> Self {
        Self { roots }
    }

    /// Host namespace for a bug. Creates every shared role directory that
    /// does not exist yet.
    pub fn local(&self, bug: &BugCoordinates, tag: &str) -> Result<LocalDirs, LayoutError> {
        if !tag.is_empty() {
            check_component("tag", tag)?;
        }
        let rel = bug.rel();
        let experiment = self.roots.experiments.join(&rel);
        let setup = self.setup_root(bug, tag);

        let dirs = LocalDirs {
            logs: self.roots.logs.join(&rel),
            artifacts: self.roots.artifacts.join(&rel),
            experiment,
            bugs: setup.join("bugs"),
            localization: setup.join("localization"),
            patches: setup.join("patches"),
            validation: setup.join("validation"),
            selection: setup.join("selection"),
            aux: self.roots.benchmark.join(bug.subject_rel()).join(".aux"),
            base: self.roots.benchmark.join(bug.subject_rel()).join("base"),
            setup,
            results: None,
            instrumentation: None,
        };

        for dir in [
            &dirs.experiment,
            &dirs.setup,
            &dirs.aux,
            &dirs.base,
            &dirs.bugs,
            &dirs.patches,
            &dirs.localization,
            &dirs.validation,
            &dirs.selection,
        ] {
            ensure_dir(dir).map_err(|source| LayoutError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(dirs)
    }

    /// Container namespace. The tag never changes what the container sees.
    pub fn container(&self, bug: &BugCoordinates) -> ContainerDirs {
        let rel = bug.rel();
        let experiment = self.roots.container_experiment_base.join(&rel);
        ContainerDirs {
            logs: PathBuf::from(CONTAINER_LOGS),
            artifacts: PathBuf::from(CONTAINER_OUTPUT),
            setup: Path::new(CONTAINER_SETUP_ROOT).join(&rel),
            aux: experiment.join(".aux"),
            base: experiment.join("base"),
            experiment,
            instrumentation: None,
        }
    }

    /// Point `logs` and `artifacts` at the run directory and add `results`.
    /// The three directories are recreated empty on every call.
    pub fn extend_for_tool(
        &self,
        mut local: LocalDirs,
        task_identifier: &str,
        hash: &ContentHash,
    ) -> Result<LocalDirs, LayoutError> {
        check_component("task_identifier", task_identifier)?;
        let run_id = run_dir_name(task_identifier, hash);
        let logs = self.roots.logs.join(&run_id);
        let results = self.roots.results.join(&run_id);
        let artifacts = self.roots.artifacts.join(&run_id);
        for dir in [&logs, &results, &artifacts] {
            fresh_dir(dir).map_err(|source| LayoutError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        debug!(run_id = %run_id, "prepared run directories");
        local.logs = logs;
        local.artifacts = artifacts;
        local.results = Some(results);
        Ok(local)
    }

    pub fn dir_info(&self, bug: &BugCoordinates, tag: &str) -> Result<DirectoryLayout, LayoutError> {
        Ok(DirectoryLayout {
            local: self.local(bug, tag)?,
            container: self.container(bug),
        })
    }

    pub fn tool_dir_info(
        &self,
        bug: &BugCoordinates,
        tag: &str,
        task_identifier: &str,
        hash: &ContentHash,
    ) -> Result<DirectoryLayout, LayoutError> {
        let local = self.local(bug, tag)?;
        Ok(DirectoryLayout {
            local: self.extend_for_tool(local, task_identifier, hash)?,
            container: self.container(bug),
        })
    }

    // Re-checked on every call: shadow fixtures may appear between runs.
    fn setup_root(&self, bug: &BugCoordinates, tag: &str) -> PathBuf {
        if !tag.is_empty() {
            let shadow = self
                .roots
                .benchmark
                .join(bug.subject_rel())
                .join(format!("{}-{}", bug.bug, tag));
            if shadow.exists() {
                return shadow;
            }
        }
        self.roots.benchmark.join(bug.rel())
    }
}
