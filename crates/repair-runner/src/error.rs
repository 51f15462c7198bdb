use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A required directory could not be materialized. Raised before any tool
/// process starts.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid layout component {name}: {value:?}")]
    InvalidComponent { name: &'static str, value: String },
}

/// Artifact copy failure. Raised after the tool ran, with its logs already
/// on disk.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot reset archive directory {path}: {source}")]
    Reset {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("container copy failed: {0}")]
    Container(#[from] ContainerError),
    #[error("cannot write run record {path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to spawn container runtime {runtime}: {source}")]
    RuntimeSpawn {
        runtime: String,
        #[source]
        source: io::Error,
    },
    #[error("{runtime} {action} in container {container_id} exited with {status}: {stderr}")]
    CommandFailed {
        runtime: String,
        action: &'static str,
        container_id: String,
        status: String,
        stderr: String,
    },
    #[error("cannot open log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config root {name} must be an absolute path, got {value}")]
    RelativeRoot { name: &'static str, value: PathBuf },
}

#[derive(Debug, Error)]
pub enum BugMetadataError {
    #[error("cannot read bug metadata {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid bug metadata: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("bug metadata field {0} must not be empty")]
    EmptyField(&'static str),
}

/// Errors that halt a single run. Tool exit codes are never reported here.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("tool {tool} could not be invoked: {source}")]
    Invocation {
        tool: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("lifecycle step {step} not allowed in state {state}")]
    InvalidState {
        step: &'static str,
        state: &'static str,
    },
}
