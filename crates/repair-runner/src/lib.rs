//! Runs program-repair tools against benchmark bugs and collects comparable
//! statistics.
//!
//! [`layout::LayoutResolver`] maps a bug and tool run onto host and container
//! directories; [`lifecycle::ToolRun`] drives one [`tool::RepairTool`]
//! through invoke, analysis and archiving.

pub mod bug;
pub mod config;
pub mod container;
pub mod digest;
pub mod drivers;
pub mod error;
pub mod fsutil;
pub mod layout;
pub mod lifecycle;
pub mod process;
pub mod stats;
pub mod tool;

pub use bug::{BugMetadata, LocalizationEntry, RunConfig};
pub use config::{HarnessConfig, RootPaths};
pub use container::{ContainerOps, DockerCli};
pub use digest::{run_dir_name, ContentHash};
pub use error::{ArchiveError, ContainerError, LayoutError, LifecycleError};
pub use layout::{BugCoordinates, ContainerDirs, DirectoryLayout, LayoutResolver, LocalDirs};
pub use lifecycle::{execute_run, RunReport, RunState, ToolRun};
pub use process::{process_status, ProcessOutcome, ToolExecutionStatus};
pub use stats::{PatchStats, RunStats, TimeStats};
pub use tool::{RepairTool, ToolRunContext};
