//! Blocking execution of external commands with combined output captured to
//! a log file and a supervisor-side timeout.
//!
//! Commands run in their own process group. When `run_process` returns,
//! nothing left in that group is still running.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::fsutil::ensure_dir;

pub const EXIT_CODE_TIMEOUT: i32 = 124;

/// Time drivers give a tool between `timeout`'s TERM and its KILL.
pub const TOOL_KILL_GRACE: Duration = Duration::from_secs(5 * 60);
const SUPERVISOR_MARGIN: Duration = Duration::from_secs(60);

/// Supervisor deadline for a tool with `tool_budget`. It trails the tool's
/// own `timeout -k` so that one ends the tool first.
pub fn supervisor_budget(tool_budget: Option<Duration>) -> Option<Duration> {
    tool_budget.map(|budget| budget + TOOL_KILL_GRACE + SUPERVISOR_MARGIN)
}

/// `timeout` prefix for a tool command of `hours`. `--foreground` keeps the
/// tool in the caller's process group, where the supervisor can reach it.
pub fn tool_timeout_prefix(hours: f64) -> String {
    format!(
        "timeout --foreground -k {}s {}h",
        TOOL_KILL_GRACE.as_secs(),
        hours
    )
}

/// Raw result of one process run, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Exited { code: i32 },
    Signaled { signal: i32 },
    TimedOut { after_secs: u64 },
    SpawnFailed { message: String },
}

/// Outcome classes comparable across tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionStatus {
    Success,
    Timeout,
    ToolError,
    Crash,
}

impl ToolExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolExecutionStatus::Success => "success",
            ToolExecutionStatus::Timeout => "timeout",
            ToolExecutionStatus::ToolError => "tool_error",
            ToolExecutionStatus::Crash => "crash",
        }
    }
}

/// `124` is what coreutils `timeout` reports; codes above 128 are how a
/// shell reports a child killed by a signal.
pub fn process_status(outcome: &ProcessOutcome) -> ToolExecutionStatus {
    match outcome {
        ProcessOutcome::Exited { code: 0 } => ToolExecutionStatus::Success,
        ProcessOutcome::Exited {
            code: EXIT_CODE_TIMEOUT,
        } => ToolExecutionStatus::Timeout,
        ProcessOutcome::Exited { code } if *code > 128 => ToolExecutionStatus::Crash,
        ProcessOutcome::Exited { .. } => ToolExecutionStatus::ToolError,
        ProcessOutcome::Signaled { .. } => ToolExecutionStatus::Crash,
        ProcessOutcome::TimedOut { .. } => ToolExecutionStatus::Timeout,
        ProcessOutcome::SpawnFailed { .. } => ToolExecutionStatus::ToolError,
    }
}

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

/// Run `command` through `sh -c`, appending stdout and stderr to `log_path`.
pub fn run_command(
    command: &str,
    log_path: &Path,
    working_dir: Option<&Path>,
    env: &BTreeMap<String, String>,
    timeout: Option<Duration>,
) -> io::Result<ProcessOutcome> {
    let mut cmd = shell_command(command);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    cmd.envs(env);
    debug!(command = %command, log = %log_path.display(), "running command");
    run_process(cmd, log_path, timeout)
}

/// Spawn `cmd` in its own process group with output appended to `log_path`.
/// On timeout the whole group is killed; after a normal exit any stragglers
/// left in the group are killed too. A spawn failure is reported as an
/// outcome; only log file errors are returned as `Err`.
pub fn run_process(
    mut cmd: Command,
    log_path: &Path,
    timeout: Option<Duration>,
) -> io::Result<ProcessOutcome> {
    if let Some(parent) = log_path.parent() {
        ensure_dir(parent)?;
    }
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(log.try_clone()?));
    cmd.stderr(Stdio::from(log));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(error = %err, "failed to spawn command");
            return Ok(ProcessOutcome::SpawnFailed {
                message: err.to_string(),
            });
        }
    };

    let status = match timeout {
        Some(duration) => match child.wait_timeout(duration)? {
            Some(status) => status,
            None => {
                kill_process_group(&mut child);
                child.wait()?;
                warn!(timeout_secs = duration.as_secs(), "command timed out");
                return Ok(ProcessOutcome::TimedOut {
                    after_secs: duration.as_secs(),
                });
            }
        },
        None => child.wait()?,
    };
    sweep_process_group(&child);
    Ok(outcome_from_status(status))
}

fn kill_process_group(child: &mut std::process::Child) {
    sweep_process_group(child);
    let _ = child.kill();
}

// The group keeps the leader's pid as its id while any member is alive, so
// the id cannot be reused before every member is gone.
fn sweep_process_group(child: &std::process::Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        unsafe {
            let _ = libc::kill(-pgid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}

pub fn outcome_from_status(status: ExitStatus) -> ProcessOutcome {
    if let Some(code) = status.code() {
        return ProcessOutcome::Exited { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return ProcessOutcome::Signaled { signal };
        }
    }
    ProcessOutcome::Signaled { signal: -1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_to_status_taxonomy() {
        assert_eq!(
            process_status(&ProcessOutcome::Exited { code: 0 }),
            ToolExecutionStatus::Success
        );
        assert_eq!(
            process_status(&ProcessOutcome::Exited { code: 124 }),
            ToolExecutionStatus::Timeout
        );
        assert_eq!(
            process_status(&ProcessOutcome::Exited { code: 1 }),
            ToolExecutionStatus::ToolError
        );
        assert_eq!(
            process_status(&ProcessOutcome::Exited { code: 137 }),
            ToolExecutionStatus::Crash
        );
        assert_eq!(
            process_status(&ProcessOutcome::Signaled { signal: 11 }),
            ToolExecutionStatus::Crash
        );
        assert_eq!(
            process_status(&ProcessOutcome::TimedOut { after_secs: 1 }),
            ToolExecutionStatus::Timeout
        );
        assert_eq!(
            process_status(&ProcessOutcome::SpawnFailed {
                message: "nope".to_string()
            }),
            ToolExecutionStatus::ToolError
        );
    }

    #[test]
    fn supervisor_trails_the_tool_budget() {
        assert_eq!(supervisor_budget(None), None);
        assert_eq!(
            supervisor_budget(Some(Duration::from_secs(3600))),
            Some(Duration::from_secs(3600 + 300 + 60))
        );
        assert_eq!(tool_timeout_prefix(2.0), "timeout --foreground -k 300s 2h");
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;
        use crate::fsutil::list_dir;
        use crate::fsutil::testutil::scratch_dir;

        #[test]
        fn combined_output_is_appended_to_log() {
            let root = scratch_dir("proc_log");
            let log = root.join("tool.log");
            fs::write(&log, "marker\n").expect("seed log");
            let mut env = BTreeMap::new();
            env.insert("REPAIR_GREETING".to_string(), "hello".to_string());
            let outcome = run_command(
                "echo \"$REPAIR_GREETING\"; echo oops 1>&2; exit 3",
                &log,
                Some(&root),
                &env,
                None,
            )
            .expect("run");
            assert_eq!(outcome, ProcessOutcome::Exited { code: 3 });
            let text = fs::read_to_string(&log).expect("log");
            assert!(text.starts_with("marker\n"), "{}", text);
            assert!(text.contains("hello"), "{}", text);
            assert!(text.contains("oops"), "{}", text);
            let _ = fs::remove_dir_all(root);
        }

        #[test]
        fn timeout_kills_the_command() {
            let root = scratch_dir("proc_timeout");
            let log = root.join("tool.log");
            let outcome = run_command(
                "sleep 30",
                &log,
                None,
                &BTreeMap::new(),
                Some(Duration::from_millis(200)),
            )
            .expect("run");
            assert!(matches!(outcome, ProcessOutcome::TimedOut { .. }));
            assert_eq!(process_status(&outcome), ToolExecutionStatus::Timeout);
            let _ = fs::remove_dir_all(root);
        }

        #[test]
        fn background_children_do_not_outlive_the_command() {
            let root = scratch_dir("proc_sweep");
            let log = root.join("tool.log");
            let mut env = BTreeMap::new();
            env.insert("PATCH_DIR".to_string(), root.display().to_string());
            let outcome = run_command(
                "(sleep 1; echo late > \"$PATCH_DIR/Patch_late.txt\") & exit 0",
                &log,
                None,
                &env,
                None,
            )
            .expect("run");
            assert_eq!(outcome, ProcessOutcome::Exited { code: 0 });
            std::thread::sleep(Duration::from_millis(1500));
            assert!(!root.join("Patch_late.txt").exists());
            let _ = fs::remove_dir_all(root);
        }

        #[test]
        fn tool_timeout_finishes_before_the_supervisor_returns() {
            let root = scratch_dir("proc_tool_timeout");
            let log = root.join("tool.log");
            let late = root.join("Patch_late.txt");
            let mut env = BTreeMap::new();
            env.insert("PATCH_DIR".to_string(), root.display().to_string());
            // One second in hours; the trap flushes a patch after TERM.
            let command = format!(
                "{} sh -c 'trap \"sleep 0.3; echo flushed > $PATCH_DIR/Patch_late.txt; exit 1\" TERM; sleep 20 & wait'",
                tool_timeout_prefix(1.0 / 3600.0)
            );
            let outcome = run_command(
                &command,
                &log,
                None,
                &env,
                supervisor_budget(Some(Duration::from_secs(1))),
            )
            .expect("run");
            assert_eq!(outcome, ProcessOutcome::Exited { code: EXIT_CODE_TIMEOUT });
            assert_eq!(process_status(&outcome), ToolExecutionStatus::Timeout);
            let at_return = fs::read_to_string(&late).expect("flushed before return");
            std::thread::sleep(Duration::from_millis(1000));
            assert_eq!(fs::read_to_string(&late).expect("late"), at_return);
            assert_eq!(list_dir(&root).expect("list"), vec!["Patch_late.txt", "tool.log"]);
            let _ = fs::remove_dir_all(root);
        }

        #[test]
        fn missing_working_dir_is_a_spawn_failure() {
            let root = scratch_dir("proc_spawn");
            let log = root.join("tool.log");
            let outcome = run_command(
                "true",
                &log,
                Some(&root.join("does-not-exist")),
                &BTreeMap::new(),
                None,
            )
            .expect("run");
            assert!(matches!(outcome, ProcessOutcome::SpawnFailed { .. }));
            let _ = fs::remove_dir_all(root);
        }
    }
}
