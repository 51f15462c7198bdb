use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use repair_runner::{
    drivers, execute_run, BugCoordinates, BugMetadata, DockerCli, HarnessConfig, LayoutResolver,
    RunConfig, RunReport,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "repairlab", version, about = "Program repair experiment runner")]
struct Cli {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one repair tool against one bug
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        bug: PathBuf,
        #[arg(long)]
        tool: String,
        /// Run directory prefix; defaults to the tool name with `-` for `_`
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long, default_value = "")]
        tag: String,
        #[arg(long)]
        timeout_hours: Option<f64>,
        /// Id of an already running container to execute the tool in
        #[arg(long)]
        container_id: Option<String>,
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print the directory layout for a bug
    Layout {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        benchmark: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        bug: String,
        #[arg(long, default_value = "")]
        tag: String,
    },
    /// List available repair tool drivers
    Tools {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json!({
                    "ok": false,
                    "error": { "code": "command_failed", "message": format!("{:#}", err) }
                }));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Tools { json } => *json,
        Commands::Layout { .. } => true,
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            config,
            bug,
            tool,
            task_id,
            tag,
            timeout_hours,
            container_id,
            env,
            json,
        } => {
            let harness = HarnessConfig::load(&config)?;
            let bug = BugMetadata::load(&bug)?;
            let driver = drivers::tool_by_name(&tool).ok_or_else(|| {
                anyhow!(
                    "unknown tool {} (known: {})",
                    tool,
                    drivers::TOOL_NAMES.join(", ")
                )
            })?;
            let timeout_hours = timeout_hours
                .or(harness.default_timeout_hours)
                .ok_or_else(|| anyhow!("--timeout-hours required (no default_timeout_hours in config)"))?;
            let task_identifier = task_id.unwrap_or_else(|| driver.name().replace('_', "-"));
            let run_config = RunConfig {
                task_identifier,
                tag,
                timeout_hours,
                container_id,
                env: parse_env(&env)?,
            };
            let resolver = LayoutResolver::new(&harness.roots);
            let containers = Arc::new(DockerCli::new(harness.container_runtime.clone()));
            let report = execute_run(
                &resolver,
                driver,
                containers,
                &bug,
                &run_config,
                harness.log_encoding,
            )
            .with_context(|| format!("run of {} on {} failed", tool, bug.bug_id))?;
            tracing::info!(
                run_id = report.run_id.as_deref().unwrap_or("-"),
                "run archived"
            );
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "run": serde_json::to_value(&report)?,
                })));
            }
            print_report(&report);
        }
        Commands::Layout {
            config,
            benchmark,
            subject,
            bug,
            tag,
        } => {
            let harness = HarnessConfig::load(&config)?;
            let coords = BugCoordinates::new(benchmark, subject, bug)?;
            let layout = LayoutResolver::new(&harness.roots).dir_info(&coords, &tag)?;
            return Ok(Some(json!({
                "ok": true,
                "command": "layout",
                "layout": serde_json::to_value(&layout)?,
            })));
        }
        Commands::Tools { json } => {
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "tools",
                    "tools": drivers::TOOL_NAMES,
                })));
            }
            for name in drivers::TOOL_NAMES {
                println!("{}", name);
            }
        }
    }
    Ok(None)
}

fn parse_env(values: &[String]) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for raw in values {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --env {} (expected KEY=VALUE)", raw))?;
        if key.is_empty() {
            return Err(anyhow!("invalid --env {} (empty key)", raw));
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

fn print_report(report: &RunReport) {
    println!("tool: {}", report.tool);
    println!("bug_id: {}", report.bug_id);
    println!("run_id: {}", report.run_id.as_deref().unwrap_or("-"));
    println!(
        "status: {}",
        report.status.map(|s| s.as_str()).unwrap_or("unknown")
    );
    if let Some(secs) = report.duration_secs {
        println!("duration_secs: {:.1}", secs);
    }
    let patches = &report.stats.patch_stats;
    println!("generated: {}", patches.generated);
    println!("enumerations: {}", patches.enumerations);
    println!("plausible: {}", patches.plausible);
    println!("non_compilable: {}", patches.non_compilable);
    if let Some(log) = &report.log_path {
        println!("log: {}", log);
    }
}

fn emit_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
