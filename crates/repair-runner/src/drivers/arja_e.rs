use crate::bug::{BugMetadata, LocalizationEntry, RunConfig};
use crate::process::tool_timeout_prefix;
use crate::stats::RunStats;
use crate::tool::{count_generated_patches, RepairTool, ToolRunContext};
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

const ARJA_E_HOME: &str = "/opt/arja";
const POPULATION_SIZE: u64 = 40;
const TEST_TIMEOUT_SECS: u64 = 20;
// ARJA multiplies populationSize by maxGenerations into a Java int.
const MAX_GENERATIONS: u64 = 0x7FFF_FFFF / (POPULATION_SIZE + 1);
// Effectively unbounded; the outer timeout ends the run.
const REPAIR_TIMEOUT_MINUTES: u64 = 365 * 24 * 60;

const SIGNAL_ENUMERATION: &str = "One fitness evaluation is finished";
const SIGNAL_PLAUSIBLE: &str = "failed tests: 0";

/// ARJA-E, the evolutionary variant of the ARJA genetic repair tool.
#[derive(Debug, Clone)]
pub struct ArjaE {
    name: String,
}

impl Default for ArjaE {
    fn default() -> Self {
        Self::new()
    }
}

impl ArjaE {
    pub fn new() -> Self {
        Self {
            name: "arja_e".to_string(),
        }
    }

    /// GZoltar-style spectra lines ARJA reads through `-DgzoltarDataDir`.
    pub fn transform_localization(&self, data: &[LocalizationEntry]) -> Result<Vec<String>> {
        let anonymous_suffix = Regex::new(r"\$\d+$")?;
        let mut lines = vec!["name;suspiciousness_value\n".to_string()];
        for entry in data {
            let method_owner = entry.location.split('#').next().unwrap_or_default();
            let classname = method_owner.replacen('$', ".", 1);
            let classname = anonymous_suffix.replace(&classname, "");
            for line_number in &entry.line_numbers {
                lines.push(format!(
                    "<{}{{#{},{}\n",
                    classname, line_number, entry.score
                ));
            }
        }
        Ok(lines)
    }

    fn test_outcome_lines(bug: &BugMetadata) -> Vec<String> {
        let mut lines = vec!["name,outcome,runtime,stacktrace\n".to_string()];
        lines.extend(bug.failing_tests.iter().map(|t| format!("{},FAIL,0,\n", t)));
        lines.extend(bug.passing_tests.iter().map(|t| format!("{},PASS,0,\n", t)));
        lines
    }

    pub fn build_command(
        &self,
        ctx: &ToolRunContext,
        bug: &BugMetadata,
        config: &RunConfig,
    ) -> String {
        let home = Path::new(ARJA_E_HOME);
        let src_root = ctx.dir_expr.join("src");
        let classpath = format!(
            "{}:{}",
            home.join("lib/*").display(),
            home.join("bin").display()
        );
        let mut deps: Vec<String> = bug
            .dependencies
            .iter()
            .map(|d| ctx.dir_expr.join(d).display().to_string())
            .collect();
        deps.push(home.join("external/lib/hamcrest-core-1.3.jar").display().to_string());
        deps.push(home.join("external/lib/junit-4.12.jar").display().to_string());

        let mut command = format!(
            "{timeout} java -cp {classpath} us.msu.cse.repair.Main ArjaE \
             -DsrcJavaDir {src} \
             -DbinJavaDir {bin} \
             -DbinTestDir {test_bin} \
             -DdiffFormat true \
             -DsrcVersion={java_version} \
             -DexternalProjRoot {home}/external \
             -DwaitTime {wait} \
             -DmaxGenerations {generations} \
             -DpatchOutputRoot {patches} \
             -Ddependences {deps} \
             -DmaxTime {max_time} \
             -DpopulationSize {population} \
             -DgzoltarDataDir {localization}",
            timeout = tool_timeout_prefix(config.timeout_hours),
            classpath = classpath,
            src = src_root.join(&bug.source_directory).display(),
            bin = src_root.join(&bug.class_directory).display(),
            test_bin = src_root.join(&bug.test_class_directory).display(),
            java_version = bug.java_version,
            home = home.display(),
            wait = TEST_TIMEOUT_SECS,
            generations = MAX_GENERATIONS,
            patches = ctx.dir_patch.display(),
            deps = deps.join(":"),
            max_time = REPAIR_TIMEOUT_MINUTES,
            population = POPULATION_SIZE,
            localization = ctx.dir_output.join("localization").display(),
        );
        // Without passing tests ARJA must be told which tests to run.
        if bug.passing_tests.is_empty() {
            command.push_str(&format!(" -Dtests {}", bug.failing_tests.join(",")));
        }
        command
    }
}

impl RepairTool for ArjaE {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &mut ToolRunContext, bug: &BugMetadata, config: &RunConfig) -> Result<()> {
        let dir_localization = ctx.dir_output.join("localization");
        let spectra = self.transform_localization(&bug.localization)?;
        ctx.write_file(&spectra, &dir_localization.join("spectra"))?;
        ctx.write_file(&Self::test_outcome_lines(bug), &dir_localization.join("tests"))?;

        let command = self.build_command(ctx, bug, config);
        let mut env = BTreeMap::new();
        env.insert("TZ".to_string(), "America/Los_Angeles".to_string());
        env.extend(config.env.clone());
        let working_dir = ctx.dir_expr.join("src");

        ctx.timestamp_log_start();
        let outcome = ctx.run_command(&command, Some(&working_dir), &env);
        ctx.process_status(&outcome);
        ctx.timestamp_log_end();
        info!(log = %ctx.log_output_path.display(), "log file");
        Ok(())
    }

    fn analyse_output(
        &self,
        ctx: &ToolRunContext,
        _bug_id: &str,
        _failing_tests: &[String],
        stats: RunStats,
    ) -> RunStats {
        let mut stats = count_generated_patches(ctx, stats);

        let log_lines = match ctx.read_log() {
            Ok(lines) => lines,
            Err(e) => {
                warn!(log = %ctx.log_output_path.display(), error = %e, "no output log file found");
                return stats;
            }
        };
        info!(log = %ctx.log_output_path.display(), "reading output log");

        stats.time_stats.timestamp_start = log_lines.first().map(|l| l.trim_end().to_string());
        stats.time_stats.timestamp_end = log_lines.last().map(|l| l.trim_end().to_string());
        let mut enumerations = 0;
        let mut plausible = 0;
        for line in &log_lines {
            if line.contains(SIGNAL_ENUMERATION) {
                enumerations += 1;
            } else if line.contains(SIGNAL_PLAUSIBLE) {
                plausible += 1;
            }
        }
        stats.patch_stats.enumerations = enumerations;
        stats.patch_stats.plausible = plausible;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bug::sample_bug;
    use crate::config::RootPaths;
    use crate::container::DockerCli;
    use crate::digest::ContentHash;
    use crate::fsutil::testutil::scratch_dir;
    use crate::layout::{BugCoordinates, LayoutResolver};
    use std::fs;
    use std::sync::Arc;

    fn entry(location: &str, lines: Vec<u32>) -> LocalizationEntry {
        LocalizationEntry {
            location: location.to_string(),
            score: 0.75,
            line_numbers: lines,
        }
    }

    #[test]
    fn localization_strips_anonymous_class_suffix() {
        let lines = ArjaE::new()
            .transform_localization(&[
                entry(
                    "org.jsoup.parser$TokeniserState$37#read(org.jsoup.parser.Tokeniser,org.jsoup.parser.CharacterReader)",
                    vec![12, 13],
                ),
                entry("org.jsoup.parser$Parser#xmlParser()", vec![40]),
            ])
            .expect("transform");
        assert_eq!(
            lines,
            vec![
                "name;suspiciousness_value\n",
                "<org.jsoup.parser.TokeniserState{#12,0.75\n",
                "<org.jsoup.parser.TokeniserState{#13,0.75\n",
                "<org.jsoup.parser.Parser{#40,0.75\n",
            ]
        );
    }

    fn context(root: &Path) -> ToolRunContext {
        let roots = RootPaths::under(root);
        let coords = BugCoordinates::new("defects4j", "Lang", "1").expect("coords");
        let layout = LayoutResolver::new(&roots)
            .tool_dir_info(
                &coords,
                "",
                "arja-e",
                &ContentHash::from_hex("a1b2c3d4e5").expect("hash"),
            )
            .expect("layout");
        let tool = ArjaE::new();
        ToolRunContext::new(&tool, "1", layout, None, Arc::new(DockerCli::default()))
    }

    #[test]
    fn command_points_at_prepared_roles() {
        let root = scratch_dir("arja_cmd");
        let ctx = context(&root);
        let bug = sample_bug();
        let command = ArjaE::new().build_command(&ctx, &bug, &RunConfig::new("arja-e", 2.0));
        let expr_src = ctx.dir_expr.join("src");
        assert!(command.starts_with(
            "timeout --foreground -k 300s 2h java -cp /opt/arja/lib/*:/opt/arja/bin"
        ));
        assert!(command.contains(&format!(
            "-DsrcJavaDir {}",
            expr_src.join("src/main/java").display()
        )));
        assert!(command.contains(&format!("-DpatchOutputRoot {}", ctx.dir_patch.display())));
        assert!(command.contains("-DmaxGenerations 52377649"));
        assert!(command.contains("-DmaxTime 525600"));
        assert!(!command.contains("-Dtests"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn command_lists_failing_tests_when_no_passing_tests_known() {
        let root = scratch_dir("arja_tests");
        let ctx = context(&root);
        let mut bug = sample_bug();
        bug.passing_tests.clear();
        bug.failing_tests.push("org.example.OtherTest".to_string());
        let command = ArjaE::new().build_command(&ctx, &bug, &RunConfig::new("arja-e", 1.0));
        assert!(command.ends_with(
            " -Dtests org.apache.commons.lang3.math.NumberUtilsTest,org.example.OtherTest"
        ));
        let _ = fs::remove_dir_all(root);
    }

    #[cfg(unix)]
    #[test]
    fn invoke_writes_localization_inputs_and_records_status() {
        let root = scratch_dir("arja_invoke");
        let mut ctx = context(&root);
        // The host has no ARJA install, so the command fails inside `sh`.
        ctx.time_budget = Some(std::time::Duration::from_secs(30));
        crate::fsutil::ensure_dir(&ctx.dir_expr.join("src")).expect("src");
        let bug = sample_bug();
        ArjaE::new()
            .invoke(&mut ctx, &bug, &RunConfig::new("arja-e", 1.0))
            .expect("invoke");
        let tests = fs::read_to_string(ctx.dir_output.join("localization/tests")).expect("tests");
        assert!(tests.starts_with("name,outcome,runtime,stacktrace\n"));
        assert!(tests.contains("org.apache.commons.lang3.math.NumberUtilsTest,FAIL,0,\n"));
        assert!(tests.contains("org.apache.commons.lang3.StringUtilsTest,PASS,0,\n"));
        let spectra =
            fs::read_to_string(ctx.dir_output.join("localization/spectra")).expect("spectra");
        assert!(spectra.contains("<org.apache.commons.lang3.math.NumberUtils{#471,0.9\n"));
        assert!(ctx.last_status.is_some());
        assert!(ctx.started_at.is_some() && ctx.finished_at.is_some());
        let _ = fs::remove_dir_all(root);
    }
}
