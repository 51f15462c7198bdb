use crate::bug::{BugMetadata, RunConfig};
use crate::fsutil::list_dir;
use crate::process::tool_timeout_prefix;
use crate::stats::RunStats;
use crate::tool::{RepairTool, ToolRunContext};
use anyhow::Result;
use std::io;
use std::path::Path;
use tracing::warn;

const ASTOR_HOME: &str = "/opt/astor";
const ASTOR_MAIN: &str = "fr.inria.main.evolution.AstorMain";

/// Cardumen, run through the Astor framework in `cardumen` mode.
///
/// Astor writes one `AstorMain-*/src/variant-*` folder per solution below
/// `-out`; each of those counts as a generated patch.
#[derive(Debug, Clone)]
pub struct Cardumen {
    name: String,
    mode: String,
}

impl Default for Cardumen {
    fn default() -> Self {
        Self::new()
    }
}

impl Cardumen {
    pub fn new() -> Self {
        Self {
            name: "cardumen".to_string(),
            mode: "cardumen".to_string(),
        }
    }

    pub fn build_command(
        &self,
        ctx: &ToolRunContext,
        bug: &BugMetadata,
        config: &RunConfig,
    ) -> String {
        let src_root = ctx.dir_expr.join("src");
        let deps: Vec<String> = bug
            .dependencies
            .iter()
            .map(|d| ctx.dir_expr.join(d).display().to_string())
            .collect();
        let max_minutes = (config.timeout_hours * 60.0).ceil().max(1.0) as u64;
        let mut command = format!(
            "{timeout} java -cp {jar} {main} \
             -mode {mode} \
             -location {location} \
             -srcjavafolder {src} \
             -srctestfolder {test} \
             -binjavafolder {bin} \
             -bintestfolder {test_bin} \
             -failing {failing} \
             -javacompliancelevel {java_version} \
             -maxtime {max_minutes} \
             -stopfirst false \
             -out {out}",
            timeout = tool_timeout_prefix(config.timeout_hours),
            jar = Path::new(ASTOR_HOME).join("astor.jar").display(),
            main = ASTOR_MAIN,
            mode = self.mode,
            location = src_root.display(),
            src = bug.source_directory,
            test = bug.test_directory,
            bin = bug.class_directory,
            test_bin = bug.test_class_directory,
            failing = bug.failing_tests.join(":"),
            java_version = bug.java_version,
            max_minutes = max_minutes,
            out = ctx.dir_patch.display(),
        );
        if !deps.is_empty() {
            command.push_str(&format!(" -dependencies {}", deps.join(":")));
        }
        command
    }

    /// Solution variants under every `AstorMain-*` run folder in `out`.
    pub fn count_variants(out: &Path) -> io::Result<u64> {
        let mut count = 0;
        for run in list_dir(out)? {
            if !run.starts_with("AstorMain-") {
                continue;
            }
            let src = out.join(&run).join("src");
            for variant in list_dir(&src)? {
                if variant.starts_with("variant-") && src.join(&variant).is_dir() {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

impl RepairTool for Cardumen {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &mut ToolRunContext, bug: &BugMetadata, config: &RunConfig) -> Result<()> {
        let command = self.build_command(ctx, bug, config);
        let working_dir = ctx.dir_expr.join("src");
        ctx.timestamp_log_start();
        let outcome = ctx.run_command(&command, Some(&working_dir), &config.env);
        ctx.process_status(&outcome);
        ctx.timestamp_log_end();
        Ok(())
    }

    fn analyse_output(
        &self,
        ctx: &ToolRunContext,
        _bug_id: &str,
        _failing_tests: &[String],
        mut stats: RunStats,
    ) -> RunStats {
        let out = ctx.host_patch_dir();
        match Self::count_variants(&out) {
            Ok(count) => stats.patch_stats.generated = count,
            Err(e) => warn!(dir = %out.display(), error = %e, "cannot list astor output"),
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bug::sample_bug;
    use crate::config::RootPaths;
    use crate::container::DockerCli;
    use crate::layout::{BugCoordinates, LayoutResolver};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn containerized_command_uses_container_roles() {
        let root = crate::fsutil::testutil::scratch_dir("cardumen_cmd");
        let roots = RootPaths::under(&root);
        let coords = BugCoordinates::new("defects4j", "Lang", "1").expect("coords");
        let layout = LayoutResolver::new(&roots)
            .dir_info(&coords, "")
            .expect("layout");
        let tool = Cardumen::new();
        let ctx = ToolRunContext::new(
            &tool,
            "1",
            layout,
            Some("c0ffee".to_string()),
            Arc::new(DockerCli::default()),
        );
        assert_eq!(ctx.dir_patch, PathBuf::from("/output/patches"));
        let command = tool.build_command(&ctx, &sample_bug(), &RunConfig::new("cardumen", 0.5));
        assert!(command.starts_with(
            "timeout --foreground -k 300s 0.5h java -cp /opt/astor/astor.jar"
        ));
        assert!(command.contains("-mode cardumen"));
        assert!(command.contains("-location /experiment/defects4j/Lang/1/src"));
        assert!(command.contains("-maxtime 30"));
        assert!(command.contains("-out /output/patches"));
        assert!(command.ends_with("-dependencies /experiment/defects4j/Lang/1/lib/easymock.jar"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn analysis_counts_astor_solution_variants() {
        let root = crate::fsutil::testutil::scratch_dir("cardumen_variants");
        let roots = RootPaths::under(&root);
        let coords = BugCoordinates::new("defects4j", "Lang", "1").expect("coords");
        let layout = LayoutResolver::new(&roots)
            .dir_info(&coords, "")
            .expect("layout");
        let tool = Cardumen::new();
        let ctx = ToolRunContext::new(&tool, "1", layout, None, Arc::new(DockerCli::default()));
        let src = ctx.dir_patch.join("AstorMain-Lang-1").join("src");
        for dir in ["variant-5", "variant-12_f", "default"] {
            crate::fsutil::ensure_dir(&src.join(dir).join("org/apache")).expect("variant");
        }
        fs::write(src.join("variant-5/org/apache/NumberUtils.java"), "class A {}")
            .expect("source");
        fs::write(ctx.dir_patch.join("AstorMain-Lang-1/astor_output.json"), "{}").expect("json");
        fs::write(ctx.dir_patch.join("notes.txt"), "x").expect("notes");

        let stats = tool.analyse_output(&ctx, "1", &[], RunStats::new());
        assert_eq!(stats.patch_stats.generated, 2);
        fs::remove_dir_all(&ctx.dir_patch).expect("clear");
        let none = tool.analyse_output(&ctx, "1", &[], RunStats::new());
        assert_eq!(none.patch_stats.generated, 0);
        let _ = fs::remove_dir_all(root);
    }
}
