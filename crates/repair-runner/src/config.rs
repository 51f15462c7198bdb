use crate::error::ConfigError;
use crate::fsutil::LogEncoding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONTAINER_EXPERIMENT_BASE: &str = "/experiment";
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";

/// Filesystem roots shared by every run in the process. Built once at
/// startup and handed to the resolver by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPaths {
    pub benchmark: PathBuf,
    pub experiments: PathBuf,
    pub logs: PathBuf,
    pub artifacts: PathBuf,
    pub results: PathBuf,
    #[serde(default = "default_container_experiment_base")]
    pub container_experiment_base: PathBuf,
}

fn default_container_experiment_base() -> PathBuf {
    PathBuf::from(DEFAULT_CONTAINER_EXPERIMENT_BASE)
}

impl RootPaths {
    /// Conventional layout with every root directly under `base`.
    pub fn under(base: &Path) -> Self {
        Self {
            benchmark: base.join("benchmark"),
            experiments: base.join("experiments"),
            logs: base.join("logs"),
            artifacts: base.join("artifacts"),
            results: base.join("results"),
            container_experiment_base: default_container_experiment_base(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("benchmark", &self.benchmark),
            ("experiments", &self.experiments),
            ("logs", &self.logs),
            ("artifacts", &self.artifacts),
            ("results", &self.results),
            ("container_experiment_base", &self.container_experiment_base),
        ] {
            if !value.is_absolute() {
                return Err(ConfigError::RelativeRoot {
                    name,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub roots: RootPaths,
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,
    #[serde(default)]
    pub default_timeout_hours: Option<f64>,
    #[serde(default)]
    pub log_encoding: LogEncoding,
}

fn default_container_runtime() -> String {
    DEFAULT_CONTAINER_RUNTIME.to_string()
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&data).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(data: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig =
            serde_yaml::from_str(data).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.roots.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_config_fills_defaults() {
        let config = HarnessConfig::from_yaml_str(
            r#"
roots:
  benchmark: /data/benchmark
  experiments: /data/experiments
  logs: /data/logs
  artifacts: /data/artifacts
  results: /data/results
"#,
        )
        .expect("config");
        assert_eq!(config.container_runtime, "docker");
        assert_eq!(config.log_encoding, LogEncoding::Utf8);
        assert_eq!(
            config.roots.container_experiment_base,
            PathBuf::from("/experiment")
        );
        assert!(config.default_timeout_hours.is_none());
    }

    #[test]
    fn yaml_config_reads_encoding_and_runtime() {
        let config = HarnessConfig::from_yaml_str(
            r#"
roots:
  benchmark: /b
  experiments: /e
  logs: /l
  artifacts: /a
  results: /r
  container_experiment_base: /exp
container_runtime: podman
default_timeout_hours: 0.5
log_encoding: iso-8859-1
"#,
        )
        .expect("config");
        assert_eq!(config.container_runtime, "podman");
        assert_eq!(config.log_encoding, LogEncoding::Latin1);
        assert_eq!(config.default_timeout_hours, Some(0.5));
    }

    #[test]
    fn relative_roots_are_rejected() {
        let err = HarnessConfig::from_yaml_str(
            r#"
roots:
  benchmark: benchmark
  experiments: /e
  logs: /l
  artifacts: /a
  results: /r
"#,
        )
        .expect_err("relative root");
        assert!(err.to_string().contains("benchmark"), "{}", err);
    }

    #[test]
    fn missing_root_is_a_parse_error() {
        let err = HarnessConfig::from_yaml_str("roots:\n  benchmark: /b\n").expect_err("missing");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
