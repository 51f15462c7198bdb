use crate::digest::ContentHash;
use crate::error::{BugMetadataError, LayoutError};
use crate::layout::BugCoordinates;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// One suspicious location from fault localization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizationEntry {
    /// `package.Class#method(args)`, nested classes joined with `$`.
    pub location: String,
    pub score: f64,
    #[serde(default)]
    pub line_numbers: Vec<u32>,
}

/// Bug description consumed by drivers when building their command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugMetadata {
    pub benchmark: String,
    pub subject: String,
    pub bug_id: String,
    pub source_directory: String,
    pub test_directory: String,
    pub class_directory: String,
    pub test_class_directory: String,
    pub failing_tests: Vec<String>,
    #[serde(default)]
    pub passing_tests: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_java_version")]
    pub java_version: String,
    #[serde(default)]
    pub localization: Vec<LocalizationEntry>,
}

fn default_java_version() -> String {
    "8".to_string()
}

impl BugMetadata {
    pub fn load(path: &Path) -> Result<Self, BugMetadataError> {
        let data = fs::read_to_string(path).map_err(|source| BugMetadataError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, BugMetadataError> {
        let bug: BugMetadata = serde_json::from_str(data)?;
        bug.validate()?;
        Ok(bug)
    }

    fn validate(&self) -> Result<(), BugMetadataError> {
        for (name, value) in [
            ("benchmark", &self.benchmark),
            ("subject", &self.subject),
            ("bug_id", &self.bug_id),
            ("source_directory", &self.source_directory),
            ("class_directory", &self.class_directory),
        ] {
            if value.trim().is_empty() {
                return Err(BugMetadataError::EmptyField(name));
            }
        }
        if self.failing_tests.is_empty() {
            return Err(BugMetadataError::EmptyField("failing_tests"));
        }
        Ok(())
    }

    pub fn coordinates(&self) -> Result<BugCoordinates, LayoutError> {
        BugCoordinates::new(&self.benchmark, &self.subject, &self.bug_id)
    }
}

/// Per-run settings chosen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub task_identifier: String,
    #[serde(default)]
    pub tag: String,
    pub timeout_hours: f64,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl RunConfig {
    pub fn new(task_identifier: impl Into<String>, timeout_hours: f64) -> Self {
        Self {
            task_identifier: task_identifier.into(),
            tag: String::new(),
            timeout_hours,
            container_id: None,
            env: BTreeMap::new(),
        }
    }

    /// The tool's own budget, as passed to its `timeout` wrapper. The
    /// supervisor around the process waits a grace period longer.
    pub fn time_budget(&self) -> Option<Duration> {
        if self.timeout_hours.is_finite() && self.timeout_hours > 0.0 {
            Some(Duration::from_secs_f64(self.timeout_hours * 3600.0))
        } else {
            None
        }
    }

    /// Digest of everything that distinguishes this run's configuration.
    /// The container id is excluded: it names where, not what.
    pub fn content_hash(&self, tool_name: &str, bug: &BugMetadata) -> ContentHash {
        ContentHash::of_json(&json!({
            "tool": tool_name,
            "benchmark": bug.benchmark,
            "subject": bug.subject,
            "bug_id": bug.bug_id,
            "task_identifier": self.task_identifier,
            "tag": self.tag,
            "timeout_hours": self.timeout_hours,
            "env": self.env,
        }))
    }
}

#[cfg(test)]
pub(crate) fn sample_bug() -> BugMetadata {
    BugMetadata::from_json_str(
        r#"{
            "benchmark": "defects4j",
            "subject": "Lang",
            "bug_id": "1",
            "source_directory": "src/main/java",
            "test_directory": "src/test/java",
            "class_directory": "target/classes",
            "test_class_directory": "target/tests",
            "failing_tests": ["org.apache.commons.lang3.math.NumberUtilsTest"],
            "passing_tests": ["org.apache.commons.lang3.StringUtilsTest"],
            "dependencies": ["lib/easymock.jar"],
            "java_version": "8",
            "localization": [
                {"location": "org.apache.commons.lang3.math.NumberUtils#createNumber(java.lang.String)", "score": 0.9, "line_numbers": [471, 472]}
            ]
        }"#,
    )
    .expect("sample bug")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_key_fails_at_load() {
        let err = BugMetadata::from_json_str(
            r#"{"benchmark": "defects4j", "subject": "Lang", "bug_id": "1"}"#,
        )
        .expect_err("missing keys");
        assert!(matches!(err, BugMetadataError::Parse(_)));
        assert!(err.to_string().contains("source_directory"), "{}", err);
    }

    #[test]
    fn empty_failing_tests_are_rejected() {
        let mut value = serde_json::to_value(sample_bug()).expect("value");
        value["failing_tests"] = json!([]);
        let err = BugMetadata::from_json_str(&value.to_string()).expect_err("empty");
        assert!(matches!(err, BugMetadataError::EmptyField("failing_tests")));
    }

    #[test]
    fn optional_keys_take_defaults() {
        let bug = sample_bug();
        assert_eq!(bug.localization.len(), 1);
        assert_eq!(bug.localization[0].line_numbers, vec![471, 472]);
        let mut value = serde_json::to_value(&bug).expect("value");
        let obj = value.as_object_mut().expect("object");
        obj.remove("java_version");
        obj.remove("localization");
        let bug = BugMetadata::from_json_str(&value.to_string()).expect("defaults");
        assert_eq!(bug.java_version, "8");
        assert!(bug.localization.is_empty());
    }

    #[test]
    fn content_hash_tracks_configuration_not_container() {
        let bug = sample_bug();
        let base = RunConfig::new("arja-e", 1.0);
        let mut same_elsewhere = base.clone();
        same_elsewhere.container_id = Some("c0ffee".to_string());
        let mut longer = base.clone();
        longer.timeout_hours = 2.0;
        assert_eq!(
            base.content_hash("arja_e", &bug),
            same_elsewhere.content_hash("arja_e", &bug)
        );
        assert_ne!(
            base.content_hash("arja_e", &bug),
            longer.content_hash("arja_e", &bug)
        );
        assert_ne!(
            base.content_hash("arja_e", &bug),
            base.content_hash("cardumen", &bug)
        );
    }

    #[test]
    fn time_budget_converts_hours() {
        assert_eq!(
            RunConfig::new("t", 0.5).time_budget(),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(RunConfig::new("t", 0.0).time_budget(), None);
    }
}
