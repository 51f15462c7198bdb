use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchStats {
    pub generated: u64,
    pub enumerations: u64,
    pub plausible: u64,
    pub non_compilable: u64,
    pub size: u64,
}

/// Timestamps are kept as the strings the tool or harness printed; the
/// durations are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeStats {
    pub timestamp_start: Option<String>,
    pub timestamp_end: Option<String>,
    pub total_build: f64,
    pub total_validation: f64,
    pub timestamp_compilation: Option<String>,
    pub timestamp_validation: Option<String>,
    pub timestamp_plausible: Option<String>,
}

/// Statistics for one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub patch_stats: PatchStats,
    pub time_stats: TimeStats,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_plausible(&self) -> bool {
        self.patch_stats.plausible > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stats_serialize_with_stable_group_names() {
        let mut stats = RunStats::new();
        stats.patch_stats.generated = 3;
        stats.time_stats.timestamp_start = Some("2026-10-19T10:00:00Z".to_string());
        let value = serde_json::to_value(&stats).expect("json");
        assert_eq!(value.pointer("/patch_stats/generated"), Some(&json!(3)));
        assert_eq!(value.pointer("/patch_stats/plausible"), Some(&json!(0)));
        assert_eq!(
            value.pointer("/time_stats/timestamp_start"),
            Some(&json!("2026-10-19T10:00:00Z"))
        );
        assert_eq!(value.pointer("/time_stats/timestamp_plausible"), Some(&json!(null)));
        assert!(!stats.has_plausible());
    }
}
