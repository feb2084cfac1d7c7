use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::events::IssueLimits;
use crate::metrics::NodeBatching;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    #[serde(default = "default_issues_interval_ms")]
    pub issues_interval_ms: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_max_issues")]
    pub max_issues: usize,
    #[serde(default = "default_max_critical_issues")]
    pub max_critical_issues: usize,
    #[serde(default = "default_event_max_age_hours")]
    pub event_max_age_hours: i64,
    #[serde(default = "default_node_batch_threshold")]
    pub node_batch_threshold: usize,
    #[serde(default = "default_node_batch_size")]
    pub node_batch_size: usize,
    #[serde(default = "default_node_batch_pause_ms")]
    pub node_batch_pause_ms: u64,
    #[serde(default = "default_client_max_attempts")]
    pub client_max_attempts: u32,
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metrics_interval_ms: default_metrics_interval_ms(),
            issues_interval_ms: default_issues_interval_ms(),
            page_limit: default_page_limit(),
            max_issues: default_max_issues(),
            max_critical_issues: default_max_critical_issues(),
            event_max_age_hours: default_event_max_age_hours(),
            node_batch_threshold: default_node_batch_threshold(),
            node_batch_size: default_node_batch_size(),
            node_batch_pause_ms: default_node_batch_pause_ms(),
            client_max_attempts: default_client_max_attempts(),
            history_depth: default_history_depth(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<(Self, Option<String>)> {
        let Some(path) = discover_config_path() else {
            return Ok((Self::default(), None));
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let settings: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok((settings, Some(path.display().to_string())))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1_000))
    }

    pub fn issues_interval(&self) -> Duration {
        Duration::from_millis(self.issues_interval_ms.max(1_000))
    }

    pub fn issue_limits(&self) -> IssueLimits {
        IssueLimits {
            max_age_hours: self.event_max_age_hours.max(1),
            max_issues: self.max_issues.max(1),
            max_critical: self.max_critical_issues.max(1),
        }
    }

    pub fn node_batching(&self) -> NodeBatching {
        NodeBatching {
            threshold: self.node_batch_threshold.max(1),
            batch_size: self.node_batch_size.max(1),
            pause: Duration::from_millis(self.node_batch_pause_ms),
        }
    }
}

fn default_metrics_interval_ms() -> u64 {
    60_000
}

fn default_issues_interval_ms() -> u64 {
    120_000
}

fn default_page_limit() -> u32 {
    500
}

fn default_max_issues() -> usize {
    50
}

fn default_max_critical_issues() -> usize {
    25
}

fn default_event_max_age_hours() -> i64 {
    24
}

fn default_node_batch_threshold() -> usize {
    50
}

fn default_node_batch_size() -> usize {
    25
}

fn default_node_batch_pause_ms() -> u64 {
    150
}

fn default_client_max_attempts() -> u32 {
    3
}

fn default_history_depth() -> usize {
    12
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("BELUGA_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("beluga.yaml"),
        PathBuf::from("beluga.yml"),
        PathBuf::from(".beluga.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/beluga/config.yaml"),
            PathBuf::from(&home).join(".config/beluga/config.yml"),
            PathBuf::from(&home).join(".beluga.yaml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::Settings;
    use std::time::Duration;

    #[test]
    fn defaults_cover_every_knob() {
        let settings = Settings::default();
        assert_eq!(settings.metrics_interval(), Duration::from_secs(60));
        assert_eq!(settings.issues_interval(), Duration::from_secs(120));
        assert_eq!(settings.page_limit, 500);
        assert_eq!(settings.client_max_attempts, 3);
        assert_eq!(settings.history_depth, 12);

        let limits = settings.issue_limits();
        assert_eq!(limits.max_age_hours, 24);
        assert_eq!(limits.max_issues, 50);
        assert_eq!(limits.max_critical, 25);

        let batching = settings.node_batching();
        assert_eq!(batching.threshold, 50);
        assert_eq!(batching.batch_size, 25);
        assert_eq!(batching.pause, Duration::from_millis(150));
    }

    #[test]
    fn partial_files_keep_the_remaining_defaults() {
        let settings: Settings = serde_yaml::from_str(
            r#"
metrics_interval_ms: 15000
max_issues: 10
"#,
        )
        .expect("partial config parses");

        assert_eq!(settings.metrics_interval(), Duration::from_secs(15));
        assert_eq!(settings.issue_limits().max_issues, 10);
        assert_eq!(settings.issues_interval(), Duration::from_secs(120));
        assert_eq!(settings.page_limit, 500);
    }

    #[test]
    fn intervals_have_a_floor() {
        let settings: Settings =
            serde_yaml::from_str("metrics_interval_ms: 1").expect("config parses");
        assert_eq!(settings.metrics_interval(), Duration::from_secs(1));
    }
}
