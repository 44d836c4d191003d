//! Planner defaults

use catstats_core::{StatType, TimeWindow, DEFAULT_LIMIT, MAX_LIMIT};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Defaults the planner substitutes for missing request options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Sampling aggregation when `statType` is absent
    #[serde(default)]
    pub default_stat_type: StatType,
    /// Sampling interval when `samplingInterval` is absent
    #[serde(default = "default_sampling_interval_secs")]
    pub default_sampling_interval_secs: u32,
    /// Window for metrics fetched through the primary-store fallback
    #[serde(default = "default_fallback_window_hours")]
    pub fallback_window_hours: u32,
    /// Window for metrics queries without a caller time range
    #[serde(default = "default_metrics_window_minutes")]
    pub metrics_window_minutes: u32,
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
    #[serde(default = "default_limit")]
    pub default_limit: u32,
}

fn default_sampling_interval_secs() -> u32 {
    60
}

fn default_fallback_window_hours() -> u32 {
    7 * 24
}

fn default_metrics_window_minutes() -> u32 {
    60
}

fn default_max_limit() -> u32 {
    MAX_LIMIT
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_stat_type: StatType::default(),
            default_sampling_interval_secs: default_sampling_interval_secs(),
            fallback_window_hours: default_fallback_window_hours(),
            metrics_window_minutes: default_metrics_window_minutes(),
            max_limit: default_max_limit(),
            default_limit: default_limit(),
        }
    }
}

impl PlannerConfig {
    /// Default window for the primary-store fallback of a metrics expand
    pub fn fallback_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::ending_at(now, Duration::hours(i64::from(self.fallback_window_hours)))
    }

    /// Default window for a metrics query
    pub fn metrics_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::ending_at(now, Duration::minutes(i64::from(self.metrics_window_minutes)))
    }
}
