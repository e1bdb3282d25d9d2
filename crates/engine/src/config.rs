use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Engine-wide tunables. Per-host timing lives with the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Characters kept in a message preview
    pub preview_chars: usize,
    pub dedup: DedupConfig,
    pub scheduler: SchedulerConfig,
    pub scroll: ScrollConfig,
    pub highlight: HighlightConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preview_chars: 120,
            dedup: DedupConfig::default(),
            scheduler: SchedulerConfig::default(),
            scroll: ScrollConfig::default(),
            highlight: HighlightConfig::default(),
        }
    }
}

/// Near-duplicate suppression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Tree edges between two elements still considered "the same place"
    pub max_hops: usize,
    /// Leading characters compared for near-identical content
    pub prefix_chars: usize,
    /// Width of a content length class
    pub length_bucket: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            prefix_chars: 50,
            length_bucket: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause after a context teardown before priming starts again
    pub quiet_period_ms: u64,
    /// Streaming checks before a scan is forced anyway
    pub max_streaming_checks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 500,
            max_streaming_checks: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Where the target lands, as a fraction of the container height
    pub viewport_offset_ratio: f64,
    pub base_duration_ms: u64,
    pub max_extra_duration_ms: u64,
    /// Extra milliseconds per pixel travelled
    pub ms_per_px: f64,
    /// Distance from the intended position that still counts as arrived
    pub settle_tolerance_px: f64,
    pub retry_duration_ms: u64,
    /// Scrollable slack a container needs to count as scrollable
    pub min_slack_px: f64,
    pub frame_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            viewport_offset_ratio: 0.15,
            base_duration_ms: 320,
            max_extra_duration_ms: 580,
            ms_per_px: 0.25,
            settle_tolerance_px: 90.0,
            retry_duration_ms: 240,
            min_slack_px: 50.0,
            frame_ms: 16,
        }
    }
}

impl ScrollConfig {
    /// 320ms plus up to 580ms more for long distances.
    pub fn duration_for(&self, distance_px: f64) -> Duration {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let extra = (distance_px.abs() * self.ms_per_px) as u64;
        Duration::from_millis(self.base_duration_ms + extra.min(self.max_extra_duration_ms))
    }

    pub fn frame(&self) -> Duration {
        Duration::from_millis(self.frame_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub fade_after_ms: u64,
    pub reset_after_ms: u64,
    pub color: String,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            fade_after_ms: 600,
            reset_after_ms: 1700,
            color: "rgba(255, 200, 0, 0.35)".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate().map_err(EngineError::Config)?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.preview_chars == 0 {
            return Err("preview_chars must be > 0".to_string());
        }
        if self.dedup.length_bucket == 0 {
            return Err("dedup.length_bucket must be > 0".to_string());
        }
        if self.dedup.prefix_chars == 0 {
            return Err("dedup.prefix_chars must be > 0".to_string());
        }
        if self.scheduler.max_streaming_checks == 0 {
            return Err("scheduler.max_streaming_checks must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.scroll.viewport_offset_ratio) {
            return Err(format!(
                "scroll.viewport_offset_ratio ({}) must be within 0..=1",
                self.scroll.viewport_offset_ratio
            ));
        }
        if self.scroll.settle_tolerance_px < 0.0 || self.scroll.min_slack_px < 0.0 {
            return Err("scroll pixel thresholds cannot be negative".to_string());
        }
        if self.highlight.fade_after_ms > self.highlight.reset_after_ms {
            return Err(format!(
                "highlight.fade_after_ms ({}) cannot exceed highlight.reset_after_ms ({})",
                self.highlight.fade_after_ms, self.highlight.reset_after_ms
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            preview_chars = 80

            [dedup]
            max_hops = 5
            "#,
        )
        .expect("parse");
        assert_eq!(config.preview_chars, 80);
        assert_eq!(config.dedup.max_hops, 5);
        assert_eq!(config.dedup.prefix_chars, 50);
        assert_eq!(config.scroll, ScrollConfig::default());
    }

    #[test]
    fn rejects_inverted_highlight_timing() {
        let err = EngineConfig::from_toml_str(
            "[highlight]\nfade_after_ms = 2000\nreset_after_ms = 1000\n",
        )
        .expect_err("invalid");
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn scroll_duration_grows_with_distance_up_to_cap() {
        let scroll = ScrollConfig::default();
        assert_eq!(scroll.duration_for(0.0), Duration::from_millis(320));
        assert_eq!(scroll.duration_for(400.0), Duration::from_millis(420));
        assert_eq!(scroll.duration_for(100_000.0), Duration::from_millis(900));
    }
}
