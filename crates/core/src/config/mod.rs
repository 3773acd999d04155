use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{HarmonyRule, QualityTier, Result};

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    pub shading: ShadingConfig,
    pub modulation: ModulationConfig,
    pub scheduler: SchedulerConfig,
    pub device: DeviceConfig,
}

impl EngineConfig {
    /// Parses a JSON document. Missing sections and fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Settings for the palette processing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rule: HarmonyRule,
    /// Prefix prepended to every emitted variable name.
    pub variable_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rule: HarmonyRule::Analogous,
            variable_prefix: "--palette".to_string(),
        }
    }
}

/// Lightness offsets for shadow/highlight derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingConfig {
    pub k: f64,
    /// Used instead of `k` on Low tier devices.
    pub low_tier_k: f64,
}

impl Default for ShadingConfig {
    fn default() -> Self {
        Self {
            k: 0.35,
            low_tier_k: 0.25,
        }
    }
}

impl ShadingConfig {
    pub fn k_for(&self, tier: QualityTier) -> f64 {
        match tier {
            QualityTier::Low => self.low_tier_k,
            QualityTier::Balanced | QualityTier::High => self.k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationConfig {
    /// Post-hoc chroma multiplier applied after music modulation.
    pub contrast_boost: f64,
    /// Weight of the newest frame in the moving average, in (0, 1].
    pub smoothing_factor: f64,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        Self {
            contrast_boost: 1.0,
            smoothing_factor: 0.35,
        }
    }
}

/// Frame budgets and cost model for the variable batch scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub low_budget_ms: f64,
    pub balanced_budget_ms: f64,
    pub high_budget_ms: f64,
    /// Estimated cost of a single variable write.
    pub write_cost_us: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            low_budget_ms: 2.0,
            balanced_budget_ms: 4.0,
            high_budget_ms: 6.0,
            write_cost_us: 20,
        }
    }
}

impl SchedulerConfig {
    pub fn budget_for(&self, tier: QualityTier) -> Duration {
        let ms = match tier {
            QualityTier::Low => self.low_budget_ms,
            QualityTier::Balanced => self.balanced_budget_ms,
            QualityTier::High => self.high_budget_ms,
        };
        Duration::from_micros((ms.max(0.0) * 1_000.0).round() as u64)
    }

    pub fn write_cost(&self) -> Duration {
        Duration::from_micros(self.write_cost_us)
    }
}

/// Classification thresholds and probe limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub min_memory_gb: f64,
    pub min_cores: usize,
    pub high_memory_gb: f64,
    pub high_cores: usize,
    pub probe_timeout_ms: u64,
    /// Benchmark score (0..=1) at or above which a sample counts as strong.
    pub stress_upgrade_score: f64,
    /// Benchmark score below which a sample counts as weak.
    pub stress_downgrade_score: f64,
    pub upgrade_after: u32,
    pub downgrade_after: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            min_memory_gb: 4.0,
            min_cores: 4,
            high_memory_gb: 8.0,
            high_cores: 8,
            probe_timeout_ms: 250,
            stress_upgrade_score: 0.75,
            stress_downgrade_score: 0.25,
            upgrade_after: 3,
            downgrade_after: 10,
        }
    }
}

impl DeviceConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "pipeline": { "rule": "triadic" }, "scheduler": { "write_cost_us": 50 } }"#,
        )
        .unwrap();

        assert_eq!(config.pipeline.rule, HarmonyRule::Triadic);
        assert_eq!(config.pipeline.variable_prefix, "--palette");
        assert_eq!(config.scheduler.write_cost_us, 50);
        assert_eq!(config.scheduler.balanced_budget_ms, 4.0);
        assert_eq!(config.modulation.contrast_boost, 1.0);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(EngineConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn budgets_follow_tier() {
        let scheduler = SchedulerConfig::default();
        assert!(scheduler.budget_for(QualityTier::Low) < scheduler.budget_for(QualityTier::High));
        assert_eq!(
            scheduler.budget_for(QualityTier::Balanced),
            Duration::from_millis(4)
        );
    }
}
