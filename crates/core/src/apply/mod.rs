use std::collections::{BTreeMap, HashMap};

use crate::{
    pipeline::{ColorResult, PipelineOutcome},
    render::VariableSurface,
    scheduler::{FlushReport, FrameTick, VariableBatchScheduler, WritePriority},
    EngineConfig, QualityTier,
};

/// Suffix of the variable carrying the comma separated channel triple.
pub const RGB_SUFFIX: &str = "-rgb";
/// Name (after the prefix) of the critical beat-pulse variable.
pub const PULSE_VARIABLE: &str = "music-intensity";

/// The only writer of palette variables. Flattens each [`ColorResult`] into
/// `{prefix}-{token}` (hex) and `{prefix}-{token}-rgb` (triple) pairs and
/// hands them to the scheduler.
#[derive(Debug)]
pub struct PaletteApplier<S: VariableSurface> {
    scheduler: VariableBatchScheduler<S>,
    prefix: String,
    last_values: HashMap<String, String>,
}

impl<S: VariableSurface> PaletteApplier<S> {
    pub fn new(surface: S, config: &EngineConfig, tier: QualityTier) -> Self {
        Self {
            scheduler: VariableBatchScheduler::new(surface, config.scheduler.clone(), tier),
            prefix: config.pipeline.variable_prefix.clone(),
            last_values: HashMap::new(),
        }
    }

    pub fn scheduler(&self) -> &VariableBatchScheduler<S> {
        &self.scheduler
    }

    pub fn into_surface(self) -> S {
        self.scheduler.into_surface()
    }

    pub fn set_tier(&mut self, tier: QualityTier) {
        self.scheduler.set_tier(tier);
    }

    fn name(&self, token: &str) -> String {
        format!("{}-{}", self.prefix, token)
    }

    /// Flat variable map for `result`.
    pub fn variable_map(&self, result: &ColorResult) -> BTreeMap<String, String> {
        result
            .tokens
            .iter()
            .flat_map(|(token, color)| {
                let name = self.name(token);
                [
                    (format!("{name}{RGB_SUFFIX}"), color.rgb.clone()),
                    (name, color.hex.clone()),
                ]
            })
            .collect()
    }

    /// Queues every variable of `result` whose value changed since the last
    /// application. Returns the number of writes queued.
    pub fn apply(&mut self, result: &ColorResult) -> usize {
        let mut queued = 0;
        for (name, value) in self.variable_map(result) {
            if self.last_values.get(&name) == Some(&value) {
                continue;
            }
            self.last_values.insert(name.clone(), value.clone());
            self.scheduler.enqueue(name, value, WritePriority::Batched);
            queued += 1;
        }
        tracing::debug!(source = %result.source_id, queued, "palette queued");
        queued
    }

    /// Applies whatever palette the outcome carries, fallback included.
    pub fn apply_outcome(&mut self, outcome: &PipelineOutcome) -> usize {
        self.apply(outcome.result())
    }

    /// Writes the beat-pulse scalar immediately.
    pub fn pulse(&mut self, intensity: f64) {
        let value = if intensity.is_finite() {
            intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let name = self.name(PULSE_VARIABLE);
        let value = format!("{value:.3}");
        self.last_values.insert(name.clone(), value.clone());
        self.scheduler.enqueue(name, value, WritePriority::Critical);
    }

    pub fn on_frame(&mut self, tick: FrameTick) -> FlushReport {
        self.scheduler.on_frame(tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::AudioAnalysisFrame,
        device::DeviceCapabilityProfile,
        pipeline::{PaletteProcessingPipeline, SourceExtraction},
        render::MemorySurface,
        scheduler::FrameClock,
    };

    fn result(vibrant: &str) -> ColorResult {
        let pipeline = PaletteProcessingPipeline::default();
        pipeline
            .process(
                &SourceExtraction::new("t", [("vibrant", vibrant)]),
                &AudioAnalysisFrame::neutral(),
                &DeviceCapabilityProfile::default(),
            )
            .unwrap()
            .result()
            .as_ref()
            .clone()
    }

    fn balanced_applier() -> PaletteApplier<MemorySurface> {
        PaletteApplier::new(MemorySurface::new(), &EngineConfig::default(), QualityTier::Balanced)
    }

    fn drain(applier: &mut PaletteApplier<MemorySurface>) {
        let mut clock = FrameClock::new();
        while !applier.scheduler().is_idle() {
            applier.on_frame(clock.advance(1.0 / 60.0));
        }
    }

    #[test]
    fn flattens_hex_and_rgb_variables() {
        let applier = balanced_applier();
        let palette = result("#c6a0f6");
        let map = applier.variable_map(&palette);

        assert_eq!(map.len(), palette.tokens.len() * 2);
        assert_eq!(map["--palette-base"], "#c6a0f6");
        assert_eq!(map["--palette-base-rgb"], "198,160,246");
    }

    #[test]
    fn applies_through_scheduler_and_skips_unchanged_values() {
        let mut applier = balanced_applier();
        let palette = result("#c6a0f6");
        let queued = applier.apply(&palette);
        assert_eq!(queued, palette.tokens.len() * 2);
        assert_eq!(applier.scheduler().surface().total_writes(), 0);

        drain(&mut applier);
        assert_eq!(applier.scheduler().surface().get("--palette-base"), Some("#c6a0f6"));
        assert_eq!(applier.apply(&palette), 0);

        let next = result("#40a02b");
        assert!(applier.apply(&next) > 0);
        drain(&mut applier);
        assert_eq!(applier.scheduler().surface().get("--palette-base"), Some("#40a02b"));
    }

    #[test]
    fn pulse_is_written_immediately() {
        let mut applier = balanced_applier();
        applier.pulse(0.75);
        applier.pulse(f64::NAN);
        let surface = applier.into_surface();
        assert_eq!(surface.get("--palette-music-intensity"), Some("0.000"));
        assert_eq!(surface.write_count("--palette-music-intensity"), 2);
    }
}
