use std::sync::Arc;

use palette_pulse_core::{
    AudioAnalysisFrame, DeviceCapabilityProfile, DeviceConfig, EngineConfig, FallbackKind,
    FrameClock, GpuSignal, HostSignals, MemorySurface, PaletteApplier, PaletteProcessingPipeline,
    PipelineOutcome, ProfileStore, QualityTier, RgbColor, SourceExtraction, StaticProbe,
    StressMonitor,
};

fn drain(applier: &mut PaletteApplier<MemorySurface>, clock: &mut FrameClock) -> usize {
    let mut frames = 0;
    while !applier.scheduler().is_idle() {
        let report = applier.on_frame(clock.advance(1.0 / 60.0));
        assert!(!report.skipped);
        frames += 1;
        assert!(frames < 100, "scheduler never drained");
    }
    frames
}

#[test]
fn artwork_change_reaches_the_surface() {
    let config = EngineConfig::default();
    let store = ProfileStore::new(DeviceCapabilityProfile::default(), DeviceConfig::default());
    let profile = store.reprobe(Arc::new(StaticProbe(HostSignals {
        memory_gb: Some(16.0),
        cores: Some(12),
        gpu: GpuSignal::Present,
    })));
    assert_eq!(profile.tier, QualityTier::High);

    let pipeline = PaletteProcessingPipeline::new(config.clone());
    let extraction = SourceExtraction::new(
        "spotify:track:lavender",
        [("vibrant", "#c6a0f6"), ("darkMuted", "#1e1e2e")],
    );
    let frame = AudioAnalysisFrame::new(0.8, 0.6, 0.7, 0.9);
    let outcome = pipeline.process(&extraction, &frame, &profile).unwrap();
    assert!(matches!(outcome, PipelineOutcome::Published { .. }));

    let mut applier = PaletteApplier::new(MemorySurface::new(), &config, profile.tier);
    let queued = applier.apply_outcome(&outcome);
    applier.pulse(outcome.result().intensity);

    let surface_before = applier.scheduler().surface().total_writes();
    assert_eq!(surface_before, 1, "only the pulse is written before a frame");

    let mut clock = FrameClock::new();
    drain(&mut applier, &mut clock);

    let surface = applier.into_surface();
    assert_eq!(surface.total_writes(), queued + 1);
    for token in ["accent", "base", "shadow", "highlight", "primary"] {
        let hex = surface
            .get(&format!("--palette-{token}"))
            .unwrap_or_else(|| panic!("missing {token}"));
        let rgb = surface.get(&format!("--palette-{token}-rgb")).unwrap();
        let parsed: RgbColor = hex.parse().unwrap();
        assert_eq!(parsed.to_rgb_triple(), rgb);
    }
    assert_eq!(surface.get("--palette-dark-muted"), Some("#1e1e2e"));
}

#[test]
fn repeated_inputs_are_cached_and_cause_no_writes() {
    let config = EngineConfig::default();
    let pipeline = PaletteProcessingPipeline::new(config.clone());
    let profile = DeviceCapabilityProfile::default();
    let extraction = SourceExtraction::new("track-1", [("vibrant", "#40a02b")]);
    let frame = AudioAnalysisFrame::neutral();

    let mut applier = PaletteApplier::new(MemorySurface::new(), &config, profile.tier);
    let mut clock = FrameClock::new();

    let first = pipeline.process(&extraction, &frame, &profile).unwrap();
    applier.apply_outcome(&first);
    drain(&mut applier, &mut clock);
    let writes = applier.scheduler().surface().total_writes();

    let second = pipeline.process(&extraction, &frame, &profile).unwrap();
    assert!(matches!(second, PipelineOutcome::Cached(_)));
    assert_eq!(second.result(), first.result());
    assert_eq!(applier.apply_outcome(&second), 0);
    drain(&mut applier, &mut clock);
    assert_eq!(applier.scheduler().surface().total_writes(), writes);
}

#[test]
fn broken_extraction_keeps_last_known_good_palette() {
    let config = EngineConfig::default();
    let pipeline = PaletteProcessingPipeline::new(config.clone());
    let profile = DeviceCapabilityProfile::default();
    let frame = AudioAnalysisFrame::neutral();

    let good = pipeline
        .process(&SourceExtraction::new("good", [("vibrant", "#df8e1d")]), &frame, &profile)
        .unwrap();

    let malformed = SourceExtraction::new("malformed", [("vibrant", "not-a-color")]);
    match pipeline.process(&malformed, &frame, &profile).unwrap() {
        PipelineOutcome::Published { result, diagnostics } => {
            assert_eq!(diagnostics.invalid_inputs, vec!["vibrant".to_string()]);
            assert_eq!(result.token("base").unwrap().hex, "#808080");
        }
        other => panic!("expected neutral substitution, got {other:?}"),
    }

    let broken = SourceExtraction::new("broken", Vec::<(String, String)>::new());
    let outcome = pipeline.process(&broken, &frame, &profile).unwrap();
    match &outcome {
        PipelineOutcome::Failed { result, signal } => {
            assert_eq!(signal.source_id, "broken");
            assert_eq!(signal.fallback, FallbackKind::LastKnownGood);
            assert_eq!(result.source_id, "malformed");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let mut applier = PaletteApplier::new(MemorySurface::new(), &config, profile.tier);
    applier.apply_outcome(&outcome);
    drain(&mut applier, &mut FrameClock::new());
    assert_eq!(
        applier.scheduler().surface().get("--palette-base"),
        Some("#808080")
    );
    assert_ne!(good.result().token("base").unwrap().hex, "#808080");
}

#[test]
fn sustained_stress_lowers_the_tier_and_the_write_budget() {
    let config = EngineConfig::default();
    let store = ProfileStore::new(DeviceCapabilityProfile::default(), config.device.clone());
    let mut monitor = StressMonitor::new();

    let mut changed = None;
    for _ in 0..config.device.downgrade_after {
        changed = changed.or(monitor.record(&store, 0.05));
    }
    assert_eq!(changed, Some(QualityTier::Low));
    assert_eq!(store.tier(), QualityTier::Low);

    let mut applier = PaletteApplier::new(MemorySurface::new(), &config, QualityTier::Balanced);
    let balanced_budget = applier.scheduler().budget();
    applier.set_tier(store.tier());
    assert!(applier.scheduler().budget() < balanced_budget);

    let pipeline = PaletteProcessingPipeline::new(config);
    let outcome = pipeline
        .process(
            &SourceExtraction::new("low", [("vibrant", "#c6a0f6")]),
            &AudioAnalysisFrame::neutral(),
            &store.current(),
        )
        .unwrap();
    assert_eq!(outcome.result().tier, QualityTier::Low);
}
