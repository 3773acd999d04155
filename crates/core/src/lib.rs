//! Core library for Palette Pulse.
//!
//! Builds a perceptual color palette from extracted artwork colors and live
//! audio analysis, then publishes it as named variables under a per-frame
//! write budget. Each module owns one stage: color space math, harmony
//! rules, shadow/highlight derivation, music modulation, device tiers, the
//! processing pipeline, the batch scheduler and the palette applier.

pub mod analysis;
pub mod apply;
pub mod color;
pub mod config;
pub mod device;
pub mod error;
pub mod harmony;
pub mod modulation;
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod shading;

pub use analysis::{AnalysisEngine, AnalysisSummary, AudioAnalysisFrame};
pub use apply::PaletteApplier;
pub use color::{
    fit_to_gamut, from_cylindrical, interpolate, perceptual_distance, to_cylindrical,
    to_perceptual, to_rgb, GamutFit, Lch, PerceptualColor, RgbColor,
};
pub use config::{
    DeviceConfig, EngineConfig, ModulationConfig, PipelineConfig, SchedulerConfig, ShadingConfig,
};
pub use device::{
    classify, probe, try_probe, CapabilityProbe, DeviceCapabilityProfile, GpuSignal, HostSignals,
    ProcessingDepth, ProfileOrigin, ProfileStore, QualityTier, StaticProbe, StressMonitor,
    SystemProbe,
};
pub use error::{PaletteError, Result};
pub use harmony::{generate, HarmonyRule, HarmonySet};
pub use modulation::{modulate, pulse_intensity, FrameSmoother, MusicColorModulator};
pub use pipeline::{
    ColorResult, ColorToken, FailureSignal, FallbackKind, PaletteProcessingPipeline,
    PipelineOutcome, RunDiagnostics, RunState, SourceExtraction,
};
pub use render::{MemorySurface, VariableSurface};
pub use scheduler::{
    FlushReport, FrameClock, FrameTick, SchedulerStats, VariableBatchScheduler, VariableWrite,
    WritePriority,
};
pub use shading::{ShadowHighlightGenerator, ShadowHighlightPair};
