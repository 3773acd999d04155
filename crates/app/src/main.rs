use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand, ValueEnum};
use palette_pulse_core::{
    AnalysisEngine, AudioAnalysisFrame, DeviceCapabilityProfile, EngineConfig, FrameClock,
    GpuSignal, HarmonyRule, MemorySurface, PaletteApplier, PaletteError, PaletteProcessingPipeline,
    PipelineOutcome, ProfileOrigin, ProfileStore, QualityTier, SourceExtraction, SystemProbe,
};
use tracing_subscriber::EnvFilter;

/// Upper bound on simulated frames when draining the scheduler.
const MAX_DRAIN_FRAMES: usize = 600;
const FRAME_SECONDS: f64 = 1.0 / 60.0;

fn main() -> palette_pulse_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Palette {
            source,
            colors,
            energy,
            valence,
            tempo,
            danceability,
            rule,
            tier,
            gpu,
        } => {
            if let Some(rule) = rule {
                config.pipeline.rule = rule;
            }
            let frame = AudioAnalysisFrame::new(energy, valence, tempo, danceability);
            let profile = resolve_profile(&config, tier, gpu);
            run_palette(config, SourceExtraction::new(source, colors), frame, profile)
        }
        Commands::Probe { gpu } => {
            let profile = resolve_profile(&config, None, gpu);
            println!("{}", serde_json::to_string_pretty(profile.as_ref())?);
            Ok(())
        }
        Commands::Analyze {
            input,
            sample_rate,
            block_size,
        } => run_analyze(&input, sample_rate, block_size),
    }
}

fn resolve_profile(
    config: &EngineConfig,
    tier: Option<TierArg>,
    gpu: GpuArg,
) -> Arc<DeviceCapabilityProfile> {
    let store = ProfileStore::new(DeviceCapabilityProfile::default(), config.device.clone());
    match tier {
        Some(tier) => {
            store.replace(DeviceCapabilityProfile {
                tier: tier.into(),
                origin: ProfileOrigin::Default,
                ..DeviceCapabilityProfile::default()
            });
            store.current()
        }
        None => store.reprobe(Arc::new(SystemProbe { gpu: gpu.into() })),
    }
}

fn run_palette(
    config: EngineConfig,
    extraction: SourceExtraction,
    frame: AudioAnalysisFrame,
    profile: Arc<DeviceCapabilityProfile>,
) -> palette_pulse_core::Result<()> {
    tracing::info!(
        source = %extraction.source_id,
        tier = %profile.tier,
        rule = %config.pipeline.rule,
        "computing palette"
    );

    let pipeline = PaletteProcessingPipeline::new(config.clone());
    let frame = pipeline.smooth_frame(&extraction.source_id, &frame, &profile)?;
    let outcome = pipeline.process(&extraction, &frame, &profile)?;
    if let PipelineOutcome::Failed { signal, .. } = &outcome {
        tracing::warn!(
            reason = %signal.reason,
            fallback = ?signal.fallback,
            "using fallback palette"
        );
    }

    let mut applier = PaletteApplier::new(MemorySurface::new(), &config, profile.tier);
    applier.apply_outcome(&outcome);
    applier.pulse(outcome.result().intensity);

    let mut clock = FrameClock::new();
    let mut frames = 0;
    while !applier.scheduler().is_idle() {
        if frames >= MAX_DRAIN_FRAMES {
            return Err(PaletteError::msg("scheduler did not drain"));
        }
        applier.on_frame(clock.advance(FRAME_SECONDS));
        frames += 1;
    }
    tracing::info!(frames, stats = ?applier.scheduler().stats(), "variables applied");

    let surface = applier.into_surface();
    let variables: BTreeMap<&String, &String> = surface.values().iter().collect();
    println!("{}", serde_json::to_string_pretty(&variables)?);
    Ok(())
}

fn run_analyze(
    input: &Path,
    sample_rate: u32,
    block_size: usize,
) -> palette_pulse_core::Result<()> {
    tracing::info!(?input, sample_rate, block_size, "analysing raw f32 samples");

    let bytes = std::fs::read(input)?;
    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let mut engine = AnalysisEngine::with_sample_rate(sample_rate);
    for block in samples.chunks(block_size.max(2)) {
        if block.len() >= 2 {
            engine.process_block(block)?;
        }
    }

    let frame = engine.latest_frame().copied().unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&frame)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_role_color(raw: &str) -> Result<(String, String), String> {
    let (role, hex) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ROLE=HEX, got `{raw}`"))?;
    Ok((role.to_string(), hex.to_string()))
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Perceptual palette engine driven by artwork and music",
    long_about = None
)]
struct Cli {
    /// JSON configuration file; missing fields use defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute a palette and print the resulting variable map.
    Palette {
        /// Stable identity of the artwork, e.g. a track URI.
        #[arg(long)]
        source: String,
        /// Extracted color as ROLE=HEX, e.g. vibrant=#c6a0f6. Repeatable.
        #[arg(long = "color", value_parser = parse_role_color, required = true)]
        colors: Vec<(String, String)>,
        #[arg(long, default_value_t = 0.5)]
        energy: f64,
        #[arg(long, default_value_t = 0.5)]
        valence: f64,
        #[arg(long, default_value_t = 0.5)]
        tempo: f64,
        #[arg(long, default_value_t = 0.5)]
        danceability: f64,
        /// Harmony rule; overrides the configuration file.
        #[arg(long)]
        rule: Option<HarmonyRule>,
        /// Skip probing and use this tier.
        #[arg(long, value_enum)]
        tier: Option<TierArg>,
        #[arg(long, value_enum, default_value_t = GpuArg::Unknown)]
        gpu: GpuArg,
    },
    /// Probe this machine and print the capability profile.
    Probe {
        #[arg(long, value_enum, default_value_t = GpuArg::Unknown)]
        gpu: GpuArg,
    },
    /// Derive an analysis frame from raw little-endian f32 mono samples.
    Analyze {
        input: PathBuf,
        #[arg(long, default_value_t = 48_000)]
        sample_rate: u32,
        #[arg(long, default_value_t = 1024)]
        block_size: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TierArg {
    Low,
    Balanced,
    High,
}

impl From<TierArg> for QualityTier {
    fn from(value: TierArg) -> Self {
        match value {
            TierArg::Low => QualityTier::Low,
            TierArg::Balanced => QualityTier::Balanced,
            TierArg::High => QualityTier::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GpuArg {
    Present,
    Absent,
    Unknown,
}

impl From<GpuArg> for GpuSignal {
    fn from(value: GpuArg) -> Self {
        match value {
            GpuArg::Present => GpuSignal::Present,
            GpuArg::Absent => GpuSignal::Absent,
            GpuArg::Unknown => GpuSignal::Unknown,
        }
    }
}
