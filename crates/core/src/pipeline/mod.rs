//! Turns a color extraction event into a finished [`ColorResult`].
//!
//! A run walks `Extracting → Harmonizing → Modulating → ShadowHighlight →
//! Finalizing → Published`. Every new event bumps a generation counter; a
//! run checks it between stages and stops with
//! [`PaletteError::PipelineSuperseded`] once a newer event has arrived, so
//! two tracks' colors never mix in one result.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::AudioAnalysisFrame,
    color::{interpolate, Lch, PerceptualColor, RgbColor},
    device::{DeviceCapabilityProfile, ProcessingDepth, QualityTier},
    harmony::{generate, HarmonyRule, HarmonySet, SLOT_NAMES},
    modulation::{pulse_intensity, FrameSmoother, MusicColorModulator},
    shading::{ShadowHighlightGenerator, ShadowHighlightPair},
    EngineConfig, PaletteError, Result,
};

/// Extraction roles carried into every result, in base-color preference order.
pub const EXTRACTION_ROLES: [&str; 6] = [
    "vibrant",
    "light-vibrant",
    "dark-vibrant",
    "muted",
    "light-muted",
    "dark-muted",
];

/// Source identity used for the built-in neutral palette.
pub const NEUTRAL_SOURCE_ID: &str = "neutral";

/// Named colors extracted from one piece of artwork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceExtraction {
    pub source_id: String,
    /// Role name to hex string. Role names are normalised to kebab-case.
    pub colors: BTreeMap<String, String>,
}

impl SourceExtraction {
    pub fn new<K, V>(source_id: impl Into<String>, colors: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            source_id: source_id.into(),
            colors: colors
                .into_iter()
                .map(|(role, hex)| (normalize_role(role.as_ref()), hex.into()))
                .collect(),
        }
    }
}

/// `darkVibrant`, `DARK_VIBRANT` and `dark vibrant` all become `dark-vibrant`.
pub fn normalize_role(role: &str) -> String {
    let mut out = String::with_capacity(role.len() + 2);
    let mut prev_lower = false;
    for ch in role.trim().chars() {
        if ch == '_' || ch == ' ' || ch == '-' {
            if !out.ends_with('-') && !out.is_empty() {
                out.push('-');
            }
            prev_lower = false;
        } else if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// One color rendered in both emitted formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorToken {
    pub hex: String,
    pub rgb: String,
}

impl From<RgbColor> for ColorToken {
    fn from(color: RgbColor) -> Self {
        Self {
            hex: color.to_hex(),
            rgb: color.to_rgb_triple(),
        }
    }
}

/// Finished palette. Always carries the full token set; a later result
/// replaces it whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorResult {
    pub source_id: String,
    pub rule: HarmonyRule,
    pub tier: QualityTier,
    /// Pulse intensity in [0, 1] for beat-driven consumers.
    pub intensity: f64,
    pub tokens: BTreeMap<String, ColorToken>,
}

impl ColorResult {
    pub fn token(&self, name: &str) -> Option<&ColorToken> {
        self.tokens.get(name)
    }

    /// Every token name a result carries.
    pub fn token_names() -> Vec<&'static str> {
        let mut names = vec!["accent", "base", "shadow", "highlight"];
        names.extend(SLOT_NAMES);
        names.extend(EXTRACTION_ROLES);
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Idle,
    Extracting,
    Harmonizing,
    Modulating,
    ShadowHighlight,
    Finalizing,
    Published,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackKind {
    LastKnownGood,
    NeutralDefault,
}

/// Emitted when a run fails. The render surface still receives a palette.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureSignal {
    pub source_id: String,
    pub reason: String,
    pub fallback: FallbackKind,
}

/// Recovered problems seen during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunDiagnostics {
    /// Roles whose color failed to parse and was replaced by mid-gray.
    pub invalid_inputs: Vec<String>,
    pub gamut_exhausted: usize,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Published {
        result: Arc<ColorResult>,
        diagnostics: RunDiagnostics,
    },
    /// Same source and inputs as the published run; nothing was recomputed.
    Cached(Arc<ColorResult>),
    Failed {
        result: Arc<ColorResult>,
        signal: FailureSignal,
    },
}

impl PipelineOutcome {
    pub fn result(&self) -> &Arc<ColorResult> {
        match self {
            Self::Published { result, .. } | Self::Cached(result) | Self::Failed { result, .. } => {
                result
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RunKey {
    source_id: String,
    colors: BTreeMap<String, String>,
    frame: [u64; 4],
    tier: QualityTier,
}

#[derive(Debug)]
struct Published {
    key: RunKey,
    result: Arc<ColorResult>,
}

#[derive(Debug)]
struct PipelineState {
    state: RunState,
    published: Option<Published>,
}

#[derive(Debug)]
pub struct PaletteProcessingPipeline {
    config: EngineConfig,
    modulator: MusicColorModulator,
    generation: AtomicU64,
    inner: Mutex<PipelineState>,
    smoother: Mutex<FrameSmoother>,
}

impl Default for PaletteProcessingPipeline {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl PaletteProcessingPipeline {
    pub fn new(config: EngineConfig) -> Self {
        let modulator = MusicColorModulator::new(&config.modulation);
        let smoother = FrameSmoother::new(config.modulation.smoothing_factor);
        Self {
            config,
            modulator,
            generation: AtomicU64::new(0),
            inner: Mutex::new(PipelineState {
                state: RunState::Idle,
                published: None,
            }),
            smoother: Mutex::new(smoother),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> Result<RunState> {
        Ok(self.lock()?.state)
    }

    /// The most recently published result, if any.
    pub fn last_published(&self) -> Result<Option<Arc<ColorResult>>> {
        Ok(self
            .lock()?
            .published
            .as_ref()
            .map(|published| Arc::clone(&published.result)))
    }

    /// Runs `frame` through the per-source moving average when the profile
    /// allows smoothing; returns it unchanged otherwise. Feed the returned
    /// frame to [`process`](Self::process), which never smooths on its own.
    pub fn smooth_frame(
        &self,
        source_id: &str,
        frame: &AudioAnalysisFrame,
        profile: &DeviceCapabilityProfile,
    ) -> Result<AudioAnalysisFrame> {
        if !profile.recommended_processing_depth().smoothing {
            return Ok(frame.normalized());
        }
        let mut smoother = self
            .smoother
            .lock()
            .map_err(|_| PaletteError::msg("frame smoother has been poisoned"))?;
        Ok(smoother.smooth(source_id, frame))
    }

    /// Builds the palette for one extraction event. A published result
    /// depends only on the arguments; a failed run returns the fallback.
    pub fn process(
        &self,
        extraction: &SourceExtraction,
        frame: &AudioAnalysisFrame,
        profile: &DeviceCapabilityProfile,
    ) -> Result<PipelineOutcome> {
        self.process_observed(extraction, frame, profile, |_| {})
    }

    /// Like [`process`](Self::process), calling `observer` on every state
    /// transition. The observer runs without any pipeline lock held.
    pub fn process_observed(
        &self,
        extraction: &SourceExtraction,
        frame: &AudioAnalysisFrame,
        profile: &DeviceCapabilityProfile,
        mut observer: impl FnMut(RunState),
    ) -> Result<PipelineOutcome> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = frame.normalized();
        let key = RunKey {
            source_id: extraction.source_id.clone(),
            colors: extraction.colors.clone(),
            frame: frame.fingerprint(),
            tier: profile.tier,
        };

        {
            let inner = self.lock()?;
            if let Some(published) = inner.published.as_ref().filter(|p| p.key == key) {
                tracing::debug!(
                    source = %key.source_id,
                    "inputs unchanged; reusing published palette"
                );
                return Ok(PipelineOutcome::Cached(Arc::clone(&published.result)));
            }
        }

        let source_id = extraction.source_id.as_str();
        let depth = profile.recommended_processing_depth();

        self.enter(RunState::Extracting, generation, source_id, &mut observer)?;
        if source_id.trim().is_empty() {
            return self.fail(source_id, "extraction has no source identity", &mut observer);
        }
        if extraction.colors.is_empty() {
            let reason = PaletteError::EmptyExtraction(source_id.to_string()).to_string();
            return self.fail(source_id, &reason, &mut observer);
        }

        let mut diagnostics = RunDiagnostics::default();
        let roles = parse_roles(extraction, &mut diagnostics);
        let Some(base_rgb) = select_base(&roles) else {
            return self.fail(source_id, "no base color could be selected", &mut observer);
        };
        let base = base_rgb.to_perceptual();

        self.enter(RunState::Harmonizing, generation, source_id, &mut observer)?;
        let set = self.harmonize(base, depth);

        self.enter(RunState::Modulating, generation, source_id, &mut observer)?;
        let modulated = self.modulator.modulate(&set, &frame);
        diagnostics.gamut_exhausted = modulated.exhausted_reductions();

        self.enter(RunState::ShadowHighlight, generation, source_id, &mut observer)?;
        let accent = modulated.colors().first().copied().unwrap_or(base);
        let k = self.config.shading.k_for(profile.tier);
        let pair = ShadowHighlightGenerator::new(k).derive(accent);

        self.enter(RunState::Finalizing, generation, source_id, &mut observer)?;
        let result = Arc::new(finalize(
            source_id,
            base_rgb,
            &roles,
            &modulated,
            &pair,
            pulse_intensity(&frame),
            profile.tier,
        ));

        {
            let mut inner = self.lock()?;
            if self.generation.load(Ordering::SeqCst) != generation {
                return Err(self.superseded(source_id, generation));
            }
            inner.state = RunState::Published;
            inner.published = Some(Published {
                key,
                result: Arc::clone(&result),
            });
        }
        observer(RunState::Published);

        if !diagnostics.invalid_inputs.is_empty() {
            tracing::warn!(
                source = %source_id,
                roles = ?diagnostics.invalid_inputs,
                "substituted neutral color for invalid input"
            );
        }
        tracing::info!(
            source = %source_id,
            rule = %result.rule,
            tier = %result.tier,
            "palette published"
        );

        Ok(PipelineOutcome::Published {
            result,
            diagnostics,
        })
    }

    /// The built-in palette used when no good result exists yet.
    pub fn neutral_palette(&self) -> ColorResult {
        let depth = DeviceCapabilityProfile::default().recommended_processing_depth();
        let base = RgbColor::NEUTRAL.to_perceptual();
        let set = self.harmonize(base, depth);
        let pair = ShadowHighlightGenerator::new(self.config.shading.k).derive(base);
        finalize(
            NEUTRAL_SOURCE_ID,
            RgbColor::NEUTRAL,
            &BTreeMap::new(),
            &set,
            &pair,
            pulse_intensity(&AudioAnalysisFrame::neutral()),
            QualityTier::Balanced,
        )
    }

    fn harmonize(&self, base: PerceptualColor, depth: ProcessingDepth) -> HarmonySet {
        generate(base, self.config.pipeline.rule).truncated(depth.harmony_cardinality)
    }

    fn enter(
        &self,
        state: RunState,
        generation: u64,
        source_id: &str,
        observer: &mut impl FnMut(RunState),
    ) -> Result<()> {
        self.check_current(generation, source_id)?;
        self.lock()?.state = state;
        tracing::debug!(source = %source_id, generation, ?state, "pipeline stage");
        observer(state);
        self.check_current(generation, source_id)
    }

    fn check_current(&self, generation: u64, source_id: &str) -> Result<()> {
        if self.generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            Err(self.superseded(source_id, generation))
        }
    }

    fn superseded(&self, source_id: &str, generation: u64) -> PaletteError {
        tracing::debug!(source = %source_id, generation, "run superseded by a newer event");
        PaletteError::PipelineSuperseded {
            source_id: source_id.to_string(),
            generation,
        }
    }

    fn fail(
        &self,
        source_id: &str,
        reason: &str,
        observer: &mut impl FnMut(RunState),
    ) -> Result<PipelineOutcome> {
        let last_good = {
            let mut inner = self.lock()?;
            inner.state = RunState::Failed;
            inner.published.as_ref().map(|p| Arc::clone(&p.result))
        };
        observer(RunState::Failed);

        let (result, fallback) = match last_good {
            Some(result) => (result, FallbackKind::LastKnownGood),
            None => (Arc::new(self.neutral_palette()), FallbackKind::NeutralDefault),
        };
        let signal = FailureSignal {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
            fallback,
        };
        tracing::warn!(source = %source_id, reason, fallback = ?fallback, "palette run failed");

        Ok(PipelineOutcome::Failed { result, signal })
    }

    fn lock(&self) -> Result<MutexGuard<'_, PipelineState>> {
        self.inner
            .lock()
            .map_err(|_| PaletteError::msg("pipeline state has been poisoned"))
    }
}

fn parse_roles(
    extraction: &SourceExtraction,
    diagnostics: &mut RunDiagnostics,
) -> BTreeMap<String, RgbColor> {
    extraction
        .colors
        .iter()
        .map(|(role, hex)| {
            let color = RgbColor::parse_role(role, hex).unwrap_or_else(|err| {
                tracing::debug!(%err, "invalid color input");
                diagnostics.invalid_inputs.push(role.clone());
                RgbColor::NEUTRAL
            });
            (role.clone(), color)
        })
        .collect()
}

fn select_base(roles: &BTreeMap<String, RgbColor>) -> Option<RgbColor> {
    EXTRACTION_ROLES
        .iter()
        .find_map(|role| roles.get(*role))
        .or_else(|| roles.values().next())
        .copied()
}

fn desaturate(color: PerceptualColor) -> PerceptualColor {
    let gray = Lch { c: 0.0, ..color.to_cylindrical() }.to_perceptual();
    interpolate(color, gray, 0.5)
}

fn finalize(
    source_id: &str,
    base: RgbColor,
    roles: &BTreeMap<String, RgbColor>,
    modulated: &HarmonySet,
    pair: &ShadowHighlightPair,
    intensity: f64,
    tier: QualityTier,
) -> ColorResult {
    let accent = modulated.colors().first().copied().unwrap_or(pair.anchor);
    let mut tokens = BTreeMap::new();
    let mut put = |name: &str, color: RgbColor| {
        tokens.insert(name.to_string(), ColorToken::from(color));
    };

    put("accent", accent.to_rgb());
    put("base", base);
    put("shadow", pair.shadow.to_rgb());
    put("highlight", pair.highlight.to_rgb());

    let members = modulated.colors();
    for (index, slot) in SLOT_NAMES.iter().enumerate() {
        let color = if members.is_empty() {
            accent
        } else {
            members[index % members.len()]
        };
        put(slot, color.to_rgb());
    }

    for role in EXTRACTION_ROLES {
        let color = roles.get(role).copied().unwrap_or_else(|| {
            match role {
                "vibrant" => accent,
                "light-vibrant" => pair.highlight,
                "dark-vibrant" => pair.shadow,
                "muted" => desaturate(accent),
                "light-muted" => desaturate(pair.highlight),
                _ => desaturate(pair.shadow),
            }
            .to_rgb()
        });
        put(role, color);
    }

    ColorResult {
        source_id: source_id.to_string(),
        rule: modulated.rule(),
        tier,
        intensity,
        tokens,
    }
}
