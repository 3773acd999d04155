//! Device capability probing and quality tier classification.
//!
//! A [`DeviceCapabilityProfile`] is an immutable snapshot. [`ProfileStore`]
//! holds the current snapshot behind an `Arc` that is swapped whole, so
//! readers see either the old or the new profile and never a mix.

use std::{
    fmt,
    sync::{mpsc, Arc, PoisonError, RwLock},
    thread::{self, JoinHandle},
};

use serde::{Deserialize, Serialize};

use crate::{DeviceConfig, PaletteError, Result};

/// Harmony cardinality on Low tier devices.
const LOW_TIER_CARDINALITY: usize = 3;
/// Upper bound on harmony cardinality everywhere else.
const FULL_CARDINALITY: usize = 6;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum QualityTier {
    Low,
    #[default]
    Balanced,
    High,
}

impl QualityTier {
    fn step_up(self) -> Self {
        match self {
            Self::Low => Self::Balanced,
            Self::Balanced | Self::High => Self::High,
        }
    }

    fn step_down(self) -> Self {
        match self {
            Self::High => Self::Balanced,
            Self::Balanced | Self::Low => Self::Low,
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Balanced => "balanced",
            Self::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpuSignal {
    Present,
    Absent,
    #[default]
    Unknown,
}

/// Raw readings collected by a [`CapabilityProbe`]. `None` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSignals {
    pub memory_gb: Option<f64>,
    pub cores: Option<usize>,
    pub gpu: GpuSignal,
}

/// How the current profile came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileOrigin {
    Default,
    Probed,
    ProbeTimedOut,
    ProbeFailed,
    StressAdjusted,
}

/// What a tier allows the palette pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessingDepth {
    pub harmony_cardinality: usize,
    pub smoothing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilityProfile {
    pub memory_gb: Option<f64>,
    pub core_count: Option<usize>,
    pub gpu_signal: GpuSignal,
    pub tier: QualityTier,
    pub origin: ProfileOrigin,
}

impl Default for DeviceCapabilityProfile {
    fn default() -> Self {
        Self::fallback(ProfileOrigin::Default)
    }
}

impl DeviceCapabilityProfile {
    pub fn from_signals(signals: HostSignals, config: &DeviceConfig) -> Self {
        Self {
            memory_gb: signals.memory_gb,
            core_count: signals.cores,
            gpu_signal: signals.gpu,
            tier: classify(&signals, config),
            origin: ProfileOrigin::Probed,
        }
    }

    /// Balanced profile with no readings.
    pub fn fallback(origin: ProfileOrigin) -> Self {
        Self {
            memory_gb: None,
            core_count: None,
            gpu_signal: GpuSignal::Unknown,
            tier: QualityTier::Balanced,
            origin,
        }
    }

    pub fn recommended_processing_depth(&self) -> ProcessingDepth {
        match self.tier {
            QualityTier::Low => ProcessingDepth {
                harmony_cardinality: LOW_TIER_CARDINALITY,
                smoothing: false,
            },
            QualityTier::Balanced | QualityTier::High => ProcessingDepth {
                harmony_cardinality: FULL_CARDINALITY,
                smoothing: true,
            },
        }
    }

    fn with_tier(&self, tier: QualityTier, origin: ProfileOrigin) -> Self {
        Self {
            tier,
            origin,
            ..self.clone()
        }
    }
}

/// High needs every signal strong; Low needs at least two weak signals.
/// Everything else, including unknown readings, is Balanced.
pub fn classify(signals: &HostSignals, config: &DeviceConfig) -> QualityTier {
    let strong_memory = signals.memory_gb.is_some_and(|gb| gb >= config.high_memory_gb);
    let strong_cores = signals.cores.is_some_and(|n| n >= config.high_cores);
    if strong_memory && strong_cores && signals.gpu == GpuSignal::Present {
        return QualityTier::High;
    }

    let weak = [
        signals.memory_gb.is_some_and(|gb| gb < config.min_memory_gb),
        signals.cores.is_some_and(|n| n < config.min_cores),
        signals.gpu == GpuSignal::Absent,
    ]
    .into_iter()
    .filter(|weak| *weak)
    .count();

    if weak >= 2 {
        QualityTier::Low
    } else {
        QualityTier::Balanced
    }
}

/// Source of raw device readings.
pub trait CapabilityProbe: Send + Sync {
    fn sample(&self) -> Result<HostSignals>;
}

/// Readings supplied by the host, e.g. forwarded from a browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe(pub HostSignals);

impl CapabilityProbe for StaticProbe {
    fn sample(&self) -> Result<HostSignals> {
        Ok(self.0)
    }
}

/// Reads the local machine. The GPU cannot be detected from here, so the
/// caller passes what it knows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe {
    pub gpu: GpuSignal,
}

impl CapabilityProbe for SystemProbe {
    fn sample(&self) -> Result<HostSignals> {
        Ok(HostSignals {
            memory_gb: system_memory_gb(),
            cores: Some(num_cpus::get()),
            gpu: self.gpu,
        })
    }
}

fn system_memory_gb() -> Option<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total_gb(&meminfo)
}

fn parse_mem_total_gb(meminfo: &str) -> Option<f64> {
    let line = meminfo.lines().find(|line| line.starts_with("MemTotal:"))?;
    let kib: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib / (1024.0 * 1024.0))
}

/// Samples `probe` on a helper thread and waits at most the configured
/// timeout.
pub fn try_probe(
    probe: Arc<dyn CapabilityProbe>,
    config: &DeviceConfig,
) -> Result<DeviceCapabilityProfile> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("capability-probe".to_string())
        .spawn(move || {
            let _ = tx.send(probe.sample());
        })?;

    match rx.recv_timeout(config.probe_timeout()) {
        Ok(signals) => Ok(DeviceCapabilityProfile::from_signals(signals?, config)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(PaletteError::CapabilityProbeTimeout {
            timeout_ms: config.probe_timeout_ms,
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(PaletteError::msg("capability probe exited without a reading"))
        }
    }
}

/// Like [`try_probe`], but always yields a profile. Timeouts and probe
/// failures fall back to Balanced.
pub fn probe(probe: Arc<dyn CapabilityProbe>, config: &DeviceConfig) -> DeviceCapabilityProfile {
    match try_probe(probe, config) {
        Ok(profile) => {
            tracing::info!(
                tier = %profile.tier,
                cores = ?profile.core_count,
                memory_gb = ?profile.memory_gb,
                "device probed"
            );
            profile
        }
        Err(err @ PaletteError::CapabilityProbeTimeout { .. }) => {
            tracing::warn!(%err, "defaulting to balanced tier");
            DeviceCapabilityProfile::fallback(ProfileOrigin::ProbeTimedOut)
        }
        Err(err) => {
            tracing::warn!(%err, "capability probe failed; defaulting to balanced tier");
            DeviceCapabilityProfile::fallback(ProfileOrigin::ProbeFailed)
        }
    }
}

/// Shared, read-mostly holder of the current profile.
#[derive(Debug)]
pub struct ProfileStore {
    current: RwLock<Arc<DeviceCapabilityProfile>>,
    config: DeviceConfig,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new(DeviceCapabilityProfile::default(), DeviceConfig::default())
    }
}

impl ProfileStore {
    pub fn new(initial: DeviceCapabilityProfile, config: DeviceConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            config,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Current snapshot. The returned `Arc` stays valid after a replacement.
    pub fn current(&self) -> Arc<DeviceCapabilityProfile> {
        // The guarded value is only ever swapped whole, so a poisoned lock
        // still holds a complete snapshot.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn tier(&self) -> QualityTier {
        self.current().tier
    }

    /// Installs a new snapshot and returns the one it replaced.
    pub fn replace(&self, profile: DeviceCapabilityProfile) -> Arc<DeviceCapabilityProfile> {
        let next = Arc::new(profile);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        log_tier_change(&guard, &next);
        std::mem::replace(&mut *guard, next)
    }

    /// Read-modify-write under one write lock. `f` sees the current snapshot
    /// and returns its replacement, or `None` to keep it. Returns the
    /// installed snapshot when one was installed.
    pub fn update(
        &self,
        f: impl FnOnce(&DeviceCapabilityProfile) -> Option<DeviceCapabilityProfile>,
    ) -> Option<Arc<DeviceCapabilityProfile>> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(f(&guard)?);
        log_tier_change(&guard, &next);
        *guard = Arc::clone(&next);
        Some(next)
    }

    /// Probes again and installs the result.
    pub fn reprobe(&self, source: Arc<dyn CapabilityProbe>) -> Arc<DeviceCapabilityProfile> {
        let profile = probe(source, &self.config);
        self.replace(profile);
        self.current()
    }

    /// Runs [`ProfileStore::reprobe`] on a background thread.
    pub fn spawn_probe(
        self: &Arc<Self>,
        source: Arc<dyn CapabilityProbe>,
    ) -> Result<JoinHandle<()>> {
        let store = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("startup-probe".to_string())
            .spawn(move || {
                store.reprobe(source);
            })?;
        Ok(handle)
    }
}

fn log_tier_change(previous: &DeviceCapabilityProfile, next: &DeviceCapabilityProfile) {
    if previous.tier != next.tier {
        tracing::info!(
            from = %previous.tier,
            to = %next.tier,
            origin = ?next.origin,
            "quality tier changed"
        );
    }
}

/// Adjusts the tier from periodic benchmark scores in [0, 1].
///
/// An upgrade needs `upgrade_after` consecutive strong samples; a downgrade
/// needs the longer run of `downgrade_after` consecutive weak samples.
#[derive(Debug, Clone, Default)]
pub struct StressMonitor {
    strong_run: u32,
    weak_run: u32,
}

impl StressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one score and returns the new tier when it changed.
    pub fn record(&mut self, store: &ProfileStore, score: f64) -> Option<QualityTier> {
        let config = store.config();
        if !score.is_finite() {
            return None;
        }

        if score >= config.stress_upgrade_score {
            self.strong_run += 1;
            self.weak_run = 0;
        } else if score < config.stress_downgrade_score {
            self.weak_run += 1;
            self.strong_run = 0;
        } else {
            self.strong_run = 0;
            self.weak_run = 0;
        }

        let upgrade = if self.strong_run >= config.upgrade_after.max(1) {
            true
        } else if self.weak_run >= config.downgrade_after.max(1) {
            false
        } else {
            return None;
        };

        self.strong_run = 0;
        self.weak_run = 0;
        let installed = store.update(|current| {
            let target = if upgrade {
                current.tier.step_up()
            } else {
                current.tier.step_down()
            };
            (target != current.tier)
                .then(|| current.with_tier(target, ProfileOrigin::StressAdjusted))
        })?;
        Some(installed.tier)
    }
}
