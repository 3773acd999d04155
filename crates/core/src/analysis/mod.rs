use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{PaletteError, Result};

const BEAT_GAIN: f32 = 12.0;
const BEAT_THRESHOLD: f32 = 0.6;
const MIN_BEAT_INTERVAL: f32 = 0.2;
const MAX_BEAT_HISTORY: usize = 32;
/// RMS treated as full energy.
const ENERGY_REFERENCE_RMS: f32 = 0.5;
/// Normalised centroid treated as fully bright.
const BRIGHTNESS_REFERENCE: f32 = 0.25;
const TEMPO_MIN_BPM: f32 = 60.0;
const TEMPO_MAX_BPM: f32 = 200.0;
const NEUTRAL: f64 = 0.5;

/// Bounded audio descriptors for one moment of a track. Every field is in
/// [0, 1]; tempo is already normalised by whoever produced the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioAnalysisFrame {
    pub energy: f64,
    pub valence: f64,
    pub tempo: f64,
    pub danceability: f64,
}

impl Default for AudioAnalysisFrame {
    fn default() -> Self {
        Self::neutral()
    }
}

impl AudioAnalysisFrame {
    pub fn new(energy: f64, valence: f64, tempo: f64, danceability: f64) -> Self {
        Self {
            energy,
            valence,
            tempo,
            danceability,
        }
        .normalized()
    }

    /// A frame that leaves a palette unmodulated.
    pub const fn neutral() -> Self {
        Self {
            energy: NEUTRAL,
            valence: NEUTRAL,
            tempo: NEUTRAL,
            danceability: NEUTRAL,
        }
    }

    /// Clamps every field into [0, 1], replacing non-finite values with 0.5.
    pub fn normalized(self) -> Self {
        let fix = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { NEUTRAL };
        Self {
            energy: fix(self.energy),
            valence: fix(self.valence),
            tempo: fix(self.tempo),
            danceability: fix(self.danceability),
        }
    }

    /// Exact bit pattern of the frame, used to detect repeated inputs.
    pub fn fingerprint(&self) -> [u64; 4] {
        [
            self.energy.to_bits(),
            self.valence.to_bits(),
            self.tempo.to_bits(),
            self.danceability.to_bits(),
        ]
    }
}

/// Summary of the analysis metadata accumulated so far.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub tempo_bpm: Option<f32>,
    pub duration_seconds: Option<f32>,
}

/// Derives [`AudioAnalysisFrame`]s from raw PCM for hosts without an
/// external analysis service.
///
/// Energy follows block RMS, valence follows spectral brightness, tempo
/// follows the spacing of detected onsets and danceability follows how
/// regular that spacing is.
pub struct AnalysisEngine {
    sample_rate: u32,
    summary: AnalysisSummary,
    latest: Option<AudioAnalysisFrame>,
    processed_samples: usize,
    last_rms: f32,
    beat_timestamps: Vec<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl Default for AnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisEngine {
    /// Creates a new engine using the default 48 kHz sample rate.
    pub fn new() -> Self {
        Self::with_sample_rate(48_000)
    }

    /// Creates a new engine for mono input at `sample_rate` Hz.
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            summary: AnalysisSummary {
                sample_rate,
                ..Default::default()
            },
            latest: None,
            processed_samples: 0,
            last_rms: 0.0,
            beat_timestamps: Vec::new(),
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Returns the metadata accumulated so far.
    pub fn summary(&self) -> &AnalysisSummary {
        &self.summary
    }

    /// Returns the sample rate the engine was configured with.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clears the accumulated state while preserving configuration. Call on
    /// track change.
    pub fn reset(&mut self) {
        self.summary = AnalysisSummary {
            sample_rate: self.sample_rate,
            ..Default::default()
        };
        self.latest = None;
        self.processed_samples = 0;
        self.last_rms = 0.0;
        self.beat_timestamps.clear();
    }

    /// Consumes a block of mono samples and returns the updated frame.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<AudioAnalysisFrame> {
        if samples.len() < 2 {
            return Err(PaletteError::msg(
                "analysis requires blocks with at least two samples",
            ));
        }

        let block_size = samples.len();
        let sample_rate = self.sample_rate.max(1) as f32;
        let start_time = self.processed_samples as f32 / sample_rate;
        let end_time = (self.processed_samples + block_size) as f32 / sample_rate;
        let timestamp = start_time + (end_time - start_time) * 0.5;

        let rms = compute_rms(samples);
        self.update_beats(timestamp, rms);
        let centroid_hz = self.compute_spectral_centroid(samples)?;
        let nyquist = sample_rate * 0.5;
        let brightness = (centroid_hz / nyquist).clamp(0.0, 1.0);

        self.processed_samples += block_size;
        self.summary.duration_seconds = Some(
            self.summary
                .duration_seconds
                .map(|d| d.max(end_time))
                .unwrap_or(end_time),
        );

        let tempo = self
            .summary
            .tempo_bpm
            .map(|bpm| ((bpm - TEMPO_MIN_BPM) / (TEMPO_MAX_BPM - TEMPO_MIN_BPM)) as f64)
            .unwrap_or(NEUTRAL);

        let frame = AudioAnalysisFrame::new(
            (rms / ENERGY_REFERENCE_RMS) as f64,
            (brightness / BRIGHTNESS_REFERENCE) as f64,
            tempo,
            self.beat_regularity().unwrap_or(NEUTRAL),
        );

        self.latest = Some(frame);
        Ok(frame)
    }

    /// Frame produced by the most recent block, if any. Earlier frames are
    /// not retained.
    pub fn latest_frame(&self) -> Option<&AudioAnalysisFrame> {
        self.latest.as_ref()
    }

    fn update_beats(&mut self, timestamp: f32, rms: f32) {
        let delta = (rms - self.last_rms).max(0.0);
        self.last_rms = rms;
        let confidence = (delta * BEAT_GAIN).clamp(0.0, 1.0);

        if confidence >= BEAT_THRESHOLD
            && self
                .beat_timestamps
                .last()
                .map(|last| timestamp - last >= MIN_BEAT_INTERVAL)
                .unwrap_or(true)
        {
            self.beat_timestamps.push(timestamp);
            if self.beat_timestamps.len() > MAX_BEAT_HISTORY {
                let overflow = self.beat_timestamps.len() - MAX_BEAT_HISTORY;
                self.beat_timestamps.drain(0..overflow);
            }
            self.update_tempo_estimate();
        }
    }

    fn intervals(&self) -> impl Iterator<Item = f32> + '_ {
        self.beat_timestamps
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|interval| *interval > f32::EPSILON)
    }

    fn update_tempo_estimate(&mut self) {
        let (sum, count) = self
            .intervals()
            .fold((0.0, 0usize), |(sum, count), interval| (sum + interval, count + 1));

        if count > 0 {
            let average_interval = sum / count as f32;
            if average_interval > 0.0 {
                self.summary.tempo_bpm = Some(60.0 / average_interval);
            }
        }
    }

    /// One minus the coefficient of variation of onset intervals.
    fn beat_regularity(&self) -> Option<f64> {
        let intervals: Vec<f32> = self.intervals().collect();
        if intervals.len() < 2 {
            return None;
        }

        let mean = intervals.iter().sum::<f32>() / intervals.len() as f32;
        let variance = intervals
            .iter()
            .map(|i| (i - mean) * (i - mean))
            .sum::<f32>()
            / intervals.len() as f32;
        Some((1.0 - (variance.sqrt() / mean) as f64).clamp(0.0, 1.0))
    }

    fn compute_spectral_centroid(&mut self, samples: &[f32]) -> Result<f32> {
        let len = samples.len();
        let sample_rate = self.sample_rate.max(1) as f32;
        let fft = self.prepare_fft(len)?;

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|err| PaletteError::msg(format!("spectrum analysis failed: {err}")))?;

        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        let bin_hz = sample_rate / len as f32;

        for (i, bin) in fft.spectrum.iter().enumerate() {
            let magnitude = bin.norm();
            magnitude_sum += magnitude;
            weighted_sum += magnitude * (i as f32 * bin_hz);
        }

        if magnitude_sum <= f32::EPSILON {
            Ok(0.0)
        } else {
            Ok(weighted_sum / magnitude_sum)
        }
    }

    fn prepare_fft(&mut self, size: usize) -> Result<&mut FftResources> {
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            let plan = self.fft_planner.plan_fft_forward(size);
            self.fft = Some(FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            });
        }

        self.fft
            .as_mut()
            .ok_or_else(|| PaletteError::msg("fft resources unavailable"))
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("sample_rate", &self.sample_rate)
            .field("summary", &self.summary)
            .field("latest", &self.latest)
            .field("processed_samples", &self.processed_samples)
            .field("beat_timestamps", &self.beat_timestamps.len())
            .finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_low_energy_and_neutral_rhythm() {
        let mut engine = AnalysisEngine::with_sample_rate(48_000);
        let frame = engine.process_block(&vec![0.0; 1024]).unwrap();

        assert_eq!(frame.energy, 0.0);
        assert_eq!(frame.valence, 0.0);
        assert_eq!(frame.tempo, NEUTRAL);
        assert_eq!(frame.danceability, NEUTRAL);
    }

    #[test]
    fn regular_pulses_set_tempo_and_danceability() {
        let mut engine = AnalysisEngine::with_sample_rate(100);
        let quiet = vec![0.0; 25];
        let loud = vec![1.0; 25];

        let mut last = AudioAnalysisFrame::neutral();
        for _ in 0..6 {
            engine.process_block(&quiet).unwrap();
            last = engine.process_block(&loud).unwrap();
        }

        let tempo = engine.summary().tempo_bpm.expect("tempo should be detected");
        assert!((tempo - 120.0).abs() < 10.0);
        assert!((last.tempo - (120.0 - 60.0) / 140.0).abs() < 0.1);
        assert!(last.danceability > 0.9);
        assert_eq!(last.energy, 1.0);
        assert!(engine.summary().duration_seconds.unwrap() > 0.0);
    }

    #[test]
    fn rejects_tiny_blocks() {
        let mut engine = AnalysisEngine::new();
        assert!(engine.process_block(&[0.5]).is_err());
        assert!(engine.latest_frame().is_none());
    }

    #[test]
    fn keeps_only_the_latest_frame() {
        let mut engine = AnalysisEngine::with_sample_rate(100);
        engine.process_block(&[1.0; 10]).unwrap();
        let quiet = engine.process_block(&[0.0; 10]).unwrap();
        assert_eq!(engine.latest_frame(), Some(&quiet));
        assert_eq!(quiet.energy, 0.0);
    }

    #[test]
    fn reset_clears_history() {
        let mut engine = AnalysisEngine::with_sample_rate(100);
        engine.process_block(&[1.0; 10]).unwrap();
        engine.reset();
        assert!(engine.latest_frame().is_none());
        assert!(engine.summary().duration_seconds.is_none());
    }

    #[test]
    fn frames_are_clamped_and_sanitised() {
        let frame = AudioAnalysisFrame::new(1.7, -0.2, f64::NAN, 0.4);
        assert_eq!(frame.energy, 1.0);
        assert_eq!(frame.valence, 0.0);
        assert_eq!(frame.tempo, NEUTRAL);
        assert_eq!(frame.danceability, 0.4);
    }
}
