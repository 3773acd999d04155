//! Music-driven adjustment of a harmony set.
//!
//! Energy scales chroma, valence nudges hue toward a warm or cool anchor,
//! and tempo with danceability yields a pulse intensity for consumers that
//! animate on the beat. Every mapping is continuous in the frame values.

use crate::{
    analysis::AudioAnalysisFrame,
    color::{hue_delta, Lch},
    harmony::{HarmonySet, MAX_CHROMA},
    ModulationConfig,
};

const ENERGY_CHROMA_GAIN: f64 = 0.3;
const VALENCE_MAX_ROTATION: f64 = 15.0;
const WARM_ANCHORS: [f64; 2] = [0.0, 60.0];
const COOL_ANCHORS: [f64; 2] = [210.0, 270.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MusicColorModulator {
    contrast_boost: f64,
}

impl Default for MusicColorModulator {
    fn default() -> Self {
        Self {
            contrast_boost: 1.0,
        }
    }
}

impl MusicColorModulator {
    pub fn new(config: &ModulationConfig) -> Self {
        let boost = config.contrast_boost;
        Self {
            contrast_boost: if boost.is_finite() && boost >= 0.0 { boost } else { 1.0 },
        }
    }

    pub fn contrast_boost(&self) -> f64 {
        self.contrast_boost
    }

    /// Returns a new set adjusted for `frame`. The input set is untouched.
    pub fn modulate(&self, set: &HarmonySet, frame: &AudioAnalysisFrame) -> HarmonySet {
        let frame = frame.normalized();
        let chroma_scale = (1.0 + ENERGY_CHROMA_GAIN * (frame.energy - 0.5)) * self.contrast_boost;
        let rotation = VALENCE_MAX_ROTATION * (frame.valence - 0.5);

        set.map_colors(|color| {
            let lch = color.to_cylindrical();
            Lch {
                c: (lch.c * chroma_scale).clamp(0.0, MAX_CHROMA),
                h: rotate_toward_anchor(lch.h, rotation),
                ..lch
            }
            .to_perceptual()
        })
    }
}

/// Modulates with the default contrast boost.
pub fn modulate(set: &HarmonySet, frame: &AudioAnalysisFrame) -> HarmonySet {
    MusicColorModulator::default().modulate(set, frame)
}

/// Pulse intensity in [0, 1] from tempo and danceability.
pub fn pulse_intensity(frame: &AudioAnalysisFrame) -> f64 {
    let frame = frame.normalized();
    (0.5 * frame.tempo + 0.5 * frame.danceability).clamp(0.0, 1.0)
}

/// Rotates `hue` by up to `|amount|` degrees toward the nearest warm anchor
/// when `amount` is positive, or the nearest cool anchor when negative.
/// The rotation never overshoots the anchor.
fn rotate_toward_anchor(hue: f64, amount: f64) -> f64 {
    if amount == 0.0 || !amount.is_finite() {
        return hue;
    }

    let anchors = if amount > 0.0 { &WARM_ANCHORS } else { &COOL_ANCHORS };
    let delta = anchors
        .iter()
        .map(|anchor| hue_delta(hue, *anchor))
        .fold(f64::INFINITY, |best, d| if d.abs() < best.abs() { d } else { best });

    let step = delta.abs().min(amount.abs()).copysign(delta);
    Lch::new(0.0, 0.0, hue).rotate(step).h
}

/// Exponential moving average over successive frames of one source.
///
/// Switching to a different source identity restarts the average from the
/// new frame.
#[derive(Debug, Clone)]
pub struct FrameSmoother {
    factor: f64,
    state: Option<(String, AudioAnalysisFrame)>,
}

impl FrameSmoother {
    pub fn new(factor: f64) -> Self {
        let factor = if factor.is_finite() { factor.clamp(0.01, 1.0) } else { 1.0 };
        Self {
            factor,
            state: None,
        }
    }

    pub fn smooth(&mut self, source_id: &str, frame: &AudioAnalysisFrame) -> AudioAnalysisFrame {
        let frame = frame.normalized();
        let next = match &self.state {
            Some((id, previous)) if id == source_id => {
                let mix = |old: f64, new: f64| old + (new - old) * self.factor;
                AudioAnalysisFrame {
                    energy: mix(previous.energy, frame.energy),
                    valence: mix(previous.valence, frame.valence),
                    tempo: mix(previous.tempo, frame.tempo),
                    danceability: mix(previous.danceability, frame.danceability),
                }
            }
            _ => frame,
        };
        self.state = Some((source_id.to_string(), next));
        next
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        color::{perceptual_distance, to_perceptual, RgbColor},
        harmony::{generate, HarmonyRule},
    };

    fn lavender_triad() -> HarmonySet {
        generate(
            to_perceptual(RgbColor::parse_hex("#c6a0f6").unwrap()),
            HarmonyRule::Triadic,
        )
    }

    fn average_chroma(set: &HarmonySet) -> f64 {
        set.colors().iter().map(|c| c.chroma()).sum::<f64>() / set.len() as f64
    }

    fn total_distance(a: &HarmonySet, b: &HarmonySet) -> f64 {
        a.colors()
            .iter()
            .zip(b.colors())
            .map(|(x, y)| perceptual_distance(*x, *y))
            .sum()
    }

    #[test]
    fn neutral_frame_leaves_set_unchanged() {
        let set = lavender_triad();
        let out = modulate(&set, &AudioAnalysisFrame::neutral());
        assert!(total_distance(&set, &out) < 1e-9);
    }

    #[test]
    fn high_energy_raises_average_chroma() {
        let set = lavender_triad();
        let loud = modulate(&set, &AudioAnalysisFrame::new(0.9, 0.9, 1.0, 1.0));
        let calm = modulate(&set, &AudioAnalysisFrame::new(0.1, 0.9, 1.0, 1.0));
        assert!(average_chroma(&loud) > average_chroma(&calm));
    }

    #[test]
    fn modulation_is_pure_and_repeatable() {
        let set = lavender_triad();
        let frame = AudioAnalysisFrame::new(0.8, 0.3, 0.6, 0.7);
        let first = modulate(&set, &frame);
        let second = modulate(&set, &frame);
        assert_eq!(first, second);
        assert_eq!(set, lavender_triad());
    }

    #[test]
    fn output_is_continuous_around_neutral() {
        let set = lavender_triad();
        let eps = 0.01;
        let samples = [
            AudioAnalysisFrame::new(0.5 - eps, 0.5 - eps, 0.5, 0.5),
            AudioAnalysisFrame::new(0.5 - eps, 0.5 + eps, 0.5, 0.5),
            AudioAnalysisFrame::new(0.5 + eps, 0.5 - eps, 0.5, 0.5),
            AudioAnalysisFrame::new(0.5 + eps, 0.5 + eps, 0.5, 0.5),
        ];

        for frame in samples {
            let out = modulate(&set, &frame);
            for (x, y) in set.colors().iter().zip(out.colors()) {
                assert!(perceptual_distance(*x, *y) < 0.05);
            }
        }
    }

    #[test]
    fn output_is_continuous_at_range_edges() {
        let set = lavender_triad();
        for edge in [0.0, 1.0] {
            let inside = if edge == 0.0 { 0.005 } else { 0.995 };
            let a = modulate(&set, &AudioAnalysisFrame::new(edge, edge, 0.5, 0.5));
            let b = modulate(&set, &AudioAnalysisFrame::new(inside, inside, 0.5, 0.5));
            for (x, y) in a.colors().iter().zip(b.colors()) {
                assert!(perceptual_distance(*x, *y) < 0.05);
            }
        }
    }

    #[test]
    fn valence_warms_and_cools() {
        assert!((rotate_toward_anchor(100.0, 7.5) - 92.5).abs() < 1e-9);
        assert!((rotate_toward_anchor(100.0, -7.5) - 107.5).abs() < 1e-9);
        assert!((rotate_toward_anchor(300.0, -7.5) - 292.5).abs() < 1e-9);
        assert!((rotate_toward_anchor(2.0, 7.5) - 0.0).abs() < 1e-9);
        assert_eq!(rotate_toward_anchor(123.0, 0.0), 123.0);
    }

    #[test]
    fn pulse_intensity_combines_tempo_and_danceability() {
        assert_eq!(pulse_intensity(&AudioAnalysisFrame::new(0.0, 0.0, 1.0, 1.0)), 1.0);
        assert_eq!(pulse_intensity(&AudioAnalysisFrame::new(1.0, 1.0, 0.0, 0.0)), 0.0);
        let mixed = pulse_intensity(&AudioAnalysisFrame::new(0.5, 0.5, 0.2, 0.6));
        assert!((mixed - 0.4).abs() < 1e-12);
    }

    #[test]
    fn contrast_boost_scales_chroma() {
        let set = lavender_triad();
        let muted = MusicColorModulator::new(&ModulationConfig {
            contrast_boost: 0.5,
            ..ModulationConfig::default()
        });
        let out = muted.modulate(&set, &AudioAnalysisFrame::neutral());
        assert!(average_chroma(&out) < average_chroma(&set));
    }

    #[test]
    fn smoother_averages_within_a_source_and_resets_across() {
        let mut smoother = FrameSmoother::new(0.5);
        let first = smoother.smooth("a", &AudioAnalysisFrame::new(0.0, 0.0, 0.0, 0.0));
        assert_eq!(first.energy, 0.0);
        let second = smoother.smooth("a", &AudioAnalysisFrame::new(1.0, 1.0, 1.0, 1.0));
        assert!((second.energy - 0.5).abs() < 1e-12);
        let other = smoother.smooth("b", &AudioAnalysisFrame::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(other.energy, 1.0);
    }
}
