//! Hue-preserving shadow and highlight derivation.

use serde::{Deserialize, Serialize};

use crate::color::{fit_to_gamut, Lch, PerceptualColor};

/// Default lightness offset factor.
pub const DEFAULT_K: f64 = 0.35;

/// Stand-in lightness for sources at exactly 0 or 1, where no strictly
/// darker or lighter value exists.
const ANCHOR_MIN: f64 = 0.02;
const ANCHOR_MAX: f64 = 0.98;
const SHADOW_FLOOR: f64 = 0.01;
const HIGHLIGHT_CEIL: f64 = 0.99;
const NEAR_BLACK: f64 = 0.05;
const NEAR_WHITE: f64 = 0.95;
/// Largest allowed difference between the shadow and highlight deltas.
const MAX_DELTA_SKEW: f64 = 0.3;
const SHADOW_CHROMA_SCALE: f64 = 0.9;
const HIGHLIGHT_CHROMA_SCALE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShadowHighlightPair {
    /// The source, except that lightness 0 or 1 is moved to 0.02 or 0.98.
    pub anchor: PerceptualColor,
    pub shadow: PerceptualColor,
    pub highlight: PerceptualColor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowHighlightGenerator {
    k: f64,
}

impl Default for ShadowHighlightGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_K)
    }
}

impl ShadowHighlightGenerator {
    /// `k` is clamped to (0, 1); non-finite values fall back to the default.
    pub fn new(k: f64) -> Self {
        let k = if k.is_finite() { k.clamp(0.01, 0.99) } else { DEFAULT_K };
        Self { k }
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn derive(&self, source: PerceptualColor) -> ShadowHighlightPair {
        let lch = source.to_cylindrical();
        let l = match lch.l {
            l if !l.is_finite() => 0.5,
            l if l <= 0.0 => ANCHOR_MIN,
            l if l >= 1.0 => ANCHOR_MAX,
            l => l,
        };
        let anchor = fit_to_gamut(Lch { l, ..lch }.to_perceptual()).color;

        let mut shadow_l = l * (1.0 - self.k);
        let mut highlight_l = l + (1.0 - l) * self.k;
        if l < NEAR_BLACK {
            shadow_l = shadow_l.max(SHADOW_FLOOR);
        }
        if l > NEAR_WHITE {
            highlight_l = highlight_l.min(HIGHLIGHT_CEIL);
        }
        // The floor and ceiling can land on the wrong side of the source.
        if shadow_l >= l {
            shadow_l = l * 0.5;
        }
        if highlight_l <= l {
            highlight_l = (l + 1.0) * 0.5;
        }

        let shadow_delta = l - shadow_l;
        let highlight_delta = highlight_l - l;
        if shadow_delta - highlight_delta > MAX_DELTA_SKEW {
            shadow_l = l - (highlight_delta + MAX_DELTA_SKEW);
        } else if highlight_delta - shadow_delta > MAX_DELTA_SKEW {
            highlight_l = l + (shadow_delta + MAX_DELTA_SKEW);
        }

        let shadow = Lch {
            l: shadow_l,
            c: lch.c * SHADOW_CHROMA_SCALE,
            h: lch.h,
        };
        let highlight = Lch {
            l: highlight_l,
            c: lch.c * HIGHLIGHT_CHROMA_SCALE,
            h: lch.h,
        };

        ShadowHighlightPair {
            anchor,
            shadow: fit_to_gamut(shadow.to_perceptual()).color,
            highlight: fit_to_gamut(highlight.to_perceptual()).color,
        }
    }
}
