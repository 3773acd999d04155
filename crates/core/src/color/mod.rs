//! Conversions between device sRGB and the OKLab perceptual space.
//!
//! OKLab (L, a, b) is used for interpolation and distances; its cylindrical
//! form (L, C, h) is used for hue rotation and chroma adjustments. All
//! functions here are pure.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::PaletteError;

/// Maximum number of chroma reduction steps when fitting a color into gamut.
pub const GAMUT_REDUCTION_STEPS: u32 = 8;

/// Tolerance on linear channels when deciding whether a color is displayable.
const GAMUT_EPSILON: f64 = 1e-6;

/// 24-bit device color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    /// Mid-gray substituted for any color that fails to parse.
    pub const NEUTRAL: RgbColor = RgbColor::new(128, 128, 128);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rgb`, `#rrggbb`, or the same without the leading `#`.
    pub fn parse_hex(input: &str) -> Option<Self> {
        let digits = input.trim().trim_start_matches('#');
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        match digits.len() {
            3 => {
                let mut channels = digits.chars().map(|c| {
                    let v = c.to_digit(16).unwrap_or(0) as u8;
                    v * 16 + v
                });
                Some(Self::new(channels.next()?, channels.next()?, channels.next()?))
            }
            6 => {
                let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
                Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
            }
            _ => None,
        }
    }

    /// Parses a color for a named role, reporting failures as
    /// [`PaletteError::InvalidColorInput`].
    pub fn parse_role(role: &str, input: &str) -> Result<Self, PaletteError> {
        Self::parse_hex(input).ok_or_else(|| PaletteError::InvalidColorInput {
            role: role.to_string(),
            input: input.to_string(),
        })
    }

    /// Lower-case `#rrggbb`.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Comma separated channel triple, e.g. `198,160,246`.
    pub fn to_rgb_triple(self) -> String {
        format!("{},{},{}", self.r, self.g, self.b)
    }

    pub fn to_perceptual(self) -> PerceptualColor {
        to_perceptual(self)
    }
}

impl FromStr for RgbColor {
    type Err = PaletteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_role("hex", s)
    }
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A color in OKLab. `l` is kept in [0, 1] by every constructor in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerceptualColor {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl PerceptualColor {
    pub const fn new(l: f64, a: f64, b: f64) -> Self {
        Self { l, a, b }
    }

    pub fn to_rgb(self) -> RgbColor {
        to_rgb(self)
    }

    pub fn to_cylindrical(self) -> Lch {
        to_cylindrical(self)
    }

    pub fn chroma(self) -> f64 {
        self.a.hypot(self.b)
    }

    pub fn hue(self) -> f64 {
        self.to_cylindrical().h
    }

    /// True when the color maps to sRGB without any channel clamping.
    pub fn is_in_gamut(self) -> bool {
        if !(self.l.is_finite() && self.a.is_finite() && self.b.is_finite()) {
            return false;
        }
        oklab_to_linear(self)
            .iter()
            .all(|c| (-GAMUT_EPSILON..=1.0 + GAMUT_EPSILON).contains(c))
    }
}

/// Cylindrical view of OKLab. `h` is in degrees, [0, 360).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Lch {
    pub l: f64,
    pub c: f64,
    pub h: f64,
}

impl Lch {
    pub const fn new(l: f64, c: f64, h: f64) -> Self {
        Self { l, c, h }
    }

    pub fn to_perceptual(self) -> PerceptualColor {
        from_cylindrical(self)
    }

    /// Returns a copy with the hue rotated by `degrees`, wrapped into [0, 360).
    pub fn rotate(self, degrees: f64) -> Self {
        Self {
            h: normalize_hue(self.h + degrees),
            ..self
        }
    }
}

/// Converts sRGB to OKLab through linear light.
pub fn to_perceptual(rgb: RgbColor) -> PerceptualColor {
    let r = srgb_to_linear(rgb.r as f64 / 255.0);
    let g = srgb_to_linear(rgb.g as f64 / 255.0);
    let b = srgb_to_linear(rgb.b as f64 / 255.0);

    let l = (0.412_221_470_8 * r + 0.536_332_536_3 * g + 0.051_445_992_9 * b).cbrt();
    let m = (0.211_903_498_2 * r + 0.680_699_545_1 * g + 0.107_396_956_6 * b).cbrt();
    let s = (0.088_302_461_9 * r + 0.281_718_837_6 * g + 0.629_978_700_5 * b).cbrt();

    PerceptualColor {
        l: (0.210_454_255_3 * l + 0.793_617_785_0 * m - 0.004_072_046_8 * s).clamp(0.0, 1.0),
        a: 1.977_998_495_1 * l - 2.428_592_205_0 * m + 0.450_593_709_9 * s,
        b: 0.025_904_037_1 * l + 0.782_771_766_2 * m - 0.808_675_766_0 * s,
    }
}

/// Converts OKLab back to sRGB. Out-of-gamut channels are clamped.
pub fn to_rgb(color: PerceptualColor) -> RgbColor {
    let [r, g, b] = oklab_to_linear(color);
    let encode = |c: f64| {
        if c.is_nan() {
            return 0;
        }
        (linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    RgbColor::new(encode(r), encode(g), encode(b))
}

pub fn to_cylindrical(color: PerceptualColor) -> Lch {
    Lch {
        l: color.l,
        c: color.chroma(),
        h: normalize_hue(color.b.atan2(color.a).to_degrees()),
    }
}

pub fn from_cylindrical(lch: Lch) -> PerceptualColor {
    let h = lch.h.to_radians();
    PerceptualColor {
        l: lch.l.clamp(0.0, 1.0),
        a: lch.c * h.cos(),
        b: lch.c * h.sin(),
    }
}

/// Component-wise linear mix in OKLab. `t` is clamped to [0, 1].
pub fn interpolate(from: PerceptualColor, to: PerceptualColor, t: f64) -> PerceptualColor {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    PerceptualColor {
        l: from.l + (to.l - from.l) * t,
        a: from.a + (to.a - from.a) * t,
        b: from.b + (to.b - from.b) * t,
    }
}

/// Euclidean distance in OKLab.
pub fn perceptual_distance(a: PerceptualColor, b: PerceptualColor) -> f64 {
    let dl = a.l - b.l;
    let da = a.a - b.a;
    let db = a.b - b.b;
    (dl * dl + da * da + db * db).sqrt()
}

/// Wraps any angle into [0, 360).
pub fn normalize_hue(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let h = degrees.rem_euclid(360.0);
    // rem_euclid can round tiny negatives up to exactly 360.0
    if h >= 360.0 {
        0.0
    } else {
        h
    }
}

/// Signed shortest angular distance from `from` to `to`, in (-180, 180].
pub fn hue_delta(from: f64, to: f64) -> f64 {
    let d = (to - from).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Outcome of [`fit_to_gamut`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GamutFit {
    pub color: PerceptualColor,
    /// Reduction steps spent; zero when the input was already displayable.
    pub steps: u32,
    /// Set when no displayable chroma was found and the color was clamped.
    pub exhausted: bool,
}

/// Reduces chroma at constant lightness and hue until the color is
/// displayable. The search bisects chroma and is capped at
/// [`GAMUT_REDUCTION_STEPS`]; the returned color is always the largest
/// in-gamut chroma found.
pub fn fit_to_gamut(color: PerceptualColor) -> GamutFit {
    let lch = to_cylindrical(PerceptualColor {
        l: if color.l.is_finite() { color.l.clamp(0.0, 1.0) } else { color.l },
        ..color
    });
    let start = from_cylindrical(lch);
    if start.is_in_gamut() {
        return GamutFit {
            color: start,
            steps: 0,
            exhausted: false,
        };
    }

    let gray = PerceptualColor::new(lch.l, 0.0, 0.0);
    if !gray.is_in_gamut() {
        return GamutFit {
            color: to_perceptual(to_rgb(gray)),
            steps: GAMUT_REDUCTION_STEPS,
            exhausted: true,
        };
    }

    let mut lo = 0.0;
    let mut hi = lch.c;
    for _ in 0..GAMUT_REDUCTION_STEPS {
        let mid = (lo + hi) * 0.5;
        if from_cylindrical(Lch { c: mid, ..lch }).is_in_gamut() {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    GamutFit {
        color: from_cylindrical(Lch { c: lo, ..lch }),
        steps: GAMUT_REDUCTION_STEPS,
        exhausted: false,
    }
}

fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f64) -> f64 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn oklab_to_linear(color: PerceptualColor) -> [f64; 3] {
    let l = color.l + 0.396_337_777_4 * color.a + 0.215_803_757_3 * color.b;
    let m = color.l - 0.105_561_345_8 * color.a - 0.063_854_172_8 * color.b;
    let s = color.l - 0.089_484_177_5 * color.a - 1.291_485_548_0 * color.b;

    let (l, m, s) = (l * l * l, m * m * m, s * s * s);

    [
        4.076_741_662_1 * l - 3.307_711_591_3 * m + 0.230_969_929_2 * s,
        -1.268_438_004_6 * l + 2.609_757_401_1 * m - 0.341_319_396_5 * s,
        -0.004_196_086_3 * l - 0.703_418_614_7 * m + 1.707_614_701_0 * s,
    ]
}
