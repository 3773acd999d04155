//! Harmonic palette rules evaluated in the cylindrical OKLab view.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    color::{fit_to_gamut, Lch, PerceptualColor},
    PaletteError,
};

/// Names of harmony slots, in set order.
pub const SLOT_NAMES: [&str; 6] = [
    "primary",
    "secondary",
    "tertiary",
    "quaternary",
    "quinary",
    "senary",
];

const MONO_LIGHTNESS_STEP: f64 = 0.12;
const MONO_CHROMA_STEP: f64 = 0.08;
/// Upper bound on chroma for generated and modulated colors.
pub const MAX_CHROMA: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HarmonyRule {
    #[default]
    Analogous,
    Complementary,
    SplitComplementary,
    Triadic,
    Tetradic,
    Monochromatic,
}

impl HarmonyRule {
    pub const ALL: [HarmonyRule; 6] = [
        Self::Analogous,
        Self::Complementary,
        Self::SplitComplementary,
        Self::Triadic,
        Self::Tetradic,
        Self::Monochromatic,
    ];

    /// Hue offsets in degrees, base first.
    pub fn hue_offsets(self) -> &'static [f64] {
        match self {
            Self::Analogous => &[0.0, -30.0, 30.0],
            Self::Complementary => &[0.0, 180.0],
            Self::SplitComplementary => &[0.0, 150.0, 210.0],
            Self::Triadic => &[0.0, 120.0, 240.0],
            Self::Tetradic => &[0.0, 90.0, 180.0, 270.0],
            Self::Monochromatic => &[0.0, 0.0, 0.0, 0.0, 0.0],
        }
    }

    /// Number of members the rule produces.
    pub fn cardinality(self) -> usize {
        self.hue_offsets().len()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Analogous => "analogous",
            Self::Complementary => "complementary",
            Self::SplitComplementary => "split-complementary",
            Self::Triadic => "triadic",
            Self::Tetradic => "tetradic",
            Self::Monochromatic => "monochromatic",
        }
    }
}

impl fmt::Display for HarmonyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HarmonyRule {
    type Err = PaletteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|rule| rule.name() == wanted)
            .ok_or_else(|| PaletteError::msg(format!("unknown harmony rule `{s}`")))
    }
}

/// Ordered harmony members keyed by slot name. Built fresh per run.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonySet {
    rule: HarmonyRule,
    members: Vec<PerceptualColor>,
    /// Per member: gamut reduction ran out of steps and the color was clamped.
    exhausted: Vec<bool>,
}

impl HarmonySet {
    pub fn rule(&self) -> HarmonyRule {
        self.rule
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn colors(&self) -> &[PerceptualColor] {
        &self.members
    }

    pub fn get(&self, slot: &str) -> Option<PerceptualColor> {
        let index = SLOT_NAMES.iter().position(|name| *name == slot)?;
        self.members.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, PerceptualColor)> + '_ {
        SLOT_NAMES.iter().copied().zip(self.members.iter().copied())
    }

    /// Members whose gamut reduction ran out of steps and were clamped.
    pub fn exhausted_reductions(&self) -> usize {
        self.exhausted.iter().filter(|flag| **flag).count()
    }

    /// Keeps at most `cardinality` members (never fewer than one).
    pub fn truncated(&self, cardinality: usize) -> HarmonySet {
        let keep = cardinality.max(1).min(self.members.len());
        HarmonySet {
            rule: self.rule,
            members: self.members[..keep].to_vec(),
            exhausted: self.exhausted[..keep].to_vec(),
        }
    }

    /// Builds a new set by transforming every member, re-fitting each into gamut.
    pub fn map_colors(&self, mut f: impl FnMut(PerceptualColor) -> PerceptualColor) -> HarmonySet {
        let (members, exhausted) = self
            .members
            .iter()
            .zip(&self.exhausted)
            .map(|(color, was_exhausted)| {
                let fit = fit_to_gamut(f(*color));
                (fit.color, *was_exhausted || fit.exhausted)
            })
            .unzip();

        HarmonySet {
            rule: self.rule,
            members,
            exhausted,
        }
    }
}

/// Generates the harmony set for `base` under `rule`.
///
/// Every member is fitted into the displayable gamut before it is stored,
/// so mapping any member to sRGB never clips.
pub fn generate(base: PerceptualColor, rule: HarmonyRule) -> HarmonySet {
    let lch = base.to_cylindrical();

    let raw: Vec<Lch> = match rule {
        HarmonyRule::Monochromatic => [0.0, -1.0, 1.0, -2.0, 2.0]
            .into_iter()
            .map(|step: f64| Lch {
                l: (lch.l + step * MONO_LIGHTNESS_STEP).clamp(0.0, 1.0),
                c: (lch.c + step * MONO_CHROMA_STEP).clamp(0.0, MAX_CHROMA),
                h: lch.h,
            })
            .collect(),
        _ => rule
            .hue_offsets()
            .iter()
            .map(|offset| lch.rotate(*offset))
            .collect(),
    };

    let (members, exhausted) = raw
        .into_iter()
        .map(|member| {
            let fit = fit_to_gamut(member.to_perceptual());
            if fit.exhausted {
                tracing::debug!(%rule, "gamut reduction exhausted; member clamped");
            }
            (fit.color, fit.exhausted)
        })
        .unzip();

    HarmonySet {
        rule,
        members,
        exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{hue_delta, to_perceptual, RgbColor};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn lavender() -> PerceptualColor {
        to_perceptual(RgbColor::parse_hex("#c6a0f6").unwrap())
    }

    #[test]
    fn cardinalities_match_rules() {
        let base = lavender();
        let sizes: Vec<usize> = HarmonyRule::ALL
            .iter()
            .map(|rule| generate(base, *rule).len())
            .collect();
        assert_eq!(sizes, vec![3, 2, 3, 3, 4, 5]);
        assert!(sizes.iter().all(|n| *n <= SLOT_NAMES.len()));
    }

    #[test]
    fn triadic_members_sit_120_degrees_apart() {
        let set = generate(lavender(), HarmonyRule::Triadic);
        let hues: Vec<f64> = set.colors().iter().map(|c| c.hue()).collect();

        for (a, b) in [(0, 1), (1, 2), (2, 0)] {
            let delta = hue_delta(hues[a], hues[b]).rem_euclid(360.0);
            assert!((delta - 120.0).abs() <= 1.0, "{hues:?}");
        }
        assert!(set.colors().iter().all(|c| (0.0..=1.0).contains(&c.l)));
    }

    #[test]
    fn primary_slot_is_base() {
        let base = lavender();
        let set = generate(base, HarmonyRule::Complementary);
        let primary = set.get("primary").unwrap();
        assert_eq!(primary.to_rgb(), base.to_rgb());
        assert!(set.get("tertiary").is_none());
    }

    #[test]
    fn members_stay_in_gamut_for_random_bases() {
        let mut rng = StdRng::seed_from_u64(42);
        for rule in HarmonyRule::ALL {
            for _ in 0..1_000 {
                let base = to_perceptual(RgbColor::new(rng.random(), rng.random(), rng.random()));
                let set = generate(base, rule);
                for (slot, member) in set.iter() {
                    assert!(member.is_in_gamut(), "{rule} {slot} {member:?}");
                }
                assert_eq!(set.exhausted_reductions(), 0);
            }
        }
    }

    #[test]
    fn monochromatic_keeps_hue_and_varies_lightness() {
        let base = lavender();
        let set = generate(base, HarmonyRule::Monochromatic);
        let lightness: Vec<f64> = set.colors().iter().map(|c| c.l).collect();

        assert!(lightness[1] < lightness[0] && lightness[0] < lightness[2]);
        assert!((lightness[0] - lightness[1] - MONO_LIGHTNESS_STEP).abs() < 1e-9);
        for member in set.colors() {
            if member.chroma() > 0.01 {
                assert!(hue_delta(base.hue(), member.hue()).abs() < 0.5);
            }
            assert!(member.chroma() <= MAX_CHROMA);
        }
    }

    #[test]
    fn truncation_keeps_leading_slots() {
        let set = generate(lavender(), HarmonyRule::Monochromatic).truncated(3);
        assert_eq!(set.len(), 3);
        assert_eq!(set.truncated(0).len(), 1);
        assert_eq!(set.truncated(10).len(), 3);
    }

    #[test]
    fn truncation_recounts_exhausted_members() {
        let broken = PerceptualColor::new(f64::NAN, 0.1, 0.1);
        let set = generate(broken, HarmonyRule::Tetradic);
        assert_eq!(set.exhausted_reductions(), 4);
        assert_eq!(set.truncated(3).exhausted_reductions(), 3);
        assert_eq!(set.truncated(1).exhausted_reductions(), 1);

        let remapped = set.truncated(2).map_colors(|color| color);
        assert_eq!(remapped.exhausted_reductions(), 2);
    }

    #[test]
    fn parses_rule_names() {
        assert_eq!(
            "Split_Complementary".parse::<HarmonyRule>().unwrap(),
            HarmonyRule::SplitComplementary
        );
        assert!("pentadic".parse::<HarmonyRule>().is_err());
    }
}
