//! Pore solution model: alkali inventory and the pH factor applied to
//! dissolution probabilities.
//!
//! The model is deliberately compact. Dissolved alkali sulfates raise the
//! solution alkalinity above the portlandite baseline; a higher pH speeds up
//! clinker dissolution and suppresses sulfate solubility.

use crate::phase::Phase;

/// Portlandite-saturated baseline pH.
const BASE_PH: f64 = 12.5;

/// Alkali inventory of the pore solution, in voxel-volume equivalents.
#[derive(Clone, Debug, Default)]
pub struct Solution {
    potassium: f64,
    sodium: f64,
}

impl Solution {
    /// Records the dissolution of one alkali sulfate voxel.
    pub fn record_alkali(&mut self, phase: Phase) {
        match phase {
            Phase::K2SO4 => self.potassium += 1.0,
            Phase::Na2SO4 => self.sodium += 1.0,
            _ => {}
        }
    }

    /// Estimated pH given the current water-filled porosity volume.
    pub fn ph(&self, water_voxels: u64) -> f64 {
        if water_voxels == 0 {
            return BASE_PH;
        }
        // Sodium carries more alkalinity per unit carrier volume (smaller
        // molar volume of the sulfate).
        let alkali = self.potassium + 1.24 * self.sodium;
        let concentration = alkali / water_voxels as f64;
        BASE_PH + (1.0 + 400.0 * concentration).log10()
    }

    /// Multiplier applied to the base dissolution probability of `phase`.
    ///
    /// Clinker dissolves faster and calcium sulfates dissolve slower as the
    /// alkalinity rises; everything else is unaffected.
    pub fn ph_factor(&self, phase: Phase, water_voxels: u64) -> f64 {
        let excess = (self.ph(water_voxels) - BASE_PH).clamp(0.0, 1.5);
        if phase.is_clinker() {
            1.0 + 0.2 * excess
        } else if matches!(
            phase,
            Phase::Gypsum
                | Phase::AbsorbedGyp
                | Phase::SecondaryGyp
                | Phase::Hemihyd
                | Phase::Anhydrite
        ) {
            (1.0 - 0.25 * excess).max(0.5)
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_without_alkali() {
        let solution = Solution::default();
        assert_eq!(solution.ph(10_000), BASE_PH);
        assert_eq!(solution.ph_factor(Phase::C3S, 10_000), 1.0);
    }

    #[test]
    fn alkali_raises_ph_and_splits_factors() {
        let mut solution = Solution::default();
        for _ in 0..200 {
            solution.record_alkali(Phase::K2SO4);
        }
        let ph = solution.ph(10_000);
        assert!(ph > BASE_PH && ph < 14.5, "ph {ph}");
        assert!(solution.ph_factor(Phase::C3S, 10_000) > 1.0);
        assert!(solution.ph_factor(Phase::Gypsum, 10_000) < 1.0);
        assert_eq!(solution.ph_factor(Phase::CSH, 10_000), 1.0);
    }

    #[test]
    fn dry_system_stays_at_baseline() {
        let mut solution = Solution::default();
        solution.record_alkali(Phase::Na2SO4);
        assert_eq!(solution.ph(0), BASE_PH);
    }
}
