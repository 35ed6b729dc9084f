//! Reaction and nucleation pass.
//!
//! Diffusing voxels react with compatible neighbours: sulfates grow
//! ettringite on aluminate surfaces, aluminate converts ettringite to
//! monosulfate once the sulfate pool is dry, portlandite is consumed by
//! pozzolanic and slag surfaces, fly ash glass forms stratlingite on
//! portlandite, chloride and carbonate attack the AFm phases, and sulfate is
//! absorbed by C-S-H. Surviving walkers may nucleate homogeneously.
//!
//! The event constants implement the volumetric stoichiometries of the phase
//! catalogue on a per-contact basis; fractional volumes are realised as
//! probabilities so the balance holds in expectation.

use super::{HydrationEngine, HydrationError};
use crate::phase::Phase;

// Ettringite growth on a gypsum basis:
// 1 gypsum + 0.40 C3A + 2.10 water -> 3.30 ettringite.
const ETTR_ALUMINATE_FRACTION: f64 = 0.40;
const ETTR_EXTRA_VOLUME: f64 = 1.90;
const ETTR_WATER: f64 = 2.10;

// Ettringite to monosulfate on an ettringite basis:
// 1 ettringite + 0.2424 C3A + 0.098 water -> 1.278 AFm.
const AFM_ALUMINATE_FRACTION: f64 = 0.2424;
const AFM_SITE_PROBABILITY: f64 = 0.278;
const AFM_WATER: f64 = 0.098;

// Pozzolanic reaction on a silica basis:
// 1 silica + 1.33 CH + 1.85 water -> 3.73 pozzolanic C-S-H.
const POZZ_EXTRA_VOLUME: f64 = 1.73;
const POZZ_WATER: f64 = 1.85;

// Slag conversion on a slag basis, CH mediated.
const SLAG_EXTRA_VOLUME: f64 = 0.35;
const SLAG_WATER: f64 = 1.30;
const SLAG_BRUCITE_PROBABILITY: f64 = 0.04;
const SLAG_MS_PROBABILITY: f64 = 0.02;

// Stratlingite from glass on portlandite.
const STRAT_ASG_EXTRA: f64 = 0.26;
const STRAT_ASG_WATER: f64 = 0.70;
const STRAT_CAS2_CH_FRACTION: f64 = 0.67;
const STRAT_CAS2_EXTRA: f64 = 0.18;
const STRAT_CAS2_WATER: f64 = 0.60;

// Friedel's salt formation.
const FRIEDEL_AFM_FRACTION: f64 = 0.52;
const FRIEDEL_AFM_SITE_PROBABILITY: f64 = 0.79;
const FRIEDEL_C3A_FRACTION: f64 = 0.30;

impl HydrationEngine {
    /// Scans the diffusing voxels in shuffled order, fires at most one
    /// reaction per walker against a random neighbour, then offers
    /// homogeneous nucleation to the survivors.
    pub(super) fn reaction_pass(&mut self) -> Result<(), HydrationError> {
        let num = self.lattice.num_voxels();
        let mut walkers = std::mem::take(&mut self.ws.walkers);
        walkers.clear();
        for idx in 0..num {
            if self.lattice.at_idx(idx).is_diffusing() {
                walkers.push(idx as u32);
            }
        }
        self.rng.shuffle(&mut walkers);

        for slot in 0..walkers.len() {
            let idx = walkers[slot] as usize;
            let species = self.lattice.at_idx(idx);
            if !species.is_diffusing() {
                continue;
            }

            let k0 = self.rng.next_index(6);
            let mut reacted = false;
            for step in 0..6 {
                let neighbour = self.lattice.neighbour6_idx(idx, (k0 + step) % 6);
                if self.try_react(idx, species, neighbour)? {
                    reacted = true;
                    break;
                }
            }
            if reacted {
                continue;
            }

            if let Some(nucleation) = self.params.nucleation(species) {
                let age = self.lattice.diff_age_mut()[idx];
                if age >= nucleation.min_age {
                    let pool = self.budget.count(species) as f64;
                    let p = nucleation.amplitude * (-pool / nucleation.scale).exp();
                    if self.rng.chance(p) {
                        self.deposit(idx, species)?;
                    }
                }
            }
        }

        self.ws.walkers = walkers;
        Ok(())
    }

    /// Fires the reaction between a diffusing voxel and one neighbour, if
    /// the pair is compatible. Returns whether anything happened.
    fn try_react(
        &mut self,
        idx: usize,
        species: Phase,
        neighbour: usize,
    ) -> Result<bool, HydrationError> {
        use Phase::*;
        let partner = self.lattice.at_idx(neighbour);
        match (species, partner) {
            // Sulfates on aluminate surfaces grow ettringite.
            (DiffGyp | DiffAnh | DiffHem, C3A | OC3A) => {
                self.grow_ettringite(idx, species, neighbour, partner, Ettr)?;
                Ok(true)
            }
            (DiffGyp | DiffAnh | DiffHem, C4AF) => {
                self.grow_ettringite(idx, species, neighbour, partner, EttrC4AF)?;
                // The ferrite also sheds iron hydroxide and lime.
                self.spawn_diffuser(neighbour, DiffFH3);
                Ok(true)
            }
            // A wandering aluminate on a sulfate surface, same chemistry.
            (DiffC3A | DiffC4A, Gypsum | SecondaryGyp | AbsorbedGyp) => {
                let product = if species == DiffC4A { EttrC4AF } else { Ettr };
                self.consume_diffuser(idx, species)?;
                self.consume_solid(partner);
                self.set_product(neighbour, product);
                self.set_product(idx, product);
                self.grow_volume(neighbour, product, ETTR_EXTRA_VOLUME);
                self.water_consumed += ETTR_WATER;
                Ok(true)
            }
            // Sulfate starvation: aluminate converts ettringite to AFm.
            (DiffC3A, Ettr | EttrC4AF) => {
                if self.budget.sulfate_pool() > 0
                    || !self.rng.chance(self.params.afm_conversion_probability)
                {
                    return Ok(false);
                }
                self.consume_solid(partner);
                self.set_product(neighbour, Afm);
                if self.rng.chance(AFM_ALUMINATE_FRACTION) {
                    self.consume_diffuser(idx, species)?;
                    if self.rng.chance(AFM_SITE_PROBABILITY) {
                        self.set_product(idx, Afm);
                    } else {
                        self.clear_to_porosity(idx);
                    }
                }
                self.water_consumed += AFM_WATER;
                Ok(true)
            }
            // Pozzolanic silica consumes portlandite from solution.
            (DiffCH, AmSil | SilicaFume) => {
                if !self.rng.chance(self.pdiss[partner as usize]) {
                    return Ok(false);
                }
                if self.partially_dissolves(neighbour) {
                    return Ok(true);
                }
                self.consume_diffuser(idx, species)?;
                self.consume_solid(partner);
                self.set_product(neighbour, PozzCSH);
                self.set_product(idx, PozzCSH);
                self.grow_volume(neighbour, PozzCSH, POZZ_EXTRA_VOLUME);
                self.water_consumed += POZZ_WATER;
                Ok(true)
            }
            // Slag hydration, CH mediated, with traces of magnesium phases.
            (DiffCH, Slag) => {
                if !self.rng.chance(self.pdiss[Slag as usize]) {
                    return Ok(false);
                }
                self.consume_diffuser(idx, species)?;
                self.consume_solid(partner);
                self.set_product(neighbour, SlagCSH);
                self.set_product(idx, SlagCSH);
                self.grow_volume(neighbour, SlagCSH, SLAG_EXTRA_VOLUME);
                if self.rng.chance(SLAG_BRUCITE_PROBABILITY) {
                    self.grow_product(neighbour, Brucite);
                }
                if self.rng.chance(SLAG_MS_PROBABILITY) {
                    self.grow_product(neighbour, MS);
                }
                self.water_consumed += SLAG_WATER;
                Ok(true)
            }
            // Fly ash glass on portlandite forms stratlingite.
            (DiffASG, CH) => {
                self.consume_diffuser(idx, species)?;
                self.consume_solid(partner);
                self.set_product(neighbour, Strat);
                self.set_product(idx, Strat);
                self.grow_volume(neighbour, Strat, STRAT_ASG_EXTRA);
                self.water_consumed += STRAT_ASG_WATER;
                Ok(true)
            }
            (DiffCAS2, CH) => {
                self.consume_diffuser(idx, species)?;
                self.set_product(idx, Strat);
                if self.rng.chance(STRAT_CAS2_CH_FRACTION) {
                    self.consume_solid(partner);
                    self.set_product(neighbour, Strat);
                }
                self.grow_volume(idx, Strat, STRAT_CAS2_EXTRA);
                self.water_consumed += STRAT_CAS2_WATER;
                Ok(true)
            }
            // Chloride attack on the aluminates.
            (DiffCaCl2, Afm) => {
                self.consume_diffuser(idx, species)?;
                self.set_product(idx, Friedel);
                if self.rng.chance(FRIEDEL_AFM_FRACTION) {
                    self.consume_solid(partner);
                    if self.rng.chance(FRIEDEL_AFM_SITE_PROBABILITY) {
                        self.set_product(neighbour, Friedel);
                    } else {
                        self.clear_to_porosity(neighbour);
                    }
                }
                Ok(true)
            }
            (DiffCaCl2, C3A | OC3A) => {
                if !self.rng.chance(FRIEDEL_C3A_FRACTION) {
                    return Ok(false);
                }
                self.consume_diffuser(idx, species)?;
                self.consume_solid(partner);
                self.set_product(idx, Friedel);
                self.set_product(neighbour, Friedel);
                Ok(true)
            }
            // Carbonate converts monosulfate to the carboaluminate.
            (DiffCaCO3, Afm) => {
                self.consume_diffuser(idx, species)?;
                self.consume_solid(partner);
                self.set_product(neighbour, AfmC);
                self.clear_to_porosity(idx);
                Ok(true)
            }
            // Sulfate absorption onto C-S-H surfaces.
            (DiffGyp, CSH) => {
                if !self.rng.chance(self.params.gypsum_absorption_probability) {
                    return Ok(false);
                }
                self.consume_diffuser(idx, species)?;
                self.lattice.set_idx(idx, AbsorbedGyp);
                Ok(true)
            }
            // Aluminate and sulfate walkers meeting in the pore space.
            (DiffC3A, DiffGyp) | (DiffGyp, DiffC3A) => {
                let (gyp_idx, c3a_idx) = if species == DiffGyp {
                    (idx, neighbour)
                } else {
                    (neighbour, idx)
                };
                self.consume_diffuser(gyp_idx, DiffGyp)?;
                self.set_product(gyp_idx, Ettr);
                if self.rng.chance(ETTR_ALUMINATE_FRACTION) {
                    self.consume_diffuser(c3a_idx, DiffC3A)?;
                    self.set_product(c3a_idx, Ettr);
                }
                self.grow_volume(gyp_idx, Ettr, ETTR_EXTRA_VOLUME);
                self.water_consumed += ETTR_WATER;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Ettringite growth with a solid aluminate partner, on the sulfate
    /// basis.
    fn grow_ettringite(
        &mut self,
        diff_idx: usize,
        species: Phase,
        solid_idx: usize,
        solid: Phase,
        product: Phase,
    ) -> Result<(), HydrationError> {
        self.consume_diffuser(diff_idx, species)?;
        self.set_product(diff_idx, product);
        if self.rng.chance(ETTR_ALUMINATE_FRACTION) {
            self.consume_solid(solid);
            self.set_product(solid_idx, product);
        }
        self.grow_volume(diff_idx, product, ETTR_EXTRA_VOLUME);
        self.water_consumed += ETTR_WATER;
        Ok(())
    }

    /// Books the consumption of a diffusing voxel against its budget.
    fn consume_diffuser(&mut self, idx: usize, species: Phase) -> Result<(), HydrationError> {
        debug_assert!(self.lattice.at_idx(idx) == species);
        if !self.budget.decrement(species) {
            return Err(HydrationError::BudgetUnderflow {
                cycle: self.cycle(),
                species,
            });
        }
        Ok(())
    }

    fn clear_to_porosity(&mut self, idx: usize) {
        self.lattice.set_idx(idx, Phase::Porosity);
        self.lattice.diff_age_mut()[idx] = 0;
    }

    /// Grows `expected` voxel volumes of product around `origin`, realising
    /// the fractional part as a probability.
    fn grow_volume(&mut self, origin: usize, product: Phase, expected: f64) {
        let mut remaining = expected;
        while remaining > 0.0 {
            let grow = if remaining >= 1.0 {
                true
            } else {
                self.rng.chance(remaining)
            };
            if grow {
                self.grow_product(origin, product);
            }
            remaining -= 1.0;
        }
    }

    /// Incongruent glass dissolution: returns true while the voxel still has
    /// soluble sub-steps left, decrementing one.
    fn partially_dissolves(&mut self, idx: usize) -> bool {
        let left = self.lattice.soluble_left_mut();
        if left[idx] > 1 {
            left[idx] -= 1;
            true
        } else {
            left[idx] = 0;
            false
        }
    }
}
