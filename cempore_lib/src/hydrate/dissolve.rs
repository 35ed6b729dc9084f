//! Dissolution pass: exposed soluble solids enter the diffusion pool.

use super::{HydrationEngine, HydrationError};
use crate::phase::Phase;

impl HydrationEngine {
    /// Walks every voxel in a shuffled order; exposed soluble solids convert
    /// to their diffusion marker with the cycle's scaled probability, and
    /// the stoichiometric companions are spawned into nearby pore space.
    pub(super) fn dissolution_pass(&mut self) -> Result<(), HydrationError> {
        let num = self.lattice.num_voxels();
        let mut order = std::mem::take(&mut self.ws.visit_order);
        order.clear();
        order.extend(0..num as u32);
        self.rng.shuffle(&mut order);

        for slot in 0..order.len() {
            let idx = order[slot] as usize;
            let phase = self.lattice.at_idx(idx);
            let Some(rule) = phase.dissolution() else {
                continue;
            };
            if !self.is_exposed(idx) {
                continue;
            }
            if !self.rng.chance(self.pdiss[phase as usize]) {
                continue;
            }

            // Glassy fly ash voxels dissolve incongruently: they survive a
            // number of dissolution events before converting.
            if matches!(phase, Phase::ASG | Phase::CAS2) {
                let left = self.lattice.soluble_left_mut();
                if left[idx] > 1 {
                    left[idx] -= 1;
                    continue;
                }
                left[idx] = 0;
            }

            match rule.marker {
                Some(marker) => self.place_diffuser(idx, marker),
                None => self.lattice.set_idx(idx, Phase::Porosity),
            }
            self.solution.record_alkali(phase);
            self.water_consumed += rule.water;
            self.consume_solid(phase);

            for (species, expected) in rule.spawns {
                let mut remaining = *expected;
                while remaining > 0.0 {
                    let spawn = if remaining >= 1.0 {
                        true
                    } else {
                        self.rng.chance(remaining)
                    };
                    if spawn {
                        self.spawn_diffuser(idx, *species);
                    }
                    remaining -= 1.0;
                }
            }
        }

        self.ws.visit_order = order;
        Ok(())
    }

    /// A solid may dissolve only in contact with water-filled porosity or a
    /// diffusing voxel.
    pub(super) fn is_exposed(&self, idx: usize) -> bool {
        self.lattice
            .any_neighbour6(idx, |p| p == Phase::Porosity || p.is_diffusing())
    }
}
