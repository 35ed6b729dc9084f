//! Diffusing-species budget: per-species counters that must equal the number
//! of matching diffusion-marker voxels on the lattice at all times.

use crate::lattice::Lattice;
use crate::phase::Phase;

/// Number of diffusing species tracked.
pub const NUM_SPECIES: usize = 13;

/// Counters of voxels currently in diffusion mode, one per species.
#[derive(Clone, Debug, Default)]
pub struct SpeciesBudget {
    counts: [u64; NUM_SPECIES],
}

impl SpeciesBudget {
    #[inline]
    pub fn count(&self, species: Phase) -> u64 {
        self.counts[species.diffuser_index().expect("not a diffusing species")]
    }

    /// Total diffusing voxels across all species.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Summed count of the sulfate-bearing species.
    pub fn sulfate_pool(&self) -> u64 {
        self.count(Phase::DiffGyp) + self.count(Phase::DiffAnh) + self.count(Phase::DiffHem)
    }

    #[inline]
    pub fn increment(&mut self, species: Phase) {
        self.counts[species.diffuser_index().expect("not a diffusing species")] += 1;
    }

    /// Decrements the species counter; returns false on underflow so the
    /// engine can surface the invariant violation with context.
    #[inline]
    #[must_use]
    pub fn decrement(&mut self, species: Phase) -> bool {
        let slot = species.diffuser_index().expect("not a diffusing species");
        if self.counts[slot] == 0 {
            return false;
        }
        self.counts[slot] -= 1;
        true
    }

    /// Recounts the lattice and compares against the ledger; returns the
    /// first mismatching species. Used by the engine's invariant check.
    pub fn verify(&self, lattice: &Lattice) -> Result<(), Phase> {
        let mut observed = [0u64; NUM_SPECIES];
        for phase in lattice.phases() {
            if let Some(slot) = phase.diffuser_index() {
                observed[slot] += 1;
            }
        }
        for (slot, species) in Phase::diffusers().iter().enumerate() {
            if observed[slot] != self.counts[slot] {
                return Err(*species);
            }
        }
        Ok(())
    }
}
