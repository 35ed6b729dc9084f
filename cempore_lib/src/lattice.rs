//! Periodic 3-D voxel lattice and its auxiliary per-voxel fields.
//!
//! The lattice owns a single contiguous buffer of [`Phase`] tags with the
//! flat index convention `((x * Y) + y) * Z + z`. Neighbour queries wrap on
//! all three axes (toroidal topology). The spatial resolution in µm/voxel is
//! carried for reporting only; all algorithms operate in voxel units.

use crate::phase::{Phase, NUM_PHASES};

/// Offsets of the 6-neighbourhood (±x, ±y, ±z).
pub const OFFSETS6: [(i64, i64, i64); 6] = [
    (1, 0, 0),
    (-1, 0, 0),
    (0, 1, 0),
    (0, -1, 0),
    (0, 0, 1),
    (0, 0, -1),
];

/// Offsets of the full 26-neighbourhood.
pub const OFFSETS26: [(i64, i64, i64); 26] = [
    (-1, -1, -1),
    (-1, -1, 0),
    (-1, -1, 1),
    (-1, 0, -1),
    (-1, 0, 0),
    (-1, 0, 1),
    (-1, 1, -1),
    (-1, 1, 0),
    (-1, 1, 1),
    (0, -1, -1),
    (0, -1, 0),
    (0, -1, 1),
    (0, 0, -1),
    (0, 0, 1),
    (0, 1, -1),
    (0, 1, 0),
    (0, 1, 1),
    (1, -1, -1),
    (1, -1, 0),
    (1, -1, 1),
    (1, 0, -1),
    (1, 0, 0),
    (1, 0, 1),
    (1, 1, -1),
    (1, 1, 0),
    (1, 1, 1),
];

/// Per-phase voxel counts of a lattice state.
#[derive(Clone, Debug)]
pub struct PhaseCensus {
    counts: [u64; NUM_PHASES],
}

impl Default for PhaseCensus {
    fn default() -> Self {
        PhaseCensus {
            counts: [0; NUM_PHASES],
        }
    }
}

impl PhaseCensus {
    /// Voxel count of a single phase.
    #[inline]
    pub fn count(&self, phase: Phase) -> u64 {
        self.counts[phase as usize]
    }

    /// Sum over all phases; equals the lattice volume for any valid state.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Summed count of all phases matching the predicate.
    pub fn count_matching(&self, pred: impl Fn(Phase) -> bool) -> u64 {
        Phase::all()
            .iter()
            .filter(|p| pred(**p))
            .map(|p| self.count(*p))
            .sum()
    }

    /// Iterates over `(phase, count)` pairs with non-zero counts.
    pub fn iter(&self) -> impl Iterator<Item = (Phase, u64)> + '_ {
        Phase::all()
            .iter()
            .map(move |p| (*p, self.count(*p)))
            .filter(|(_, n)| *n > 0)
    }
}

/// The voxel grid. See the module documentation for the index convention.
///
/// Auxiliary fields (particle id, CSH age, fly-ash soluble count, diffusion
/// age) are materialised on first access and share the lattice lifetime.
#[derive(Debug)]
pub struct Lattice {
    dims: [usize; 3],
    resolution: f64,
    phases: Vec<Phase>,
    particle_ids: Option<Vec<u32>>,
    csh_age: Option<Vec<u8>>,
    soluble_left: Option<Vec<u8>>,
    diff_age: Option<Vec<u8>>,
}

impl Lattice {
    /// Creates a lattice of the given dimensions filled with water porosity.
    ///
    /// `resolution` is the voxel edge length in µm.
    pub fn new(dims: [usize; 3], resolution: f64) -> Self {
        assert!(dims.iter().all(|&d| d > 0), "empty lattice dimension");
        assert!(resolution > 0.0, "non-positive resolution");
        let num = dims[0] * dims[1] * dims[2];
        Self {
            dims,
            resolution,
            phases: vec![Phase::Porosity; num],
            particle_ids: None,
            csh_age: None,
            soluble_left: None,
            diff_age: None,
        }
    }

    /// Builds a lattice from an existing phase buffer (image file reader).
    pub fn from_phases(dims: [usize; 3], resolution: f64, phases: Vec<Phase>) -> Self {
        assert_eq!(phases.len(), dims[0] * dims[1] * dims[2]);
        let mut lattice = Self::new(dims, resolution);
        lattice.phases = phases;
        lattice
    }

    #[inline(always)]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline(always)]
    pub fn x_size(&self) -> usize {
        self.dims[0]
    }

    #[inline(always)]
    pub fn y_size(&self) -> usize {
        self.dims[1]
    }

    #[inline(always)]
    pub fn z_size(&self) -> usize {
        self.dims[2]
    }

    /// Voxel edge length in µm (reporting only).
    #[inline(always)]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Total number of voxels.
    #[inline(always)]
    pub fn num_voxels(&self) -> usize {
        self.phases.len()
    }

    /// Flat index of `(x, y, z)`. Callers obey `0 <= i < dim` on each axis.
    #[inline(always)]
    pub fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.dims[0] && y < self.dims[1] && z < self.dims[2]);
        (x * self.dims[1] + y) * self.dims[2] + z
    }

    /// Coordinates of a flat index.
    #[inline(always)]
    pub fn coords(&self, idx: usize) -> (usize, usize, usize) {
        debug_assert!(idx < self.phases.len());
        let z = idx % self.dims[2];
        let rest = idx / self.dims[2];
        (rest / self.dims[1], rest % self.dims[1], z)
    }

    #[inline(always)]
    pub fn at(&self, x: usize, y: usize, z: usize) -> Phase {
        self.phases[self.idx(x, y, z)]
    }

    #[inline(always)]
    pub fn at_idx(&self, idx: usize) -> Phase {
        self.phases[idx]
    }

    #[inline(always)]
    pub fn set(&mut self, x: usize, y: usize, z: usize, phase: Phase) {
        let i = self.idx(x, y, z);
        self.phases[i] = phase;
    }

    #[inline(always)]
    pub fn set_idx(&mut self, idx: usize, phase: Phase) {
        self.phases[idx] = phase;
    }

    /// Overwrites every voxel with `phase`.
    pub fn fill(&mut self, phase: Phase) {
        self.phases.fill(phase);
    }

    /// Wraps a possibly out-of-range coordinate onto the torus.
    #[inline(always)]
    pub fn wrap(&self, v: i64, axis: usize) -> usize {
        let d = self.dims[axis] as i64;
        (((v % d) + d) % d) as usize
    }

    /// The `k`-th 6-neighbour of `(x, y, z)` with periodic wrap.
    #[inline]
    pub fn neighbour6(&self, x: usize, y: usize, z: usize, k: usize) -> (usize, usize, usize) {
        let (dx, dy, dz) = OFFSETS6[k];
        (
            self.wrap(x as i64 + dx, 0),
            self.wrap(y as i64 + dy, 1),
            self.wrap(z as i64 + dz, 2),
        )
    }

    /// The `k`-th 26-neighbour of `(x, y, z)` with periodic wrap.
    #[inline]
    pub fn neighbour26(&self, x: usize, y: usize, z: usize, k: usize) -> (usize, usize, usize) {
        let (dx, dy, dz) = OFFSETS26[k];
        (
            self.wrap(x as i64 + dx, 0),
            self.wrap(y as i64 + dy, 1),
            self.wrap(z as i64 + dz, 2),
        )
    }

    /// Flat index of the `k`-th 6-neighbour of a flat index.
    #[inline]
    pub fn neighbour6_idx(&self, idx: usize, k: usize) -> usize {
        let (x, y, z) = self.coords(idx);
        let (nx, ny, nz) = self.neighbour6(x, y, z, k);
        self.idx(nx, ny, nz)
    }

    /// Flat index of the `k`-th 26-neighbour of a flat index.
    #[inline]
    pub fn neighbour26_idx(&self, idx: usize, k: usize) -> usize {
        let (x, y, z) = self.coords(idx);
        let (nx, ny, nz) = self.neighbour26(x, y, z, k);
        self.idx(nx, ny, nz)
    }

    /// Read-only view of the phase buffer in flat index order.
    #[inline]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Counts voxels per phase over the whole lattice.
    pub fn census(&self) -> PhaseCensus {
        let mut census = PhaseCensus::default();
        for phase in &self.phases {
            census.counts[*phase as usize] += 1;
        }
        census
    }

    /// True if any 6-neighbour of the voxel satisfies the predicate.
    #[inline]
    pub fn any_neighbour6(&self, idx: usize, pred: impl Fn(Phase) -> bool) -> bool {
        (0..6).any(|k| pred(self.at_idx(self.neighbour6_idx(idx, k))))
    }

    fn field_u8(slot: &mut Option<Vec<u8>>, len: usize) -> &mut Vec<u8> {
        slot.get_or_insert_with(|| vec![0u8; len])
    }

    /// Particle id map, lazily zero-initialised (0 = no particle).
    pub fn particle_ids_mut(&mut self) -> &mut Vec<u32> {
        let len = self.phases.len();
        self.particle_ids.get_or_insert_with(|| vec![0u32; len])
    }

    /// Particle id map if it has been materialised.
    pub fn particle_ids(&self) -> Option<&[u32]> {
        self.particle_ids.as_deref()
    }

    /// CSH age/density byte field, lazily zero-initialised.
    pub fn csh_age_mut(&mut self) -> &mut Vec<u8> {
        Self::field_u8(&mut self.csh_age, self.phases.len())
    }

    pub fn csh_age(&self) -> Option<&[u8]> {
        self.csh_age.as_deref()
    }

    /// Remaining-soluble counter for fly ash voxels, lazily zero-initialised.
    pub fn soluble_left_mut(&mut self) -> &mut Vec<u8> {
        Self::field_u8(&mut self.soluble_left, self.phases.len())
    }

    pub fn soluble_left(&self) -> Option<&[u8]> {
        self.soluble_left.as_deref()
    }

    /// Age in cycles of each diffusing voxel, lazily zero-initialised.
    pub fn diff_age_mut(&mut self) -> &mut Vec<u8> {
        Self::field_u8(&mut self.diff_age, self.phases.len())
    }

    pub fn diff_age(&self) -> Option<&[u8]> {
        self.diff_age.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trip() {
        let lattice = Lattice::new([4, 5, 6], 1.0);
        for x in 0..4 {
            for y in 0..5 {
                for z in 0..6 {
                    let idx = lattice.idx(x, y, z);
                    assert_eq!(lattice.coords(idx), (x, y, z));
                }
            }
        }
    }

    #[test]
    fn neighbour6_wraps_at_every_face() {
        let lattice = Lattice::new([3, 4, 5], 1.0);
        // +x from the last x-slab wraps to x = 0
        assert_eq!(lattice.neighbour6(2, 1, 1, 0), (0, 1, 1));
        // -x from x = 0 wraps to the last slab
        assert_eq!(lattice.neighbour6(0, 1, 1, 1), (2, 1, 1));
        assert_eq!(lattice.neighbour6(1, 3, 1, 2), (1, 0, 1));
        assert_eq!(lattice.neighbour6(1, 0, 1, 3), (1, 3, 1));
        assert_eq!(lattice.neighbour6(1, 1, 4, 4), (1, 1, 0));
        assert_eq!(lattice.neighbour6(1, 1, 0, 5), (1, 1, 4));
    }

    #[test]
    fn neighbour26_covers_distinct_cells() {
        let lattice = Lattice::new([5, 5, 5], 1.0);
        let mut seen = std::collections::HashSet::new();
        for k in 0..26 {
            seen.insert(lattice.neighbour26(2, 2, 2, k));
        }
        assert_eq!(seen.len(), 26);
        assert!(!seen.contains(&(2, 2, 2)));
    }

    #[test]
    fn census_conserves_voxel_count() {
        let mut lattice = Lattice::new([10, 10, 10], 1.0);
        lattice.set(1, 2, 3, Phase::C3S);
        lattice.set(4, 5, 6, Phase::C3S);
        lattice.set(7, 8, 9, Phase::Gypsum);
        let census = lattice.census();
        assert_eq!(census.total(), 1000);
        assert_eq!(census.count(Phase::C3S), 2);
        assert_eq!(census.count(Phase::Gypsum), 1);
        assert_eq!(census.count(Phase::Porosity), 997);
    }

    #[test]
    fn extra_fields_are_lazy_and_sized() {
        let mut lattice = Lattice::new([3, 3, 3], 1.0);
        assert!(lattice.particle_ids().is_none());
        lattice.particle_ids_mut()[13] = 7;
        assert_eq!(lattice.particle_ids().unwrap().len(), 27);
        assert_eq!(lattice.particle_ids().unwrap()[13], 7);
        assert!(lattice.csh_age().is_none());
        assert_eq!(lattice.csh_age_mut().len(), 27);
    }
}
