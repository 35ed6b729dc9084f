//! Percolation scans and microstructural metrics.
//!
//! The percolation scan flood-fills a target phase set from the z = 0 face,
//! 6-connected, periodic in x and y and open in z; the set percolates when
//! the flood reaches the opposite face. The pore-size distribution uses the
//! inscribed-sphere construction; surface area counts exposed solid faces.

use crate::lattice::Lattice;
use crate::phase::Phase;
use crate::placer::sphere_offsets;
use crate::workspace::CycleWorkspace;
use rayon::prelude::*;

/// Outcome of one percolation scan.
#[derive(Clone, Copy, Debug)]
pub struct PercolationResult {
    /// Whether the flood reached z = Z - 1
    pub percolates: bool,
    /// Voxels of the set reached from the z = 0 face
    pub connected: u64,
    /// Total voxels in the set
    pub total: u64,
}

impl PercolationResult {
    /// Fraction of the phase set connected to the z = 0 face.
    pub fn connected_fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.connected as f64 / self.total as f64
        }
    }
}

/// Flood-fills the phase set from the z = 0 face using a caller-provided
/// workspace; the engine calls this with its own scratch so the strided
/// check stays allocation free.
pub(crate) fn scan_percolation(
    lattice: &Lattice,
    in_set: impl Fn(Phase) -> bool,
    ws: &mut CycleWorkspace,
) -> PercolationResult {
    let num = lattice.num_voxels();
    ws.flood_seen.clear();
    ws.flood_seen.resize(num, false);
    ws.flood_stack.clear();

    let z_max = lattice.z_size() - 1;
    let total = lattice.phases().iter().filter(|p| in_set(**p)).count() as u64;

    // Seed from the whole z = 0 face.
    for x in 0..lattice.x_size() {
        for y in 0..lattice.y_size() {
            let idx = lattice.idx(x, y, 0);
            if in_set(lattice.at_idx(idx)) {
                ws.flood_seen[idx] = true;
                ws.flood_stack.push(idx as u32);
            }
        }
    }

    let mut connected = 0u64;
    let mut percolates = false;
    while let Some(idx) = ws.flood_stack.pop() {
        let idx = idx as usize;
        connected += 1;
        let (x, y, z) = lattice.coords(idx);
        if z == z_max {
            percolates = true;
        }
        for k in 0..6 {
            // Open boundary along z: the flood never wraps between the two
            // faces it is probing.
            if (k == 4 && z == z_max) || (k == 5 && z == 0) {
                continue;
            }
            let (nx, ny, nz) = lattice.neighbour6(x, y, z, k);
            let n = lattice.idx(nx, ny, nz);
            if !ws.flood_seen[n] && in_set(lattice.at_idx(n)) {
                ws.flood_seen[n] = true;
                ws.flood_stack.push(n as u32);
            }
        }
    }

    PercolationResult {
        percolates,
        connected,
        total,
    }
}

/// Flood-fills the phase set from the z = 0 face and reports connectivity.
pub fn percolates(lattice: &Lattice, in_set: impl Fn(Phase) -> bool) -> PercolationResult {
    let mut ws = CycleWorkspace::with_capacity(lattice.num_voxels());
    scan_percolation(lattice, in_set, &mut ws)
}

/// Histogram of largest-inscribed-sphere radii over the water-filled
/// porosity, in voxels.
#[derive(Clone, Debug)]
pub struct PoreSizeDistribution {
    /// `counts[r]` = porosity voxels whose largest covering sphere has
    /// radius r
    pub counts: Vec<u64>,
}

impl PoreSizeDistribution {
    /// Volume-weighted cumulative fraction of pores with radius <= r.
    pub fn cumulative_fraction(&self, r: usize) -> f64 {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return 0.0;
        }
        let below: u64 = self.counts.iter().take(r + 1).sum();
        below as f64 / total as f64
    }
}

/// Computes the inscribed-sphere pore-size distribution up to `max_radius`.
///
/// For each radius, descending, every porosity voxel is tested as a sphere
/// centre (in parallel; the test is read-only), and all voxels covered by a
/// fitting sphere whose radius is not yet recorded receive it.
pub fn pore_size_distribution(lattice: &Lattice, max_radius: u32) -> PoreSizeDistribution {
    let num = lattice.num_voxels();
    let mut radius_of: Vec<u8> = vec![0; num];
    let porosity: Vec<bool> = lattice
        .phases()
        .iter()
        .map(|p| *p == Phase::Porosity)
        .collect();

    for r in (1..=max_radius.min(255)).rev() {
        let offsets = sphere_offsets(r);
        let fitting: Vec<u32> = (0..num)
            .into_par_iter()
            .filter(|idx| {
                if !porosity[*idx] {
                    return false;
                }
                let (x, y, z) = lattice.coords(*idx);
                offsets.iter().all(|o| {
                    let (nx, ny, nz) = (
                        lattice.wrap(x as i64 + o.x, 0),
                        lattice.wrap(y as i64 + o.y, 1),
                        lattice.wrap(z as i64 + o.z, 2),
                    );
                    porosity[lattice.idx(nx, ny, nz)]
                })
            })
            .map(|idx| idx as u32)
            .collect();
        for centre in fitting {
            let (x, y, z) = lattice.coords(centre as usize);
            for o in &offsets {
                let (nx, ny, nz) = (
                    lattice.wrap(x as i64 + o.x, 0),
                    lattice.wrap(y as i64 + o.y, 1),
                    lattice.wrap(z as i64 + o.z, 2),
                );
                let idx = lattice.idx(nx, ny, nz);
                if radius_of[idx] == 0 {
                    radius_of[idx] = r as u8;
                }
            }
        }
    }

    let mut counts = vec![0u64; max_radius.min(255) as usize + 1];
    for (idx, is_pore) in porosity.iter().enumerate() {
        if *is_pore {
            counts[radius_of[idx] as usize] += 1;
        }
    }
    PoreSizeDistribution { counts }
}

/// Counts exposed solid faces: each face between a solid voxel and a
/// water-filled porosity voxel contributes one.
pub fn surface_area(lattice: &Lattice) -> u64 {
    (0..lattice.num_voxels())
        .into_par_iter()
        .map(|idx| {
            if !lattice.at_idx(idx).is_solid() {
                return 0u64;
            }
            (0..6)
                .filter(|k| lattice.at_idx(lattice.neighbour6_idx(idx, *k)) == Phase::Porosity)
                .count() as u64
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pore_set(p: Phase) -> bool {
        p.is_pore()
    }

    #[test]
    fn empty_lattice_percolates() {
        let lattice = Lattice::new([10, 10, 10], 1.0);
        let mut ws = CycleWorkspace::with_capacity(lattice.num_voxels());
        let result = scan_percolation(&lattice, pore_set, &mut ws);
        assert!(result.percolates);
        assert_eq!(result.connected, 1000);
        assert_eq!(result.total, 1000);
    }

    #[test]
    fn solid_slab_blocks_percolation() {
        let mut lattice = Lattice::new([10, 10, 10], 1.0);
        for x in 0..10 {
            for y in 0..10 {
                lattice.set(x, y, 5, Phase::CSH);
            }
        }
        let mut ws = CycleWorkspace::with_capacity(lattice.num_voxels());
        let result = scan_percolation(&lattice, pore_set, &mut ws);
        assert!(!result.percolates);
        assert_eq!(result.connected, 500);
    }

    #[test]
    fn channel_through_slab_restores_percolation() {
        let mut lattice = Lattice::new([10, 10, 10], 1.0);
        for x in 0..10 {
            for y in 0..10 {
                lattice.set(x, y, 5, Phase::CSH);
            }
        }
        lattice.set(3, 3, 5, Phase::Porosity);
        let mut ws = CycleWorkspace::with_capacity(lattice.num_voxels());
        assert!(scan_percolation(&lattice, pore_set, &mut ws).percolates);
    }

    #[test]
    fn flood_does_not_wrap_in_z() {
        // Solid everywhere except the two z faces: reaching z = Z - 1 must
        // require a path through the interior, not the periodic boundary.
        let mut lattice = Lattice::new([6, 6, 6], 1.0);
        for idx in 0..lattice.num_voxels() {
            let (_, _, z) = lattice.coords(idx);
            if z != 0 && z != 5 {
                lattice.set_idx(idx, Phase::C3S);
            }
        }
        let mut ws = CycleWorkspace::with_capacity(lattice.num_voxels());
        let result = scan_percolation(&lattice, pore_set, &mut ws);
        assert!(!result.percolates);
        assert_eq!(result.connected, 36);
    }

    #[test]
    fn flood_wraps_in_x_and_y() {
        // A staircase path that only connects through the x-periodic seam.
        let mut lattice = Lattice::new([4, 1, 3], 1.0);
        lattice.fill(Phase::C3S);
        lattice.set(3, 0, 0, Phase::Porosity);
        lattice.set(0, 0, 0, Phase::Porosity);
        lattice.set(0, 0, 1, Phase::Porosity);
        lattice.set(3, 0, 1, Phase::Porosity);
        lattice.set(3, 0, 2, Phase::Porosity);
        let mut ws = CycleWorkspace::with_capacity(lattice.num_voxels());
        let result = scan_percolation(&lattice, pore_set, &mut ws);
        assert!(result.percolates);
        assert_eq!(result.connected, 5);
    }

    #[test]
    fn pore_sizes_of_a_cubic_cavity() {
        // An 5^3 open cavity inside solid: the central voxel fits a sphere
        // of radius 2, corner voxels only radius 1 spheres.
        let mut lattice = Lattice::new([12, 12, 12], 1.0);
        lattice.fill(Phase::CSH);
        for x in 3..8 {
            for y in 3..8 {
                for z in 3..8 {
                    lattice.set(x, y, z, Phase::Porosity);
                }
            }
        }
        let psd = pore_size_distribution(&lattice, 4);
        assert_eq!(psd.counts.iter().sum::<u64>(), 125);
        // Cavity corners are only covered by the single-voxel class
        assert!(psd.counts[0] > 0);
        // The largest inscribed sphere in a 5-cube has radius 2
        assert!(psd.counts[2] > 0);
        assert_eq!(psd.counts.get(3).copied().unwrap_or(0), 0);
        assert!(psd.cumulative_fraction(4) >= 1.0 - 1e-12);
    }

    #[test]
    fn surface_area_of_a_single_cube() {
        let mut lattice = Lattice::new([8, 8, 8], 1.0);
        lattice.set(4, 4, 4, Phase::C3S);
        assert_eq!(surface_area(&lattice), 6);
        lattice.set(4, 4, 5, Phase::C3S);
        assert_eq!(surface_area(&lattice), 10);
    }
}
