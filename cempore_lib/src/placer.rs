//! Particle placement: parking digital particles into the lattice.
//!
//! Particles are placed largest-first so that small particles can fill the
//! interstices left between large ones. Spheres are rasterised as the set of
//! voxel offsets within the integer radius; real-shape particles use rotated
//! voxel masks from a caller-supplied catalogue. Placement wraps periodically
//! on all axes.

use crate::lattice::Lattice;
use crate::mix::{Arrangement, MixSpec, ParticleStream};
use crate::phase::Phase;
use crate::psd::PsdError;
use crate::rng::Ran2;
use fxhash::FxHashMap;
use log::{debug, info, warn};
use nalgebra::Vector3;
use thiserror::Error as ThisError;

/// Errors reported by the placer.
#[derive(Debug, ThisError)]
pub enum PlacementError {
    #[error(transparent)]
    Psd(#[from] PsdError),
    #[error(
        "packing infeasible: requested solid fraction {requested:.4}, achieved {achieved:.4}"
    )]
    PackingInfeasible { requested: f64, achieved: f64 },
}

/// A placed (or pending) digital particle.
#[derive(Clone, Debug)]
pub struct Particle {
    /// Stable id, also written to the lattice particle-id map (ids start at 1)
    pub id: u32,
    /// Centre voxel; coordinates are wrapped when rasterising
    pub centre: Vector3<i64>,
    /// Radius in voxels (0 for one-voxel top-up particles)
    pub radius: u32,
    /// Which mix stream the particle belongs to
    pub stream: ParticleStream,
    /// Phase painted at placement time (clinker is re-painted later)
    pub phase: Phase,
    /// Real-shape mask index and orientation, if not a sphere
    shape: Option<(u16, u8)>,
}

/// A voxel mask describing one real particle shape at a nominal radius.
#[derive(Clone, Debug)]
pub struct ShapeMask {
    /// Radius class this mask substitutes for
    pub radius: u32,
    /// Voxel offsets relative to the particle centre
    pub voxels: Vec<Vector3<i64>>,
}

/// Catalogue of real particle shapes, keyed by radius class.
#[derive(Clone, Debug, Default)]
pub struct ShapeCatalogue {
    masks: Vec<ShapeMask>,
    by_radius: FxHashMap<u32, Vec<usize>>,
}

impl ShapeCatalogue {
    pub fn new(masks: Vec<ShapeMask>) -> Self {
        let mut by_radius: FxHashMap<u32, Vec<usize>> = crate::new_map();
        for (i, mask) in masks.iter().enumerate() {
            by_radius.entry(mask.radius).or_default().push(i);
        }
        Self { masks, by_radius }
    }

    fn pick(&self, radius: u32, rng: &mut Ran2) -> Option<u16> {
        let candidates = self.by_radius.get(&radius)?;
        Some(candidates[rng.next_index(candidates.len())] as u16)
    }
}

/// Result of the placement stage: the painted lattice and the particle list
/// handed on to the phase distributor.
pub struct Placement {
    pub lattice: Lattice,
    pub particles: Vec<Particle>,
    /// Achieved solid volume fraction
    pub solid_fraction: f64,
}

// Axis permutations for the 48 axis-aligned orientations of a voxel mask.
const AXIS_PERMS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

fn orient(v: Vector3<i64>, orientation: u8) -> Vector3<i64> {
    let perm = AXIS_PERMS[(orientation / 8) as usize];
    let signs = orientation % 8;
    let mut out = Vector3::new(v[perm[0]], v[perm[1]], v[perm[2]]);
    for axis in 0..3 {
        if signs & (1 << axis) != 0 {
            out[axis] = -out[axis];
        }
    }
    out
}

/// Voxel offsets of the digital sphere of the given radius (d^2 <= r^2).
pub(crate) fn sphere_offsets(radius: u32) -> Vec<Vector3<i64>> {
    let r = radius as i64;
    let r2 = r * r;
    let mut offsets = Vec::new();
    for dx in -r..=r {
        for dy in -r..=r {
            for dz in -r..=r {
                if dx * dx + dy * dy + dz * dz <= r2 {
                    offsets.push(Vector3::new(dx, dy, dz));
                }
            }
        }
    }
    offsets
}

/// Number of voxels in the digital sphere of the given radius.
pub(crate) fn sphere_volume(radius: u32) -> u64 {
    sphere_offsets(radius).len() as u64
}

struct PlacerState<'a> {
    spec: &'a MixSpec,
    shapes: Option<&'a ShapeCatalogue>,
    sphere_cache: FxHashMap<u32, Vec<Vector3<i64>>>,
}

impl<'a> PlacerState<'a> {
    fn new(spec: &'a MixSpec, shapes: Option<&'a ShapeCatalogue>) -> Self {
        Self {
            spec,
            shapes,
            sphere_cache: crate::new_map(),
        }
    }

    fn sphere(&mut self, radius: u32) -> &[Vector3<i64>] {
        self.sphere_cache
            .entry(radius)
            .or_insert_with(|| sphere_offsets(radius))
    }

    /// Voxel offsets of a particle body (sphere or oriented mask).
    fn body(&mut self, particle: &Particle) -> Vec<Vector3<i64>> {
        match particle.shape {
            Some((mask, orientation)) => {
                let shapes = self.shapes.expect("shape without catalogue");
                shapes.masks[mask as usize]
                    .voxels
                    .iter()
                    .map(|v| orient(*v, orientation))
                    .collect()
            }
            None => self.sphere(particle.radius).to_vec(),
        }
    }

    /// Halo width implied by the arrangement directive.
    fn clearance(&self) -> u32 {
        match self.spec.arrangement {
            Arrangement::Dispersed { clearance } => clearance.min(2) as u32,
            _ => 0,
        }
    }
}

/// True if every voxel of `offsets` around `centre` (plus a `clearance`
/// dilation) is water-filled porosity.
pub(crate) fn fits(
    lattice: &Lattice,
    centre: Vector3<i64>,
    offsets: &[Vector3<i64>],
    clearance: u32,
) -> bool {
    let c = clearance as i64;
    for offset in offsets {
        // Test the body voxel and, for dispersed mixes, its dilation. The
        // dilation test is wasteful on interior voxels but the placer is not
        // on the cycle-critical path.
        for dx in -c..=c {
            for dy in -c..=c {
                for dz in -c..=c {
                    let p = centre + offset + Vector3::new(dx, dy, dz);
                    let (x, y, z) = (
                        lattice.wrap(p.x, 0),
                        lattice.wrap(p.y, 1),
                        lattice.wrap(p.z, 2),
                    );
                    if lattice.at(x, y, z) != Phase::Porosity {
                        return false;
                    }
                }
            }
        }
    }
    true
}

/// Paints a particle body onto the lattice with periodic wrap.
pub(crate) fn paint(lattice: &mut Lattice, centre: Vector3<i64>, offsets: &[Vector3<i64>], phase: Phase, id: u32) {
    for offset in offsets {
        let p = centre + offset;
        let (x, y, z) = (
            lattice.wrap(p.x, 0),
            lattice.wrap(p.y, 1),
            lattice.wrap(p.z, 2),
        );
        let idx = lattice.idx(x, y, z);
        lattice.set_idx(idx, phase);
        lattice.particle_ids_mut()[idx] = id;
    }
}

/// Erases a particle body back to porosity.
fn erase(lattice: &mut Lattice, centre: Vector3<i64>, offsets: &[Vector3<i64>]) {
    paint(lattice, centre, offsets, Phase::Porosity, 0);
}

pub(crate) fn random_centre(lattice: &Lattice, rng: &mut Ran2) -> Vector3<i64> {
    Vector3::new(
        rng.next_index(lattice.x_size()) as i64,
        rng.next_index(lattice.y_size()) as i64,
        rng.next_index(lattice.z_size()) as i64,
    )
}

/// Places all particle streams of the mix into a fresh lattice.
///
/// The caller is expected to have validated the spec. Streams are sampled
/// independently, merged, and parked largest-first; the remaining volume
/// deficit of each stream is topped up with dispersed one-voxel particles so
/// the target solid fraction is met exactly.
pub fn place_particles(
    spec: &MixSpec,
    shapes: Option<&ShapeCatalogue>,
    rng: &mut Ran2,
) -> Result<Placement, PlacementError> {
    let mut state = PlacerState::new(spec, shapes);
    let mut lattice = Lattice::new(spec.dims, spec.resolution);
    lattice.particle_ids_mut();

    let budget = spec.volume_budget();
    let total_voxels = lattice.num_voxels() as u64;
    let target_solids = (budget.solid_fraction * total_voxels as f64).round() as u64;

    // Sample per-stream radius queues until each stream's volume target is
    // covered (up to the smallest particle volume).
    let mut queue: Vec<Particle> = Vec::new();
    let mut deficits: Vec<(ParticleStream, Phase, u64)> = Vec::new();
    let mut next_id: u32 = 1;
    for (stream, share) in &budget.shares {
        let target = (share * target_solids as f64).round() as u64;
        let psd = stream_psd(spec, *stream);
        let sampler = psd.sampler(spec.resolution)?;
        let phase = stream_phase(spec, *stream);

        let mut sampled: u64 = 0;
        let mut rejects = 0u32;
        while sampled < target && rejects < 40 {
            let radius = sampler.sample_radius(rng);
            let volume = sphere_volume(radius);
            if sampled + volume > target {
                // Look for a smaller particle that still fits the budget.
                rejects += 1;
                continue;
            }
            rejects = 0;
            sampled += volume;
            let shape = state
                .shapes
                .and_then(|catalogue| catalogue.pick(radius, rng))
                .map(|mask| (mask, rng.next_index(48) as u8));
            queue.push(Particle {
                id: next_id,
                centre: Vector3::zeros(),
                radius,
                stream: *stream,
                phase,
                shape,
            });
            next_id += 1;
        }
        deficits.push((*stream, phase, target - sampled));
    }

    // Largest first is mandatory; the stable sort keeps the sampling order
    // within a radius class.
    queue.sort_by_key(|p| std::cmp::Reverse(p.radius));

    let clearance = state.clearance();
    let retries = spec.max_placement_retries.max(1);
    let mut placed: Vec<Particle> = Vec::with_capacity(queue.len());
    let mut placed_volume: u64 = 0;
    let mut failed_volume: u64 = 0;
    for mut particle in queue {
        let body = state.body(&particle);
        let mut committed = false;
        for _ in 0..retries {
            let centre = random_centre(&lattice, rng);
            if fits(&lattice, centre, &body, clearance) {
                particle.centre = centre;
                paint(&mut lattice, centre, &body, particle.phase, particle.id);
                placed_volume += body.len() as u64;
                placed.push(particle.clone());
                committed = true;
                break;
            }
        }
        if !committed {
            debug!(
                "giving up on particle {} (r = {}) after {} retries",
                particle.id, particle.radius, retries
            );
            failed_volume += body.len() as u64;
        }
    }
    if failed_volume > 0 {
        warn!(
            "{failed_volume} voxels of particle volume could not be parked and fall back to one-voxel top-up"
        );
        // Re-attribute the failed volume to the owning streams' deficits
        // would require tracking per particle; the top-up below works from
        // the global shortfall per stream instead.
    }

    if let Arrangement::Flocculated { intensity } = spec.arrangement {
        flocculate(&mut state, &mut lattice, &mut placed, intensity, rng);
    }

    // One-voxel top-up: meet each stream's target exactly with dispersed
    // single voxels.
    let overall_deficit = target_solids.saturating_sub(placed_volume);
    let mut topped: u64 = 0;
    if overall_deficit > 0 {
        let mut shortfalls: Vec<(Phase, u64)> = deficits
            .iter()
            .filter(|(_, _, d)| *d > 0)
            .map(|(_, phase, d)| (*phase, *d))
            .collect();
        // Spread any placement failures across streams proportionally to
        // their shares, simplest as an extension of the largest shortfall.
        let unattributed = overall_deficit - shortfalls.iter().map(|(_, d)| d).sum::<u64>().min(overall_deficit);
        if unattributed > 0 {
            let phase = stream_phase(spec, budget.shares[0].0);
            shortfalls.push((phase, unattributed));
        }
        'streams: for (phase, count) in shortfalls {
            for _ in 0..count {
                let mut done = false;
                for _ in 0..retries {
                    let idx = rng.next_index(lattice.num_voxels());
                    if lattice.at_idx(idx) == Phase::Porosity {
                        lattice.set_idx(idx, phase);
                        lattice.particle_ids_mut()[idx] = next_id;
                        let (x, y, z) = lattice.coords(idx);
                        placed.push(Particle {
                            id: next_id,
                            centre: Vector3::new(x as i64, y as i64, z as i64),
                            radius: 0,
                            stream: ParticleStream::Cement,
                            phase,
                            shape: None,
                        });
                        next_id += 1;
                        topped += 1;
                        done = true;
                        break;
                    }
                }
                if !done {
                    break 'streams;
                }
            }
        }
    }

    let achieved_solids = placed_volume + topped;
    let achieved = achieved_solids as f64 / total_voxels as f64;
    let requested = target_solids as f64 / total_voxels as f64;
    info!(
        "placed {} particles, solid fraction {:.4} (requested {:.4})",
        placed.len(),
        achieved,
        requested
    );
    if requested - achieved > 0.002 {
        return Err(PlacementError::PackingInfeasible {
            requested,
            achieved,
        });
    }

    Ok(Placement {
        lattice,
        particles: placed,
        solid_fraction: achieved,
    })
}

fn stream_psd<'s>(spec: &'s MixSpec, stream: ParticleStream) -> &'s crate::psd::PsdTable {
    match stream {
        ParticleStream::Cement => &spec.binder_psd,
        ParticleStream::Sulfate(_) => spec.sulfates.psd.as_ref().unwrap_or(&spec.binder_psd),
        ParticleStream::Scm(i) => spec.scms[i].psd.as_ref().unwrap_or(&spec.binder_psd),
    }
}

fn stream_phase(spec: &MixSpec, stream: ParticleStream) -> Phase {
    match stream {
        // Clinker particles are parked as C3S and re-painted by the
        // distributor.
        ParticleStream::Cement => Phase::C3S,
        ParticleStream::Sulfate(phase) => phase,
        ParticleStream::Scm(i) => spec.scms[i].kind.placement_phase(),
    }
}

/// Flocculation post-pass: relocates isolated small particles until the
/// requested fraction of them sits adjacent to a large particle.
fn flocculate(
    state: &mut PlacerState<'_>,
    lattice: &mut Lattice,
    particles: &mut [Particle],
    intensity: f64,
    rng: &mut Ran2,
) {
    if particles.len() < 2 || intensity <= 0.0 {
        return;
    }
    let mut radii: Vec<u32> = particles.iter().map(|p| p.radius).collect();
    radii.sort_unstable();
    let median = radii[radii.len() / 2];

    let small: Vec<usize> = (0..particles.len())
        .filter(|i| particles[*i].radius < median.max(1))
        .collect();
    let large: Vec<usize> = (0..particles.len())
        .filter(|i| particles[*i].radius >= median.max(1))
        .collect();
    if small.is_empty() || large.is_empty() {
        return;
    }

    let mut order = small.clone();
    rng.shuffle(&mut order);
    let quota = (intensity * small.len() as f64).round() as usize;

    let mut moved = 0usize;
    for &i in order.iter().take(quota) {
        let body = state.body(&particles[i]);
        if has_foreign_solid_contact(lattice, &particles[i], &body) {
            continue;
        }
        let old_centre = particles[i].centre;
        erase(lattice, old_centre, &body);

        let mut relocated = false;
        for _ in 0..20 {
            let anchor = &particles[large[rng.next_index(large.len())]];
            let direction = random_unit(rng);
            let gap = (anchor.radius + particles[i].radius + 1) as f64;
            let candidate = anchor.centre
                + Vector3::new(
                    (direction.x * gap).round() as i64,
                    (direction.y * gap).round() as i64,
                    (direction.z * gap).round() as i64,
                );
            if fits(lattice, candidate, &body, 0) {
                paint(lattice, candidate, &body, particles[i].phase, particles[i].id);
                particles[i].centre = candidate;
                relocated = true;
                moved += 1;
                break;
            }
        }
        if !relocated {
            paint(lattice, old_centre, &body, particles[i].phase, particles[i].id);
        }
    }
    debug!("flocculation relocated {moved} of {} small particles", small.len());
}

/// True if any voxel adjacent to the particle body belongs to another solid.
fn has_foreign_solid_contact(lattice: &Lattice, particle: &Particle, body: &[Vector3<i64>]) -> bool {
    for offset in body {
        let p = particle.centre + offset;
        for (dx, dy, dz) in crate::lattice::OFFSETS6 {
            let q = p + Vector3::new(dx, dy, dz);
            let (x, y, z) = (
                lattice.wrap(q.x, 0),
                lattice.wrap(q.y, 1),
                lattice.wrap(q.z, 2),
            );
            let idx = lattice.idx(x, y, z);
            if lattice.at_idx(idx).is_solid() {
                if let Some(ids) = lattice.particle_ids() {
                    if ids[idx] != particle.id {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Uniform direction by rejection sampling; avoids transcendental functions
/// so sequences stay portable.
fn random_unit(rng: &mut Ran2) -> Vector3<f64> {
    loop {
        let v = Vector3::new(
            2.0 * rng.next_f64() - 1.0,
            2.0 * rng.next_f64() - 1.0,
            2.0 * rng.next_f64() - 1.0,
        );
        let n = v.norm();
        if n > 0.1 && n <= 1.0 {
            return v / n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psd::PsdTable;

    #[test]
    fn sphere_volumes_grow_like_r_cubed() {
        assert_eq!(sphere_volume(0), 1);
        assert_eq!(sphere_volume(1), 7);
        let v3 = sphere_volume(3) as f64;
        let ideal = 4.0 / 3.0 * std::f64::consts::PI * 27.0;
        assert!((v3 - ideal).abs() / ideal < 0.15, "v3 = {v3}");
    }

    #[test]
    fn particles_wrap_across_the_periodic_boundary() {
        // A particle centred in the last x-slab must paint voxels on both
        // sides of the boundary.
        let mut lattice = Lattice::new([20, 20, 20], 1.0);
        lattice.particle_ids_mut();
        let offsets = sphere_offsets(2);
        paint(
            &mut lattice,
            Vector3::new(19, 0, 0),
            &offsets,
            Phase::C3S,
            1,
        );
        assert_eq!(lattice.at(19, 0, 0), Phase::C3S);
        assert_eq!(lattice.at(17, 0, 0), Phase::C3S);
        assert_eq!(lattice.at(1, 0, 0), Phase::C3S);
        assert_eq!(lattice.at(19, 18, 0), Phase::C3S);
        assert_eq!(lattice.at(19, 0, 2), Phase::C3S);
        let census = lattice.census();
        assert_eq!(census.count(Phase::C3S), sphere_volume(2));
    }

    fn loose_spec() -> MixSpec {
        let mut spec = MixSpec::new([40, 40, 40], 1.0, -1234, PsdTable::monodisperse(6.0));
        spec.water_binder_ratio = 0.6;
        spec
    }

    #[test]
    fn placement_reaches_the_target_fraction() {
        let spec = loose_spec();
        let mut rng = Ran2::new(spec.seed);
        let placement = place_particles(&spec, None, &mut rng).unwrap();
        let requested = spec.volume_budget().solid_fraction;
        assert!((placement.solid_fraction - requested).abs() <= 0.002);
        let census = placement.lattice.census();
        assert_eq!(census.total(), 40 * 40 * 40);
    }

    #[test]
    fn placed_particles_do_not_overlap() {
        let spec = loose_spec();
        let mut rng = Ran2::new(spec.seed);
        let placement = place_particles(&spec, None, &mut rng).unwrap();
        // Every solid voxel belongs to exactly one particle, so summed body
        // volumes must equal the solid census.
        let expected: u64 = placement
            .particles
            .iter()
            .map(|p| sphere_volume(p.radius))
            .sum();
        let census = placement.lattice.census();
        let solids = census.total() - census.count(Phase::Porosity);
        assert_eq!(solids, expected);
    }

    #[test]
    fn dispersion_keeps_particles_apart() {
        let mut spec = loose_spec();
        spec.water_binder_ratio = 0.8;
        spec.arrangement = Arrangement::Dispersed { clearance: 1 };
        let mut rng = Ran2::new(spec.seed);
        let placement = place_particles(&spec, None, &mut rng).unwrap();
        let lattice = &placement.lattice;
        let ids = lattice.particle_ids().unwrap();
        for idx in 0..lattice.num_voxels() {
            if !lattice.at_idx(idx).is_solid() || lattice.at_idx(idx) == Phase::Porosity {
                continue;
            }
            // Skip one-voxel top-up particles; the clearance guarantee
            // applies to the parked spheres.
            let particle = placement.particles.iter().find(|p| p.id == ids[idx]);
            if particle.map(|p| p.radius == 0).unwrap_or(true) {
                continue;
            }
            for k in 0..6 {
                let n = lattice.neighbour6_idx(idx, k);
                if lattice.at_idx(n).is_solid() && ids[n] != ids[idx] {
                    let other = placement.particles.iter().find(|p| p.id == ids[n]);
                    assert!(
                        other.map(|p| p.radius == 0).unwrap_or(true),
                        "dispersed spheres touching at {idx}"
                    );
                }
            }
        }
    }

    #[test]
    fn flocculation_preserves_the_census() {
        let mut spec = loose_spec();
        spec.arrangement = Arrangement::Flocculated { intensity: 1.0 };
        let mut rng = Ran2::new(spec.seed);
        let placement = place_particles(&spec, None, &mut rng).unwrap();
        let census = placement.lattice.census();
        let expected: u64 = placement
            .particles
            .iter()
            .map(|p| sphere_volume(p.radius))
            .sum();
        assert_eq!(census.total() - census.count(Phase::Porosity), expected);
    }

    #[test]
    fn oriented_masks_preserve_voxel_count() {
        let mask = vec![
            Vector3::new(0, 0, 0),
            Vector3::new(1, 0, 0),
            Vector3::new(2, 0, 0),
            Vector3::new(0, 1, 0),
        ];
        for orientation in 0..48u8 {
            let rotated: Vec<_> = mask.iter().map(|v| orient(*v, orientation)).collect();
            assert_eq!(rotated.len(), 4);
            // Rigid transforms preserve pairwise distances
            let d = |a: Vector3<i64>, b: Vector3<i64>| (a - b).map(|v| v * v).sum();
            assert_eq!(d(rotated[0], rotated[2]), 4);
            assert_eq!(d(rotated[0], rotated[3]), 1);
        }
    }
}
