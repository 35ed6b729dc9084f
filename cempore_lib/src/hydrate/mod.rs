//! The hydration engine: the dissolution / diffusion / reaction cycle that
//! evolves the lattice in time.
//!
//! One cycle runs, in order: dissolution, diffusion, reaction and
//! nucleation, CSH aging, shrinkage accounting, a strided percolation check
//! and the time advance. Within a cycle the passes are strictly sequential;
//! voxel visitation inside a pass is shuffled from the engine RNG, so a
//! given seed reproduces the run bit for bit. Cancellation is observed at
//! cycle boundaries only; the engine keeps its state, so a cancelled run can
//! be inspected or resumed.

mod budget;
mod diffuse;
mod dissolve;
mod react;
mod solution;

pub use budget::{SpeciesBudget, NUM_SPECIES};
pub use solution::Solution;

use crate::lattice::{Lattice, PhaseCensus};
use crate::percolation::{scan_percolation, PercolationResult};
use crate::phase::{Phase, NUM_PHASES};
use crate::rng::Ran2;
use crate::thermal::{relative_rate_factor, ThermalSettings, TimeTemperatureMapper};
use crate::workspace::CycleWorkspace;
use arrayvec::ArrayVec;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error as ThisError;

/// Fatal engine errors; both indicate an internal invariant violation and
/// halt the run with diagnostic context.
#[derive(Debug, ThisError)]
pub enum HydrationError {
    #[error("species budget underflow for {species} at cycle {cycle}")]
    BudgetUnderflow { cycle: u32, species: Phase },
    #[error("stoichiometry ledger desync for {phase} at cycle {cycle}")]
    StoichiometryUnderflow { cycle: u32, phase: Phase },
    #[error("hydration cancelled at cycle {cycle}")]
    Cancelled { cycle: u32 },
}

/// Cooperative cancellation token polled between cycles.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Termination condition of a run; the first satisfied criterion stops it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Termination {
    pub max_cycles: Option<u32>,
    /// Target degree of hydration in [0, 1]
    pub target_alpha: Option<f64>,
    /// Physical time limit in hours
    pub max_time_hours: Option<f64>,
}

impl Termination {
    pub fn after_cycles(cycles: u32) -> Self {
        Self {
            max_cycles: Some(cycles),
            ..Default::default()
        }
    }

    fn reached(&self, cycle: u32, alpha: f64, time_hours: f64) -> bool {
        self.max_cycles.map_or(false, |n| cycle >= n)
            || self.target_alpha.map_or(false, |a| alpha >= a)
            || self.max_time_hours.map_or(false, |t| time_hours >= t)
    }
}

/// Homogeneous nucleation parameters of one diffusing species: the
/// probability decays exponentially with the number of voxels already in the
/// pool, `p = amplitude * exp(-count / scale)`, and applies only to voxels
/// that survived at least `min_age` cycles.
#[derive(Clone, Copy, Debug)]
pub struct NucleationParams {
    pub min_age: u8,
    pub amplitude: f64,
    pub scale: f64,
}

/// Engine tuning knobs, populated from the parameter file (see `io`).
#[derive(Clone, Debug)]
pub struct HydrationParameters {
    /// Base dissolution probability per phase id
    pub dissolution_probability: [f64; NUM_PHASES],
    /// Random-walk lifetime of a diffusing voxel, in cycles
    pub diffusion_lifetime: u8,
    /// Probability that two colliding same-species walkers coalesce
    pub coalescence_probability: f64,
    /// Probability of sulfate absorption onto a CSH surface contact
    pub gypsum_absorption_probability: f64,
    /// Probability of the ettringite-to-monosulfate conversion per contact
    /// once the sulfate pool is exhausted
    pub afm_conversion_probability: f64,
    /// Early-age ramp: clinker dissolution reaches full rate over this many
    /// cycles
    pub induction_cycles: u32,
    /// Run the percolation scan every this many cycles (0 disables)
    pub percolation_stride: u32,
    /// Verify the species budget against the lattice every this many cycles
    pub verify_stride: u32,
    /// CSH age after which the gel counts as densified in the water ledger
    pub csh_densify_age: u8,
    pub nucleation_csh: NucleationParams,
    pub nucleation_ch: NucleationParams,
    pub nucleation_gypsum: NucleationParams,
    pub nucleation_fh3: NucleationParams,
}

impl Default for HydrationParameters {
    fn default() -> Self {
        let mut p = [0.0f64; NUM_PHASES];
        p[Phase::C3S as usize] = 0.40;
        p[Phase::C2S as usize] = 0.10;
        p[Phase::C3A as usize] = 0.55;
        p[Phase::OC3A as usize] = 0.45;
        p[Phase::C4AF as usize] = 0.20;
        p[Phase::Gypsum as usize] = 0.15;
        p[Phase::AbsorbedGyp as usize] = 0.04;
        p[Phase::SecondaryGyp as usize] = 0.10;
        p[Phase::Hemihyd as usize] = 0.60;
        p[Phase::Anhydrite as usize] = 0.35;
        p[Phase::K2SO4 as usize] = 0.90;
        p[Phase::Na2SO4 as usize] = 0.90;
        p[Phase::Slag as usize] = 0.004;
        p[Phase::ASG as usize] = 0.012;
        p[Phase::CAS2 as usize] = 0.008;
        p[Phase::AmSil as usize] = 0.02;
        p[Phase::SilicaFume as usize] = 0.02;
        p[Phase::CaCO3 as usize] = 0.005;
        p[Phase::FreeLime as usize] = 0.50;
        p[Phase::CaCl2 as usize] = 0.80;
        Self {
            dissolution_probability: p,
            diffusion_lifetime: 64,
            coalescence_probability: 0.05,
            gypsum_absorption_probability: 0.01,
            afm_conversion_probability: 0.20,
            induction_cycles: 12,
            percolation_stride: 25,
            verify_stride: 25,
            csh_densify_age: 60,
            nucleation_csh: NucleationParams {
                min_age: 2,
                amplitude: 0.010,
                scale: 9_000.0,
            },
            nucleation_ch: NucleationParams {
                min_age: 3,
                amplitude: 0.003,
                scale: 20_000.0,
            },
            nucleation_gypsum: NucleationParams {
                min_age: 4,
                amplitude: 0.002,
                scale: 15_000.0,
            },
            nucleation_fh3: NucleationParams {
                min_age: 2,
                amplitude: 0.050,
                scale: 2_500.0,
            },
        }
    }
}

impl HydrationParameters {
    pub(super) fn nucleation(&self, species: Phase) -> Option<NucleationParams> {
        match species {
            Phase::DiffCSH => Some(self.nucleation_csh),
            Phase::DiffCH => Some(self.nucleation_ch),
            Phase::DiffGyp => Some(self.nucleation_gypsum),
            Phase::DiffFH3 => Some(self.nucleation_fh3),
            _ => None,
        }
    }
}

/// Metrics of one completed cycle.
#[derive(Clone, Copy, Debug)]
pub struct CycleRecord {
    pub cycle: u32,
    pub time_hours: f64,
    pub temperature: f64,
    /// Degree of hydration
    pub alpha: f64,
    /// Heat released this cycle, J per g of binder
    pub heat: f64,
    /// Cumulative heat, J per g of binder
    pub cumulative_heat: f64,
    /// Diffusing voxels at cycle end
    pub diffusing: u64,
    /// Water-filled porosity voxels at cycle end
    pub porosity: u64,
    /// Self-desiccated porosity voxels at cycle end
    pub empty_porosity: u64,
    /// Porosity percolation result, at scan cycles only
    pub porosity_percolation: Option<bool>,
}

/// Read-only snapshot of the lattice handed to collaborators (renderers,
/// writers); never a live pointer into the engine.
#[derive(Clone, Debug)]
pub struct PhaseMap {
    pub dims: [usize; 3],
    pub resolution: f64,
    pub phases: Vec<Phase>,
    pub cycle: u32,
}

impl PhaseMap {
    /// Palette colour of each voxel for the external image writer.
    pub fn rgb(&self, idx: usize) -> [u8; 3] {
        self.phases[idx].properties().color
    }
}

/// The hydration engine. Owns the lattice and all auxiliary state.
pub struct HydrationEngine {
    pub(super) lattice: Lattice,
    pub(super) params: HydrationParameters,
    pub(super) budget: SpeciesBudget,
    pub(super) solution: Solution,
    pub(super) rng: Ran2,
    pub(super) ws: CycleWorkspace,
    mapper: TimeTemperatureMapper,
    cycle: u32,
    /// Cumulative dissolved (or surface-consumed) voxels per reactant phase
    pub(super) dissolved: [u64; NUM_PHASES],
    /// Voxels consumed during the current cycle, reset each cycle
    pub(super) reacted_this_cycle: [u64; NUM_PHASES],
    /// Water chemically bound so far, in voxel volumes
    pub(super) water_consumed: f64,
    /// Product volume forgone because no pore space was found
    pub(super) shrinkage_lost: f64,
    /// Base dissolution probabilities scaled for the current cycle
    pub(super) pdiss: [f64; NUM_PHASES],
    /// Water-filled porosity count at the start of the cycle
    pub(super) water_now: u64,
    initial_clinker: u64,
    initial_binder_mass: f64,
    initial_water: u64,
    cumulative_heat: f64,
    records: Vec<CycleRecord>,
}

impl HydrationEngine {
    /// Wraps a generated microstructure for hydration. The RNG seed is
    /// derived from the mix master seed by the caller.
    pub fn new(
        mut lattice: Lattice,
        params: HydrationParameters,
        thermal: ThermalSettings,
        seed: i32,
    ) -> Self {
        let num = lattice.num_voxels();
        // Materialise the auxiliary fields up front; per-cycle work must not
        // allocate.
        lattice.diff_age_mut();
        lattice.csh_age_mut();
        lattice.soluble_left_mut();
        lattice.particle_ids_mut();

        let census = lattice.census();
        let initial_clinker = clinker_volume(&census);
        let initial_water = census.count(Phase::Porosity);
        let initial_binder_mass: f64 = Phase::all()
            .iter()
            .filter(|p| p.is_solid() && !p.is_aggregate())
            .map(|p| p.properties().density * census.count(*p) as f64)
            .sum();

        Self {
            lattice,
            params,
            budget: SpeciesBudget::default(),
            solution: Solution::default(),
            rng: Ran2::new(seed),
            ws: CycleWorkspace::with_capacity(num),
            mapper: TimeTemperatureMapper::new(thermal),
            cycle: 0,
            dissolved: [0; NUM_PHASES],
            reacted_this_cycle: [0; NUM_PHASES],
            water_consumed: 0.0,
            shrinkage_lost: 0.0,
            pdiss: [0.0; NUM_PHASES],
            water_now: initial_water,
            initial_clinker,
            initial_binder_mass: initial_binder_mass.max(f64::MIN_POSITIVE),
            initial_water,
            cumulative_heat: 0.0,
            records: Vec::new(),
        }
    }

    /// Degree of hydration: `1 - v_clinker / v_clinker_initial`.
    pub fn alpha(&self) -> f64 {
        if self.initial_clinker == 0 {
            return 0.0;
        }
        let remaining = clinker_volume(&self.lattice.census());
        1.0 - remaining as f64 / self.initial_clinker as f64
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn time_hours(&self) -> f64 {
        self.mapper.time_hours()
    }

    pub fn temperature(&self) -> f64 {
        self.mapper.temperature()
    }

    pub fn records(&self) -> &[CycleRecord] {
        &self.records
    }

    pub fn budget(&self) -> &SpeciesBudget {
        &self.budget
    }

    /// Read-only snapshot of the current lattice state.
    pub fn snapshot(&self) -> PhaseMap {
        PhaseMap {
            dims: self.lattice.dims(),
            resolution: self.lattice.resolution(),
            phases: self.lattice.phases().to_vec(),
            cycle: self.cycle,
        }
    }

    /// Borrow of the lattice for analysis; the engine stays the owner.
    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Runs cycles until the termination condition, an error, or
    /// cancellation. On cancellation the engine state stays valid and the
    /// already-computed records are retained.
    pub fn run(
        &mut self,
        termination: Termination,
        cancel: &CancelToken,
    ) -> Result<(), HydrationError> {
        loop {
            if cancel.is_cancelled() {
                warn!("hydration cancelled at cycle {}", self.cycle);
                return Err(HydrationError::Cancelled { cycle: self.cycle });
            }
            if termination.reached(self.cycle, self.alpha(), self.mapper.time_hours()) {
                info!(
                    "hydration finished: cycle {}, alpha {:.3}, t {:.1} h",
                    self.cycle,
                    self.alpha(),
                    self.mapper.time_hours()
                );
                return Ok(());
            }
            self.step()?;
        }
    }

    /// Executes one full cycle and appends its record.
    pub fn step(&mut self) -> Result<CycleRecord, HydrationError> {
        self.cycle += 1;
        self.reacted_this_cycle = [0; NUM_PHASES];

        let census = self.lattice.census();
        self.water_now = census.count(Phase::Porosity);
        self.prepare_dissolution_probabilities();

        self.dissolution_pass()?;
        self.diffusion_pass()?;
        self.reaction_pass()?;
        self.age_csh();
        self.apply_self_desiccation();

        // Heat of this cycle from the reaction ledger.
        let heat: f64 = self
            .reacted_this_cycle
            .iter()
            .enumerate()
            .map(|(id, n)| {
                let props = Phase::from_id(id as u8).unwrap().properties();
                props.heat_of_reaction * props.density * *n as f64
            })
            .sum::<f64>()
            / self.initial_binder_mass;
        self.cumulative_heat += heat;

        let porosity_percolation = if self.params.percolation_stride > 0
            && self.cycle % self.params.percolation_stride == 0
        {
            let result = self.scan_porosity_percolation();
            info!(
                "cycle {}: porosity percolation {} (connected fraction {:.3})",
                self.cycle,
                result.percolates,
                result.connected_fraction()
            );
            Some(result.percolates)
        } else {
            None
        };

        if self.params.verify_stride > 0 && self.cycle % self.params.verify_stride == 0 {
            if let Err(species) = self.budget.verify(&self.lattice) {
                return Err(HydrationError::StoichiometryUnderflow {
                    cycle: self.cycle,
                    phase: species,
                });
            }
        }

        self.mapper.advance(self.cycle, heat);

        let census = self.lattice.census();
        let record = CycleRecord {
            cycle: self.cycle,
            time_hours: self.mapper.time_hours(),
            temperature: self.mapper.temperature(),
            alpha: self.alpha(),
            heat,
            cumulative_heat: self.cumulative_heat,
            diffusing: self.budget.total(),
            porosity: census.count(Phase::Porosity),
            empty_porosity: census.count(Phase::EmptyPorosity),
            porosity_percolation,
        };
        self.records.push(record);
        Ok(record)
    }

    /// Percolation scan of the water-filled and emptied porosity.
    pub fn scan_porosity_percolation(&mut self) -> PercolationResult {
        scan_percolation(&self.lattice, |p| p.is_pore(), &mut self.ws)
    }

    /// Scales the base dissolution probabilities with the pH factor, the
    /// phase's Arrhenius factor relative to the binder, and the early-age
    /// ramp for clinker.
    fn prepare_dissolution_probabilities(&mut self) {
        let temp = self.mapper.temperature();
        let settings = self.mapper.settings();
        let binder_ea = settings.activation_energy;
        let reference = settings.reference_temp;
        let ramp = if self.params.induction_cycles == 0 {
            1.0
        } else {
            let x = self.cycle as f64 / self.params.induction_cycles as f64;
            (x * x).min(1.0)
        };
        for phase in Phase::all() {
            let id = *phase as usize;
            let base = self.params.dissolution_probability[id];
            if base == 0.0 {
                self.pdiss[id] = 0.0;
                continue;
            }
            let props = phase.properties();
            let mut p = base
                * self.solution.ph_factor(*phase, self.water_now)
                * relative_rate_factor(props.activation_energy, binder_ea, temp, reference);
            if phase.is_clinker() {
                p *= ramp;
            }
            self.pdiss[id] = p.min(1.0);
        }
    }

    /// Ages the CSH density byte; densified gel binds a little less water,
    /// which the shrinkage ledger sees as a small water credit.
    fn age_csh(&mut self) {
        let densify_age = self.params.csh_densify_age;
        let mut densified = 0u64;
        let num = self.lattice.num_voxels();
        for idx in 0..num {
            if self.lattice.at_idx(idx) != Phase::CSH {
                continue;
            }
            let age = &mut self.lattice.csh_age_mut()[idx];
            if *age < u8::MAX {
                *age += 1;
            }
            if *age == densify_age {
                densified += 1;
            }
        }
        if densified > 0 {
            self.water_consumed = (self.water_consumed - 0.04 * densified as f64).max(0.0);
        }
    }

    /// Relabels water-filled porosity as empty when the remaining free water
    /// cannot fill it (self desiccation).
    fn apply_self_desiccation(&mut self) {
        let available = (self.initial_water as f64 - self.water_consumed).max(0.0) as u64;
        let porosity = self
            .lattice
            .phases()
            .iter()
            .filter(|p| **p == Phase::Porosity)
            .count() as u64;
        if porosity <= available {
            return;
        }
        let mut to_empty = porosity - available;
        let num = self.lattice.num_voxels();
        let mut guard = 0u64;
        while to_empty > 0 && guard < 64 * (to_empty + 16) {
            guard += 1;
            let idx = self.rng.next_index(num);
            if self.lattice.at_idx(idx) == Phase::Porosity {
                self.lattice.set_idx(idx, Phase::EmptyPorosity);
                to_empty -= 1;
            }
        }
    }

    /// Water-filled voxels of a neighbourhood, for uniform random choice.
    fn free_neighbours<const N: usize>(&self, origin: usize, full: bool) -> ArrayVec<u32, N> {
        let mut free = ArrayVec::new();
        let count = if full { 26 } else { 6 };
        for k in 0..count {
            let idx = if full {
                self.lattice.neighbour26_idx(origin, k)
            } else {
                self.lattice.neighbour6_idx(origin, k)
            };
            if self.lattice.at_idx(idx) == Phase::Porosity {
                free.push(idx as u32);
            }
        }
        free
    }

    /// Places a new diffusing voxel of `species` near `origin`: uniformly
    /// among the free 26-neighbours, then anywhere in the pore space.
    /// Returns false (and charges the shrinkage tally) when no water-filled
    /// voxel is found.
    pub(super) fn spawn_diffuser(&mut self, origin: usize, species: Phase) -> bool {
        let free = self.free_neighbours::<26>(origin, true);
        if !free.is_empty() {
            let idx = free[self.rng.next_index(free.len())] as usize;
            self.place_diffuser(idx, species);
            return true;
        }
        let num = self.lattice.num_voxels();
        for _ in 0..100 {
            let idx = self.rng.next_index(num);
            if self.lattice.at_idx(idx) == Phase::Porosity {
                self.place_diffuser(idx, species);
                return true;
            }
        }
        self.shrinkage_lost += 1.0;
        false
    }

    pub(super) fn place_diffuser(&mut self, idx: usize, species: Phase) {
        self.lattice.set_idx(idx, species);
        self.lattice.diff_age_mut()[idx] = 0;
        self.budget.increment(species);
    }

    /// Converts a diffusing voxel to its equilibrium solid, growing the
    /// volume-factor excess into free neighbours and booking the bound
    /// water.
    pub(super) fn deposit(&mut self, idx: usize, species: Phase) -> Result<(), HydrationError> {
        let rule = species
            .deposit()
            .expect("deposit called on a non-diffusing phase");
        if !self.budget.decrement(species) {
            return Err(HydrationError::BudgetUnderflow {
                cycle: self.cycle,
                species,
            });
        }
        self.set_product(idx, rule.solid);
        self.water_consumed += rule.water;

        let mut excess = rule.volume_factor - 1.0;
        while excess > 0.0 {
            let grow = if excess >= 1.0 {
                true
            } else {
                self.rng.chance(excess)
            };
            if grow {
                self.grow_product(idx, rule.solid);
            }
            excess -= 1.0;
        }
        Ok(())
    }

    /// Writes a product voxel, stamping the CSH age byte for fresh gel.
    pub(super) fn set_product(&mut self, idx: usize, product: Phase) {
        self.lattice.set_idx(idx, product);
        self.lattice.diff_age_mut()[idx] = 0;
        if product == Phase::CSH {
            self.lattice.csh_age_mut()[idx] = 1;
        }
    }

    /// Places one voxel of product at a uniformly chosen free neighbour of
    /// `origin` (6- then 26-neighbourhood); charges the shrinkage tally when
    /// everything around is occupied.
    pub(super) fn grow_product(&mut self, origin: usize, product: Phase) {
        let near = self.free_neighbours::<6>(origin, false);
        if !near.is_empty() {
            let idx = near[self.rng.next_index(near.len())] as usize;
            self.set_product(idx, product);
            return;
        }
        let wide = self.free_neighbours::<26>(origin, true);
        if !wide.is_empty() {
            let idx = wide[self.rng.next_index(wide.len())] as usize;
            self.set_product(idx, product);
            return;
        }
        self.shrinkage_lost += 1.0;
    }

    /// Books the consumption of a solid reactant voxel in the cycle ledger.
    pub(super) fn consume_solid(&mut self, phase: Phase) {
        self.reacted_this_cycle[phase as usize] += 1;
        self.dissolved[phase as usize] += 1;
    }
}

fn clinker_volume(census: &PhaseCensus) -> u64 {
    census.count_matching(|p| p.is_clinker())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;

    fn c3s_lattice(fill: f64) -> Lattice {
        let mut lattice = Lattice::new([20, 20, 20], 1.0);
        let mut rng = Ran2::new(-31);
        let target = (lattice.num_voxels() as f64 * fill) as usize;
        let mut placed = 0;
        while placed < target {
            let idx = rng.next_index(lattice.num_voxels());
            if lattice.at_idx(idx) == Phase::Porosity {
                lattice.set_idx(idx, Phase::C3S);
                placed += 1;
            }
        }
        lattice
    }

    fn engine(lattice: Lattice) -> HydrationEngine {
        HydrationEngine::new(
            lattice,
            HydrationParameters::default(),
            ThermalSettings::default(),
            -1234,
        )
    }

    #[test]
    fn phase_count_is_conserved_every_cycle() {
        let mut engine = engine(c3s_lattice(0.45));
        let total = engine.lattice().num_voxels() as u64;
        for _ in 0..25 {
            engine.step().unwrap();
            assert_eq!(engine.lattice().census().total(), total);
        }
    }

    #[test]
    fn species_budget_matches_lattice_every_cycle() {
        let mut engine = engine(c3s_lattice(0.45));
        for _ in 0..25 {
            engine.step().unwrap();
            assert_eq!(engine.budget.verify(engine.lattice()), Ok(()));
        }
    }

    #[test]
    fn anhydrous_count_is_non_increasing() {
        let mut engine = engine(c3s_lattice(0.45));
        let mut last = engine.lattice().census().count(Phase::C3S);
        for _ in 0..40 {
            engine.step().unwrap();
            let now = engine.lattice().census().count(Phase::C3S);
            assert!(now <= last, "anhydrous count increased {last} -> {now}");
            last = now;
        }
    }

    #[test]
    fn alpha_grows_and_products_appear() {
        let mut engine = engine(c3s_lattice(0.45));
        for _ in 0..60 {
            engine.step().unwrap();
        }
        assert!(engine.alpha() > 0.02, "alpha {}", engine.alpha());
        let census = engine.lattice().census();
        let products = census.count(Phase::CSH)
            + census.count(Phase::CH)
            + census.count(Phase::DiffCSH)
            + census.count(Phase::DiffCH);
        assert!(products > 0);
        assert!(engine.records().last().unwrap().cumulative_heat > 0.0);
    }

    #[test]
    fn identical_seeds_reproduce_the_run() {
        let lattice_a = c3s_lattice(0.45);
        let lattice_b = c3s_lattice(0.45);
        let mut a = engine(lattice_a);
        let mut b = engine(lattice_b);
        for _ in 0..15 {
            a.step().unwrap();
            b.step().unwrap();
        }
        assert_eq!(a.lattice().phases(), b.lattice().phases());
        assert_eq!(a.alpha(), b.alpha());
    }

    #[test]
    fn cancellation_is_observed_between_cycles() {
        let mut engine = engine(c3s_lattice(0.45));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = engine
            .run(Termination::after_cycles(100), &cancel)
            .unwrap_err();
        assert!(matches!(err, HydrationError::Cancelled { cycle: 0 }));
        assert_eq!(engine.cycle(), 0);
    }

    #[test]
    fn termination_on_target_alpha() {
        let mut engine = engine(c3s_lattice(0.40));
        let termination = Termination {
            target_alpha: Some(0.05),
            max_cycles: Some(500),
            ..Default::default()
        };
        engine.run(termination, &CancelToken::new()).unwrap();
        assert!(engine.alpha() >= 0.05 || engine.cycle() == 500);
    }

    #[test]
    fn snapshot_is_detached_from_the_engine() {
        let mut engine = engine(c3s_lattice(0.45));
        let snapshot = engine.snapshot();
        for _ in 0..10 {
            engine.step().unwrap();
        }
        // The snapshot kept the cycle-0 state
        assert_eq!(snapshot.cycle, 0);
        assert_eq!(snapshot.phases.len(), engine.lattice().num_voxels());
        assert_ne!(&snapshot.phases[..], engine.lattice().phases());
    }
}
