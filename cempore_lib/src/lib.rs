//!
//! Library for simulating the microstructure and hydration of cementitious
//! composites on a periodic 3-D voxel lattice. Entry points are
//! [`generate_microstructure`] and [`hydrate::HydrationEngine`].
//!

/// Re-export the version of nalgebra used by this crate
pub use nalgebra;
/// Re-export the version of rand used by this crate
pub use rand;

/// Graded aggregate packing at the concrete scale with ITZ paint
pub mod aggregate;
/// Painting of clinker and SCM voxels with their chemical identities
pub mod distribute;
/// The dissolution / diffusion / reaction cycle engine
pub mod hydrate;
/// Text file formats (microstructure images, PSDs, kernels, parameters)
pub mod io;
/// The periodic voxel lattice and its auxiliary fields
pub mod lattice;
/// The immutable mix specification
pub mod mix;
/// Percolation scans, pore sizes and surface area
pub mod percolation;
/// The closed phase catalogue and its property tables
pub mod phase;
/// Particle parking into the lattice
pub mod placer;
/// Particle size distributions and radius sampling
pub mod psd;
/// Long-period seedable random source
pub mod rng;
/// Cycle-to-time mapping and temperature evolution
pub mod thermal;
/// Reusable scratch memory for cycles and scans
pub(crate) mod workspace;

use log::info;
use thiserror::Error as ThisError;

pub use aggregate::{pack_aggregate, AggregateError, AggregateSpec};
pub use distribute::{distribute_phases, AnnealSettings, CorrelationKernel, DistributionReport};
pub use hydrate::{
    CancelToken, CycleRecord, HydrationEngine, HydrationError, HydrationParameters, PhaseMap,
    Termination,
};
pub use io::FormatError;
pub use lattice::{Lattice, PhaseCensus};
pub use mix::{Arrangement, ClinkerComposition, MixError, MixSpec, ScmKind, ScmSpec};
pub use phase::{Phase, PhaseClass, NUM_PHASES};
pub use placer::{place_particles, Placement, PlacementError, ShapeCatalogue};
pub use psd::{PsdError, PsdTable};
pub use rng::Ran2;
pub use thermal::{ThermalMode, ThermalSettings};

pub(crate) type HashState = fxhash::FxBuildHasher;
pub(crate) type MapType<K, V> = std::collections::HashMap<K, V, HashState>;
pub(crate) fn new_map<K, V>() -> MapType<K, V> {
    MapType::with_hasher(HashState::default())
}

/// Error type covering the whole generation and hydration pipeline
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum SimulationError {
    /// Invalid mix specification
    #[error("mix specification: {0}")]
    Mix(#[from] MixError),
    /// PSD table or sampling failure
    #[error("particle size distribution: {0}")]
    Psd(#[from] PsdError),
    /// The placer could not reach the target solid fraction
    #[error("placement: {0}")]
    Placement(#[from] PlacementError),
    /// The aggregate packer could not meet the grading
    #[error("aggregate packing: {0}")]
    Aggregate(#[from] AggregateError),
    /// Malformed input file
    #[error("input format: {0}")]
    Format(#[from] FormatError),
    /// Fatal engine invariant violation or cancellation
    #[error("hydration: {0}")]
    Hydration(#[from] HydrationError),
    /// Any error that is not represented by some other explicit variant
    #[error("unknown error")]
    Unknown(anyhow::Error),
}

impl From<anyhow::Error> for SimulationError {
    /// Allows automatic conversion of an anyhow::Error to a [SimulationError]
    fn from(error: anyhow::Error) -> Self {
        SimulationError::Unknown(error)
    }
}

/// A generated initial microstructure: the painted lattice (with its
/// particle-id map) plus the distribution diagnostics. Particle records are
/// dropped once distribution has painted the lattice.
pub struct Microstructure {
    pub lattice: Lattice,
    pub report: DistributionReport,
    /// Achieved solid volume fraction of the paste
    pub solid_fraction: f64,
}

impl Microstructure {
    /// Wraps this microstructure in a hydration engine. The engine RNG is
    /// seeded from the mix master seed on its own sub-stream so generation
    /// and hydration can be replayed independently.
    pub fn into_engine(
        self,
        params: HydrationParameters,
        thermal: ThermalSettings,
        master_seed: i32,
    ) -> HydrationEngine {
        HydrationEngine::new(
            self.lattice,
            params,
            thermal,
            Ran2::derive_seed(master_seed, 2),
        )
    }
}

/// Builds the initial microstructure for a mix: placement, then phase
/// distribution. Stage RNGs are derived from the mix master seed.
pub fn generate_microstructure(
    spec: &MixSpec,
    shapes: Option<&ShapeCatalogue>,
    anneal: &AnnealSettings,
) -> Result<Microstructure, SimulationError> {
    spec.validate()?;
    info!(
        "generating {}x{}x{} microstructure at {} um/voxel",
        spec.dims[0], spec.dims[1], spec.dims[2], spec.resolution
    );

    let mut placement_rng = Ran2::new(Ran2::derive_seed(spec.seed, 0));
    let mut placement = place_particles(spec, shapes, &mut placement_rng)?;

    let mut distribution_rng = Ran2::new(Ran2::derive_seed(spec.seed, 1));
    let report = distribute_phases(&mut placement, spec, anneal, &mut distribution_rng);

    Ok(Microstructure {
        lattice: placement.lattice,
        report,
        solid_fraction: placement.solid_fraction,
    })
}
