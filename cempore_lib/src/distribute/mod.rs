//! Conversion of the monophase particle map into final chemical identities.
//!
//! The placer parks clinker as placeholder C3S and fly ash as the
//! undifferentiated fly ash phase; this module paints both to their final
//! identities. Sulfate carriers are placed as their own particles and are
//! not touched here.

pub mod clinker;
pub mod correlation;
pub mod flyash;

pub use clinker::{distribute_clinker, AnnealReport, AnnealSettings};
pub use correlation::{measure_autocorrelation, CorrelationKernel};
pub use flyash::{distribute_fly_ash, FlyAshReport};

use crate::mix::{MixSpec, ScmKind};
use crate::placer::Placement;
use crate::rng::Ran2;

/// Summary of the distribution stage.
#[derive(Clone, Debug)]
pub struct DistributionReport {
    pub clinker: AnnealReport,
    pub fly_ash: Vec<FlyAshReport>,
}

/// Runs clinker and fly ash distribution over a fresh placement.
///
/// Correlation annealing that fails to reach tolerance logs a warning and
/// keeps the best state seen; it never aborts the pipeline.
pub fn distribute_phases(
    placement: &mut Placement,
    spec: &MixSpec,
    settings: &AnnealSettings,
    rng: &mut Ran2,
) -> DistributionReport {
    let clinker = distribute_clinker(&mut placement.lattice, &spec.clinker, settings, rng);

    let mut fly_ash = Vec::new();
    for scm in &spec.scms {
        if let ScmKind::FlyAsh(composition) = &scm.kind {
            fly_ash.push(distribute_fly_ash(&mut placement.lattice, composition, rng));
        }
    }

    DistributionReport { clinker, fly_ash }
}
