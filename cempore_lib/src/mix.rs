//! Mix specification: the immutable value object describing what to build.
//!
//! A [`MixSpec`] is assembled by the caller (CLI driver, tests), validated
//! once, and then treated as read-only by every pipeline stage.

use crate::aggregate::AggregateSpec;
use crate::distribute::correlation::CorrelationKernel;
use crate::phase::Phase;
use crate::psd::PsdTable;
use thiserror::Error as ThisError;

/// Errors reported by mix specification validation.
#[derive(Debug, ThisError)]
pub enum MixError {
    #[error("RNG seed must be negative, got {0}")]
    SeedNotNegative(i32),
    #[error("water/binder ratio {0} is outside the supported range (0.15..=2.0)")]
    WaterBinderRange(f64),
    #[error("{context}: fractions sum to {sum}, expected {expected}")]
    FractionSum {
        context: &'static str,
        sum: f64,
        expected: f64,
    },
    #[error("fraction {value} for {context} is outside [0, 1]")]
    FractionRange { context: &'static str, value: f64 },
    #[error("binder mass is exhausted: sulfates and SCMs sum to {0} of unit mass")]
    NoCementLeft(f64),
    #[error("lattice dimension must be positive")]
    EmptyLattice,
    #[error("lattice resolution must be positive, got {0}")]
    BadResolution(f64),
}

/// Volume and surface fractions of the clinker and alkali sulfate phases,
/// in the fixed order C3S, C2S, C3A, C4AF, K2SO4, Na2SO4 (the order of the
/// statistics file).
#[derive(Clone, Debug)]
pub struct ClinkerComposition {
    pub volume_fractions: [f64; 6],
    pub surface_fractions: [f64; 6],
    /// Fraction of the C3A share painted as orthorhombic (alkali stabilised)
    pub orthorhombic_c3a: f64,
    /// Measured two-point correlation kernels per phase, same order; phases
    /// without a kernel are painted without an annealing target.
    pub correlation_kernels: [Option<CorrelationKernel>; 6],
}

/// The six phases of the statistics file, in file order.
pub const CLINKER_PHASES: [Phase; 6] = [
    Phase::C3S,
    Phase::C2S,
    Phase::C3A,
    Phase::C4AF,
    Phase::K2SO4,
    Phase::Na2SO4,
];

impl ClinkerComposition {
    /// A composition with the given volume fractions, surface fractions set
    /// equal to the volume fractions and no correlation targets.
    pub fn from_volume_fractions(volume_fractions: [f64; 6]) -> Self {
        Self {
            volume_fractions,
            surface_fractions: volume_fractions,
            orthorhombic_c3a: 0.0,
            correlation_kernels: Default::default(),
        }
    }

    /// Pure-C3S composition used widely in tests and validation scenarios.
    pub fn pure_c3s() -> Self {
        Self::from_volume_fractions([1.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn validate(&self) -> Result<(), MixError> {
        for fractions in [&self.volume_fractions, &self.surface_fractions] {
            let sum: f64 = fractions.iter().sum();
            if (sum - 1.0).abs() > 1e-6 {
                return Err(MixError::FractionSum {
                    context: "clinker fractions",
                    sum,
                    expected: 1.0,
                });
            }
            if let Some(v) = fractions.iter().find(|v| **v < 0.0 || **v > 1.0) {
                return Err(MixError::FractionRange {
                    context: "clinker fraction",
                    value: *v,
                });
            }
        }
        if !(0.0..=1.0).contains(&self.orthorhombic_c3a) {
            return Err(MixError::FractionRange {
                context: "orthorhombic C3A share",
                value: self.orthorhombic_c3a,
            });
        }
        Ok(())
    }

    /// Density of the clinker in Mg/m^3, volume-fraction weighted.
    pub fn density(&self) -> f64 {
        CLINKER_PHASES
            .iter()
            .zip(self.volume_fractions.iter())
            .map(|(p, v)| p.properties().density * v)
            .sum()
    }
}

/// Calcium sulfate carrier content, as mass fractions of total binder.
#[derive(Clone, Debug, Default)]
pub struct SulfateSpec {
    pub gypsum: f64,
    pub hemihydrate: f64,
    pub anhydrite: f64,
    /// Carrier PSD; defaults to the binder PSD when absent.
    pub psd: Option<PsdTable>,
}

impl SulfateSpec {
    pub fn total_mass_fraction(&self) -> f64 {
        self.gypsum + self.hemihydrate + self.anhydrite
    }
}

/// Basis on which fly ash voxels receive their chemical identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlyAshBasis {
    /// Whole particles are monophase
    PerParticle,
    /// Each voxel sampled independently
    PerVoxel,
}

/// Multinomial phase make-up of a fly ash, in volume fractions.
#[derive(Clone, Debug)]
pub struct FlyAshComposition {
    pub fractions: Vec<(Phase, f64)>,
    pub basis: FlyAshBasis,
}

impl FlyAshComposition {
    fn validate(&self) -> Result<(), MixError> {
        let sum: f64 = self.fractions.iter().map(|(_, f)| f).sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(MixError::FractionSum {
                context: "fly ash composition",
                sum,
                expected: 1.0,
            });
        }
        Ok(())
    }
}

/// One supplementary cementitious material or filler stream.
#[derive(Clone, Debug)]
pub enum ScmKind {
    Slag,
    FlyAsh(FlyAshComposition),
    SilicaFume,
    Limestone,
    FreeLime,
    Inert,
}

impl ScmKind {
    /// Phase painted at placement time (fly ash is re-painted by the
    /// distributor).
    pub fn placement_phase(&self) -> Phase {
        match self {
            ScmKind::Slag => Phase::Slag,
            ScmKind::FlyAsh(_) => Phase::FlyAsh,
            ScmKind::SilicaFume => Phase::SilicaFume,
            ScmKind::Limestone => Phase::CaCO3,
            ScmKind::FreeLime => Phase::FreeLime,
            ScmKind::Inert => Phase::Inert,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScmSpec {
    pub kind: ScmKind,
    /// Mass fraction of total binder
    pub mass_fraction: f64,
    /// Defaults to the binder PSD when absent
    pub psd: Option<PsdTable>,
}

/// Spatial arrangement directive for the particle placer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Arrangement {
    /// Plain random parking
    Random,
    /// Small particles relocated next to large ones; intensity in [0, 1]
    Flocculated { intensity: f64 },
    /// Guaranteed clearance of 1 or 2 voxels between particles
    Dispersed { clearance: u8 },
}

/// Complete description of the paste to generate and hydrate.
#[derive(Clone, Debug)]
pub struct MixSpec {
    /// Lattice dimensions in voxels
    pub dims: [usize; 3],
    /// Voxel edge length in µm
    pub resolution: f64,
    /// Master RNG seed (negative by convention)
    pub seed: i32,
    /// Water to binder mass ratio
    pub water_binder_ratio: f64,
    /// PSD of the cement (and default for other streams)
    pub binder_psd: PsdTable,
    pub clinker: ClinkerComposition,
    pub sulfates: SulfateSpec,
    pub scms: Vec<ScmSpec>,
    pub arrangement: Arrangement,
    /// Retry budget per particle before giving up on a placement
    pub max_placement_retries: u32,
    /// Concrete-scale aggregate gradings; consumed by the aggregate packer,
    /// which builds its own lattice linked to the paste only through the ITZ
    pub aggregate: Option<AggregateSpec>,
}

impl MixSpec {
    /// A minimal valid spec around the given PSD, useful as a starting point.
    pub fn new(dims: [usize; 3], resolution: f64, seed: i32, binder_psd: PsdTable) -> Self {
        Self {
            dims,
            resolution,
            seed,
            water_binder_ratio: 0.4,
            binder_psd,
            clinker: ClinkerComposition::pure_c3s(),
            sulfates: SulfateSpec::default(),
            scms: Vec::new(),
            arrangement: Arrangement::Random,
            max_placement_retries: 500,
            aggregate: None,
        }
    }

    /// Validates the full specification; called once before placement.
    pub fn validate(&self) -> Result<(), MixError> {
        if self.dims.iter().any(|d| *d == 0) {
            return Err(MixError::EmptyLattice);
        }
        if self.resolution <= 0.0 {
            return Err(MixError::BadResolution(self.resolution));
        }
        if self.seed >= 0 {
            return Err(MixError::SeedNotNegative(self.seed));
        }
        if !(0.15..=2.0).contains(&self.water_binder_ratio) {
            return Err(MixError::WaterBinderRange(self.water_binder_ratio));
        }
        self.clinker.validate()?;
        let mut non_cement = self.sulfates.total_mass_fraction();
        for scm in &self.scms {
            if !(0.0..=1.0).contains(&scm.mass_fraction) {
                return Err(MixError::FractionRange {
                    context: "SCM mass fraction",
                    value: scm.mass_fraction,
                });
            }
            if let ScmKind::FlyAsh(composition) = &scm.kind {
                composition.validate()?;
            }
            non_cement += scm.mass_fraction;
        }
        if non_cement >= 1.0 {
            return Err(MixError::NoCementLeft(non_cement));
        }
        if let Arrangement::Flocculated { intensity } = self.arrangement {
            if !(0.0..=1.0).contains(&intensity) {
                return Err(MixError::FractionRange {
                    context: "flocculation intensity",
                    value: intensity,
                });
            }
        }
        Ok(())
    }

    /// Mass fraction of the binder that is cement clinker.
    pub fn cement_mass_fraction(&self) -> f64 {
        1.0 - self.sulfates.total_mass_fraction()
            - self.scms.iter().map(|s| s.mass_fraction).sum::<f64>()
    }

    /// Converts the mass-specified mix into per-stream solid volume shares
    /// and the overall solid volume fraction of the paste.
    pub fn volume_budget(&self) -> VolumeBudget {
        let mut entries: Vec<(ParticleStream, f64)> = Vec::new();

        let cement_volume = self.cement_mass_fraction() / self.clinker.density();
        entries.push((ParticleStream::Cement, cement_volume));

        let mut sulfate = |phase: Phase, mass: f64| {
            if mass > 0.0 {
                entries.push((
                    ParticleStream::Sulfate(phase),
                    mass / phase.properties().density,
                ));
            }
        };
        sulfate(Phase::Gypsum, self.sulfates.gypsum);
        sulfate(Phase::Hemihyd, self.sulfates.hemihydrate);
        sulfate(Phase::Anhydrite, self.sulfates.anhydrite);

        for (i, scm) in self.scms.iter().enumerate() {
            if scm.mass_fraction > 0.0 {
                let phase = scm.kind.placement_phase();
                entries.push((
                    ParticleStream::Scm(i),
                    scm.mass_fraction / phase.properties().density,
                ));
            }
        }

        let solids: f64 = entries.iter().map(|(_, v)| v).sum();
        let water = self.water_binder_ratio / Phase::Porosity.properties().density;
        VolumeBudget {
            shares: entries
                .into_iter()
                .map(|(stream, v)| (stream, v / solids))
                .collect(),
            solid_fraction: solids / (solids + water),
        }
    }
}

/// Identity of one particle stream handed to the placer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticleStream {
    /// Clinker particles, painted by the phase distributor
    Cement,
    /// A calcium sulfate carrier placed as its own particles
    Sulfate(Phase),
    /// Index into [`MixSpec::scms`]
    Scm(usize),
}

/// Solid volume shares per stream plus the paste solid fraction.
#[derive(Clone, Debug)]
pub struct VolumeBudget {
    /// `(stream, fraction of total solid volume)`, fractions sum to 1
    pub shares: Vec<(ParticleStream, f64)>,
    /// Solid volume / (solid + water volume)
    pub solid_fraction: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psd::PsdTable;

    fn base_spec() -> MixSpec {
        MixSpec::new([50, 50, 50], 1.0, -1234, PsdTable::monodisperse(6.0))
    }

    #[test]
    fn validation_accepts_the_base_spec() {
        assert!(base_spec().validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_seed_and_ratio() {
        let mut spec = base_spec();
        spec.seed = 7;
        assert!(matches!(spec.validate(), Err(MixError::SeedNotNegative(7))));
        let mut spec = base_spec();
        spec.water_binder_ratio = 3.0;
        assert!(matches!(
            spec.validate(),
            Err(MixError::WaterBinderRange(_))
        ));
    }

    #[test]
    fn validation_rejects_unnormalised_clinker() {
        let mut spec = base_spec();
        spec.clinker.volume_fractions = [0.5, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!(matches!(spec.validate(), Err(MixError::FractionSum { .. })));
    }

    #[test]
    fn solid_fraction_matches_hand_calculation() {
        // Pure C3S at w/c = 0.4: Vs = 1/3.21, Vw = 0.4
        let spec = base_spec();
        let budget = spec.volume_budget();
        let vs = 1.0 / 3.21;
        let expected = vs / (vs + 0.4);
        assert!((budget.solid_fraction - expected).abs() < 1e-9);
        assert_eq!(budget.shares.len(), 1);
        assert!((budget.shares[0].1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn volume_budget_splits_sulfates_and_scms() {
        let mut spec = base_spec();
        spec.sulfates.gypsum = 0.05;
        spec.scms.push(ScmSpec {
            kind: ScmKind::SilicaFume,
            mass_fraction: 0.10,
            psd: None,
        });
        spec.validate().unwrap();
        let budget = spec.volume_budget();
        assert_eq!(budget.shares.len(), 3);
        let total: f64 = budget.shares.iter().map(|(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-12);
        // Silica fume is light, so its volume share exceeds its mass share
        let sf = budget
            .shares
            .iter()
            .find(|(s, _)| matches!(s, ParticleStream::Scm(0)))
            .unwrap()
            .1;
        assert!(sf > 0.10);
    }

    #[test]
    fn cement_mass_fraction_accounts_for_everything_else() {
        let mut spec = base_spec();
        spec.sulfates.gypsum = 0.05;
        spec.sulfates.hemihydrate = 0.02;
        spec.scms.push(ScmSpec {
            kind: ScmKind::Slag,
            mass_fraction: 0.30,
            psd: None,
        });
        assert!((spec.cement_mass_fraction() - 0.63).abs() < 1e-12);
    }
}
