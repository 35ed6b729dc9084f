//! Closed catalogue of voxel phases and their physical properties.
//!
//! Every voxel of a [`Lattice`](crate::lattice::Lattice) carries exactly one
//! [`Phase`]. The catalogue maps each phase to its density, molar mass/volume,
//! classification flags, dissolution behaviour and rendering colour. All
//! lookups are table driven and O(1) in the integer representation of the tag.

use bitflags::bitflags;
use std::fmt;

/// Number of entries in the closed phase enumeration.
///
/// The property tables below are sized by this constant; adding a variant to
/// [`Phase`] without extending them fails the consistency test in this module.
pub const NUM_PHASES: usize = 57;

/// Chemical or pseudo-chemical identity of a single voxel.
///
/// The enumeration is closed. The integer representation is stable and is the
/// value written to microstructure image files.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Water filled capillary porosity
    Porosity = 0,
    /// Tricalcium silicate (alite)
    C3S = 1,
    /// Dicalcium silicate (belite)
    C2S = 2,
    /// Cubic tricalcium aluminate
    C3A = 3,
    /// Orthorhombic (alkali stabilised) tricalcium aluminate
    OC3A = 4,
    /// Tetracalcium aluminoferrite
    C4AF = 5,
    /// Calcium sulfate dihydrate
    Gypsum = 6,
    /// Gypsum absorbed onto C-S-H surfaces
    AbsorbedGyp = 7,
    /// Secondary gypsum formed from hemihydrate or anhydrite
    SecondaryGyp = 8,
    /// Calcium sulfate hemihydrate (plaster)
    Hemihyd = 9,
    /// Anhydrous calcium sulfate
    Anhydrite = 10,
    /// Arcanite (potassium sulfate)
    K2SO4 = 11,
    /// Thenardite (sodium sulfate)
    Na2SO4 = 12,
    /// Ground granulated blast furnace slag
    Slag = 13,
    /// Undifferentiated fly ash (before phase assignment)
    FlyAsh = 14,
    /// Aluminosilicate glass
    ASG = 15,
    /// Calcium aluminodisilicate (anorthite composition)
    CAS2 = 16,
    /// Amorphous silica
    AmSil = 17,
    /// Condensed silica fume
    SilicaFume = 18,
    /// Calcite (limestone filler)
    CaCO3 = 19,
    /// Free lime
    FreeLime = 20,
    /// Calcium chloride
    CaCl2 = 21,
    /// Inert filler
    Inert = 22,
    /// Calcium silicate hydrate gel
    CSH = 23,
    /// Pozzolanic C-S-H (from silica + CH)
    PozzCSH = 24,
    /// Slag hydration C-S-H
    SlagCSH = 25,
    /// Portlandite (calcium hydroxide)
    CH = 26,
    /// Ettringite
    Ettr = 27,
    /// Iron rich ettringite (from C4AF)
    EttrC4AF = 28,
    /// Monosulfoaluminate
    Afm = 29,
    /// Carboaluminate (AFm with carbonate)
    AfmC = 30,
    /// Stratlingite
    Strat = 31,
    /// Hydrogarnet
    C3AH6 = 32,
    /// Iron hydroxide gel
    FH3 = 33,
    /// Friedel's salt
    Friedel = 34,
    /// Brucite
    Brucite = 35,
    /// Magnesium silicate hydrate
    MS = 36,
    /// Diffusing C-S-H species
    DiffCSH = 37,
    /// Diffusing portlandite species
    DiffCH = 38,
    /// Diffusing sulfate (gypsum) species
    DiffGyp = 39,
    /// Diffusing aluminate species
    DiffC3A = 40,
    /// Diffusing aluminoferrite species
    DiffC4A = 41,
    /// Diffusing iron hydroxide species
    DiffFH3 = 42,
    /// Diffusing ettringite species
    DiffEttr = 43,
    /// Diffusing carbonate species
    DiffCaCO3 = 44,
    /// Diffusing aluminosilicate species
    DiffASG = 45,
    /// Diffusing anhydrite derived sulfate
    DiffAnh = 46,
    /// Diffusing hemihydrate derived sulfate
    DiffHem = 47,
    /// Diffusing calcium aluminodisilicate species
    DiffCAS2 = 48,
    /// Diffusing chloride species
    DiffCaCl2 = 49,
    /// Porosity emptied by self desiccation
    EmptyPorosity = 50,
    /// Porosity emptied by drying
    DriedPorosity = 51,
    /// Coarse aggregate, first population
    CoarseAgg = 52,
    /// Coarse aggregate, second population
    CoarseAgg2 = 53,
    /// Fine aggregate, first population
    FineAgg = 54,
    /// Fine aggregate, second population
    FineAgg2 = 55,
    /// Interfacial transition zone around aggregate
    Itz = 56,
}

bitflags! {
    /// Classification flags for a phase.
    pub struct PhaseClass: u16 {
        /// Water filled or empty pore space
        const PORE       = 1 << 0;
        /// Anhydrous clinker
        const CLINKER    = 1 << 1;
        /// Calcium or alkali sulfate carrier
        const SULFATE    = 1 << 2;
        /// Supplementary cementitious material
        const SCM        = 1 << 3;
        /// Hydration product
        const PRODUCT    = 1 << 4;
        /// Transient diffusing species
        const DIFFUSING  = 1 << 5;
        /// May dissolve when exposed to pore space
        const SOLUBLE    = 1 << 6;
        /// Aggregate at the concrete scale
        const AGGREGATE  = 1 << 7;
        /// Occupies space as a solid
        const SOLID      = 1 << 8;
    }
}

/// Physical constants of one catalogue entry.
#[derive(Clone, Debug)]
pub struct PhaseProperties {
    /// The phase this entry describes
    pub phase: Phase,
    /// Specific gravity in Mg/m^3 (zero for empty pore classes)
    pub density: f64,
    /// Molar mass in g/mol (zero where not meaningful)
    pub molar_mass: f64,
    /// Molar volume in cm^3/mol
    pub molar_volume: f64,
    /// Classification flags
    pub class: PhaseClass,
    /// Apparent activation energy for thermally activated reaction, kJ/mol
    pub activation_energy: f64,
    /// Enthalpy of complete reaction per unit mass of reactant, kJ/kg
    pub heat_of_reaction: f64,
    /// Palette colour for rendering collaborators
    pub color: [u8; 3],
}

/// How a soluble solid enters the diffusion pool when it dissolves.
///
/// The dissolved voxel itself becomes `marker` (or porosity if `None`, e.g.
/// alkali sulfates that dissolve straight into solution). Each `(species, p)`
/// in `spawns` creates one additional diffusing voxel at a random porosity
/// neighbour; integral parts always spawn, the fractional remainder spawns
/// with the corresponding probability so that the volumetric stoichiometry is
/// honoured in expectation.
#[derive(Clone, Debug)]
pub struct DissolutionRule {
    /// Diffusion marker left in place of the dissolved voxel
    pub marker: Option<Phase>,
    /// Additional diffusing voxels per dissolved voxel (species, expected count)
    pub spawns: &'static [(Phase, f64)],
    /// Water consumed per dissolved voxel, in voxel volumes
    pub water: f64,
}

/// Terminal solid deposited when a diffusing species precipitates.
///
/// `volume_factor` is the solid volume produced per diffusing voxel; the
/// excess over 1.0 is placed at free neighbours with the matching probability.
#[derive(Clone, Copy, Debug)]
pub struct DepositRule {
    /// Equilibrium solid product
    pub solid: Phase,
    /// Solid volume produced per diffusing voxel
    pub volume_factor: f64,
    /// Water bound on precipitation, voxel volumes per diffusing voxel
    pub water: f64,
}

impl Phase {
    /// Stable integer representation, as stored in image files.
    #[inline(always)]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Reconstructs a phase from its integer representation.
    #[inline]
    pub fn from_id(id: u8) -> Option<Phase> {
        ALL_PHASES.get(id as usize).copied()
    }

    /// Property table entry for this phase.
    #[inline(always)]
    pub fn properties(self) -> &'static PhaseProperties {
        &CATALOGUE[self as usize]
    }

    /// Classification flags for this phase.
    #[inline(always)]
    pub fn class(self) -> PhaseClass {
        CATALOGUE[self as usize].class
    }

    #[inline(always)]
    pub fn is_pore(self) -> bool {
        self.class().contains(PhaseClass::PORE)
    }

    #[inline(always)]
    pub fn is_solid(self) -> bool {
        self.class().contains(PhaseClass::SOLID)
    }

    #[inline(always)]
    pub fn is_clinker(self) -> bool {
        self.class().contains(PhaseClass::CLINKER)
    }

    #[inline(always)]
    pub fn is_soluble(self) -> bool {
        self.class().contains(PhaseClass::SOLUBLE)
    }

    #[inline(always)]
    pub fn is_diffusing(self) -> bool {
        self.class().contains(PhaseClass::DIFFUSING)
    }

    #[inline(always)]
    pub fn is_aggregate(self) -> bool {
        self.class().contains(PhaseClass::AGGREGATE)
    }

    /// Dissolution rule for a soluble solid, `None` for everything else.
    pub fn dissolution(self) -> Option<&'static DissolutionRule> {
        dissolution_rule(self)
    }

    /// Deposit rule for a diffusing species, `None` for everything else.
    pub fn deposit(self) -> Option<DepositRule> {
        deposit_rule(self)
    }

    /// Dense index of a diffusing species into per-species counters.
    #[inline]
    pub fn diffuser_index(self) -> Option<usize> {
        let id = self as u8;
        let lo = Phase::DiffCSH as u8;
        let hi = Phase::DiffCaCl2 as u8;
        (lo..=hi).contains(&id).then(|| (id - lo) as usize)
    }

    /// All diffusing species, indexable by [`Phase::diffuser_index`].
    pub fn diffusers() -> &'static [Phase] {
        &ALL_PHASES[Phase::DiffCSH as usize..=Phase::DiffCaCl2 as usize]
    }

    /// All catalogue entries in id order.
    pub fn all() -> &'static [Phase; NUM_PHASES] {
        &ALL_PHASES
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(crate) static ALL_PHASES: [Phase; NUM_PHASES] = [
    Phase::Porosity,
    Phase::C3S,
    Phase::C2S,
    Phase::C3A,
    Phase::OC3A,
    Phase::C4AF,
    Phase::Gypsum,
    Phase::AbsorbedGyp,
    Phase::SecondaryGyp,
    Phase::Hemihyd,
    Phase::Anhydrite,
    Phase::K2SO4,
    Phase::Na2SO4,
    Phase::Slag,
    Phase::FlyAsh,
    Phase::ASG,
    Phase::CAS2,
    Phase::AmSil,
    Phase::SilicaFume,
    Phase::CaCO3,
    Phase::FreeLime,
    Phase::CaCl2,
    Phase::Inert,
    Phase::CSH,
    Phase::PozzCSH,
    Phase::SlagCSH,
    Phase::CH,
    Phase::Ettr,
    Phase::EttrC4AF,
    Phase::Afm,
    Phase::AfmC,
    Phase::Strat,
    Phase::C3AH6,
    Phase::FH3,
    Phase::Friedel,
    Phase::Brucite,
    Phase::MS,
    Phase::DiffCSH,
    Phase::DiffCH,
    Phase::DiffGyp,
    Phase::DiffC3A,
    Phase::DiffC4A,
    Phase::DiffFH3,
    Phase::DiffEttr,
    Phase::DiffCaCO3,
    Phase::DiffASG,
    Phase::DiffAnh,
    Phase::DiffHem,
    Phase::DiffCAS2,
    Phase::DiffCaCl2,
    Phase::EmptyPorosity,
    Phase::DriedPorosity,
    Phase::CoarseAgg,
    Phase::CoarseAgg2,
    Phase::FineAgg,
    Phase::FineAgg2,
    Phase::Itz,
];

// Shorthand used only in the tables below.
const fn props(
    phase: Phase,
    density: f64,
    molar_mass: f64,
    molar_volume: f64,
    class: PhaseClass,
    activation_energy: f64,
    heat_of_reaction: f64,
    color: [u8; 3],
) -> PhaseProperties {
    PhaseProperties {
        phase,
        density,
        molar_mass,
        molar_volume,
        class,
        activation_energy,
        heat_of_reaction,
        color,
    }
}

const PORE: PhaseClass = PhaseClass::PORE;
const SOLID: PhaseClass = PhaseClass::SOLID;
const CLINKER: PhaseClass =
    PhaseClass::from_bits_truncate(PhaseClass::CLINKER.bits() | SOLID.bits() | SOL.bits());
const SULF: PhaseClass =
    PhaseClass::from_bits_truncate(PhaseClass::SULFATE.bits() | SOLID.bits() | SOL.bits());
const SCM: PhaseClass = PhaseClass::from_bits_truncate(PhaseClass::SCM.bits() | SOLID.bits());
const SCM_SOL: PhaseClass = PhaseClass::from_bits_truncate(SCM.bits() | SOL.bits());
const PRODUCT: PhaseClass =
    PhaseClass::from_bits_truncate(PhaseClass::PRODUCT.bits() | SOLID.bits());
const DIFF: PhaseClass = PhaseClass::DIFFUSING;
const SOL: PhaseClass = PhaseClass::SOLUBLE;
const AGG: PhaseClass = PhaseClass::from_bits_truncate(PhaseClass::AGGREGATE.bits() | SOLID.bits());

/// Gypsum may re-dissolve after absorption, so the absorbed and secondary
/// variants stay soluble. Products are terminal except where the engine
/// handles conversion explicitly (ettringite, CSH densification).
static CATALOGUE: [PhaseProperties; NUM_PHASES] = [
    props(Phase::Porosity, 1.0, 18.02, 18.07, PORE, 0.0, 0.0, [0, 0, 0]),
    props(Phase::C3S, 3.21, 228.32, 71.13, CLINKER, 40.0, 517.0, [200, 35, 35]),
    props(Phase::C2S, 3.28, 172.24, 52.51, CLINKER, 40.0, 262.0, [0, 147, 202]),
    props(Phase::C3A, 3.03, 270.20, 89.17, CLINKER, 40.0, 1144.0, [0, 158, 66]),
    props(Phase::OC3A, 3.05, 270.20, 88.59, CLINKER, 40.0, 1144.0, [24, 120, 48]),
    props(Phase::C4AF, 3.73, 485.97, 130.29, CLINKER, 40.0, 725.0, [245, 148, 30]),
    props(Phase::Gypsum, 2.32, 172.18, 74.21, SULF, 30.0, 0.0, [252, 237, 70]),
    props(Phase::AbsorbedGyp, 2.32, 172.18, 74.21, SULF, 30.0, 0.0, [228, 212, 60]),
    props(Phase::SecondaryGyp, 2.32, 172.18, 74.21, SULF, 30.0, 0.0, [240, 228, 120]),
    props(Phase::Hemihyd, 2.74, 145.15, 52.97, SULF, 30.0, 132.0, [250, 242, 160]),
    props(Phase::Anhydrite, 2.61, 136.14, 52.16, SULF, 30.0, 105.0, [250, 248, 200]),
    props(Phase::K2SO4, 2.66, 174.27, 65.51, SULF, 30.0, 0.0, [210, 60, 200]),
    props(Phase::Na2SO4, 2.68, 142.04, 53.00, SULF, 30.0, 0.0, [160, 40, 160]),
    props(Phase::Slag, 2.87, 100.00, 34.84, SCM_SOL, 50.0, 461.0, [0, 90, 40]),
    props(Phase::FlyAsh, 2.50, 100.00, 40.00, SCM, 0.0, 0.0, [135, 135, 135]),
    props(Phase::ASG, 2.50, 142.11, 56.84, SCM_SOL, 83.1, 560.0, [178, 52, 52]),
    props(Phase::CAS2, 2.77, 278.21, 100.44, SCM_SOL, 83.1, 340.0, [166, 92, 52]),
    props(Phase::AmSil, 2.20, 60.08, 27.31, SCM_SOL, 83.1, 780.0, [116, 116, 116]),
    props(Phase::SilicaFume, 2.20, 60.08, 27.31, SCM_SOL, 83.1, 780.0, [96, 96, 96]),
    props(Phase::CaCO3, 2.71, 100.09, 36.93, SCM_SOL, 40.0, 0.0, [250, 228, 196]),
    props(Phase::FreeLime, 3.34, 56.08, 16.79, SCM_SOL, 40.0, 1163.0, [255, 108, 108]),
    props(Phase::CaCl2, 2.15, 110.98, 51.62, SCM_SOL, 40.0, 0.0, [230, 40, 140]),
    props(Phase::Inert, 2.70, 60.00, 22.22, SCM, 0.0, 0.0, [130, 0, 0]),
    props(Phase::CSH, 2.11, 227.80, 107.96, PRODUCT, 0.0, 0.0, [245, 222, 179]),
    props(Phase::PozzCSH, 1.90, 193.44, 101.81, PRODUCT, 0.0, 0.0, [222, 184, 135]),
    props(Phase::SlagCSH, 1.90, 193.44, 101.81, PRODUCT, 0.0, 0.0, [204, 166, 120]),
    props(Phase::CH, 2.24, 74.09, 33.08, PRODUCT, 0.0, 0.0, [26, 52, 210]),
    props(Phase::Ettr, 1.71, 1255.11, 735.00, PRODUCT, 0.0, 0.0, [170, 240, 80]),
    props(Phase::EttrC4AF, 1.71, 1255.11, 735.00, PRODUCT, 0.0, 0.0, [150, 212, 70]),
    props(Phase::Afm, 1.99, 622.52, 312.82, PRODUCT, 0.0, 0.0, [0, 139, 139]),
    props(Phase::AfmC, 2.17, 568.45, 261.96, PRODUCT, 0.0, 0.0, [0, 166, 166]),
    props(Phase::Strat, 1.94, 418.32, 215.63, PRODUCT, 0.0, 0.0, [88, 74, 160]),
    props(Phase::C3AH6, 2.52, 378.28, 150.11, PRODUCT, 0.0, 0.0, [0, 128, 128]),
    props(Phase::FH3, 3.06, 213.74, 69.85, PRODUCT, 0.0, 0.0, [142, 72, 20]),
    props(Phase::Friedel, 1.89, 561.33, 296.66, PRODUCT, 0.0, 0.0, [219, 112, 147]),
    props(Phase::Brucite, 2.37, 58.32, 24.61, PRODUCT, 0.0, 0.0, [221, 160, 221]),
    props(Phase::MS, 2.50, 294.00, 117.60, PRODUCT, 0.0, 0.0, [186, 85, 211]),
    props(Phase::DiffCSH, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [252, 235, 200]),
    props(Phase::DiffCH, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [120, 140, 245]),
    props(Phase::DiffGyp, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [255, 250, 140]),
    props(Phase::DiffC3A, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [120, 220, 140]),
    props(Phase::DiffC4A, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [250, 190, 110]),
    props(Phase::DiffFH3, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [190, 120, 60]),
    props(Phase::DiffEttr, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [205, 250, 150]),
    props(Phase::DiffCaCO3, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [250, 238, 220]),
    props(Phase::DiffASG, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [205, 110, 110]),
    props(Phase::DiffAnh, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [252, 250, 222]),
    props(Phase::DiffHem, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [252, 246, 190]),
    props(Phase::DiffCAS2, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [200, 140, 100]),
    props(Phase::DiffCaCl2, 1.0, 0.0, 0.0, DIFF, 0.0, 0.0, [245, 120, 180]),
    props(Phase::EmptyPorosity, 0.0, 0.0, 0.0, PORE, 0.0, 0.0, [45, 45, 45]),
    props(Phase::DriedPorosity, 0.0, 0.0, 0.0, PORE, 0.0, 0.0, [70, 70, 70]),
    props(Phase::CoarseAgg, 2.70, 0.0, 0.0, AGG, 0.0, 0.0, [105, 105, 115]),
    props(Phase::CoarseAgg2, 2.70, 0.0, 0.0, AGG, 0.0, 0.0, [119, 136, 153]),
    props(Phase::FineAgg, 2.65, 0.0, 0.0, AGG, 0.0, 0.0, [112, 128, 144]),
    props(Phase::FineAgg2, 2.65, 0.0, 0.0, AGG, 0.0, 0.0, [100, 112, 126]),
    props(Phase::Itz, 1.0, 0.0, 0.0, PORE, 0.0, 0.0, [169, 169, 169]),
];

/// Volumetric dissolution stoichiometry, derived from the molar volumes above.
///
/// C3S: C3S + 5.3 H -> C1.7-S-H4 + 1.3 CH gives, per unit C3S volume,
/// 1.521 CSH + 0.610 CH consuming 1.34 volumes of water. The dissolved voxel
/// carries one volume into the pool as DiffCSH; the remainder is spawned.
/// The other rules are balanced the same way from the molar volumes.
fn dissolution_rule(phase: Phase) -> Option<&'static DissolutionRule> {
    use Phase::*;
    static C3S_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffCSH),
        spawns: &[(DiffCSH, 0.521), (DiffCH, 0.610)],
        water: 1.34,
    };
    static C2S_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffCSH),
        spawns: &[(DiffCSH, 1.077), (DiffCH, 0.191)],
        water: 1.49,
    };
    static C3A_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffC3A),
        spawns: &[],
        water: 0.0,
    };
    static C4AF_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffC4A),
        spawns: &[(DiffFH3, 0.545), (DiffCH, 0.26)],
        water: 0.0,
    };
    static GYPSUM_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffGyp),
        spawns: &[],
        water: 0.0,
    };
    static HEMIHYD_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffHem),
        spawns: &[],
        water: 0.0,
    };
    static ANHYDRITE_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffAnh),
        spawns: &[],
        water: 0.0,
    };
    // Alkali sulfates release their cations straight into solution; the
    // sulfate re-enters the pool as diffusing gypsum at the volume ratio of
    // gypsum to carrier.
    static K2SO4_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffGyp),
        spawns: &[(DiffGyp, 0.13)],
        water: 0.0,
    };
    static NA2SO4_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffGyp),
        spawns: &[(DiffGyp, 0.40)],
        water: 0.0,
    };
    static FREELIME_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffCH),
        spawns: &[(DiffCH, 0.97)],
        water: 1.08,
    };
    static CACO3_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffCaCO3),
        spawns: &[],
        water: 0.0,
    };
    static CACL2_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffCaCl2),
        spawns: &[],
        water: 0.0,
    };
    static ASG_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffASG),
        spawns: &[],
        water: 0.0,
    };
    static CAS2_RULE: DissolutionRule = DissolutionRule {
        marker: Some(DiffCAS2),
        spawns: &[],
        water: 0.0,
    };
    match phase {
        C3S => Some(&C3S_RULE),
        C2S => Some(&C2S_RULE),
        C3A | OC3A => Some(&C3A_RULE),
        C4AF => Some(&C4AF_RULE),
        Gypsum | AbsorbedGyp | SecondaryGyp => Some(&GYPSUM_RULE),
        Hemihyd => Some(&HEMIHYD_RULE),
        Anhydrite => Some(&ANHYDRITE_RULE),
        K2SO4 => Some(&K2SO4_RULE),
        Na2SO4 => Some(&NA2SO4_RULE),
        FreeLime => Some(&FREELIME_RULE),
        CaCO3 => Some(&CACO3_RULE),
        CaCl2 => Some(&CACL2_RULE),
        ASG => Some(&ASG_RULE),
        CAS2 => Some(&CAS2_RULE),
        _ => None,
    }
}

/// Equilibrium deposit of each diffusing species at end of life.
///
/// Volume factors over 1.0 grow the deposit into free neighbours; the bound
/// water enters the shrinkage ledger when the deposit happens.
fn deposit_rule(phase: Phase) -> Option<DepositRule> {
    use Phase::*;
    let rule = |solid, volume_factor, water| DepositRule {
        solid,
        volume_factor,
        water,
    };
    Some(match phase {
        DiffCSH => rule(CSH, 1.0, 0.0),
        DiffCH => rule(CH, 1.0, 0.0),
        DiffGyp => rule(SecondaryGyp, 1.0, 0.0),
        DiffC3A => rule(C3AH6, 1.69, 1.21),
        DiffC4A => rule(C3AH6, 1.17, 1.41),
        DiffFH3 => rule(FH3, 1.0, 0.0),
        DiffEttr => rule(Ettr, 1.0, 0.0),
        DiffCaCO3 => rule(CaCO3, 1.0, 0.0),
        DiffASG => rule(ASG, 1.0, 0.0),
        DiffAnh => rule(SecondaryGyp, 1.62, 0.78),
        DiffHem => rule(SecondaryGyp, 1.40, 0.72),
        DiffCAS2 => rule(CAS2, 1.0, 0.0),
        DiffCaCl2 => rule(CaCl2, 1.0, 0.0),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_is_aligned_with_ids() {
        for (i, entry) in CATALOGUE.iter().enumerate() {
            assert_eq!(entry.phase as usize, i, "misplaced entry {:?}", entry.phase);
        }
        for (i, phase) in ALL_PHASES.iter().enumerate() {
            assert_eq!(phase.id() as usize, i);
            assert_eq!(Phase::from_id(phase.id()), Some(*phase));
        }
        assert_eq!(Phase::from_id(NUM_PHASES as u8), None);
    }

    #[test]
    fn molar_volumes_match_density_and_mass() {
        for entry in CATALOGUE.iter() {
            if entry.molar_mass > 0.0 && entry.density > 0.0 {
                let implied = entry.molar_mass / entry.density;
                let err = (implied - entry.molar_volume).abs() / entry.molar_volume;
                assert!(
                    err < 0.03,
                    "{:?}: molar volume {} vs implied {}",
                    entry.phase,
                    entry.molar_volume,
                    implied
                );
            }
        }
    }

    #[test]
    fn soluble_phases_have_dissolution_rules() {
        // Slag and the silica SCMs are consumed by CH-mediated surface
        // reactions instead of entering the diffusion pool.
        let surface_reacting = [Phase::Slag, Phase::AmSil, Phase::SilicaFume];
        for phase in Phase::all() {
            if surface_reacting.contains(phase) {
                assert!(phase.is_soluble());
                assert!(phase.dissolution().is_none());
            } else if phase.is_soluble() {
                assert!(
                    phase.dissolution().is_some(),
                    "{:?} soluble without a rule",
                    phase
                );
            } else {
                assert!(phase.dissolution().is_none(), "{:?} has stray rule", phase);
            }
        }
    }

    #[test]
    fn diffusers_have_deposit_rules_and_dense_indices() {
        let diffusers = Phase::diffusers();
        assert_eq!(diffusers.len(), 13);
        for (i, species) in diffusers.iter().enumerate() {
            assert!(species.is_diffusing());
            assert_eq!(species.diffuser_index(), Some(i));
            assert!(species.deposit().is_some());
        }
        assert_eq!(Phase::CSH.diffuser_index(), None);
        assert!(Phase::CSH.deposit().is_none());
    }

    #[test]
    fn spawn_targets_are_diffusing_species() {
        for phase in Phase::all() {
            if let Some(rule) = phase.dissolution() {
                if let Some(marker) = rule.marker {
                    assert!(marker.is_diffusing());
                }
                for (species, expected) in rule.spawns {
                    assert!(species.is_diffusing());
                    assert!(*expected > 0.0);
                }
            }
        }
    }
}
