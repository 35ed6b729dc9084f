//! Thin command line driver around `cempore_lib`.
//!
//! The core is a programmatic API (MixSpec in, microstructure out); this
//! binary only translates arguments and input files into library calls and
//! writes the results back out.

mod report;

use anyhow::{anyhow, bail, Context};
use cempore_lib::distribute::AnnealSettings;
use cempore_lib::hydrate::{CancelToken, HydrationParameters, Termination};
use cempore_lib::mix::{
    Arrangement, ClinkerComposition, FlyAshBasis, FlyAshComposition, MixSpec, ScmKind, ScmSpec,
    CLINKER_PHASES,
};
use cempore_lib::thermal::ThermalSettings;
use cempore_lib::{generate_microstructure, io, percolation, Phase, PsdTable};
use clap::{Args, Parser, Subcommand};
use log::warn;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "cempore",
    about = "Generate and hydrate virtual cementitious microstructures",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an initial microstructure from a mix description
    Generate(GenerateArgs),
    /// Pack graded aggregate into a concrete-scale lattice with an ITZ
    Aggregate(AggregateArgs),
    /// Run hydration cycles on a saved microstructure
    Hydrate(HydrateArgs),
    /// Print census and transport metrics of a saved microstructure
    Info(InfoArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Cube edge length in voxels
    #[arg(long, default_value_t = 100)]
    size: usize,
    /// Voxel edge length in µm
    #[arg(long, default_value_t = 1.0)]
    resolution: f64,
    /// RNG seed (negative)
    #[arg(long, default_value_t = -1234, allow_hyphen_values = true)]
    seed: i32,
    /// Water to binder mass ratio
    #[arg(long, default_value_t = 0.4)]
    wb: f64,
    /// Cement PSD file (CSV); omit for a monodisperse 6 µm powder
    #[arg(long)]
    psd: Option<PathBuf>,
    /// Statistics (PFC) file with clinker volume and surface fractions
    #[arg(long)]
    stats: Option<PathBuf>,
    /// Correlation kernel file per clinker phase, as `phase=path`
    #[arg(long = "kernel", value_name = "PHASE=PATH")]
    kernels: Vec<String>,
    /// Gypsum mass fraction of binder
    #[arg(long, default_value_t = 0.0)]
    gypsum: f64,
    /// Hemihydrate mass fraction of binder
    #[arg(long, default_value_t = 0.0)]
    hemihyd: f64,
    /// Anhydrite mass fraction of binder
    #[arg(long, default_value_t = 0.0)]
    anhydrite: f64,
    /// Slag mass fraction of binder
    #[arg(long, default_value_t = 0.0)]
    slag: f64,
    /// Silica fume mass fraction of binder
    #[arg(long, default_value_t = 0.0)]
    silica_fume: f64,
    /// Limestone mass fraction of binder
    #[arg(long, default_value_t = 0.0)]
    limestone: f64,
    /// Fly ash mass fraction of binder
    #[arg(long, default_value_t = 0.0)]
    flyash: f64,
    /// Fly ash composition, e.g. `asg:0.5,cas2:0.2,amsil:0.15,inert:0.15`
    #[arg(long)]
    flyash_composition: Option<String>,
    /// Sample the fly ash multinomial per voxel instead of per particle
    #[arg(long)]
    flyash_per_voxel: bool,
    /// Flocculation intensity in [0, 1]
    #[arg(long, conflicts_with = "disperse")]
    flocculate: Option<f64>,
    /// Dispersion clearance in voxels (1 or 2)
    #[arg(long)]
    disperse: Option<u8>,
    /// Output microstructure image
    #[arg(short, long)]
    output: PathBuf,
    /// Optional output particle-id image
    #[arg(long)]
    particles: Option<PathBuf>,
}

#[derive(Args)]
struct AggregateArgs {
    /// Cube edge length in voxels
    #[arg(long, default_value_t = 100)]
    size: usize,
    /// Voxel edge length in mm
    #[arg(long, default_value_t = 1.0)]
    resolution: f64,
    /// RNG seed (negative)
    #[arg(long, default_value_t = -1234, allow_hyphen_values = true)]
    seed: i32,
    /// Coarse population as `volume_fraction=grading.csv`, up to twice
    #[arg(long = "coarse", value_name = "FRACTION=PATH")]
    coarse: Vec<String>,
    /// Fine population as `volume_fraction=grading.csv`, up to twice
    #[arg(long = "fine", value_name = "FRACTION=PATH")]
    fine: Vec<String>,
    /// ITZ paint thickness in voxels
    #[arg(long, default_value_t = 1)]
    itz: u32,
    /// Output concrete image
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct HydrateArgs {
    /// Input microstructure image
    #[arg(short, long)]
    image: PathBuf,
    /// Optional companion particle-id image
    #[arg(long)]
    particles: Option<PathBuf>,
    /// Parameter file with engine and thermal knobs
    #[arg(long)]
    params: Option<PathBuf>,
    /// Stop after this many cycles
    #[arg(long)]
    cycles: Option<u32>,
    /// Stop at this degree of hydration
    #[arg(long)]
    alpha: Option<f64>,
    /// Stop after this many simulated hours
    #[arg(long)]
    hours: Option<f64>,
    /// RNG seed (negative)
    #[arg(long, default_value_t = -1234, allow_hyphen_values = true)]
    seed: i32,
    /// Write a snapshot image every N cycles (0 = none)
    #[arg(long, default_value_t = 0)]
    save_every: u32,
    /// Output prefix for snapshots and the history table
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct InfoArgs {
    /// Microstructure image to analyse
    #[arg(short, long)]
    image: PathBuf,
    /// Largest inscribed-sphere radius probed by the pore-size scan
    #[arg(long, default_value_t = 10)]
    max_pore_radius: u32,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            if record.level() == log::Level::Warn {
                writeln!(buf, "WARNING in cempore: {}", record.args())
            } else {
                writeln!(buf, "{}: {}", record.level(), record.args())
            }
        })
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Generate(args) => generate(args),
        Command::Aggregate(args) => aggregate(args),
        Command::Hydrate(args) => hydrate(args),
        Command::Info(args) => info(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR in cempore: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let binder_psd = match &args.psd {
        Some(path) => io::read_psd(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
            &path.display().to_string(),
        )?,
        None => PsdTable::monodisperse(6.0),
    };

    let mut spec = MixSpec::new(
        [args.size, args.size, args.size],
        args.resolution,
        args.seed,
        binder_psd,
    );
    spec.water_binder_ratio = args.wb;
    spec.clinker = read_clinker(&args)?;
    spec.sulfates.gypsum = args.gypsum;
    spec.sulfates.hemihydrate = args.hemihyd;
    spec.sulfates.anhydrite = args.anhydrite;
    push_scm(&mut spec, ScmKind::Slag, args.slag);
    push_scm(&mut spec, ScmKind::SilicaFume, args.silica_fume);
    push_scm(&mut spec, ScmKind::Limestone, args.limestone);
    if args.flyash > 0.0 {
        let basis = if args.flyash_per_voxel {
            FlyAshBasis::PerVoxel
        } else {
            FlyAshBasis::PerParticle
        };
        let composition = parse_flyash_composition(
            args.flyash_composition
                .as_deref()
                .ok_or_else(|| anyhow!("--flyash requires --flyash-composition"))?,
            basis,
        )?;
        push_scm(&mut spec, ScmKind::FlyAsh(composition), args.flyash);
    }
    if let Some(intensity) = args.flocculate {
        spec.arrangement = Arrangement::Flocculated { intensity };
    } else if let Some(clearance) = args.disperse {
        if !(1..=2).contains(&clearance) {
            bail!("dispersion clearance must be 1 or 2");
        }
        spec.arrangement = Arrangement::Dispersed { clearance };
    }

    let microstructure = generate_microstructure(&spec, None, &AnnealSettings::default())?;
    if !microstructure.report.clinker.converged {
        warn!("clinker correlation annealing stopped before tolerance");
    }

    io::write_image_file(&microstructure.lattice, &args.output)?;
    if let Some(path) = &args.particles {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        io::write_particle_image(&microstructure.lattice, &mut BufWriter::new(file))?;
    }
    report::print_generation(&microstructure);
    Ok(())
}

fn read_clinker(args: &GenerateArgs) -> anyhow::Result<ClinkerComposition> {
    let mut clinker = match &args.stats {
        Some(path) => {
            let (volume, surface) = io::read_statistics(
                File::open(path).with_context(|| format!("opening {}", path.display()))?,
                &path.display().to_string(),
            )?;
            ClinkerComposition {
                volume_fractions: volume,
                surface_fractions: surface,
                orthorhombic_c3a: 0.0,
                correlation_kernels: Default::default(),
            }
        }
        None => ClinkerComposition::pure_c3s(),
    };
    for entry in &args.kernels {
        let (name, path) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("--kernel expects `phase=path`, got `{entry}`"))?;
        let slot = clinker_slot(name)?;
        let kernel = io::read_correlation(
            File::open(path).with_context(|| format!("opening {path}"))?,
            path,
        )?;
        clinker.correlation_kernels[slot] = Some(kernel);
    }
    Ok(clinker)
}

fn clinker_slot(name: &str) -> anyhow::Result<usize> {
    let phase = match name.to_ascii_lowercase().as_str() {
        "c3s" => Phase::C3S,
        "c2s" => Phase::C2S,
        "c3a" => Phase::C3A,
        "c4af" => Phase::C4AF,
        "k2so4" => Phase::K2SO4,
        "na2so4" => Phase::Na2SO4,
        other => bail!("unknown clinker phase `{other}`"),
    };
    Ok(CLINKER_PHASES.iter().position(|p| *p == phase).unwrap())
}

fn push_scm(spec: &mut MixSpec, kind: ScmKind, mass_fraction: f64) {
    if mass_fraction > 0.0 {
        spec.scms.push(ScmSpec {
            kind,
            mass_fraction,
            psd: None,
        });
    }
}

fn parse_flyash_composition(text: &str, basis: FlyAshBasis) -> anyhow::Result<FlyAshComposition> {
    let mut fractions = Vec::new();
    for part in text.split(',') {
        let (name, value) = part
            .split_once(':')
            .ok_or_else(|| anyhow!("expected `phase:fraction`, got `{part}`"))?;
        let phase = match name.trim().to_ascii_lowercase().as_str() {
            "asg" => Phase::ASG,
            "cas2" => Phase::CAS2,
            "c3a" => Phase::C3A,
            "cacl2" => Phase::CaCl2,
            "amsil" => Phase::AmSil,
            "anhydrite" => Phase::Anhydrite,
            "inert" => Phase::Inert,
            other => bail!("unknown fly ash phase `{other}`"),
        };
        let fraction: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("parsing fraction `{value}`"))?;
        fractions.push((phase, fraction));
    }
    Ok(FlyAshComposition { fractions, basis })
}

fn aggregate(args: AggregateArgs) -> anyhow::Result<()> {
    use cempore_lib::aggregate::{pack_aggregate, AggregatePopulation, AggregateSpec};
    use cempore_lib::Ran2;

    if args.seed >= 0 {
        bail!("RNG seed must be negative");
    }
    let mut populations = Vec::new();
    let coarse_phases = [Phase::CoarseAgg, Phase::CoarseAgg2];
    let fine_phases = [Phase::FineAgg, Phase::FineAgg2];
    for (entries, phases) in [(&args.coarse, coarse_phases), (&args.fine, fine_phases)] {
        if entries.len() > phases.len() {
            bail!("at most two populations per aggregate class");
        }
        for (entry, phase) in entries.iter().zip(phases) {
            let (fraction, path) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("expected `fraction=path`, got `{entry}`"))?;
            let volume_fraction: f64 = fraction
                .parse()
                .with_context(|| format!("parsing volume fraction `{fraction}`"))?;
            let grading = io::read_grading(
                File::open(path).with_context(|| format!("opening {path}"))?,
                path,
            )?;
            populations.push(AggregatePopulation {
                phase,
                volume_fraction,
                grading,
            });
        }
    }
    if populations.is_empty() {
        bail!("specify at least one --coarse or --fine population");
    }

    let spec = AggregateSpec {
        dims: [args.size, args.size, args.size],
        resolution: args.resolution,
        populations,
        itz_width: args.itz,
        max_retries: 2000,
    };
    let mut rng = Ran2::new(args.seed);
    let lattice = pack_aggregate(&spec, &mut rng)?;
    io::write_image_file(&lattice, &args.output)?;

    let census = lattice.census();
    let total = census.total() as f64;
    let aggregate = census.count_matching(|p| p.is_aggregate()) as f64 / total;
    let itz = census.count(Phase::Itz) as f64 / total;
    println!("aggregate volume fraction: {aggregate:.4}, ITZ fraction: {itz:.4}");
    Ok(())
}

fn hydrate(args: HydrateArgs) -> anyhow::Result<()> {
    let mut lattice = io::read_image_file(&args.image)?;
    if let Some(path) = &args.particles {
        let ids = io::read_particle_image(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
            &path.display().to_string(),
            lattice.dims(),
        )?;
        *lattice.particle_ids_mut() = ids;
    }

    let (params, thermal) = match &args.params {
        Some(path) => io::read_parameters(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
            &path.display().to_string(),
        )?,
        None => (HydrationParameters::default(), ThermalSettings::default()),
    };

    let termination = Termination {
        max_cycles: args.cycles,
        target_alpha: args.alpha,
        max_time_hours: args.hours,
    };
    if termination.max_cycles.is_none()
        && termination.target_alpha.is_none()
        && termination.max_time_hours.is_none()
    {
        bail!("specify at least one of --cycles, --alpha, --hours");
    }
    if args.seed >= 0 {
        bail!("RNG seed must be negative");
    }

    let mut engine =
        cempore_lib::HydrationEngine::new(lattice, params, thermal, args.seed);
    let cancel = CancelToken::new();

    if args.save_every == 0 {
        engine.run(termination, &cancel)?;
    } else {
        // Step manually so snapshots land on the requested stride.
        while !termination_reached(&termination, &engine) {
            let record = engine.step()?;
            if record.cycle % args.save_every == 0 {
                let path = snapshot_path(&args.output, record.cycle);
                io::write_image_file(engine.lattice(), &path)?;
            }
        }
    }

    io::write_image_file(engine.lattice(), &with_suffix(&args.output, "final.img"))?;
    report::write_history(&with_suffix(&args.output, "history.csv"), engine.records())?;
    report::print_hydration(&engine);
    Ok(())
}

fn termination_reached(termination: &Termination, engine: &cempore_lib::HydrationEngine) -> bool {
    termination
        .max_cycles
        .map_or(false, |n| engine.cycle() >= n)
        || termination.target_alpha.map_or(false, |a| engine.alpha() >= a)
        || termination
            .max_time_hours
            .map_or(false, |t| engine.time_hours() >= t)
}

fn snapshot_path(prefix: &Path, cycle: u32) -> PathBuf {
    with_suffix(prefix, &format!("cycle{cycle:05}.img"))
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !name.is_empty() {
        name.push('_');
    }
    name.push_str(suffix);
    prefix.with_file_name(name)
}

fn info(args: InfoArgs) -> anyhow::Result<()> {
    let lattice = io::read_image_file(&args.image)?;
    report::print_info(&lattice, args.max_pore_radius);
    let result = percolation::percolates(&lattice, |p| p.is_pore());
    println!(
        "porosity percolates: {} (connected fraction {:.4})",
        result.percolates,
        result.connected_fraction()
    );
    Ok(())
}
