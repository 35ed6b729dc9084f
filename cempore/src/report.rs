//! Console and CSV reporting for the driver.

use cempore_lib::hydrate::CycleRecord;
use cempore_lib::percolation;
use cempore_lib::{HydrationEngine, Lattice, Microstructure, Phase};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Summary printed after microstructure generation.
pub fn print_generation(microstructure: &Microstructure) {
    println!(
        "solid volume fraction: {:.4}",
        microstructure.solid_fraction
    );
    let report = &microstructure.report.clinker;
    println!(
        "clinker annealing: residual {:.3e} after {} proposals ({})",
        report.residual,
        report.proposals,
        if report.converged {
            "converged"
        } else {
            "best-so-far"
        }
    );
    println!("phase volume fractions (clinker basis): {:?}", report.volume_fractions);
    println!("phase surface fractions: {:?}", report.surface_fractions);
    for ash in &microstructure.report.fly_ash {
        println!("fly ash assignment over {} voxels:", ash.total_voxels);
        for (phase, count) in &ash.assigned {
            println!("  {phase}: {count}");
        }
    }
}

/// Census and metrics of a stand-alone image.
pub fn print_info(lattice: &Lattice, max_pore_radius: u32) {
    let census = lattice.census();
    println!(
        "{} x {} x {} at {} um/voxel",
        lattice.x_size(),
        lattice.y_size(),
        lattice.z_size(),
        lattice.resolution()
    );
    println!("phase census:");
    for (phase, count) in census.iter() {
        let fraction = count as f64 / census.total() as f64;
        println!("  {phase}: {count} ({fraction:.4})");
    }
    println!("exposed solid faces: {}", percolation::surface_area(lattice));
    let pores = percolation::pore_size_distribution(lattice, max_pore_radius);
    println!("pore size histogram (radius: voxels):");
    for (radius, count) in pores.counts.iter().enumerate() {
        if *count > 0 {
            println!("  {radius}: {count}");
        }
    }
}

/// Final state of a hydration run.
pub fn print_hydration(engine: &HydrationEngine) {
    let census = engine.lattice().census();
    println!(
        "stopped at cycle {} (t = {:.1} h, T = {:.1} C)",
        engine.cycle(),
        engine.time_hours(),
        engine.temperature()
    );
    println!("degree of hydration: {:.4}", engine.alpha());
    if let Some(record) = engine.records().last() {
        println!("cumulative heat: {:.1} J/g binder", record.cumulative_heat);
    }
    let fraction = |phase: Phase| census.count(phase) as f64 / census.total() as f64;
    println!(
        "CSH {:.4}, CH {:.4}, ettringite {:.4}, porosity {:.4} (+{:.4} empty)",
        fraction(Phase::CSH),
        fraction(Phase::CH),
        fraction(Phase::Ettr) + fraction(Phase::EttrC4AF),
        fraction(Phase::Porosity),
        fraction(Phase::EmptyPorosity)
    );
}

/// Writes the per-cycle record table as CSV.
pub fn write_history(path: &Path, records: &[CycleRecord]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(
        writer,
        "cycle,time_h,temperature_c,alpha,heat_j_per_g,cumulative_heat_j_per_g,diffusing,porosity,empty_porosity,porosity_percolates"
    )?;
    for r in records {
        writeln!(
            writer,
            "{},{:.5},{:.3},{:.5},{:.5},{:.3},{},{},{},{}",
            r.cycle,
            r.time_hours,
            r.temperature,
            r.alpha,
            r.heat,
            r.cumulative_heat,
            r.diffusing,
            r.porosity,
            r.empty_porosity,
            r.porosity_percolation
                .map(|p| p.to_string())
                .unwrap_or_default()
        )?;
    }
    Ok(())
}
