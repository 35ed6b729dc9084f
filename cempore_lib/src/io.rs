//! Text file formats: microstructure images, particle-id images, PSD
//! tables, correlation kernels, clinker statistics and parameter files.
//!
//! Microstructure images carry a `Version:` header and store one phase id
//! per line. Files at version 3.0 and later iterate z-fastest (the z index
//! varies quickest); older versioned files iterate x-fastest, and files
//! without a header are legacy 100^3 cubes at 1.0 µm/voxel, also x-fastest.
//! The writer always emits the current version in z-fastest order.

use crate::aggregate::SieveClass;
use crate::distribute::correlation::CorrelationKernel;
use crate::hydrate::{HydrationParameters, NucleationParams};
use crate::lattice::Lattice;
use crate::phase::Phase;
use crate::psd::{PsdError, PsdTable};
use crate::thermal::{AmbientProfile, ThermalMode, ThermalSettings};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error as ThisError;

/// Image format version written by this library.
pub const IMAGE_VERSION: f64 = 3.0;

/// Side length and resolution assumed for headerless legacy images.
const LEGACY_SIZE: usize = 100;
const LEGACY_RESOLUTION: f64 = 1.0;

/// Errors of the input file formats, carrying the file position.
#[derive(Debug, ThisError)]
pub enum FormatError {
    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },
    #[error("{file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}: {source}")]
    Psd {
        file: String,
        #[source]
        source: PsdError,
    },
}

impl FormatError {
    fn parse(file: &str, line: usize, message: impl Into<String>) -> Self {
        FormatError::Parse {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }

    fn io(file: &str, source: std::io::Error) -> Self {
        FormatError::Io {
            file: file.to_string(),
            source,
        }
    }
}

struct LineReader<R> {
    inner: R,
    file: String,
    line: usize,
}

impl<R> LineReader<R> {
    fn new(inner: R, file: &str) -> Self {
        Self {
            inner,
            file: file.to_string(),
            line: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> FormatError {
        FormatError::parse(&self.file, self.line, message)
    }
}

impl<R: BufRead> LineReader<R> {
    /// Next non-empty line, trimmed; `None` at end of input.
    fn next_line(&mut self) -> Result<Option<String>, FormatError> {
        loop {
            let mut buf = String::new();
            let read = self
                .inner
                .read_line(&mut buf)
                .map_err(|e| FormatError::io(&self.file, e))?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;
            let trimmed = buf.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    fn expect_line(&mut self, what: &str) -> Result<String, FormatError> {
        self.next_line()?
            .ok_or_else(|| FormatError::parse(&self.file, self.line + 1, format!("expected {what}")))
    }
}

fn parse_header_value<'l>(
    line: &'l str,
    key: &str,
    reader_file: &str,
    line_no: usize,
) -> Result<&'l str, FormatError> {
    line.strip_prefix(key)
        .map(str::trim)
        .ok_or_else(|| FormatError::parse(reader_file, line_no, format!("expected `{key}` header")))
}

/// Writes a microstructure image in the current versioned format.
pub fn write_image<W: Write>(lattice: &Lattice, writer: &mut W) -> std::io::Result<()> {
    writeln!(writer, "Version: {IMAGE_VERSION:.1}")?;
    writeln!(writer, "X_Size: {}", lattice.x_size())?;
    writeln!(writer, "Y_Size: {}", lattice.y_size())?;
    writeln!(writer, "Z_Size: {}", lattice.z_size())?;
    writeln!(writer, "Image_Resolution: {:.2}", lattice.resolution())?;
    // The flat buffer is already in z-fastest order.
    for phase in lattice.phases() {
        writeln!(writer, "{}", phase.id())?;
    }
    Ok(())
}

/// Writes a microstructure image to a file path.
pub fn write_image_file<P: AsRef<Path>>(lattice: &Lattice, path: P) -> Result<(), FormatError> {
    let label = path.as_ref().display().to_string();
    let file = File::create(path.as_ref()).map_err(|e| FormatError::io(&label, e))?;
    let mut writer = BufWriter::new(file);
    write_image(lattice, &mut writer).map_err(|e| FormatError::io(&label, e))
}

/// Reads a microstructure image, honouring the version header rules.
pub fn read_image<R: Read>(reader: R, file: &str) -> Result<Lattice, FormatError> {
    let mut content = String::new();
    let mut buffered = BufReader::new(reader);
    buffered
        .read_to_string(&mut content)
        .map_err(|e| FormatError::io(file, e))?;

    let mut reader = LineReader::new(content.as_bytes(), file);
    let first = reader.expect_line("image header or phase data")?;

    let (version, dims, resolution, body_start) = if first.starts_with("Version:") {
        let version: f64 = parse_header_value(&first, "Version:", file, reader.line)?
            .parse()
            .map_err(|_| reader.error("malformed version number"))?;
        let size_line = reader.expect_line("size header")?;
        let dims = if size_line.starts_with("Image_Size:") {
            let side: usize = parse_header_value(&size_line, "Image_Size:", file, reader.line)?
                .parse()
                .map_err(|_| reader.error("malformed image size"))?;
            [side, side, side]
        } else {
            let x: usize = parse_header_value(&size_line, "X_Size:", file, reader.line)?
                .parse()
                .map_err(|_| reader.error("malformed X_Size"))?;
            let y_line = reader.expect_line("Y_Size header")?;
            let y: usize = parse_header_value(&y_line, "Y_Size:", file, reader.line)?
                .parse()
                .map_err(|_| reader.error("malformed Y_Size"))?;
            let z_line = reader.expect_line("Z_Size header")?;
            let z: usize = parse_header_value(&z_line, "Z_Size:", file, reader.line)?
                .parse()
                .map_err(|_| reader.error("malformed Z_Size"))?;
            [x, y, z]
        };
        let res_line = reader.expect_line("Image_Resolution header")?;
        let resolution: f64 = parse_header_value(&res_line, "Image_Resolution:", file, reader.line)?
            .parse()
            .map_err(|_| reader.error("malformed resolution"))?;
        (version, dims, resolution, None)
    } else {
        // Headerless legacy file: rewind and read the ids directly.
        (
            1.0,
            [LEGACY_SIZE; 3],
            LEGACY_RESOLUTION,
            Some(first),
        )
    };

    if dims.iter().any(|d| *d == 0) {
        return Err(reader.error("image dimensions must be positive"));
    }

    let num = dims[0] * dims[1] * dims[2];
    let mut ids: Vec<u8> = Vec::with_capacity(num);
    if let Some(first_value) = body_start {
        ids.push(parse_phase_id(&first_value, &reader)?);
    }
    while ids.len() < num {
        let line = reader.expect_line("phase id")?;
        ids.push(parse_phase_id(&line, &reader)?);
    }

    let mut phases = vec![Phase::Porosity; num];
    let z_fastest = version >= 3.0;
    let mut cursor = 0usize;
    if z_fastest {
        for phase in phases.iter_mut() {
            *phase = phase_from_id(ids[cursor], &reader)?;
            cursor += 1;
        }
    } else {
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    let idx = (x * dims[1] + y) * dims[2] + z;
                    phases[idx] = phase_from_id(ids[cursor], &reader)?;
                    cursor += 1;
                }
            }
        }
    }
    Ok(Lattice::from_phases(dims, resolution, phases))
}

/// Reads a microstructure image from a file path.
pub fn read_image_file<P: AsRef<Path>>(path: P) -> Result<Lattice, FormatError> {
    let label = path.as_ref().display().to_string();
    let file = File::open(path.as_ref()).map_err(|e| FormatError::io(&label, e))?;
    read_image(file, &label)
}

fn parse_phase_id<R>(line: &str, reader: &LineReader<R>) -> Result<u8, FormatError> {
    line.parse::<u8>()
        .map_err(|_| reader.error(format!("malformed phase id `{line}`")))
}

fn phase_from_id<R>(id: u8, reader: &LineReader<R>) -> Result<Phase, FormatError> {
    Phase::from_id(id).ok_or_else(|| reader.error(format!("unknown phase id {id}")))
}

/// Writes the particle-id map with the same header and iteration order as
/// the phase image.
pub fn write_particle_image<W: Write>(lattice: &Lattice, writer: &mut W) -> std::io::Result<()> {
    let ids = lattice
        .particle_ids()
        .expect("particle image requires the particle id map");
    writeln!(writer, "Version: {IMAGE_VERSION:.1}")?;
    writeln!(writer, "X_Size: {}", lattice.x_size())?;
    writeln!(writer, "Y_Size: {}", lattice.y_size())?;
    writeln!(writer, "Z_Size: {}", lattice.z_size())?;
    writeln!(writer, "Image_Resolution: {:.2}", lattice.resolution())?;
    for id in ids {
        writeln!(writer, "{id}")?;
    }
    Ok(())
}

/// Reads a particle-id map; dimensions must match the accompanying lattice.
pub fn read_particle_image<R: Read>(
    reader: R,
    file: &str,
    expected_dims: [usize; 3],
) -> Result<Vec<u32>, FormatError> {
    let mut reader = LineReader::new(BufReader::new(reader), file);
    let first = reader.expect_line("particle image header")?;
    if !first.starts_with("Version:") {
        return Err(reader.error("particle images always carry a version header"));
    }
    for key in ["X_Size:", "Y_Size:", "Z_Size:"] {
        let line = reader.expect_line("size header")?;
        let value: usize = parse_header_value(&line, key, file, reader.line)?
            .parse()
            .map_err(|_| reader.error("malformed size"))?;
        let axis = match key {
            "X_Size:" => 0,
            "Y_Size:" => 1,
            _ => 2,
        };
        if value != expected_dims[axis] {
            return Err(reader.error(format!(
                "particle image dimension mismatch: {value} vs {}",
                expected_dims[axis]
            )));
        }
    }
    let _ = reader.expect_line("Image_Resolution header")?;
    let num = expected_dims.iter().product();
    let mut ids = Vec::with_capacity(num);
    while ids.len() < num {
        let line = reader.expect_line("particle id")?;
        ids.push(
            line.parse::<u32>()
                .map_err(|_| reader.error(format!("malformed particle id `{line}`")))?,
        );
    }
    Ok(ids)
}

/// Reads a PSD file: one CSV header line, then `diameter,cumulative` rows.
pub fn read_psd<R: Read>(reader: R, file: &str) -> Result<PsdTable, FormatError> {
    let mut reader = LineReader::new(BufReader::new(reader), file);
    let _header = reader.expect_line("PSD header line")?;
    let mut rows = Vec::new();
    while let Some(line) = reader.next_line()? {
        let mut fields = line.split(',');
        let diameter: f64 = fields
            .next()
            .unwrap_or("")
            .trim()
            .parse()
            .map_err(|_| reader.error("malformed diameter"))?;
        let cumulative: f64 = fields
            .next()
            .ok_or_else(|| reader.error("missing cumulative fraction"))?
            .trim()
            .parse()
            .map_err(|_| reader.error("malformed cumulative fraction"))?;
        rows.push((diameter, cumulative));
    }
    PsdTable::new(rows).map_err(|source| FormatError::Psd {
        file: file.to_string(),
        source,
    })
}

/// Writes a PSD file in the format accepted by [`read_psd`].
pub fn write_psd<W: Write>(table: &PsdTable, writer: &mut W) -> std::io::Result<()> {
    writeln!(writer, "diameter_um,cumulative_volume_fraction")?;
    for bin in table.bins() {
        writeln!(writer, "{},{}", bin.diameter, bin.cumulative)?;
    }
    Ok(())
}

/// Reads a correlation kernel file: a header line with the extent R, then
/// R + 1 rows `r S(r)`.
pub fn read_correlation<R: Read>(reader: R, file: &str) -> Result<CorrelationKernel, FormatError> {
    let mut reader = LineReader::new(BufReader::new(reader), file);
    let extent: usize = reader
        .expect_line("kernel extent")?
        .parse()
        .map_err(|_| reader.error("malformed kernel extent"))?;
    let mut values = Vec::with_capacity(extent + 1);
    for expected_r in 0..=extent {
        let line = reader.expect_line("kernel row")?;
        let mut fields = line.split_whitespace();
        let r: usize = fields
            .next()
            .unwrap_or("")
            .parse()
            .map_err(|_| reader.error("malformed lag"))?;
        if r != expected_r {
            return Err(reader.error(format!("kernel rows out of order: {r} vs {expected_r}")));
        }
        let value: f64 = fields
            .next()
            .ok_or_else(|| reader.error("missing S(r)"))?
            .parse()
            .map_err(|_| reader.error("malformed S(r)"))?;
        values.push(value);
    }
    Ok(CorrelationKernel::from_values(values))
}

/// Writes a correlation kernel in the format accepted by
/// [`read_correlation`].
pub fn write_correlation<W: Write>(
    kernel: &CorrelationKernel,
    writer: &mut W,
) -> std::io::Result<()> {
    writeln!(writer, "{}", kernel.extent())?;
    for (r, value) in kernel.values().iter().enumerate() {
        writeln!(writer, "{r} {value}")?;
    }
    Ok(())
}

/// Reads an aggregate grading file: one CSV header line, then rows
/// `sieve_diameter_mm,fraction_retained`.
pub fn read_grading<R: Read>(reader: R, file: &str) -> Result<Vec<SieveClass>, FormatError> {
    let mut reader = LineReader::new(BufReader::new(reader), file);
    let _header = reader.expect_line("grading header line")?;
    let mut classes = Vec::new();
    let mut retained_total = 0.0;
    while let Some(line) = reader.next_line()? {
        let mut fields = line.split(',');
        let diameter: f64 = fields
            .next()
            .unwrap_or("")
            .trim()
            .parse()
            .map_err(|_| reader.error("malformed sieve diameter"))?;
        let retained: f64 = fields
            .next()
            .ok_or_else(|| reader.error("missing retained fraction"))?
            .trim()
            .parse()
            .map_err(|_| reader.error("malformed retained fraction"))?;
        if diameter <= 0.0 || retained < 0.0 {
            return Err(reader.error("grading rows must be positive"));
        }
        retained_total += retained;
        classes.push(SieveClass { diameter, retained });
    }
    if classes.is_empty() {
        return Err(reader.error("grading table is empty"));
    }
    if (retained_total - 1.0).abs() > 1e-3 {
        return Err(reader.error(format!(
            "retained fractions sum to {retained_total}, expected 1.0"
        )));
    }
    Ok(classes)
}

/// Reads a statistics (PFC) file: six lines `volume_fraction
/// surface_fraction` in the order C3S, C2S, C3A, C4AF, K2SO4, Na2SO4.
pub fn read_statistics<R: Read>(
    reader: R,
    file: &str,
) -> Result<([f64; 6], [f64; 6]), FormatError> {
    let mut reader = LineReader::new(BufReader::new(reader), file);
    let mut volume = [0.0; 6];
    let mut surface = [0.0; 6];
    for slot in 0..6 {
        let line = reader.expect_line("statistics row")?;
        let mut fields = line.split_whitespace();
        volume[slot] = fields
            .next()
            .unwrap_or("")
            .parse()
            .map_err(|_| reader.error("malformed volume fraction"))?;
        surface[slot] = fields
            .next()
            .ok_or_else(|| reader.error("missing surface fraction"))?
            .parse()
            .map_err(|_| reader.error("malformed surface fraction"))?;
    }
    Ok((volume, surface))
}

/// Reads a `key value` parameter file into the engine and thermal settings.
///
/// Unknown keys are an error so that typos cannot silently fall back to
/// defaults.
pub fn read_parameters<R: Read>(
    reader: R,
    file: &str,
) -> Result<(HydrationParameters, ThermalSettings), FormatError> {
    let mut params = HydrationParameters::default();
    let mut thermal = ThermalSettings::default();
    let mut transfer_coefficient: Option<f64> = None;
    let mut mode: Option<String> = None;

    let mut reader = LineReader::new(BufReader::new(reader), file);
    while let Some(line) = reader.next_line()? {
        if line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| reader.error("expected `key value`"))?;
        let value = value.trim();
        let parse_f64 = |reader: &LineReader<_>| -> Result<f64, FormatError> {
            value
                .parse::<f64>()
                .map_err(|_| reader.error(format!("malformed number `{value}`")))
        };
        let parse_u32 = |reader: &LineReader<_>| -> Result<u32, FormatError> {
            value
                .parse::<u32>()
                .map_err(|_| reader.error(format!("malformed integer `{value}`")))
        };

        if let Some(name) = key.strip_prefix("pdiss.") {
            let phase = phase_by_name(name)
                .ok_or_else(|| reader.error(format!("unknown phase `{name}`")))?;
            params.dissolution_probability[phase as usize] = parse_f64(&reader)?;
            continue;
        }
        if let Some(rest) = key.strip_prefix("nucleation.") {
            let (species, field) = rest
                .split_once('.')
                .ok_or_else(|| reader.error("expected nucleation.<species>.<field>"))?;
            let slot: &mut NucleationParams = match species {
                "csh" => &mut params.nucleation_csh,
                "ch" => &mut params.nucleation_ch,
                "gypsum" => &mut params.nucleation_gypsum,
                "fh3" => &mut params.nucleation_fh3,
                other => return Err(reader.error(format!("unknown species `{other}`"))),
            };
            match field {
                "min_age" => slot.min_age = parse_u32(&reader)? as u8,
                "amplitude" => slot.amplitude = parse_f64(&reader)?,
                "scale" => slot.scale = parse_f64(&reader)?,
                other => return Err(reader.error(format!("unknown field `{other}`"))),
            }
            continue;
        }
        match key {
            "diffusion_lifetime" => params.diffusion_lifetime = parse_u32(&reader)? as u8,
            "coalescence_probability" => params.coalescence_probability = parse_f64(&reader)?,
            "gypsum_absorption_probability" => {
                params.gypsum_absorption_probability = parse_f64(&reader)?
            }
            "afm_conversion_probability" => {
                params.afm_conversion_probability = parse_f64(&reader)?
            }
            "induction_cycles" => params.induction_cycles = parse_u32(&reader)?,
            "percolation_stride" => params.percolation_stride = parse_u32(&reader)?,
            "verify_stride" => params.verify_stride = parse_u32(&reader)?,
            "csh_densify_age" => params.csh_densify_age = parse_u32(&reader)? as u8,
            "beta" => thermal.beta = parse_f64(&reader)?,
            "activation_energy" => thermal.activation_energy = parse_f64(&reader)?,
            "reference_temp" => thermal.reference_temp = parse_f64(&reader)?,
            "initial_temp" => thermal.initial_temp = parse_f64(&reader)?,
            "heat_capacity" => thermal.heat_capacity = parse_f64(&reader)?,
            "ambient_temp" => thermal.ambient = AmbientProfile::constant(parse_f64(&reader)?),
            "transfer_coefficient" => transfer_coefficient = Some(parse_f64(&reader)?),
            "mode" => mode = Some(value.to_string()),
            other => return Err(reader.error(format!("unknown parameter `{other}`"))),
        }
    }

    thermal.mode = match mode.as_deref() {
        None | Some("isothermal") => ThermalMode::Isothermal,
        Some("adiabatic") => ThermalMode::Adiabatic,
        Some("semiadiabatic") => ThermalMode::SemiAdiabatic {
            transfer_coefficient: transfer_coefficient.unwrap_or(1.0),
        },
        Some(other) => {
            return Err(FormatError::parse(
                file,
                reader.line,
                format!("unknown thermal mode `{other}`"),
            ))
        }
    };
    Ok((params, thermal))
}

fn phase_by_name(name: &str) -> Option<Phase> {
    let phase = match name {
        "c3s" => Phase::C3S,
        "c2s" => Phase::C2S,
        "c3a" => Phase::C3A,
        "oc3a" => Phase::OC3A,
        "c4af" => Phase::C4AF,
        "gypsum" => Phase::Gypsum,
        "absorbed_gyp" => Phase::AbsorbedGyp,
        "secondary_gyp" => Phase::SecondaryGyp,
        "hemihyd" => Phase::Hemihyd,
        "anhydrite" => Phase::Anhydrite,
        "k2so4" => Phase::K2SO4,
        "na2so4" => Phase::Na2SO4,
        "slag" => Phase::Slag,
        "asg" => Phase::ASG,
        "cas2" => Phase::CAS2,
        "amsil" => Phase::AmSil,
        "silica_fume" => Phase::SilicaFume,
        "caco3" => Phase::CaCO3,
        "free_lime" => Phase::FreeLime,
        "cacl2" => Phase::CaCl2,
        _ => return None,
    };
    Some(phase)
}
