//! Particle size distributions and sampling of digital particle radii.
//!
//! A PSD is a discrete table of (diameter in µm, cumulative volume fraction)
//! pairs. The sampler converts the volume-weighted table into a
//! number-weighted CDF so that a stream of sampled radii, weighted back by
//! particle volume, converges to the input distribution.

use crate::rng::Ran2;
use itertools::Itertools;
use thiserror::Error as ThisError;

/// Diameter reported for the median query on a non-normalised table.
pub const DEFAULT_MEDIAN_DIAMETER: f64 = 10.0;

/// Errors arising from PSD validation and sampling.
#[derive(Debug, ThisError)]
pub enum PsdError {
    #[error("PSD table is empty")]
    Empty,
    #[error("PSD diameters must be positive and strictly increasing (row {row})")]
    UnsortedDiameter { row: usize },
    #[error("PSD cumulative fractions must be non-decreasing in [0, 1] (row {row})")]
    NonMonotonic { row: usize },
    #[error("PSD cumulative fraction must end at 1.0, found {last}")]
    NotNormalised { last: f64 },
    #[error(
        "finest PSD bin ({diameter} um) underflows the lattice resolution ({resolution} um/voxel)"
    )]
    TooSmall { diameter: f64, resolution: f64 },
}

/// One row of the distribution table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PsdBin {
    /// Particle diameter in µm
    pub diameter: f64,
    /// Cumulative volume fraction of particles with diameter <= `diameter`
    pub cumulative: f64,
}

/// A validated particle size distribution.
#[derive(Clone, Debug)]
pub struct PsdTable {
    bins: Vec<PsdBin>,
}

impl PsdTable {
    /// Validates and wraps a `(diameter, cumulative fraction)` table.
    pub fn new(rows: Vec<(f64, f64)>) -> Result<Self, PsdError> {
        if rows.is_empty() {
            return Err(PsdError::Empty);
        }
        let mut bins = Vec::with_capacity(rows.len());
        let mut prev_d = 0.0;
        let mut prev_c = 0.0;
        for (row, (diameter, cumulative)) in rows.into_iter().enumerate() {
            if diameter <= prev_d {
                return Err(PsdError::UnsortedDiameter { row });
            }
            if cumulative < prev_c || cumulative > 1.0 + 1e-9 {
                return Err(PsdError::NonMonotonic { row });
            }
            bins.push(PsdBin {
                diameter,
                cumulative,
            });
            prev_d = diameter;
            prev_c = cumulative;
        }
        let last = bins.last().unwrap().cumulative;
        if (last - 1.0).abs() > 1e-6 {
            return Err(PsdError::NotNormalised { last });
        }
        Ok(Self { bins })
    }

    /// A single-diameter distribution.
    pub fn monodisperse(diameter: f64) -> Self {
        Self {
            bins: vec![PsdBin {
                diameter,
                cumulative: 1.0,
            }],
        }
    }

    pub fn bins(&self) -> &[PsdBin] {
        &self.bins
    }

    /// Median diameter by interpolation on the cumulative volume curve.
    ///
    /// A table whose cumulative fraction does not reach 1.0 (possible only
    /// through direct construction) yields [`DEFAULT_MEDIAN_DIAMETER`] rather
    /// than a sentinel.
    pub fn median_diameter(&self) -> f64 {
        let last = self.bins.last().map(|b| b.cumulative).unwrap_or(0.0);
        if (last - 1.0).abs() > 1e-6 {
            return DEFAULT_MEDIAN_DIAMETER;
        }
        let mut prev = PsdBin {
            diameter: 0.0,
            cumulative: 0.0,
        };
        for bin in &self.bins {
            if bin.cumulative >= 0.5 {
                let span = bin.cumulative - prev.cumulative;
                if span <= 0.0 {
                    return bin.diameter;
                }
                let t = (0.5 - prev.cumulative) / span;
                return prev.diameter + t * (bin.diameter - prev.diameter);
            }
            prev = *bin;
        }
        self.bins.last().unwrap().diameter
    }

    /// Builds a sampler for the given lattice resolution (µm/voxel).
    pub fn sampler(&self, resolution: f64) -> Result<PsdSampler, PsdError> {
        PsdSampler::new(self, resolution)
    }
}

/// Inverse-CDF sampler of integer voxel radii for one PSD and resolution.
#[derive(Clone, Debug)]
pub struct PsdSampler {
    /// Per-bin voxel radius and cumulative number weight
    number_cdf: Vec<(u32, f64)>,
}

impl PsdSampler {
    fn new(table: &PsdTable, resolution: f64) -> Result<Self, PsdError> {
        assert!(resolution > 0.0);
        let finest = table.bins[0].diameter;
        if radius_in_voxels(finest, resolution) < 1 {
            return Err(PsdError::TooSmall {
                diameter: finest,
                resolution,
            });
        }

        // Convert volume fractions to number weights (divide by particle
        // volume) so a stream of draws is volume-correct in aggregate.
        let deltas = std::iter::once(table.bins[0].cumulative).chain(
            table
                .bins
                .iter()
                .tuple_windows()
                .map(|(a, b)| b.cumulative - a.cumulative),
        );
        let weights: Vec<(u32, f64)> = table
            .bins
            .iter()
            .zip(deltas)
            .map(|(bin, dv)| {
                (
                    radius_in_voxels(bin.diameter, resolution),
                    dv / bin.diameter.powi(3),
                )
            })
            .collect();
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        let mut number_cdf = Vec::with_capacity(weights.len());
        let mut acc = 0.0;
        for (radius, w) in weights {
            acc += w / total;
            number_cdf.push((radius, acc));
        }
        // Guard the tail against rounding
        number_cdf.last_mut().unwrap().1 = 1.0;
        Ok(Self { number_cdf })
    }

    /// Draws one particle radius in voxels.
    pub fn sample_radius(&self, rng: &mut Ran2) -> u32 {
        let u = rng.next_f64();
        for (radius, cum) in &self.number_cdf {
            if u <= *cum {
                return *radius;
            }
        }
        self.number_cdf.last().unwrap().0
    }

    /// Largest radius this sampler can produce.
    pub fn max_radius(&self) -> u32 {
        self.number_cdf.iter().map(|(r, _)| *r).max().unwrap_or(1)
    }
}

/// Integer voxel radius of a particle of the given diameter.
#[inline]
pub fn radius_in_voxels(diameter: f64, resolution: f64) -> u32 {
    (diameter / (2.0 * resolution)).round().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_psd() -> PsdTable {
        PsdTable::new(vec![
            (3.0, 0.10),
            (7.0, 0.35),
            (13.0, 0.65),
            (21.0, 0.85),
            (31.0, 1.00),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_malformed_tables() {
        assert!(matches!(PsdTable::new(vec![]), Err(PsdError::Empty)));
        assert!(matches!(
            PsdTable::new(vec![(5.0, 0.5), (3.0, 1.0)]),
            Err(PsdError::UnsortedDiameter { row: 1 })
        ));
        assert!(matches!(
            PsdTable::new(vec![(3.0, 0.8), (5.0, 0.5)]),
            Err(PsdError::NonMonotonic { row: 1 })
        ));
        assert!(matches!(
            PsdTable::new(vec![(3.0, 0.4), (5.0, 0.9)]),
            Err(PsdError::NotNormalised { .. })
        ));
    }

    #[test]
    fn finest_bin_underflow_is_reported() {
        let table = PsdTable::new(vec![(0.5, 0.2), (10.0, 1.0)]).unwrap();
        assert!(matches!(
            table.sampler(1.0),
            Err(PsdError::TooSmall { .. })
        ));
        // The same table is fine at a finer resolution
        assert!(table.sampler(0.25).is_ok());
    }

    #[test]
    fn monodisperse_yields_constant_radius() {
        let table = PsdTable::monodisperse(6.0);
        let sampler = table.sampler(1.0).unwrap();
        let mut rng = Ran2::new(-1234);
        for _ in 0..100 {
            assert_eq!(sampler.sample_radius(&mut rng), 3);
        }
    }

    #[test]
    fn median_interpolates_on_the_volume_curve() {
        let table = reference_psd();
        let median = table.median_diameter();
        assert!(median > 7.0 && median < 13.0, "median {median}");
        let raw = PsdTable {
            bins: vec![PsdBin {
                diameter: 4.0,
                cumulative: 0.5,
            }],
        };
        assert_eq!(raw.median_diameter(), DEFAULT_MEDIAN_DIAMETER);
    }

    #[test]
    fn sampled_volume_distribution_matches_input() {
        let table = reference_psd();
        let sampler = table.sampler(0.5).unwrap();
        let mut rng = Ran2::new(-4321);

        let n = 20_000;
        let radii: Vec<u32> = (0..n).map(|_| sampler.sample_radius(&mut rng)).collect();
        let total_volume: f64 = radii.iter().map(|r| (*r as f64).powi(3)).sum();

        // Empirical cumulative volume fraction at each input bin diameter
        let mut linf: f64 = 0.0;
        for bin in table.bins() {
            let r_bin = radius_in_voxels(bin.diameter, 0.5);
            let vol_below: f64 = radii
                .iter()
                .filter(|r| **r <= r_bin)
                .map(|r| (*r as f64).powi(3))
                .sum();
            let empirical = vol_below / total_volume;
            linf = linf.max((empirical - bin.cumulative).abs());
        }
        assert!(linf <= 0.02, "L-infinity distance {linf}");
    }
}
