//! Two-point autocorrelation kernels and their empirical measurement.
//!
//! A kernel S(r) holds, for lags r = 0..=extent, the probability that two
//! voxels separated by r along a lattice axis both belong to the phase. The
//! annealing distributor matches empirical kernels against targets measured
//! from SEM reference imagery.

use crate::lattice::Lattice;
use crate::phase::Phase;
use rayon::prelude::*;

/// A sampled two-point correlation function S(r), r = 0..=extent.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationKernel {
    values: Vec<f64>,
}

impl CorrelationKernel {
    /// Wraps raw values; `values[r]` is S(r) and `values[0]` the volume
    /// fraction of the phase.
    pub fn from_values(values: Vec<f64>) -> Self {
        assert!(!values.is_empty());
        Self { values }
    }

    /// Largest lag of the kernel.
    pub fn extent(&self) -> usize {
        self.values.len() - 1
    }

    #[inline]
    pub fn value(&self, r: usize) -> f64 {
        self.values[r]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Largest absolute deviation from another kernel over lags `0..=max_r`.
    pub fn linf_distance(&self, other: &CorrelationKernel, max_r: usize) -> f64 {
        let r_max = max_r.min(self.extent()).min(other.extent());
        (0..=r_max)
            .map(|r| (self.value(r) - other.value(r)).abs())
            .fold(0.0, f64::max)
    }
}

/// Measures the empirical axis-sampled autocorrelation of `phase` on the
/// lattice up to lag `extent`. Lags are independent, so they are evaluated in
/// parallel; the reduction order per lag is fixed, keeping results
/// deterministic.
pub fn measure_autocorrelation(lattice: &Lattice, phase: Phase, extent: usize) -> CorrelationKernel {
    let indicator: Vec<u8> = lattice
        .phases()
        .iter()
        .map(|p| u8::from(*p == phase))
        .collect();
    let kernel = AxisPairCounts::measure(lattice, &indicator, extent);
    let n = lattice.num_voxels() as f64;
    let mut values = Vec::with_capacity(extent + 1);
    values.push(kernel.zero_count as f64 / n);
    for r in 1..=extent {
        values.push(kernel.pair_counts[r - 1] as f64 / (3.0 * n));
    }
    CorrelationKernel::from_values(values)
}

/// Axis-sampled both-ends-in-phase pair counts, maintained incrementally by
/// the annealer.
#[derive(Clone, Debug)]
pub(crate) struct AxisPairCounts {
    /// Voxels in phase (gives S(0))
    pub zero_count: u64,
    /// `pair_counts[r - 1]` = ordered pairs (v, v + r e_axis) with both ends
    /// in phase, summed over the three axes
    pub pair_counts: Vec<u64>,
}

impl AxisPairCounts {
    pub fn measure(lattice: &Lattice, indicator: &[u8], extent: usize) -> Self {
        let zero_count = indicator.iter().map(|v| *v as u64).sum();
        let pair_counts: Vec<u64> = (1..=extent)
            .into_par_iter()
            .map(|r| {
                let mut count = 0u64;
                for idx in 0..lattice.num_voxels() {
                    if indicator[idx] == 0 {
                        continue;
                    }
                    let (x, y, z) = lattice.coords(idx);
                    let xp = lattice.idx(lattice.wrap(x as i64 + r as i64, 0), y, z);
                    let yp = lattice.idx(x, lattice.wrap(y as i64 + r as i64, 1), z);
                    let zp = lattice.idx(x, y, lattice.wrap(z as i64 + r as i64, 2));
                    count += u64::from(indicator[xp])
                        + u64::from(indicator[yp])
                        + u64::from(indicator[zp]);
                }
                count
            })
            .collect();
        Self {
            zero_count,
            pair_counts,
        }
    }

    /// Updates the counts for one voxel leaving (`joined == false`) or
    /// entering (`joined == true`) the phase. The indicator slice must
    /// already reflect the new state of the voxel.
    pub fn flip(&mut self, lattice: &Lattice, indicator: &[u8], idx: usize, joined: bool) {
        let (x, y, z) = lattice.coords(idx);
        for r in 1..=self.pair_counts.len() {
            let d = r as i64;
            let mut ends = 0u64;
            // Both directions on each axis: the voxel participates as left
            // and right end of axis pairs.
            ends += u64::from(indicator[lattice.idx(lattice.wrap(x as i64 + d, 0), y, z)]);
            ends += u64::from(indicator[lattice.idx(lattice.wrap(x as i64 - d, 0), y, z)]);
            ends += u64::from(indicator[lattice.idx(x, lattice.wrap(y as i64 + d, 1), z)]);
            ends += u64::from(indicator[lattice.idx(x, lattice.wrap(y as i64 - d, 1), z)]);
            ends += u64::from(indicator[lattice.idx(x, y, lattice.wrap(z as i64 + d, 2))]);
            ends += u64::from(indicator[lattice.idx(x, y, lattice.wrap(z as i64 - d, 2))]);
            if joined {
                self.pair_counts[r - 1] += ends;
            } else {
                self.pair_counts[r - 1] -= ends;
            }
        }
        if joined {
            self.zero_count += 1;
        } else {
            self.zero_count -= 1;
        }
    }

    /// Empirical S(r) under these counts.
    pub fn correlation(&self, num_voxels: usize, r: usize) -> f64 {
        if r == 0 {
            self.zero_count as f64 / num_voxels as f64
        } else {
            self.pair_counts[r - 1] as f64 / (3.0 * num_voxels as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_phase_has_flat_correlation() {
        let mut lattice = Lattice::new([8, 8, 8], 1.0);
        lattice.fill(Phase::C3S);
        let kernel = measure_autocorrelation(&lattice, Phase::C3S, 4);
        for r in 0..=4 {
            assert!((kernel.value(r) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn s0_is_the_volume_fraction() {
        let mut lattice = Lattice::new([10, 10, 10], 1.0);
        for i in 0..250 {
            lattice.set_idx(i * 4, Phase::C2S);
        }
        let kernel = measure_autocorrelation(&lattice, Phase::C2S, 3);
        assert!((kernel.value(0) - 0.25).abs() < 1e-12);
        // At any lag the both-ends probability cannot exceed the fraction
        for r in 1..=3 {
            assert!(kernel.value(r) <= 0.25 + 1e-12);
        }
    }

    #[test]
    fn incremental_flip_matches_full_measurement() {
        let mut lattice = Lattice::new([6, 6, 6], 1.0);
        for idx in [3usize, 17, 40, 41, 100, 130, 131, 200] {
            lattice.set_idx(idx, Phase::C3A);
        }
        let mut indicator: Vec<u8> = lattice
            .phases()
            .iter()
            .map(|p| u8::from(*p == Phase::C3A))
            .collect();
        let mut counts = AxisPairCounts::measure(&lattice, &indicator, 3);

        // Move voxel 41 out of the phase and voxel 77 in, updating
        // incrementally.
        counts.flip(&lattice, &indicator, 41, false);
        indicator[41] = 0;
        lattice.set_idx(41, Phase::Porosity);
        indicator[77] = 1;
        counts.flip(&lattice, &indicator, 77, true);
        lattice.set_idx(77, Phase::C3A);

        let reference = AxisPairCounts::measure(&lattice, &indicator, 3);
        assert_eq!(counts.zero_count, reference.zero_count);
        assert_eq!(counts.pair_counts, reference.pair_counts);
    }

    #[test]
    fn linf_distance_compares_kernels() {
        let a = CorrelationKernel::from_values(vec![0.5, 0.3, 0.2]);
        let b = CorrelationKernel::from_values(vec![0.5, 0.25, 0.24]);
        assert!((a.linf_distance(&b, 2) - 0.05).abs() < 1e-12);
    }
}
