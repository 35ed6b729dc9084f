//! Workspace for reusing allocated memory across cycles and analysis scans.

use std::fmt;
use std::fmt::Debug;

/// Scratch memory owned by the hydration engine. Allocation happens once at
/// engine creation; per-cycle work reuses these buffers.
#[derive(Default)]
pub struct CycleWorkspace {
    /// Shuffled voxel visitation order for the dissolution pass
    pub(crate) visit_order: Vec<u32>,
    /// Flat indices of diffusing voxels collected for the walk passes
    pub(crate) walkers: Vec<u32>,
    /// Stack for the percolation flood fill
    pub(crate) flood_stack: Vec<u32>,
    /// Visited mask for the percolation flood fill
    pub(crate) flood_seen: Vec<bool>,
}

impl CycleWorkspace {
    /// Constructs a workspace with capacity for the given voxel count.
    pub fn with_capacity(num_voxels: usize) -> Self {
        Self {
            visit_order: Vec::with_capacity(num_voxels),
            walkers: Vec::with_capacity(num_voxels / 8),
            flood_stack: Vec::with_capacity(num_voxels / 8),
            flood_seen: vec![false; num_voxels],
        }
    }
}

impl Clone for CycleWorkspace {
    /// Returns a new default workspace without any allocated memory
    fn clone(&self) -> Self {
        CycleWorkspace::default()
    }
}

impl Debug for CycleWorkspace {
    /// Only print the name of the type to the formatter
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleWorkspace").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_resets_allocations() {
        let ws = CycleWorkspace::with_capacity(1000);
        assert_eq!(ws.flood_seen.len(), 1000);
        let cloned = ws.clone();
        assert!(cloned.flood_seen.is_empty());
        assert_eq!(cloned.visit_order.capacity(), 0);
    }
}
