//! Allocator statistics

use core::fmt;

/// Fragmentation statistics for free-list allocators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FragmentationStats {
    /// Total free memory across all fragments (bytes)
    pub total_free: usize,

    /// Size of the largest contiguous free block (bytes)
    pub largest_block: usize,

    /// Number of distinct free fragments
    pub fragment_count: usize,

    /// External fragmentation ratio (0-100)
    ///
    /// Calculated as: `100 * (1 - largest_block / total_free)`
    pub fragmentation_percent: u8,
}

impl FragmentationStats {
    /// Calculate fragmentation percentage from free space metrics
    pub fn calculate(total_free: usize, largest_block: usize, fragment_count: usize) -> Self {
        let fragmentation_percent = if total_free > 0 {
            let ratio = 1.0 - (largest_block as f64 / total_free as f64);
            (ratio * 100.0).clamp(0.0, 100.0) as u8
        } else {
            0
        };

        Self {
            total_free,
            largest_block,
            fragment_count,
            fragmentation_percent,
        }
    }

    /// Check if fragmentation is concerning (>50%)
    #[inline]
    pub fn is_fragmented(&self) -> bool {
        self.fragmentation_percent > 50
    }
}

impl fmt::Display for FragmentationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FragmentationStats {{ total_free: {} bytes, largest_block: {} bytes, \
             fragments: {}, fragmentation: {}% }}",
            self.total_free, self.largest_block, self.fragment_count, self.fragmentation_percent
        )
    }
}

/// Point-in-time view of a free-list pool, gathered by a physical walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Payload bytes in used blocks
    pub used_bytes: usize,
    /// Number of used blocks
    pub used_blocks: usize,
    /// Per-block header bytes across all blocks
    pub overhead_bytes: usize,
    /// Free space breakdown
    pub fragmentation: FragmentationStats,
}

impl PoolStats {
    /// Payload bytes in free blocks
    pub fn free_bytes(&self) -> usize {
        self.fragmentation.total_free
    }

    /// Number of free blocks
    pub fn free_blocks(&self) -> usize {
        self.fragmentation.fragment_count
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolStats {{ used: {} bytes in {} blocks, overhead: {} bytes, {} }}",
            self.used_bytes, self.used_blocks, self.overhead_bytes, self.fragmentation
        )
    }
}
