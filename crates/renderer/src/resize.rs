//! Resize tracking with generation counters.
//!
//! Resize notifications can arrive at any time, several per frame while a
//! window is dragged. [`ResizeReconciler`] records only the latest size and
//! bumps a monotonic generation; the frame loop compares it with the
//! generation the surface was last built for and recreates at most once.

use tracing::debug;

use renderer_rhi::Extent2d;

/// Desired and built generation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Generations {
    pub desired: u64,
    pub built: u64,
}

/// Tracks the size the surface should have and whether it has been built for it.
#[derive(Debug)]
pub struct ResizeReconciler {
    desired_extent: Extent2d,
    desired_generation: u64,
    built_generation: u64,
}

impl ResizeReconciler {
    /// Starts up to date at `initial_extent`.
    pub fn new(initial_extent: Extent2d) -> Self {
        Self {
            desired_extent: initial_extent,
            desired_generation: 0,
            built_generation: 0,
        }
    }

    /// Records a new drawable size. Every call bumps the desired generation,
    /// including zero sizes and repeats of the current size.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.desired_extent = Extent2d::new(width, height);
        self.desired_generation += 1;
        debug!(
            "Resize to {} (generation {})",
            self.desired_extent, self.desired_generation
        );
    }

    /// Returns true if the surface was built for an older generation.
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.desired_generation != self.built_generation
    }

    /// Records that the surface now matches the desired size.
    pub fn mark_built(&mut self) {
        self.built_generation = self.desired_generation;
    }

    #[inline]
    pub fn desired_extent(&self) -> Extent2d {
        self.desired_extent
    }

    #[inline]
    pub fn generations(&self) -> Generations {
        Generations {
            desired: self.desired_generation,
            built: self.built_generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_up_to_date() {
        let reconciler = ResizeReconciler::new(Extent2d::new(800, 600));
        assert!(!reconciler.is_stale());
        assert_eq!(reconciler.generations(), Generations::default());
    }

    #[test]
    fn test_multiple_resizes_collapse() {
        let mut reconciler = ResizeReconciler::new(Extent2d::new(800, 600));
        reconciler.notify_resize(1024, 768);
        reconciler.notify_resize(1280, 720);
        reconciler.notify_resize(1920, 1080);

        assert!(reconciler.is_stale());
        assert_eq!(reconciler.desired_extent(), Extent2d::new(1920, 1080));
        assert_eq!(reconciler.generations().desired, 3);

        reconciler.mark_built();
        assert!(!reconciler.is_stale());
        assert_eq!(reconciler.generations().built, 3);
    }

    #[test]
    fn test_zero_size_still_bumps_generation() {
        let mut reconciler = ResizeReconciler::new(Extent2d::new(800, 600));
        reconciler.notify_resize(0, 600);
        assert!(reconciler.is_stale());
        assert!(reconciler.desired_extent().is_empty());
    }
}
