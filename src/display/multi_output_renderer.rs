//! Multi-Output Renderer (spec.md §4.9): coordinates the virtual
//! canvas render with a single vsync-locked atomic commit across every
//! enabled output, falling back to independent legacy flips per surface
//! when atomic modesetting isn't available or an individual surface
//! opts out.

use super::drm::DrmOutputManager;
use super::OutputRegion;

pub struct MultiOutputRenderer {
    drm: DrmOutputManager,
    atomic_supported: bool,
}

impl MultiOutputRenderer {
    pub fn new(drm: DrmOutputManager, atomic_supported: bool) -> Self {
        Self {
            drm,
            atomic_supported,
        }
    }

    /// Commits the canvas that `Renderer::render_frame` already drew into
    /// every enabled output's own surface. When atomic modesetting is
    /// supported, all surfaces flip on the same vblank; otherwise each
    /// surface issues its own legacy page flip independently (each then
    /// drifts against the others by up to one vsync period).
    pub fn present_frame(&mut self, regions: &[OutputRegion]) -> anyhow::Result<()> {
        let result = if self.atomic_supported {
            self.commit_atomic(regions)
        } else {
            self.commit_legacy_per_surface(regions)
        };
        if result.is_ok() {
            match self.drm.wait_for_flip_event() {
                Ok(true) => self.drm.poll_flip_completions(),
                Ok(false) => {}
                Err(err) => log::warn!("waiting for flip event failed: {err}"),
            }
        }
        result
    }

    fn commit_atomic(&mut self, regions: &[OutputRegion]) -> anyhow::Result<()> {
        let _ = regions;
        self.drm.commit_atomic()?;
        Ok(())
    }

    fn commit_legacy_per_surface(&mut self, regions: &[OutputRegion]) -> anyhow::Result<()> {
        let _ = regions;
        self.drm.commit_legacy()?;
        Ok(())
    }

    pub fn poll_hotplug(&mut self) -> Vec<super::drm::HotplugEvent> {
        self.drm.poll_hotplug()
    }
}
