//! A single output's DRM surface: the connector/CRTC/framebuffer triple
//! used to either fall back to a legacy page flip or participate in a
//! cross-output atomic commit (spec.md §4.8).

use std::os::unix::io::RawFd;

use drm::control::{connector, crtc, framebuffer, Device as ControlDevice, Mode};

use super::presentation::{PresentationSample, PresentationTiming};

pub struct DrmSurface {
    pub connector: connector::Handle,
    pub crtc: crtc::Handle,
    pub mode: Mode,
    pub current_fb: Option<framebuffer::Handle>,
    /// Backing scanout buffer for `current_fb`; kept alive for as long as
    /// the kernel framebuffer object references it.
    pub scanout: Option<gbm::BufferObject<()>>,
    pub timing: PresentationTiming,
    pub pending_flip: bool,
}

impl DrmSurface {
    pub fn new(connector: connector::Handle, crtc: crtc::Handle, mode: Mode) -> Self {
        Self {
            connector,
            crtc,
            mode,
            current_fb: None,
            scanout: None,
            timing: PresentationTiming::new(),
            pending_flip: false,
        }
    }

    /// Issues a legacy (non-atomic) page flip, used as a fallback when the
    /// kernel driver lacks atomic modesetting support or when an
    /// individual output opts out of the cross-output atomic commit.
    pub fn legacy_page_flip<D: ControlDevice>(&mut self, device: &D, fb: framebuffer::Handle) -> std::io::Result<()> {
        device.page_flip(self.crtc, fb, drm::control::PageFlipFlags::EVENT, None)?;
        self.current_fb = Some(fb);
        self.pending_flip = true;
        Ok(())
    }

    pub fn on_flip_complete(&mut self, ust_us: u64, msc: u64) -> u64 {
        self.pending_flip = false;
        self.timing.record(PresentationSample { ust_us, msc })
    }
}

/// Raw flip-event fd, polled by the orchestrator alongside the command
/// queue with a 1-second timeout (non-fatal on timeout: just means no
/// output flipped this tick, which is expected at startup or when all
/// outputs are headless).
pub fn device_event_fd<D: ControlDevice + std::os::unix::io::AsRawFd>(device: &D) -> RawFd {
    device.as_raw_fd()
}
