//! Frame capture: reads the virtual canvas back into host memory via the
//! double-buffered PBO path, for sinks that need CPU pixels (preview,
//! file export) rather than a GPU handle (spec.md §B).

use crate::render::canvas::PboDoubleBuffer;

#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl CapturedFrame {
    /// A filesystem-safe name for an ad-hoc snapshot of this frame, stamped
    /// with the moment it's written rather than the moment it was captured
    /// (capture and write are a PBO cycle apart).
    pub fn snapshot_filename(&self) -> String {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        format!("canvas-{stamp}-{}x{}.png", self.width, self.height)
    }
}

/// Drives the one-frame-latency PBO readback: `request` is called once a
/// render completes, `poll` is called once per tick afterward and returns
/// the frame that was requested on the *previous* tick.
pub struct FrameCapture {
    pbo: PboDoubleBuffer<CapturedFrame>,
    enabled: bool,
}

impl FrameCapture {
    pub fn new() -> Self {
        Self {
            pbo: PboDoubleBuffer::new(),
            enabled: false,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn request(&mut self, frame: CapturedFrame) {
        if self.enabled {
            self.pbo.submit(frame);
        }
    }

    pub fn poll(&mut self) -> Option<CapturedFrame> {
        if self.enabled {
            self.pbo.fetch_ready()
        } else {
            None
        }
    }
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> CapturedFrame {
        CapturedFrame {
            width: 1,
            height: 1,
            rgba: vec![tag, tag, tag, 255],
        }
    }

    #[test]
    fn disabled_capture_never_produces_frames() {
        let mut capture = FrameCapture::new();
        capture.request(frame(1));
        assert!(capture.poll().is_none());
    }

    #[test]
    fn enabled_capture_delays_by_one_tick() {
        let mut capture = FrameCapture::new();
        capture.set_enabled(true);
        capture.request(frame(1));
        assert!(capture.poll().is_none());
        capture.request(frame(2));
        let ready = capture.poll().unwrap();
        assert_eq!(ready.rgba[0], 1);
    }
}
