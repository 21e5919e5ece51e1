//! Input Source (spec.md §4.3): decodes a video source into frames the
//! renderer can import without a CPU copy when possible.

pub mod file;
pub mod live;
pub mod vaapi;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// NV12 plane layout: one R8 luma plane, one GR88 chroma plane. Matches
/// the teacher's `SharedFrame` pattern of holding the latest decoded frame
/// behind a mutex with a monotonic counter for change detection.
#[derive(Debug, Clone)]
pub enum FrameData {
    /// Planar pixel data resident in host memory.
    Cpu {
        width: u32,
        height: u32,
        y_plane: Vec<u8>,
        y_stride: u32,
        uv_plane: Vec<u8>,
        uv_stride: u32,
    },
    /// A DMA-BUF-backed surface the renderer can import via EGLImage
    /// without touching the pixels on the CPU.
    GpuDmaBuf {
        width: u32,
        height: u32,
        fds: Vec<std::os::unix::io::RawFd>,
        strides: Vec<u32>,
        offsets: Vec<u32>,
        modifier: u64,
        fourcc: u32,
    },
    /// A VA-API surface id, importable directly by a VA-aware compositor
    /// path without an intermediate DMA-BUF round trip.
    VaSurface { width: u32, height: u32, surface_id: u32 },
}

impl FrameData {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            FrameData::Cpu { width, height, .. } => (*width, *height),
            FrameData::GpuDmaBuf { width, height, .. } => (*width, *height),
            FrameData::VaSurface { width, height, .. } => (*width, *height),
        }
    }

    pub fn is_zero_copy(&self) -> bool {
        !matches!(self, FrameData::Cpu { .. })
    }
}

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub source_frame_index: i64,
    pub data: FrameData,
}

/// Holds the single most-recently-decoded frame for a source. Readers take
/// the frame rather than cloning it, consistent with the zero-copy
/// invariant from spec.md §8: presenting a GPU-backed frame must not
/// trigger a CPU byte copy of the pixel data.
#[derive(Default)]
pub struct LatestFrameSlot {
    slot: Mutex<Option<VideoFrame>>,
    write_count: AtomicU64,
    read_count: AtomicU64,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, frame: VideoFrame) {
        *self.slot.lock() = Some(frame);
        self.write_count.fetch_add(1, Ordering::Release);
    }

    pub fn has_new_frame(&self) -> bool {
        self.write_count.load(Ordering::Acquire) != self.read_count.load(Ordering::Acquire)
    }

    /// Takes the frame out of the slot, leaving it empty. Does not clone
    /// pixel data.
    pub fn take(&self) -> Option<VideoFrame> {
        self.read_count.store(
            self.write_count.load(Ordering::Acquire),
            Ordering::Release,
        );
        self.slot.lock().take()
    }
}

/// A decodable input source, driven by a resolved source frame index each
/// tick (see `layer::playback::LayerPlayback::resolve`).
pub trait InputSource: Send {
    /// Requests that the source make the frame at `source_frame` available.
    /// Implementations may decode synchronously (file sources, seeking) or
    /// asynchronously (live sources, via a background thread's ring buffer).
    fn request_frame(&mut self, source_frame: i64);

    /// Returns the most recently produced frame, if a new one is ready.
    fn latest_frame(&mut self) -> Option<VideoFrame>;

    /// Total frame count of the source, or `i64::MAX` for an unbounded
    /// live source.
    fn frame_count(&self) -> i64;

    fn native_fps(&self) -> f64;

    /// Called whenever the driving sync source reports a discontinuous
    /// jump (spec.md §4.4 step 2), so a seeking source can discard any
    /// in-flight forward-decode state instead of treating the next
    /// `request_frame` as a small delta from wherever it last was.
    fn reset_seek_state(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(idx: i64) -> VideoFrame {
        VideoFrame {
            source_frame_index: idx,
            data: FrameData::Cpu {
                width: 4,
                height: 4,
                y_plane: vec![0; 16],
                y_stride: 4,
                uv_plane: vec![0; 8],
                uv_stride: 4,
            },
        }
    }

    #[test]
    fn take_clears_has_new_frame() {
        let slot = LatestFrameSlot::new();
        assert!(!slot.has_new_frame());
        slot.write(sample_frame(0));
        assert!(slot.has_new_frame());
        let frame = slot.take();
        assert!(frame.is_some());
        assert!(!slot.has_new_frame());
    }

    #[test]
    fn gpu_backed_frame_reports_zero_copy() {
        let frame = FrameData::VaSurface {
            width: 1920,
            height: 1080,
            surface_id: 7,
        };
        assert!(frame.is_zero_copy());
        let cpu = sample_frame(0).data;
        assert!(!cpu.is_zero_copy());
    }
}
