//! Live capture input source: a background thread decodes continuously
//! into a small ring buffer, decoupled from the main loop's render
//! cadence (spec.md §5 concurrency model: one thread per live input).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender};

use super::{FrameData, InputSource, VideoFrame};

const RING_BUFFER_DEPTH: usize = 4;

/// A live capture source is always "rolling"; there is no seek concept,
/// so `request_frame` only hints which frame index to tag outgoing frames
/// with relative to the stream's own monotonic counter.
pub struct LiveInputSource {
    fps: f64,
    rx: Receiver<VideoFrame>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    latest: Option<VideoFrame>,
}

impl LiveInputSource {
    /// Spawns the capture thread. `capture` is called repeatedly on the
    /// background thread and should block until the next frame is
    /// available, returning `None` to signal end-of-stream.
    pub fn spawn<F>(fps: f64, mut capture: F) -> Self
    where
        F: FnMut() -> Option<FrameData> + Send + 'static,
    {
        let (tx, rx): (Sender<VideoFrame>, Receiver<VideoFrame>) = bounded(RING_BUFFER_DEPTH);
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let handle = std::thread::spawn(move || {
            let mut index: i64 = 0;
            while thread_running.load(Ordering::Relaxed) {
                match capture() {
                    Some(data) => {
                        let frame = VideoFrame {
                            source_frame_index: index,
                            data,
                        };
                        index += 1;
                        // A full ring buffer means the main loop is behind;
                        // drop the oldest rather than block the capture thread.
                        if tx.is_full() {
                            let _ = rx.try_recv();
                        }
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        });

        Self {
            fps,
            rx,
            running,
            handle: Some(handle),
            latest: None,
        }
    }

    fn drain_to_latest(&mut self) {
        while let Ok(frame) = self.rx.try_recv() {
            self.latest = Some(frame);
        }
    }
}

impl InputSource for LiveInputSource {
    fn request_frame(&mut self, _source_frame: i64) {
        self.drain_to_latest();
    }

    fn latest_frame(&mut self) -> Option<VideoFrame> {
        self.drain_to_latest();
        self.latest.take()
    }

    fn frame_count(&self) -> i64 {
        i64::MAX
    }

    fn native_fps(&self) -> f64 {
        self.fps
    }

    fn reset_seek_state(&mut self) {
        // A live capture has no seek concept; a sync jump just means the
        // next frame we hand out is tagged against a different sync frame,
        // which `Layer::tick` already handles without our help.
    }
}

impl Drop for LiveInputSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn spawn_noop_for_test() -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn ring_buffer_drops_oldest_when_full() {
        let counter = Arc::new(AtomicI64::new(0));
        let c = counter.clone();
        let mut source = LiveInputSource::spawn(30.0, move || {
            let n = c.fetch_add(1, Ordering::Relaxed);
            if n < 20 {
                Some(FrameData::Cpu {
                    width: 1,
                    height: 1,
                    y_plane: vec![n as u8],
                    y_stride: 1,
                    uv_plane: vec![],
                    uv_stride: 0,
                })
            } else {
                None
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        let frame = source.latest_frame();
        assert!(frame.is_some());
    }
}
