//! Clock & Timecode Decoder and Sync Source (spec.md §4.1, §4.2).

pub mod framerate_converter;
pub mod ltc;
pub mod midi_transport;
pub mod mtc;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub use framerate_converter::convert_frame;
pub use mtc::{MtcDecoder, MtcState, RateClass, Timecode};

/// Snapshot of a sync source's current position, polled once per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncState {
    pub frame_index: i64,
    pub rolling: bool,
    pub source_fps: f64,
    pub jumped: bool,
}

impl From<MtcState> for SyncState {
    fn from(s: MtcState) -> Self {
        SyncState {
            frame_index: s.frame_index,
            rolling: s.rolling,
            source_fps: s.source_fps,
            jumped: s.jumped,
        }
    }
}

/// A source of external timecode. Implementations are polled once per
/// render frame; they must not block.
pub trait SyncSource: Send {
    fn poll(&mut self) -> SyncState;
}

/// Wraps an `MtcDecoder` as a `SyncSource`.
pub struct MtcSource {
    decoder: MtcDecoder,
}

impl MtcSource {
    pub fn new() -> Self {
        Self {
            decoder: MtcDecoder::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.decoder.feed(bytes);
    }
}

impl Default for MtcSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSource for MtcSource {
    fn poll(&mut self) -> SyncState {
        self.decoder.poll().into()
    }
}

/// A manual sync source, driven by internal playback rather than external
/// timecode. Used when no MTC/LTC transport is attached.
pub struct InternalClock {
    frame_index: i64,
    fps: f64,
}

impl InternalClock {
    pub fn new(fps: f64) -> Self {
        Self {
            frame_index: 0,
            fps,
        }
    }

    pub fn advance(&mut self) {
        self.frame_index += 1;
    }
}

impl SyncSource for InternalClock {
    fn poll(&mut self) -> SyncState {
        SyncState {
            frame_index: self.frame_index,
            rolling: true,
            source_fps: self.fps,
            jumped: false,
        }
    }
}

/// Shared handle to whichever `SyncSource` currently drives the
/// application. The application/canvas holds the strong `Arc`; layers
/// that merely observe the clock hold a `Weak` handle via
/// `SharedSyncSource::observe`, so the source is dropped as soon as its
/// last strong holder goes away rather than being kept alive by
/// incidental observers.
#[derive(Clone)]
pub struct SharedSyncSource {
    inner: Arc<Mutex<Box<dyn SyncSource>>>,
}

impl SharedSyncSource {
    pub fn new(source: Box<dyn SyncSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    pub fn poll(&self) -> SyncState {
        self.inner.lock().poll()
    }

    /// A non-owning observation handle. Upgrading after the strong holder
    /// has dropped the source yields `None`.
    pub fn observe(&self) -> WeakSyncSource {
        WeakSyncSource {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

#[derive(Clone)]
pub struct WeakSyncSource {
    inner: Weak<Mutex<Box<dyn SyncSource>>>,
}

impl WeakSyncSource {
    pub fn poll(&self) -> Option<SyncState> {
        self.inner.upgrade().map(|inner| inner.lock().poll())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_handle_dies_with_strong_owner() {
        let shared = SharedSyncSource::new(Box::new(InternalClock::new(30.0)));
        let weak = shared.observe();
        assert!(weak.poll().is_some());
        drop(shared);
        assert!(weak.poll().is_none());
    }

    #[test]
    fn internal_clock_advances_monotonically() {
        let mut clock = InternalClock::new(25.0);
        assert_eq!(clock.poll().frame_index, 0);
        clock.advance();
        assert_eq!(clock.poll().frame_index, 1);
    }
}
