//! Linear Time Code sync source.
//!
//! Not implemented: LTC is audio-encoded timecode decoded from a sample
//! stream, which is out of scope for this crate (see spec.md Non-goals).
//! This stub exists so `SyncSourceKind` has a variant ready for a future
//! decoder without reshaping the enum.

use super::{SyncSource, SyncState};

pub struct LtcSource;

impl SyncSource for LtcSource {
    fn poll(&mut self) -> SyncState {
        SyncState {
            frame_index: -1,
            rolling: false,
            source_fps: 0.0,
            jumped: false,
        }
    }
}
