//! Layer playback state machine: offset, time-scale, wraparound and
//! loop-region arithmetic (spec.md §4.4). All division floors, never
//! rounds, matching the sync framerate converter's convention.

/// An inclusive-start, exclusive-end frame range within a source, active
/// only while `enabled` — independent of the separate `wraparound` flag,
/// since a layer can loop a sub-range without wrapping at the source's own
/// end, or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: i64,
    pub end: i64,
    pub enabled: bool,
}

impl LoopRegion {
    pub fn len(&self) -> i64 {
        (self.end - self.start).max(0)
    }
}

impl Default for LoopRegion {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            enabled: false,
        }
    }
}

/// The outcome of resolving a sync frame: the source frame to decode, and
/// whether playback has run past the end of the source with wraparound
/// disabled (step 6 of spec.md §4.4 still reports a frame in that case —
/// clamped to the last one — rather than producing nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFrame {
    pub frame: i64,
    pub end_of_stream: bool,
}

/// Per-layer playback parameters, evaluated against a driving sync frame
/// index to produce the source frame to decode/present this tick.
#[derive(Debug, Clone)]
pub struct LayerPlayback {
    /// Added to the sync frame before scaling (spec.md §4.4 step 4).
    pub offset: i64,
    /// Local-time rate relative to the sync source; negative plays in reverse.
    pub time_scale: f64,
    /// Whether the source wraps at its own (or loop region's) end once
    /// playback runs past it.
    pub wraparound: bool,
    /// Confines playback to a sub-range of the source when `enabled`.
    pub loop_region: LoopRegion,
    /// Total frame count of the underlying source.
    pub source_frame_count: i64,
}

impl Default for LayerPlayback {
    fn default() -> Self {
        Self {
            offset: 0,
            time_scale: 1.0,
            wraparound: false,
            loop_region: LoopRegion::default(),
            source_frame_count: 0,
        }
    }
}

impl LayerPlayback {
    /// Resolves `sync_frame` into a source frame index per spec.md §4.4
    /// steps 4-6: scale, then confine to the loop region if one is
    /// enabled, then wrap or clamp-with-end-of-stream.
    pub fn resolve(&self, sync_frame: i64) -> ResolvedFrame {
        let f = (((sync_frame + self.offset) as f64) * self.time_scale).floor() as i64;

        let f = if self.loop_region.enabled {
            let len = self.loop_region.len();
            if len <= 0 {
                self.loop_region.start
            } else {
                self.loop_region.start + (f - self.loop_region.start).rem_euclid(len)
            }
        } else {
            f
        };

        let total = self.source_frame_count;
        if total <= 0 {
            return ResolvedFrame {
                frame: 0,
                end_of_stream: true,
            };
        }

        if self.wraparound {
            ResolvedFrame {
                frame: f.rem_euclid(total),
                end_of_stream: false,
            }
        } else if f < 0 {
            ResolvedFrame {
                frame: 0,
                end_of_stream: false,
            }
        } else if f >= total {
            ResolvedFrame {
                frame: total - 1,
                end_of_stream: true,
            }
        } else {
            ResolvedFrame {
                frame: f,
                end_of_stream: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playback(offset: i64, time_scale: f64, wraparound: bool, frame_count: i64) -> LayerPlayback {
        LayerPlayback {
            offset,
            time_scale,
            wraparound,
            loop_region: LoopRegion::default(),
            source_frame_count: frame_count,
        }
    }

    #[test]
    fn plain_forward_playback_tracks_sync() {
        let p = playback(0, 1.0, false, 100);
        assert_eq!(p.resolve(0).frame, 0);
        assert_eq!(p.resolve(50).frame, 50);
        assert_eq!(p.resolve(99).frame, 99);
        assert!(!p.resolve(99).end_of_stream);
    }

    #[test]
    fn offset_is_added_not_subtracted() {
        // spec.md §4.4 worked example: offset=10, scale=1, syncFrame=5 -> f=15.
        let p = playback(10, 1.0, false, 100);
        assert_eq!(p.resolve(5).frame, 15);
    }

    #[test]
    fn non_looping_clamps_and_reports_end_of_stream() {
        let p = playback(10, 1.0, false, 50);
        assert_eq!(p.resolve(0).frame, 0); // before offset clamps to first frame
        assert!(!p.resolve(0).end_of_stream);
        assert_eq!(p.resolve(59).frame, 49);
        assert!(!p.resolve(59).end_of_stream);
        let overrun = p.resolve(60);
        assert_eq!(overrun.frame, 49); // clamped to totalFrames - 1
        assert!(overrun.end_of_stream);
    }

    #[test]
    fn wraparound_wraps_at_source_length() {
        let p = playback(0, 1.0, true, 10);
        assert_eq!(p.resolve(9).frame, 9);
        assert_eq!(p.resolve(10).frame, 0);
        assert_eq!(p.resolve(23).frame, 3);
        assert!(!p.resolve(23).end_of_stream);
    }

    #[test]
    fn reverse_playback_via_negative_scale() {
        let p = playback(0, -1.0, false, 100);
        assert_eq!(p.resolve(0).frame, 0);
        assert_eq!(p.resolve(-10).frame, 10);
        assert_eq!(p.resolve(-99).frame, 99);
    }

    #[test]
    fn reverse_wraparound_wraps_with_rem_euclid_not_negative() {
        let p = playback(0, -1.0, true, 10);
        assert_eq!(p.resolve(1).frame, 9);
        assert_eq!(p.resolve(11).frame, 9);
    }

    #[test]
    fn loop_region_confines_and_wraps_within_subrange_independent_of_wraparound() {
        let mut p = playback(0, 1.0, false, 1000);
        p.loop_region = LoopRegion {
            start: 20,
            end: 30,
            enabled: true,
        };
        // Loop-region mapping applies whenever `enabled`, regardless of
        // the separate wraparound flag.
        assert_eq!(p.resolve(0).frame, 20);
        assert_eq!(p.resolve(9).frame, 29);
        assert_eq!(p.resolve(10).frame, 20);
        assert!(!p.resolve(10).end_of_stream);
    }

    #[test]
    fn reverse_playback_with_loop_region_wraps_via_rem_euclid() {
        // spec.md §8 worked example: loopRegion[100,200], timeScale=-1,
        // syncFrame=210 -> currentFrame=190.
        let mut p = playback(0, -1.0, false, 1000);
        p.loop_region = LoopRegion {
            start: 100,
            end: 200,
            enabled: true,
        };
        assert_eq!(p.resolve(210).frame, 190);
    }

    #[test]
    fn fractional_time_scale_floors_rather_than_rounds() {
        let p = playback(0, 0.5, false, 100);
        assert_eq!(p.resolve(1).frame, 0); // 0.5 -> floor 0
        assert_eq!(p.resolve(3).frame, 1); // 1.5 -> floor 1
    }

    #[test]
    fn zero_source_length_reports_end_of_stream_immediately() {
        let p = playback(0, 1.0, false, 0);
        assert!(p.resolve(0).end_of_stream);
    }
}
