//! Presentation Timing (spec.md §4.10): tracks UST (microsecond
//! timestamp) and MSC (media stream counter) pairs reported by DRM page
//! flip / atomic commit completion events, and derives vsync duration
//! and skipped-vsync counts.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationSample {
    pub ust_us: u64,
    pub msc: u64,
}

#[derive(Debug, Default)]
pub struct PresentationTiming {
    last: Option<PresentationSample>,
    vsync_duration_us: Option<u64>,
}

impl PresentationTiming {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new completion event, returning the number of vsyncs
    /// skipped since the previous sample (0 if consecutive, >0 if frames
    /// were missed, and always 0 for the very first sample).
    pub fn record(&mut self, sample: PresentationSample) -> u64 {
        let skipped = match self.last {
            Some(prev) => {
                if sample.msc <= prev.msc {
                    0
                } else {
                    let delta_msc = sample.msc - prev.msc;
                    if delta_msc > 1 {
                        self.update_vsync_duration(&prev, &sample, delta_msc);
                        delta_msc - 1
                    } else {
                        self.update_vsync_duration(&prev, &sample, delta_msc);
                        0
                    }
                }
            }
            None => 0,
        };
        self.last = Some(sample);
        skipped
    }

    fn update_vsync_duration(&mut self, prev: &PresentationSample, sample: &PresentationSample, delta_msc: u64) {
        if delta_msc == 0 {
            return;
        }
        let delta_us = sample.ust_us.saturating_sub(prev.ust_us);
        self.vsync_duration_us = Some(delta_us / delta_msc);
    }

    pub fn vsync_duration_us(&self) -> Option<u64> {
        self.vsync_duration_us
    }

    pub fn last_msc(&self) -> Option<u64> {
        self.last.map(|s| s.msc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_vsyncs_report_zero_skipped() {
        let mut timing = PresentationTiming::new();
        assert_eq!(timing.record(PresentationSample { ust_us: 0, msc: 100 }), 0);
        assert_eq!(timing.record(PresentationSample { ust_us: 16_667, msc: 101 }), 0);
        assert_eq!(timing.vsync_duration_us(), Some(16_667));
    }

    #[test]
    fn gap_in_msc_counts_skipped_vsyncs() {
        let mut timing = PresentationTiming::new();
        timing.record(PresentationSample { ust_us: 0, msc: 100 });
        let skipped = timing.record(PresentationSample { ust_us: 50_000, msc: 103 });
        assert_eq!(skipped, 2);
    }

    #[test]
    fn msc_monotonicity_tracks_latest() {
        let mut timing = PresentationTiming::new();
        timing.record(PresentationSample { ust_us: 0, msc: 100 });
        timing.record(PresentationSample { ust_us: 16_000, msc: 101 });
        assert_eq!(timing.last_msc(), Some(101));
    }

    #[test]
    fn out_of_order_msc_is_ignored() {
        let mut timing = PresentationTiming::new();
        timing.record(PresentationSample { ust_us: 0, msc: 100 });
        let skipped = timing.record(PresentationSample { ust_us: 1000, msc: 99 });
        assert_eq!(skipped, 0);
        assert_eq!(timing.last_msc(), Some(99));
    }
}
