//! Output Sink Manager (spec.md §2): the collaborator interface for
//! consumers of composited frames other than the DRM presentation path
//! (preview windows, recording, stream encoders). Encoding internals are
//! a Non-goal; this only defines the hand-off contract.

pub mod capture;

use capture::CapturedFrame;

pub trait OutputSink: Send {
    fn name(&self) -> &str;
    fn consume(&mut self, frame: &CapturedFrame);
}

#[derive(Default)]
pub struct OutputSinkManager {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl OutputSinkManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sink: Box<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    pub fn remove(&mut self, name: &str) {
        self.sinks.retain(|s| s.name() != name);
    }

    pub fn broadcast(&mut self, frame: &CapturedFrame) {
        for sink in &mut self.sinks {
            sink.consume(frame);
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        name: String,
        count: Arc<AtomicUsize>,
    }

    impl OutputSink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }
        fn consume(&mut self, _frame: &CapturedFrame) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn broadcast_reaches_every_sink() {
        let mut mgr = OutputSinkManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        mgr.add(Box::new(CountingSink {
            name: "a".into(),
            count: count.clone(),
        }));
        mgr.add(Box::new(CountingSink {
            name: "b".into(),
            count: count.clone(),
        }));
        mgr.broadcast(&CapturedFrame {
            width: 1,
            height: 1,
            rgba: vec![0; 4],
        });
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn remove_drops_sink_by_name() {
        let mut mgr = OutputSinkManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        mgr.add(Box::new(CountingSink {
            name: "a".into(),
            count,
        }));
        mgr.remove("a");
        assert!(mgr.is_empty());
    }
}
