//! Layer and LayerManager (spec.md §3, §4.4): a layer pairs an input
//! source with playback state and display properties, addressable either
//! by its integer id or by an optional cue id.

pub mod display_properties;
pub mod playback;

use std::collections::HashMap;

use display_properties::DisplayProperties;
use playback::LayerPlayback;

use crate::input::{InputSource, VideoFrame};
use crate::sync::{convert_frame, SyncState};

pub type LayerId = u32;

pub struct Layer {
    pub id: LayerId,
    pub cue_id: Option<String>,
    pub playback: LayerPlayback,
    pub display: DisplayProperties,
    pub source: Option<Box<dyn InputSource>>,
    pub mtc_follow: bool,
    pub auto_unload: bool,
    /// Whether this layer is currently playing; toggled by `/play`/`/pause`
    /// and by the rolling-transition logic in `tick`.
    pub playing: bool,
    /// Tracks the sync source's `rolling` flag from the previous tick, so a
    /// rolling->stopped or stopped->rolling edge can be detected.
    was_rolling: bool,
    /// Last source frame index actually decoded, used for step 7's
    /// equality-gated re-request (no redundant decode when nothing moved).
    current_frame: Option<i64>,
    /// Set once this layer's source should be dropped at the end of the
    /// current tick (auto-unload on end-of-stream).
    pub pending_removal: bool,
}

impl Layer {
    pub fn new(id: LayerId) -> Self {
        Self {
            id,
            cue_id: None,
            playback: LayerPlayback::default(),
            display: DisplayProperties::default(),
            source: None,
            mtc_follow: true,
            auto_unload: false,
            playing: true,
            was_rolling: true,
            current_frame: None,
            pending_removal: false,
        }
    }

    /// Drives this layer's source to the frame corresponding to `sync`'s
    /// current position and returns a newly available frame, if any
    /// (spec.md §4.4 steps 2-7).
    pub fn tick(&mut self, sync: &SyncState) -> Option<VideoFrame> {
        if sync.jumped {
            if let Some(source) = self.source.as_mut() {
                source.reset_seek_state();
            }
            self.current_frame = None;
        }

        if sync.rolling && !self.was_rolling {
            self.playing = true;
        } else if !sync.rolling && self.was_rolling {
            self.playing = false;
        }
        self.was_rolling = sync.rolling;

        if !self.playing {
            return None;
        }

        let source = self.source.as_mut()?;

        let sync_frame = if (source.native_fps() - sync.source_fps).abs() > 0.01 {
            convert_frame(sync.frame_index, sync.source_fps, source.native_fps())
        } else {
            sync.frame_index
        };

        let resolved = self.playback.resolve(sync_frame);
        if resolved.end_of_stream && self.auto_unload {
            self.pending_removal = true;
        }

        if self.current_frame == Some(resolved.frame) {
            return source.latest_frame();
        }

        source.request_frame(resolved.frame);
        self.current_frame = Some(resolved.frame);
        source.latest_frame()
    }
}

/// Owns all layers, addressable by numeric id or optional cue id.
///
/// Per the removal invariant, `remove` always clears both the
/// `id -> Layer` map and the `cue_id -> id` map in a single operation;
/// there is no partial-removal code path.
#[derive(Default)]
pub struct LayerManager {
    layers: HashMap<LayerId, Layer>,
    cue_index: HashMap<String, LayerId>,
    next_id: LayerId,
}

impl LayerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self) -> LayerId {
        let id = self.next_id;
        self.next_id += 1;
        self.layers.insert(id, Layer::new(id));
        id
    }

    pub fn set_cue_id(&mut self, id: LayerId, cue_id: impl Into<String>) {
        let cue_id = cue_id.into();
        if let Some(layer) = self.layers.get_mut(&id) {
            if let Some(old) = layer.cue_id.take() {
                self.cue_index.remove(&old);
            }
            self.cue_index.insert(cue_id.clone(), id);
            layer.cue_id = Some(cue_id);
        }
    }

    pub fn remove(&mut self, id: LayerId) -> Option<Layer> {
        let layer = self.layers.remove(&id)?;
        if let Some(cue_id) = &layer.cue_id {
            self.cue_index.remove(cue_id);
        }
        Some(layer)
    }

    pub fn remove_by_cue(&mut self, cue_id: &str) -> Option<Layer> {
        let id = *self.cue_index.get(cue_id)?;
        self.remove(id)
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(&id)
    }

    pub fn resolve_cue(&self, cue_id: &str) -> Option<LayerId> {
        self.cue_index.get(cue_id).copied()
    }

    /// Iterates layers in ascending z-order, for compositing bottom to top.
    pub fn iter_by_z_order(&self) -> impl Iterator<Item = &Layer> {
        let mut layers: Vec<&Layer> = self.layers.values().collect();
        layers.sort_by_key(|l| l.display.z_order);
        layers.into_iter()
    }

    /// Mutable counterpart of `iter_by_z_order`, used to tick each layer's
    /// playback once per frame in a fixed, deterministic order.
    pub fn iter_by_z_order_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
        let mut layers: Vec<&mut Layer> = self.layers.values_mut().collect();
        layers.sort_by_key(|l| l.display.z_order);
        layers.into_iter()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_clears_both_maps_atomically() {
        let mut mgr = LayerManager::new();
        let id = mgr.add();
        mgr.set_cue_id(id, "intro");
        assert_eq!(mgr.resolve_cue("intro"), Some(id));

        mgr.remove(id);
        assert!(mgr.get(id).is_none());
        assert_eq!(mgr.resolve_cue("intro"), None);
    }

    #[test]
    fn remove_by_cue_removes_underlying_layer() {
        let mut mgr = LayerManager::new();
        let id = mgr.add();
        mgr.set_cue_id(id, "outro");
        let removed = mgr.remove_by_cue("outro");
        assert!(removed.is_some());
        assert!(mgr.get(id).is_none());
    }

    #[test]
    fn reassigning_cue_id_drops_old_mapping() {
        let mut mgr = LayerManager::new();
        let id = mgr.add();
        mgr.set_cue_id(id, "a");
        mgr.set_cue_id(id, "b");
        assert_eq!(mgr.resolve_cue("a"), None);
        assert_eq!(mgr.resolve_cue("b"), Some(id));
    }

    #[test]
    fn iter_by_z_order_sorts_ascending() {
        let mut mgr = LayerManager::new();
        let top = mgr.add();
        let bottom = mgr.add();
        mgr.get_mut(top).unwrap().display.z_order = 10;
        mgr.get_mut(bottom).unwrap().display.z_order = -5;
        let ordered: Vec<LayerId> = mgr.iter_by_z_order().map(|l| l.id).collect();
        assert_eq!(ordered, vec![bottom, top]);
    }
}
