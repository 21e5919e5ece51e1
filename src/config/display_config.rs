//! Display configuration persistence (spec.md §6, §9): the external JSON
//! format is the authoritative on-disk representation; at load time it
//! is converted into the renderer's authoritative in-memory
//! `OutputRegion` list (SPEC_FULL.md §A.3 / §D resolves the split this
//! way).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::display::{EdgeBlend, ModeSelection, OutputRegion};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub name: String,
    pub enabled: bool,
    pub canvas_x: i32,
    pub canvas_y: i32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub mode: ModeConfig,
    pub blend_left: f32,
    pub blend_right: f32,
    pub blend_top: f32,
    pub blend_bottom: f32,
    pub blend_gamma: f32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            canvas_x: 0,
            canvas_y: 0,
            canvas_width: 0,
            canvas_height: 0,
            mode: ModeConfig::default(),
            blend_left: 0.0,
            blend_right: 0.0,
            blend_top: 0.0,
            blend_bottom: 0.0,
            blend_gamma: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum ModeConfig {
    #[default]
    Native,
    Maximum,
    Fixed {
        width: u32,
        height: u32,
    },
}

impl From<ModeConfig> for ModeSelection {
    fn from(mode: ModeConfig) -> Self {
        match mode {
            ModeConfig::Native => ModeSelection::Native,
            ModeConfig::Maximum => ModeSelection::Maximum,
            ModeConfig::Fixed { width, height } => ModeSelection::Fixed { width, height },
        }
    }
}

impl From<&OutputConfig> for OutputRegion {
    fn from(cfg: &OutputConfig) -> Self {
        OutputRegion {
            name: cfg.name.clone(),
            enabled: cfg.enabled,
            canvas_x: cfg.canvas_x,
            canvas_y: cfg.canvas_y,
            canvas_width: cfg.canvas_width,
            canvas_height: cfg.canvas_height,
            mode_selection: cfg.mode.into(),
            edge_blend: EdgeBlend {
                left: cfg.blend_left,
                right: cfg.blend_right,
                top: cfg.blend_top,
                bottom: cfg.blend_bottom,
                gamma: cfg.blend_gamma,
            },
            warp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfiguration {
    pub name: String,
    pub auto_detect: bool,
    pub headless: bool,
    pub outputs: Vec<OutputConfig>,
    pub virtual_outputs: Vec<OutputConfig>,
}

impl Default for DisplayConfiguration {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            auto_detect: true,
            headless: false,
            outputs: Vec::new(),
            virtual_outputs: Vec::new(),
        }
    }
}

impl DisplayConfiguration {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading display configuration {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing display configuration {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating display configuration directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("serializing display configuration")?;
        std::fs::write(path, content)
            .with_context(|| format!("writing display configuration {}", path.display()))
    }

    /// Converts the persisted configuration into the renderer's
    /// authoritative `OutputRegion` list. Headless mode yields an empty
    /// list regardless of configured outputs.
    pub fn to_output_regions(&self) -> Vec<OutputRegion> {
        if self.headless {
            return Vec::new();
        }
        self.outputs
            .iter()
            .chain(self.virtual_outputs.iter())
            .map(OutputRegion::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_config_yields_no_regions() {
        let mut cfg = DisplayConfiguration::default();
        cfg.headless = true;
        cfg.outputs.push(OutputConfig::default());
        assert!(cfg.to_output_regions().is_empty());
    }

    #[test]
    fn outputs_and_virtual_outputs_are_both_converted() {
        let mut cfg = DisplayConfiguration::default();
        cfg.outputs.push(OutputConfig {
            name: "hdmi-0".into(),
            ..OutputConfig::default()
        });
        cfg.virtual_outputs.push(OutputConfig {
            name: "preview".into(),
            ..OutputConfig::default()
        });
        let regions = cfg.to_output_regions();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].name, "hdmi-0");
        assert_eq!(regions[1].name, "preview");
    }

    #[test]
    fn fixed_mode_round_trips_through_json() {
        let cfg = OutputConfig {
            mode: ModeConfig::Fixed { width: 1920, height: 1080 },
            ..OutputConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: OutputConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.mode, ModeConfig::Fixed { width: 1920, height: 1080 });
    }
}
