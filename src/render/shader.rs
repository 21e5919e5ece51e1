//! GLSL shader compilation helpers and the blend-mode GL state table
//! (spec.md §4.5).

use anyhow::{anyhow, Result};
use glow::HasContext;

use crate::layer::display_properties::{BlendMode, DisplayProperties};

pub const LAYER_VERTEX_SHADER: &str = include_str!("shaders/layer.vert");
pub const LAYER_FRAGMENT_SHADER: &str = include_str!("shaders/layer.frag");
pub const BLIT_VERTEX_SHADER: &str = include_str!("shaders/blit.vert");
pub const BLIT_FRAGMENT_SHADER: &str = include_str!("shaders/blit.frag");
pub const OSD_VERTEX_SHADER: &str = include_str!("shaders/osd.vert");
pub const OSD_FRAGMENT_SHADER: &str = include_str!("shaders/osd.frag");

pub struct Program {
    pub handle: glow::Program,
}

impl Program {
    pub fn link(gl: &glow::Context, vertex_src: &str, fragment_src: &str) -> Result<Self> {
        unsafe {
            let program = gl.create_program().map_err(|e| anyhow!("create_program: {e}"))?;

            let vertex = compile(gl, glow::VERTEX_SHADER, vertex_src)?;
            let fragment = compile(gl, glow::FRAGMENT_SHADER, fragment_src)?;

            gl.attach_shader(program, vertex);
            gl.attach_shader(program, fragment);
            gl.link_program(program);

            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                return Err(anyhow!("shader link failed: {log}"));
            }

            gl.delete_shader(vertex);
            gl.delete_shader(fragment);

            Ok(Self { handle: program })
        }
    }
}

unsafe fn compile(gl: &glow::Context, kind: u32, src: &str) -> Result<glow::Shader> {
    let shader = gl.create_shader(kind).map_err(|e| anyhow!("create_shader: {e}"))?;
    gl.shader_source(shader, src);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        return Err(anyhow!("shader compile failed: {log}"));
    }
    Ok(shader)
}

/// `(src_factor, dst_factor)` pairs for `glBlendFunc`, one per blend mode.
pub fn blend_func_pair(mode: BlendMode) -> (u32, u32) {
    match mode {
        BlendMode::Normal => (glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA),
        BlendMode::Multiply => (glow::DST_COLOR, glow::ONE_MINUS_SRC_ALPHA),
        BlendMode::Screen => (glow::ONE, glow::ONE_MINUS_SRC_COLOR),
        BlendMode::Overlay => (glow::ONE, glow::ONE_MINUS_SRC_ALPHA),
    }
}

/// Standard orthographic projection mapping canvas pixel space
/// `[0, width] x [0, height]` to clip space, column-major for GL upload.
pub fn ortho_projection(width: f32, height: f32) -> [f32; 16] {
    let l = 0.0;
    let r = width;
    let b = height;
    let t = 0.0;
    let n = -1.0;
    let f = 1.0;

    [
        2.0 / (r - l), 0.0, 0.0, 0.0,
        0.0, 2.0 / (t - b), 0.0, 0.0,
        0.0, 0.0, -2.0 / (f - n), 0.0,
        -(r + l) / (r - l), -(t + b) / (t - b), -(f + n) / (f - n), 1.0,
    ]
}

/// Column-major affine transform (translate/scale/rotate about the quad's
/// own center) that places an undeformed `width x height` quad at
/// `(x, y)` on the canvas (spec.md §4.5 step 2).
pub fn model_matrix(display: &DisplayProperties) -> [f32; 16] {
    let theta = display.rotation_degrees.to_radians();
    let (sin, cos) = theta.sin_cos();
    let sx = display.scale_x;
    let sy = display.scale_y;

    let a = cos * sx;
    let b = -sin * sy;
    let d = sin * sx;
    let e = cos * sy;

    let cx = display.width / 2.0;
    let cy = display.height / 2.0;
    let tx = -(a * cx + b * cy) + cx + display.x;
    let ty = -(d * cx + e * cy) + cy + display.y;

    [
        a, d, 0.0, 0.0,
        b, e, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        tx, ty, 0.0, 1.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ortho_maps_top_left_to_clip_space_corner() {
        let m = ortho_projection(1920.0, 1080.0);
        // x' = x * m[0] + m[12]; for x=0, x' should be -1.
        assert!((0.0 * m[0] + m[12] - (-1.0)).abs() < 1e-5);
        // y' for y=0 (top) should be +1 (GL clip space has +y up).
        assert!((0.0 * m[5] + m[13] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn model_matrix_places_unrotated_quad_at_its_position() {
        let mut display = DisplayProperties::default();
        display.x = 100.0;
        display.y = 50.0;
        display.width = 200.0;
        display.height = 80.0;
        let m = model_matrix(&display);
        // Top-left corner (0,0) in quad-local space should land at (x, y).
        assert!((m[12] - 100.0).abs() < 1e-4);
        assert!((m[13] - 50.0).abs() < 1e-4);
    }

    #[test]
    fn model_matrix_scale_only_keeps_center_fixed() {
        let mut display = DisplayProperties::default();
        display.width = 100.0;
        display.height = 100.0;
        display.scale_x = 2.0;
        display.scale_y = 2.0;
        let m = model_matrix(&display);
        // Center (50,50) maps to itself when only scale changes (no translate).
        let (cx, cy) = (50.0, 50.0);
        let x = m[0] * cx + m[4] * cy + m[12];
        let y = m[1] * cx + m[5] * cy + m[13];
        assert!((x - cx).abs() < 1e-3);
        assert!((y - cy).abs() < 1e-3);
    }

    #[test]
    fn each_blend_mode_maps_to_a_distinct_pair() {
        let modes = [
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
        ];
        let pairs: Vec<(u32, u32)> = modes.iter().map(|m| blend_func_pair(*m)).collect();
        for i in 0..pairs.len() {
            for j in (i + 1)..pairs.len() {
                assert_ne!(pairs[i], pairs[j]);
            }
        }
    }
}
