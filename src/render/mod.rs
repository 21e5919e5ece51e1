//! GL Renderer (spec.md §4.5): draws enabled layers, in z-order, into the
//! virtual canvas FBO, composites OSD items above them, then blits the
//! canvas into each output's own framebuffer.

pub mod blit;
pub mod canvas;
pub mod color;
pub mod geometry;
pub mod image;
pub mod shader;

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use glow::HasContext;

use crate::display::OutputRegion;
use crate::layer::{Layer, LayerId, LayerManager};
use crate::osd::OsdManager;
use canvas::{compute_canvas_bounds, CanvasSize};
use geometry::{layer_quad, vertices_as_bytes, Vertex, QUAD_INDICES};
use image::LayerTexture;
use shader::Program;

pub struct Canvas {
    pub fbo: glow::Framebuffer,
    pub color_texture: glow::Texture,
    pub size: CanvasSize,
}

/// An enabled output region's own offscreen render target: the canvas is
/// blitted (with warp/edge-blend applied) into this, sized to the
/// region's canvas-space footprint rather than the connector's real mode,
/// since wiring the result into the DRM scanout buffer is a further,
/// hardware-specific step (see `display::drm::DrmOutputManager`).
struct OutputTarget {
    fbo: glow::Framebuffer,
    color_texture: glow::Texture,
    size: CanvasSize,
}

pub struct Renderer {
    gl: std::sync::Arc<glow::Context>,
    layer_program: Program,
    blit_program: Program,
    osd_program: Program,
    canvas: Option<Canvas>,
    output_targets: HashMap<String, OutputTarget>,
    quad_vao: glow::VertexArray,
    quad_vbo: glow::Buffer,
    quad_ebo: glow::Buffer,
    /// 1x1 opaque-white fallback sampled by OSD draws until a real
    /// rasterizer wires a shared atlas in via `set_osd_atlas`.
    osd_atlas: glow::Texture,
}

impl Renderer {
    pub fn new(gl: std::sync::Arc<glow::Context>) -> Result<Self> {
        let layer_program = Program::link(&gl, shader::LAYER_VERTEX_SHADER, shader::LAYER_FRAGMENT_SHADER)
            .context("linking layer shader program")?;
        let blit_program = Program::link(&gl, shader::BLIT_VERTEX_SHADER, shader::BLIT_FRAGMENT_SHADER)
            .context("linking blit shader program")?;
        let osd_program = Program::link(&gl, shader::OSD_VERTEX_SHADER, shader::OSD_FRAGMENT_SHADER)
            .context("linking osd shader program")?;

        let (quad_vao, quad_vbo, quad_ebo) = unsafe { create_quad_geometry(&gl)? };
        let osd_atlas = unsafe { create_white_texture(&gl)? };

        Ok(Self {
            gl,
            layer_program,
            blit_program,
            osd_program,
            canvas: None,
            output_targets: HashMap::new(),
            quad_vao,
            quad_vbo,
            quad_ebo,
            osd_atlas,
        })
    }

    /// Replaces the OSD atlas texture sampled by every OSD item's UV rect.
    /// The rasterizer that produces this texture's contents is an external
    /// producer (spec.md §B); this crate only positions and composites it.
    pub fn set_osd_atlas(&mut self, atlas: glow::Texture) {
        self.osd_atlas = atlas;
    }

    /// Exposes the shared GL context for callers that need to upload
    /// textures outside a `render_frame` call, e.g. decoding a freshly
    /// requested layer frame as soon as it arrives rather than waiting for
    /// the next render pass to discover it.
    pub fn gl_context(&self) -> &glow::Context {
        &self.gl
    }

    /// (Re)allocates the canvas FBO if the bounding box of enabled output
    /// regions has changed since the last frame.
    fn ensure_canvas(&mut self, regions: &[OutputRegion]) -> Result<Option<&Canvas>> {
        let Some(size) = compute_canvas_bounds(regions) else {
            self.canvas = None;
            return Ok(None);
        };

        if let Some(canvas) = &self.canvas {
            if canvas.size == size {
                return Ok(self.canvas.as_ref());
            }
        }

        let gl = &self.gl;
        unsafe {
            let color_texture = alloc_rgba_texture(gl, size.width, size.height)?;

            let fbo = gl.create_framebuffer().map_err(|e| anyhow!("create_framebuffer: {e}"))?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(color_texture),
                0,
            );
            if gl.check_framebuffer_status(glow::FRAMEBUFFER) != glow::FRAMEBUFFER_COMPLETE {
                return Err(anyhow!("virtual canvas framebuffer incomplete"));
            }

            self.canvas = Some(Canvas {
                fbo,
                color_texture,
                size,
            });
        }

        Ok(self.canvas.as_ref())
    }

    fn ensure_output_target(&mut self, region: &OutputRegion) -> Result<&OutputTarget> {
        let size = CanvasSize {
            width: region.canvas_width.max(1),
            height: region.canvas_height.max(1),
        };
        let needs_alloc = match self.output_targets.get(&region.name) {
            Some(target) => target.size != size,
            None => true,
        };
        if needs_alloc {
            let gl = &self.gl;
            unsafe {
                let color_texture = alloc_rgba_texture(gl, size.width, size.height)?;
                let fbo = gl.create_framebuffer().map_err(|e| anyhow!("create_framebuffer: {e}"))?;
                gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
                gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    glow::COLOR_ATTACHMENT0,
                    glow::TEXTURE_2D,
                    Some(color_texture),
                    0,
                );
                if gl.check_framebuffer_status(glow::FRAMEBUFFER) != glow::FRAMEBUFFER_COMPLETE {
                    return Err(anyhow!("output \"{}\" framebuffer incomplete", region.name));
                }
                self.output_targets.insert(
                    region.name.clone(),
                    OutputTarget {
                        fbo,
                        color_texture,
                        size,
                    },
                );
            }
        }
        Ok(self.output_targets.get(&region.name).expect("just inserted"))
    }

    /// Renders every visible layer, bottom to top, into the virtual
    /// canvas, composites OSD items above them, then blits the canvas
    /// into each enabled output region's own framebuffer.
    pub fn render_frame(
        &mut self,
        layers: &LayerManager,
        textures: &HashMap<LayerId, LayerTexture>,
        osd: &OsdManager,
        regions: &[OutputRegion],
    ) -> Result<()> {
        let Some(canvas) = self.ensure_canvas(regions)?.map(|c| (c.fbo, c.color_texture, c.size)) else {
            return Ok(());
        };
        let (fbo, canvas_texture, size) = canvas;

        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.viewport(0, 0, size.width as i32, size.height as i32);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);
            gl.enable(glow::BLEND);
            gl.bind_vertex_array(Some(self.quad_vao));

            gl.use_program(Some(self.layer_program.handle));
            for layer in layers.iter_by_z_order() {
                if !layer.display.visible || layer.display.opacity <= 0.0 {
                    continue;
                }
                let Some(texture) = textures.get(&layer.id) else {
                    continue;
                };
                self.draw_layer(layer, texture, size);
            }

            gl.use_program(Some(self.osd_program.handle));
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            for item in osd.iter_by_z_order() {
                self.draw_osd_item(item, size);
            }

            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }

        for region in regions.iter().filter(|r| r.enabled) {
            self.blit_region(region, canvas_texture, size)?;
        }

        Ok(())
    }

    /// Uploads this layer's quad geometry and GL state (spec.md §4.5 steps
    /// 1-5: model matrix, crop/panorama UV, color-grade uniforms) and
    /// issues the draw call.
    fn draw_layer(&self, layer: &Layer, texture: &LayerTexture, canvas_size: CanvasSize) {
        let gl = &self.gl;
        let (src_factor, dst_factor) = shader::blend_func_pair(layer.display.blend_mode);

        let corners = layer
            .display
            .corner_deform_enabled
            .then_some(layer.display.corners);
        let uv = layer.display.effective_uv();
        let quad = layer_quad(layer.display.width, layer.display.height, uv, corners);

        let projection = shader::ortho_projection(canvas_size.width as f32, canvas_size.height as f32);
        let model = shader::model_matrix(&layer.display);

        unsafe {
            gl.blend_func(src_factor, dst_factor);
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.quad_vbo));
            gl.buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, 0, vertices_as_bytes(&quad));

            if let Some(loc) = gl.get_uniform_location(self.layer_program.handle, "u_projection") {
                gl.uniform_matrix_4_f32_slice(Some(&loc), false, &projection);
            }
            if let Some(loc) = gl.get_uniform_location(self.layer_program.handle, "u_model") {
                gl.uniform_matrix_4_f32_slice(Some(&loc), false, &model);
            }

            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(texture.y));
            if let Some(loc) = gl.get_uniform_location(self.layer_program.handle, "u_y_plane") {
                gl.uniform_1_i32(Some(&loc), 0);
            }
            gl.active_texture(glow::TEXTURE1);
            gl.bind_texture(glow::TEXTURE_2D, Some(texture.uv));
            if let Some(loc) = gl.get_uniform_location(self.layer_program.handle, "u_uv_plane") {
                gl.uniform_1_i32(Some(&loc), 1);
            }

            set_f32_uniform(gl, self.layer_program.handle, "u_opacity", layer.display.opacity);
            let grade = &layer.display.color_grade;
            set_f32_uniform(gl, self.layer_program.handle, "u_brightness", grade.brightness);
            set_f32_uniform(gl, self.layer_program.handle, "u_contrast", grade.contrast);
            set_f32_uniform(gl, self.layer_program.handle, "u_saturation", grade.saturation);
            set_f32_uniform(gl, self.layer_program.handle, "u_hue_shift", grade.hue_shift_degrees);
            set_f32_uniform(gl, self.layer_program.handle, "u_gamma", grade.gamma);

            gl.draw_elements(glow::TRIANGLES, QUAD_INDICES.len() as i32, glow::UNSIGNED_SHORT, 0);
        }
    }

    fn draw_osd_item(&self, item: &crate::osd::OsdItem, canvas_size: CanvasSize) {
        let gl = &self.gl;
        let quad = layer_quad(item.width, item.height, item.uv, None);
        let mut positioned = quad;
        for vertex in &mut positioned {
            vertex.position[0] += item.canvas_x;
            vertex.position[1] += item.canvas_y;
        }
        let projection = shader::ortho_projection(canvas_size.width as f32, canvas_size.height as f32);

        unsafe {
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.quad_vbo));
            gl.buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, 0, vertices_as_bytes(&positioned));

            if let Some(loc) = gl.get_uniform_location(self.osd_program.handle, "u_projection") {
                gl.uniform_matrix_4_f32_slice(Some(&loc), false, &projection);
            }
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(self.osd_atlas));
            if let Some(loc) = gl.get_uniform_location(self.osd_program.handle, "u_atlas") {
                gl.uniform_1_i32(Some(&loc), 0);
            }
            set_f32_uniform(gl, self.osd_program.handle, "u_opacity", item.opacity);

            gl.draw_elements(glow::TRIANGLES, QUAD_INDICES.len() as i32, glow::UNSIGNED_SHORT, 0);
        }
    }

    /// Blits the virtual canvas into `region`'s own offscreen target,
    /// applying warp displacement and edge-blend (spec.md §4.7).
    fn blit_region(&mut self, region: &OutputRegion, canvas_texture: glow::Texture, canvas_size: CanvasSize) -> Result<()> {
        let canvas_uv = region.canvas_uv(canvas_size.width, canvas_size.height);
        let target = self.ensure_output_target(region)?;
        let (fbo, size) = (target.fbo, target.size);

        let vertices = [
            Vertex { position: [-1.0, -1.0], uv: [canvas_uv.u0, canvas_uv.v1] },
            Vertex { position: [1.0, -1.0], uv: [canvas_uv.u1, canvas_uv.v1] },
            Vertex { position: [1.0, 1.0], uv: [canvas_uv.u1, canvas_uv.v0] },
            Vertex { position: [-1.0, 1.0], uv: [canvas_uv.u0, canvas_uv.v0] },
        ];

        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.viewport(0, 0, size.width as i32, size.height as i32);
            gl.disable(glow::BLEND);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);

            gl.use_program(Some(self.blit_program.handle));
            gl.bind_vertex_array(Some(self.quad_vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.quad_vbo));
            gl.buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, 0, vertices_as_bytes(&vertices));

            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(canvas_texture));
            if let Some(loc) = gl.get_uniform_location(self.blit_program.handle, "u_canvas") {
                gl.uniform_1_i32(Some(&loc), 0);
            }

            let warp_enabled = region.warp.is_some();
            if let Some(loc) = gl.get_uniform_location(self.blit_program.handle, "u_warp_enabled") {
                gl.uniform_1_i32(Some(&loc), warp_enabled as i32);
            }

            if let Some(loc) = gl.get_uniform_location(self.blit_program.handle, "u_output_size") {
                gl.uniform_2_f32(Some(&loc), size.width as f32, size.height as f32);
            }
            let blend = &region.edge_blend;
            if let Some(loc) = gl.get_uniform_location(self.blit_program.handle, "u_blend_widths") {
                gl.uniform_4_f32(Some(&loc), blend.left, blend.right, blend.top, blend.bottom);
            }
            set_f32_uniform(gl, self.blit_program.handle, "u_blend_gamma", blend.gamma);

            gl.draw_elements(glow::TRIANGLES, QUAD_INDICES.len() as i32, glow::UNSIGNED_SHORT, 0);
            gl.enable(glow::BLEND);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }

        Ok(())
    }

    /// Reads the virtual canvas back into host memory for non-DRM output
    /// sinks (spec.md §B). `None` when nothing has been rendered yet.
    pub fn read_canvas_rgba(&self) -> Option<(u32, u32, Vec<u8>)> {
        let canvas = self.canvas.as_ref()?;
        let gl = &self.gl;
        let mut buf = vec![0u8; (canvas.size.width as usize) * (canvas.size.height as usize) * 4];
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(canvas.fbo));
            gl.read_pixels(
                0,
                0,
                canvas.size.width as i32,
                canvas.size.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(&mut buf)),
            );
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        Some((canvas.size.width, canvas.size.height, buf))
    }
}

unsafe fn set_f32_uniform(gl: &glow::Context, program: glow::Program, name: &str, value: f32) {
    if let Some(loc) = gl.get_uniform_location(program, name) {
        gl.uniform_1_f32(Some(&loc), value);
    }
}

unsafe fn alloc_rgba_texture(gl: &glow::Context, width: u32, height: u32) -> Result<glow::Texture> {
    let texture = gl.create_texture().map_err(|e| anyhow!("create_texture: {e}"))?;
    gl.bind_texture(glow::TEXTURE_2D, Some(texture));
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        glow::RGBA8 as i32,
        width as i32,
        height as i32,
        0,
        glow::RGBA,
        glow::UNSIGNED_BYTE,
        glow::PixelUnpackData::Slice(None),
    );
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
    Ok(texture)
}

unsafe fn create_white_texture(gl: &glow::Context) -> Result<glow::Texture> {
    let texture = gl.create_texture().map_err(|e| anyhow!("create_texture: {e}"))?;
    gl.bind_texture(glow::TEXTURE_2D, Some(texture));
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        glow::RGBA8 as i32,
        1,
        1,
        0,
        glow::RGBA,
        glow::UNSIGNED_BYTE,
        glow::PixelUnpackData::Slice(Some(&[255u8, 255, 255, 255])),
    );
    Ok(texture)
}

/// One shared VAO/VBO/EBO for every quad draw call (layers, OSD items,
/// output blits): geometry differs per draw but the 4-vertex/6-index
/// layout never does, so the buffer is re-uploaded in place each time
/// rather than allocated per draw.
unsafe fn create_quad_geometry(gl: &glow::Context) -> Result<(glow::VertexArray, glow::Buffer, glow::Buffer)> {
    let vao = gl.create_vertex_array().map_err(|e| anyhow!("create_vertex_array: {e}"))?;
    let vbo = gl.create_buffer().map_err(|e| anyhow!("create_buffer: {e}"))?;
    let ebo = gl.create_buffer().map_err(|e| anyhow!("create_buffer: {e}"))?;

    gl.bind_vertex_array(Some(vao));

    gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
    gl.buffer_data_size(
        glow::ARRAY_BUFFER,
        (4 * std::mem::size_of::<Vertex>()) as i32,
        glow::DYNAMIC_DRAW,
    );

    let stride = std::mem::size_of::<Vertex>() as i32;
    gl.enable_vertex_attrib_array(0);
    gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, stride, 0);
    gl.enable_vertex_attrib_array(1);
    gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, stride, 2 * std::mem::size_of::<f32>() as i32);

    gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo));
    gl.buffer_data_u8_slice(glow::ELEMENT_ARRAY_BUFFER, bytemuck::cast_slice(&QUAD_INDICES), glow::STATIC_DRAW);

    gl.bind_vertex_array(None);

    Ok((vao, vbo, ebo))
}
