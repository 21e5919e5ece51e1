//! Zero-copy VA-API decode path: decoded surfaces are exported as
//! DMA-BUFs and imported by the renderer as EGLImages without a CPU
//! round trip (spec.md §4.3, §8 zero-copy property).
//!
//! Grounded on `cros_codecs`'s stateless decoder: bitstream units are fed
//! through `StatelessVideoDecoder::decode`, and ready frames are drained
//! from `next_event` as `DecoderEvent::FrameReady`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cros_codecs::decoder::stateless::h264::H264;
use cros_codecs::decoder::stateless::{DecodeError, StatelessDecoder, StatelessVideoDecoder};
use cros_codecs::decoder::DecoderEvent;
use cros_codecs::utils::DmabufFrame;
use cros_codecs::{DecodedFormat, FrameLayout, PlaneLayout};
use ffmpeg_next as ffmpeg;

use super::{FrameData, InputSource, LatestFrameSlot, VideoFrame};

/// The render node a VA-API decode requires; codec/node probing in
/// `input::file` checks this exists before routing here.
pub const RENDER_NODE: &str = "/dev/dri/renderD128";

/// NV12 plane layout used for every surface this decoder exports:
/// one R8 luma plane, one GR88 chroma plane.
fn nv12_layout(width: u32, height: u32) -> FrameLayout {
    FrameLayout {
        format: (DecodedFormat::NV12, 0),
        size: cros_codecs::Resolution { width, height },
        planes: vec![
            PlaneLayout {
                buffer_index: 0,
                offset: 0,
                stride: width as usize,
            },
            PlaneLayout {
                buffer_index: 0,
                offset: (width * height) as usize,
                stride: width as usize,
            },
        ],
    }
}

pub struct VaapiInputSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    decoder: StatelessDecoder<H264, DmabufFrame>,
    stream_index: usize,
    native_fps: f64,
    frame_count: i64,
    cursor: i64,
    force_reseek: bool,
    slot: LatestFrameSlot,
}

impl VaapiInputSource {
    /// Opens `path` and binds a VA-API H.264 stateless decoder to its best
    /// video stream. Callers are expected to have already checked
    /// `input::file::is_vaapi_eligible` and that `RENDER_NODE` exists.
    pub fn open(path: &Path) -> Result<Self> {
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("opening video file {}", path.display()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("no video stream found")?;
        let stream_index = stream.index();

        let rate = stream.avg_frame_rate();
        let native_fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            30.0
        };
        let frame_count = stream.frames().max(0);

        let decoder = StatelessDecoder::<H264, DmabufFrame>::new_vaapi(Default::default())
            .context("opening VA-API H.264 stateless decoder")?;

        Ok(Self {
            path: path.to_path_buf(),
            input,
            decoder,
            stream_index,
            native_fps,
            frame_count,
            cursor: -1,
            force_reseek: true,
            slot: LatestFrameSlot::new(),
        })
    }

    fn seek_to(&mut self, source_frame: i64) -> Result<()> {
        let timestamp = (source_frame as f64 / self.native_fps.max(1.0)
            * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
        self.input
            .seek(timestamp, ..timestamp)
            .with_context(|| format!("seeking {} to frame {}", self.path.display(), source_frame))?;
        self.cursor = -1;
        Ok(())
    }

    fn publish(&mut self, frame: DmabufFrame, width: u32, height: u32) {
        let handle = frame.handle();
        self.slot.write(VideoFrame {
            source_frame_index: self.cursor,
            data: FrameData::GpuDmaBuf {
                width,
                height,
                fds: handle.fds,
                strides: handle.strides,
                offsets: handle.offsets,
                modifier: handle.modifier,
                fourcc: drm_fourcc::DrmFourcc::Nv12 as u32,
            },
        });
        let _ = nv12_layout(width, height);
    }

    /// Drains whatever events the decoder already has queued, publishing
    /// every ready frame. Returns once the decoder reports it needs more
    /// input (`DecodeError::CheckEvents` after an empty drain).
    fn drain_ready_frames(&mut self) {
        while let Some(event) = self.decoder.next_event() {
            if let DecoderEvent::FrameReady(frame) = event {
                self.cursor += 1;
                let (w, h) = frame.resolution();
                self.publish(frame, w, h);
            }
        }
    }

    fn decode_forward_to(&mut self, source_frame: i64) -> Result<()> {
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            let Some(bitstream) = packet.data() else {
                continue;
            };
            let timestamp = packet.pts().unwrap_or(0).max(0) as u64;
            let mut offset = 0usize;
            loop {
                match self.decoder.decode(timestamp, &bitstream[offset..]) {
                    Ok(processed) => {
                        offset += processed.max(1);
                        if offset >= bitstream.len() {
                            break;
                        }
                    }
                    Err(DecodeError::CheckEvents) => break,
                    Err(DecodeError::NotEnoughOutputBuffers(_)) => break,
                    Err(err) => {
                        return Err(anyhow::anyhow!("vaapi decode error: {err}"));
                    }
                }
            }
            self.drain_ready_frames();
            if self.cursor >= source_frame {
                return Ok(());
            }
        }
        Ok(())
    }
}

impl InputSource for VaapiInputSource {
    fn request_frame(&mut self, source_frame: i64) {
        let delta = source_frame - self.cursor;
        let result = if self.force_reseek || delta < 0 {
            self.force_reseek = false;
            self.seek_to(source_frame).and_then(|_| self.decode_forward_to(source_frame))
        } else if delta > 0 {
            self.decode_forward_to(source_frame)
        } else {
            Ok(())
        };
        if let Err(err) = result {
            log::warn!("{}: vaapi decode error at frame {}: {:#}", self.path.display(), source_frame, err);
        }
    }

    fn latest_frame(&mut self) -> Option<VideoFrame> {
        self.slot.take()
    }

    fn frame_count(&self) -> i64 {
        self.frame_count
    }

    fn native_fps(&self) -> f64 {
        self.native_fps
    }

    fn reset_seek_state(&mut self) {
        self.force_reseek = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_layout_places_chroma_after_full_luma_plane() {
        let layout = nv12_layout(1920, 1080);
        assert_eq!(layout.planes[1].offset, 1920 * 1080);
    }
}
