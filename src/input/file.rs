//! File-backed input source: demuxes with `ffmpeg-next` and decodes on
//! demand, seeking when the requested frame departs from the decode
//! cursor by more than a few frames.
//!
//! `open` probes the stream's codec and picks a decode backend per
//! spec.md §4.3: VA-API when the codec is one `cros_codecs` can decode
//! through hardware and a render node is present, software otherwise.

use std::path::Path;

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::vaapi::{self, VaapiInputSource};
use super::{FrameData, InputSource, LatestFrameSlot, VideoFrame};

const SEEK_THRESHOLD_FRAMES: i64 = 4;

/// Codec classes `cros-codecs` can decode through VA-API in this build.
fn is_vaapi_eligible(codec: ffmpeg::codec::Id) -> bool {
    matches!(
        codec,
        ffmpeg::codec::Id::H264 | ffmpeg::codec::Id::HEVC | ffmpeg::codec::Id::AV1
    )
}

fn vaapi_render_node_available() -> bool {
    Path::new(vaapi::RENDER_NODE).exists()
}

/// Opens `path`, returning a VA-API-backed source when the codec and
/// hardware support it and a software-decoded `FileInputSource` otherwise.
/// Only H.264 has a concrete `cros_codecs` decoder type wired here; HEVC/AV1
/// streams are still detected by `is_vaapi_eligible` but fall back to
/// software until those decoder type parameters are added.
pub fn open(path: &Path) -> Result<Box<dyn InputSource>> {
    let probe = ffmpeg::format::input(&path)
        .with_context(|| format!("probing video file {}", path.display()))?;
    let codec_id = probe
        .streams()
        .best(ffmpeg::media::Type::Video)
        .context("no video stream found")?
        .parameters()
        .id();
    drop(probe);

    if codec_id == ffmpeg::codec::Id::H264 && is_vaapi_eligible(codec_id) && vaapi_render_node_available() {
        match VaapiInputSource::open(path) {
            Ok(source) => return Ok(Box::new(source)),
            Err(err) => {
                log::warn!(
                    "{}: falling back to software decode, VA-API open failed: {:#}",
                    path.display(),
                    err
                );
            }
        }
    }

    Ok(Box::new(FileInputSource::open(path)?))
}

pub struct FileInputSource {
    path: std::path::PathBuf,
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::codec::decoder::Video,
    stream_index: usize,
    native_fps: f64,
    frame_count: i64,
    decode_cursor: i64,
    force_reseek: bool,
    slot: LatestFrameSlot,
}

impl FileInputSource {
    pub fn open(path: &Path) -> Result<Self> {
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("opening video file {}", path.display()))?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("no video stream found")?;
        let stream_index = stream.index();

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("building decoder context from stream parameters")?;
        let decoder = context.decoder().video().context("opening video decoder")?;

        let rate = stream.avg_frame_rate();
        let native_fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            30.0
        };
        let frame_count = stream.frames().max(0);

        Ok(Self {
            path: path.to_path_buf(),
            input,
            decoder,
            stream_index,
            native_fps,
            frame_count,
            decode_cursor: -1,
            force_reseek: false,
            slot: LatestFrameSlot::new(),
        })
    }

    fn seek_to(&mut self, source_frame: i64) -> Result<()> {
        let timestamp = (source_frame as f64 / self.native_fps.max(1.0)
            * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
        self.input
            .seek(timestamp, ..timestamp)
            .with_context(|| format!("seeking {} to frame {}", self.path.display(), source_frame))?;
        self.decoder.flush();
        self.decode_cursor = -1;
        Ok(())
    }

    fn decode_forward_to(&mut self, source_frame: i64) -> Result<()> {
        let mut decoded = ffmpeg::frame::Video::empty();
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                self.decode_cursor += 1;
                if self.decode_cursor >= source_frame {
                    self.publish(&decoded);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn publish(&self, frame: &ffmpeg::frame::Video) {
        let width = frame.width();
        let height = frame.height();
        let y_plane = frame.data(0).to_vec();
        let y_stride = frame.stride(0) as u32;
        let uv_plane = if frame.planes() > 1 {
            frame.data(1).to_vec()
        } else {
            Vec::new()
        };
        let uv_stride = if frame.planes() > 1 {
            frame.stride(1) as u32
        } else {
            0
        };
        self.slot.write(VideoFrame {
            source_frame_index: self.decode_cursor,
            data: FrameData::Cpu {
                width,
                height,
                y_plane,
                y_stride,
                uv_plane,
                uv_stride,
            },
        });
    }
}

impl InputSource for FileInputSource {
    fn request_frame(&mut self, source_frame: i64) {
        let delta = source_frame - self.decode_cursor;
        let result = if self.force_reseek || delta < 0 || delta > SEEK_THRESHOLD_FRAMES {
            self.force_reseek = false;
            self.seek_to(source_frame).and_then(|_| self.decode_forward_to(source_frame))
        } else if delta > 0 {
            self.decode_forward_to(source_frame)
        } else {
            Ok(())
        };
        if let Err(err) = result {
            log::warn!("{}: decode error at frame {}: {:#}", self.path.display(), source_frame, err);
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
