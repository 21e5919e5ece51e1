//! Application Orchestrator (spec.md §2, §5): owns the sync source,
//! layer manager, renderer, output manager and command queue, and drives
//! the per-frame pipeline: drain commands, update layers, render canvas,
//! blit outputs, present.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::config::display_config::DisplayConfiguration;
use crate::config::Settings;
use crate::display::multi_output_renderer::MultiOutputRenderer;
use crate::display::OutputRegion;
use crate::layer::display_properties::BlendMode;
use crate::layer::{LayerId, LayerManager};
use crate::osd::{OsdItem, OsdItemId, OsdManager};
use crate::output::capture::{CapturedFrame, FrameCapture};
use crate::output::OutputSinkManager;
use crate::remote::osc::OscServer;
use crate::remote::{CommandQueue, CommandRouter};
use crate::render::image::LayerTexture;
use crate::render::Renderer;
use crate::sync::SharedSyncSource;

/// Frame-pipeline stage names, used as `tracing` span names so a
/// `RUST_LOG=framesync_compositor=debug` run shows per-stage timing.
mod stages {
    pub const DRAIN_COMMANDS: &str = "drain_commands";
    pub const UPDATE_LAYERS: &str = "update_layers";
    pub const RENDER_CANVAS: &str = "render_canvas";
    pub const BLIT_OUTPUTS: &str = "blit_outputs";
    pub const PRESENT: &str = "present";
}

pub struct Application {
    settings: Settings,
    regions: Arc<Mutex<Vec<OutputRegion>>>,
    layers: Arc<Mutex<LayerManager>>,
    osd: Arc<Mutex<OsdManager>>,
    sync_source: SharedSyncSource,
    command_queue: CommandQueue,
    router: CommandRouter,
    /// `None` when binding `settings.osc_bind_address` fails (e.g. the
    /// port is already in use); the compositor still runs, reachable only
    /// through the stdin transport or a queue handle an embedder holds.
    osc: Option<OscServer>,
    sinks: OutputSinkManager,
    /// `None` until a GL/EGL context is bound to a real DRM/GBM surface;
    /// `connect_display` performs that bootstrap and fills both of these in.
    renderer: Option<Renderer>,
    multi_output: Option<MultiOutputRenderer>,
    textures: HashMap<LayerId, LayerTexture>,
    capture: FrameCapture,
    running: Arc<AtomicBool>,
    runtime_fps: Arc<AtomicU32>,
    global_offset: Arc<AtomicI64>,
}

impl Application {
    pub fn new(settings: Settings, display_config: DisplayConfiguration) -> Self {
        let regions = display_config.to_output_regions();
        let runtime_fps = settings.default_fps.max(1);
        let osc = match OscServer::bind(&settings.osc_bind_address) {
            Ok(server) => Some(server),
            Err(err) => {
                log::warn!("OSC transport disabled: {err:#}");
                None
            }
        };
        Self {
            regions: Arc::new(Mutex::new(regions)),
            layers: Arc::new(Mutex::new(LayerManager::new())),
            osd: Arc::new(Mutex::new(OsdManager::new())),
            sync_source: SharedSyncSource::new(Box::new(crate::sync::InternalClock::new(30.0))),
            command_queue: CommandQueue::new(),
            router: CommandRouter::new(),
            osc,
            sinks: OutputSinkManager::new(),
            renderer: None,
            multi_output: None,
            textures: HashMap::new(),
            capture: FrameCapture::new(),
            running: Arc::new(AtomicBool::new(true)),
            runtime_fps: Arc::new(AtomicU32::new(runtime_fps)),
            global_offset: Arc::new(AtomicI64::new(0)),
            settings,
        }
    }

    pub fn command_queue(&self) -> &CommandQueue {
        &self.command_queue
    }

    /// Binds a GL context to a DRM/GBM/EGL surface and constructs the
    /// renderer and multi-output presenter against it. Left unconnected
    /// (`renderer`/`multi_output` stay `None`) when running in a headless
    /// configuration, in which case `tick` still drains commands and
    /// advances layer playback but renders nothing.
    pub fn connect_display(&mut self, gl: std::sync::Arc<glow::Context>, drm: crate::display::drm::DrmOutputManager, atomic_supported: bool) -> Result<()> {
        self.renderer = Some(Renderer::new(gl).context("initializing GL renderer")?);
        self.multi_output = Some(MultiOutputRenderer::new(drm, atomic_supported));
        Ok(())
    }

    /// Registers every command in spec.md §6's surface. Per-layer commands
    /// resolve their leading argument as the target `LayerId` via
    /// `CommandRouter::route`; app-level commands (including `/layer/add`
    /// and `/layer/remove`, which need string/cue-id handling the generic
    /// layer dispatch doesn't support) take their args directly.
    fn register_default_commands(&mut self) {
        let running = self.running.clone();
        self.router.register_app_command("/quit", Box::new(move |_args| {
            running.store(false, Ordering::Relaxed);
        }));

        let runtime_fps = self.runtime_fps.clone();
        self.router.register_app_command(
            "/fps",
            Box::new(move |args| {
                if let Some(fps) = parse::<f64>(args, 0) {
                    runtime_fps.store(fps.max(1.0).round() as u32, Ordering::Relaxed);
                }
            }),
        );

        let global_offset = self.global_offset.clone();
        self.router.register_app_command(
            "/offset",
            Box::new(move |args| {
                if let Some(offset) = parse::<i64>(args, 0) {
                    global_offset.store(offset, Ordering::Relaxed);
                }
            }),
        );

        let layers = self.layers.clone();
        self.router.register_app_command(
            "/layer/add",
            Box::new(move |args| {
                let mut layers = layers.lock();
                let id = layers.add();
                if let Some(cue_id) = args.first() {
                    if !cue_id.is_empty() {
                        layers.set_cue_id(id, cue_id.clone());
                    }
                }
            }),
        );

        let layers = self.layers.clone();
        self.router.register_app_command(
            "/layer/remove",
            Box::new(move |args| {
                let Some(target) = args.first() else {
                    log::warn!("/layer/remove missing target argument");
                    return;
                };
                let mut layers = layers.lock();
                let removed = match target.parse::<LayerId>() {
                    Ok(id) => layers.remove(id).is_some(),
                    Err(_) => layers.remove_by_cue(target).is_some(),
                };
                if !removed {
                    log::warn!("/layer/remove: no layer matching \"{target}\"");
                }
            }),
        );

        register_master_commands(&mut self.router, self.layers.clone());
        register_osd_commands(&mut self.router, self.osd.clone());
        register_layer_commands(&mut self.router, self.layers.clone());
    }

    /// Runs the cooperative single-threaded main loop until a `/quit`
    /// command (or fatal error) stops it.
    pub fn run(&mut self) -> Result<()> {
        self.register_default_commands();

        while self.running.load(Ordering::Relaxed) {
            let tick_start = Instant::now();
            self.tick()?;

            let fps = self.runtime_fps.load(Ordering::Relaxed).max(1);
            let frame_period = Duration::from_secs_f64(1.0 / fps as f64);
            let elapsed = tick_start.elapsed();
            if elapsed < frame_period {
                std::thread::sleep(frame_period - elapsed);
            }
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        {
            let _span = tracing::debug_span!("tick", stage = stages::DRAIN_COMMANDS).entered();
            if let Some(osc) = &self.osc {
                osc.poll(&self.command_queue);
            }
            let (_processed, exhausted) = self.command_queue.drain(&self.router);
            if exhausted {
                log::warn!("command drain budget exhausted with commands still queued");
            }
        }

        {
            let _span = tracing::debug_span!("tick", stage = stages::UPDATE_LAYERS).entered();
            let mut state = self.sync_source.poll();
            state.frame_index += self.global_offset.load(Ordering::Relaxed);

            let mut layers = self.layers.lock();
            let mut finished = Vec::new();
            for layer in layers.iter_by_z_order_mut() {
                if let Some(frame) = layer.tick(&state) {
                    log::trace!("layer {} produced frame {}", layer.id, frame.source_frame_index);
                    match &frame.data {
                        crate::input::FrameData::Cpu { .. } => {
                            if let Some(renderer) = &mut self.renderer {
                                let existing = self.textures.remove(&layer.id);
                                match LayerTexture::upload_cpu(renderer.gl_context(), existing, &frame.data) {
                                    Ok(texture) => {
                                        self.textures.insert(layer.id, texture);
                                    }
                                    Err(err) => log::warn!("layer {}: texture upload failed: {err:#}", layer.id),
                                }
                            }
                        }
                        _ => {
                            // GPU-resident frames (VA-API surface / DMA-BUF) need an
                            // EGL import path wired through the shared display, not
                            // yet plumbed from this orchestrator into `LayerTexture`.
                            log::trace!("layer {}: zero-copy frame import not yet wired into the orchestrator", layer.id);
                        }
                    }
                }
                if layer.pending_removal {
                    finished.push(layer.id);
                }
            }
            for id in finished {
                layers.remove(id);
                self.textures.remove(&id);
            }
        }

        {
            let _span = tracing::debug_span!("tick", stage = stages::RENDER_CANVAS).entered();
            if let Some(renderer) = &mut self.renderer {
                let layers = self.layers.lock();
                let osd = self.osd.lock();
                let regions = self.regions.lock();
                renderer
                    .render_frame(&layers, &self.textures, &osd, &regions)
                    .context("rendering virtual canvas")?;
                drop((layers, osd));

                if !self.sinks.is_empty() || self.capture.is_enabled() {
                    self.capture.set_enabled(true);
                    if let Some((width, height, rgba)) = renderer.read_canvas_rgba() {
                        self.capture.request(CapturedFrame { width, height, rgba });
                    }
                }
            }
        }

        {
            let _span = tracing::debug_span!("tick", stage = stages::BLIT_OUTPUTS).entered();
            // Per-output blit happens inside `render_frame`/`present_frame`
            // above; this span exists so its cost is separately visible
            // from canvas composition when profiling with Tracy.
            if let Some(frame) = self.capture.poll() {
                self.sinks.broadcast(&frame);
            }
        }

        {
            let _span = tracing::debug_span!("tick", stage = stages::PRESENT).entered();
            if let Some(multi_output) = &mut self.multi_output {
                if self.renderer.is_some() {
                    let regions = self.regions.lock();
                    if let Err(err) = multi_output.present_frame(&regions) {
                        log::error!("presentation failed: {err:#}");
                    }
                }
                for event in multi_output.poll_hotplug() {
                    log::info!(
                        "hotplug: connector {:?} {}",
                        event.connector,
                        if event.connected { "connected" } else { "disconnected" }
                    );
                }
            }
        }

        Ok(())
    }

    pub fn request_quit(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn parse<T: std::str::FromStr>(args: &[String], idx: usize) -> Option<T> {
    args.get(idx)?.parse().ok()
}

fn parse_bool(args: &[String], idx: usize) -> Option<bool> {
    match args.get(idx)?.as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

fn parse_blend_mode(name: &str) -> Option<BlendMode> {
    match name.to_ascii_lowercase().as_str() {
        "normal" => Some(BlendMode::Normal),
        "multiply" => Some(BlendMode::Multiply),
        "screen" => Some(BlendMode::Screen),
        "overlay" => Some(BlendMode::Overlay),
        _ => None,
    }
}

/// `/master/*` applies a value to every layer's corresponding property
/// uniformly; there is no separate "master layer" object in this build
/// (spec.md §6 leaves the exact mechanism open — this is the resolution
/// recorded in DESIGN.md).
fn register_master_commands(router: &mut CommandRouter, layers: Arc<Mutex<LayerManager>>) {
    macro_rules! master_f32 {
        ($path:literal, $field:ident, $clamp:expr) => {
            let layers = layers.clone();
            router.register_app_command(
                $path,
                Box::new(move |args| {
                    if let Some(value) = parse::<f32>(args, 0) {
                        let value = $clamp(value);
                        for layer in layers.lock().iter_by_z_order_mut() {
                            layer.display.$field = value;
                        }
                    }
                }),
            );
        };
    }

    master_f32!("/master/opacity", opacity, |v: f32| v.clamp(0.0, 1.0));
    master_f32!("/master/rotation", rotation_degrees, |v: f32| v.clamp(0.0, 360.0));

    // brightness lives on `color_grade`, not `display`, so it needs its
    // own non-macro handler rather than the generic field-set above.
    let layers_brightness = layers.clone();
    router.register_app_command(
        "/master/brightness",
        Box::new(move |args| {
            if let Some(value) = parse::<f32>(args, 0) {
                let value = value.clamp(-1.0, 1.0);
                for layer in layers_brightness.lock().iter_by_z_order_mut() {
                    layer.display.color_grade.brightness = value;
                }
            }
        }),
    );

    let layers_scale = layers.clone();
    router.register_app_command(
        "/master/scale",
        Box::new(move |args| {
            if let (Some(sx), Some(sy)) = (parse::<f32>(args, 0), parse::<f32>(args, 1)) {
                for layer in layers_scale.lock().iter_by_z_order_mut() {
                    layer.display.scale_x = sx;
                    layer.display.scale_y = sy;
                }
            }
        }),
    );
}

fn register_osd_commands(router: &mut CommandRouter, osd: Arc<Mutex<OsdManager>>) {
    let osd_box = osd.clone();
    router.register_app_command(
        "/osd/box",
        Box::new(move |args| {
            let (Some(x), Some(y), Some(width), Some(height)) = (
                parse::<f32>(args, 0),
                parse::<f32>(args, 1),
                parse::<f32>(args, 2),
                parse::<f32>(args, 3),
            ) else {
                log::warn!("/osd/box requires x y width height");
                return;
            };
            let opacity = parse::<f32>(args, 4).unwrap_or(1.0).clamp(0.0, 1.0);
            osd_box.lock().add(OsdItem {
                id: OsdItemId(0),
                canvas_x: x,
                canvas_y: y,
                width,
                height,
                opacity,
                uv: Default::default(),
                z_order: 0,
            });
        }),
    );

    // `/osd/text` positions the same kind of placeholder quad as
    // `/osd/box`; turning the text string into pixels is the external
    // rasterizer's job (see `osd::OsdItem`'s doc comment).
    let osd_text = osd.clone();
    router.register_app_command(
        "/osd/text",
        Box::new(move |args| {
            let (Some(x), Some(y)) = (parse::<f32>(args, 1), parse::<f32>(args, 2)) else {
                log::warn!("/osd/text requires text x y");
                return;
            };
            osd_text.lock().add(OsdItem {
                id: OsdItemId(0),
                canvas_x: x,
                canvas_y: y,
                width: 200.0,
                height: 32.0,
                opacity: 1.0,
                uv: Default::default(),
                z_order: 100,
            });
        }),
    );

    // `OsdManager::add` assigns its own sequential id, so the singleton
    // frame-counter/timecode items must remember the id they were given
    // back rather than address themselves by a caller-chosen constant.
    let osd_frame = osd.clone();
    let frame_item_id: Arc<Mutex<Option<OsdItemId>>> = Arc::new(Mutex::new(None));
    router.register_app_command(
        "/osd/frame",
        Box::new(move |args| {
            let (Some(x), Some(y)) = (parse::<f32>(args, 0), parse::<f32>(args, 1)) else {
                return;
            };
            let mut osd = osd_frame.lock();
            let mut current = frame_item_id.lock();
            if let Some(id) = *current {
                osd.update_position(id, x, y);
            } else {
                *current = Some(osd.add(OsdItem {
                    id: OsdItemId(0),
                    canvas_x: x,
                    canvas_y: y,
                    width: 120.0,
                    height: 24.0,
                    opacity: 1.0,
                    uv: Default::default(),
                    z_order: 100,
                }));
            }
        }),
    );

    let osd_smpte = osd.clone();
    let smpte_item_id: Arc<Mutex<Option<OsdItemId>>> = Arc::new(Mutex::new(None));
    router.register_app_command(
        "/osd/smpte",
        Box::new(move |args| {
            let (Some(x), Some(y)) = (parse::<f32>(args, 0), parse::<f32>(args, 1)) else {
                return;
            };
            let mut osd = osd_smpte.lock();
            let mut current = smpte_item_id.lock();
            if let Some(id) = *current {
                osd.update_position(id, x, y);
            } else {
                *current = Some(osd.add(OsdItem {
                    id: OsdItemId(0),
                    canvas_x: x,
                    canvas_y: y,
                    width: 160.0,
                    height: 24.0,
                    opacity: 1.0,
                    uv: Default::default(),
                    z_order: 100,
                }));
            }
        }),
    );

    let osd_pos = osd.clone();
    router.register_app_command(
        "/osd/pos",
        Box::new(move |args| {
            if let (Some(id), Some(x), Some(y)) = (parse::<u32>(args, 0), parse::<f32>(args, 1), parse::<f32>(args, 2)) {
                osd_pos.lock().update_position(OsdItemId(id), x, y);
            }
        }),
    );

    let osd_clear = osd;
    router.register_app_command("/osd/clear", Box::new(move |_args| osd_clear.lock().clear()));
}

fn register_layer_commands(router: &mut CommandRouter, layers: Arc<Mutex<LayerManager>>) {
    macro_rules! with_layer {
        ($path:literal, |$layer:ident, $args:ident| $body:block) => {
            let layers = layers.clone();
            router.register_layer_command(
                $path,
                Box::new(move |id, $args| {
                    let mut layers = layers.lock();
                    let Some($layer) = layers.get_mut(id) else {
                        log::warn!("{} targets unknown layer {}", $path, id);
                        return;
                    };
                    $body
                }),
            );
        };
    }

    with_layer!("/layer/file", |layer, args| {
        let Some(path) = args.first() else {
            log::warn!("/layer/file missing path argument");
            return;
        };
        match crate::input::file::open(std::path::Path::new(path)) {
            Ok(source) => layer.source = Some(source),
            Err(err) => log::warn!("layer {}: opening {} failed: {err:#}", layer.id, path),
        }
    });

    with_layer!("/layer/play", |layer, _args| {
        layer.playing = true;
    });

    with_layer!("/layer/pause", |layer, _args| {
        layer.playing = false;
    });

    with_layer!("/layer/position", |layer, args| {
        if let (Some(x), Some(y)) = (parse::<f32>(args, 0), parse::<f32>(args, 1)) {
            layer.display.x = x;
            layer.display.y = y;
        }
    });

    with_layer!("/layer/opacity", |layer, args| {
        if let Some(value) = parse::<f32>(args, 0) {
            layer.display.opacity = value.clamp(0.0, 1.0);
        }
    });

    with_layer!("/layer/visible", |layer, args| {
        if let Some(value) = parse_bool(args, 0) {
            layer.display.visible = value;
        }
    });

    with_layer!("/layer/zorder", |layer, args| {
        if let Some(value) = parse::<i32>(args, 0) {
            layer.display.z_order = value;
        }
    });

    with_layer!("/layer/blendmode", |layer, args| {
        if let Some(mode) = args.first().and_then(|name| parse_blend_mode(name)) {
            layer.display.blend_mode = mode;
        }
    });

    with_layer!("/layer/scale", |layer, args| {
        if let (Some(sx), Some(sy)) = (parse::<f32>(args, 0), parse::<f32>(args, 1)) {
            layer.display.scale_x = sx;
            layer.display.scale_y = sy;
        }
    });

    with_layer!("/layer/rotation", |layer, args| {
        if let Some(value) = parse::<f32>(args, 0) {
            layer.display.rotation_degrees = value.clamp(0.0, 360.0);
        }
    });

    with_layer!("/layer/timescale", |layer, args| {
        if let Some(value) = parse::<f64>(args, 0) {
            layer.playback.time_scale = value;
        }
    });

    with_layer!("/layer/reverse", |layer, _args| {
        layer.playback.time_scale = -layer.playback.time_scale;
    });

    with_layer!("/layer/loop", |layer, args| {
        if let (Some(start), Some(end), Some(enabled)) =
            (parse::<i64>(args, 0), parse::<i64>(args, 1), parse_bool(args, 2))
        {
            layer.playback.loop_region.start = start;
            layer.playback.loop_region.end = end;
            layer.playback.loop_region.enabled = enabled;
        }
    });

    with_layer!("/layer/wraparound", |layer, args| {
        if let Some(value) = parse_bool(args, 0) {
            layer.playback.wraparound = value;
        }
    });

    with_layer!("/layer/mtcfollow", |layer, args| {
        if let Some(value) = parse_bool(args, 0) {
            layer.mtc_follow = value;
        }
    });

    with_layer!("/layer/pan", |layer, args| {
        if let Some(offset) = parse::<f32>(args, 0) {
            layer.display.set_pan_offset(offset);
        }
    });

    with_layer!("/layer/panorama", |layer, args| {
        if let Some(value) = parse_bool(args, 0) {
            layer.display.panorama_enabled = value;
        }
    });

    with_layer!("/layer/crop", |layer, args| {
        if let (Some(u0), Some(v0), Some(u1), Some(v1), Some(enabled)) = (
            parse::<f32>(args, 0),
            parse::<f32>(args, 1),
            parse::<f32>(args, 2),
            parse::<f32>(args, 3),
            parse_bool(args, 4),
        ) {
            layer.display.crop = crate::layer::display_properties::UvRect { u0, v0, u1, v1 };
            layer.display.crop_enabled = enabled;
        }
    });

    with_layer!("/layer/brightness", |layer, args| {
        if let Some(value) = parse::<f32>(args, 0) {
            layer.display.color_grade.brightness = value.clamp(-1.0, 1.0);
        }
    });

    with_layer!("/layer/contrast", |layer, args| {
        if let Some(value) = parse::<f32>(args, 0) {
            layer.display.color_grade.contrast = value;
        }
    });

    with_layer!("/layer/saturation", |layer, args| {
        if let Some(value) = parse::<f32>(args, 0) {
            layer.display.color_grade.saturation = value;
        }
    });

    with_layer!("/layer/hue", |layer, args| {
        if let Some(value) = parse::<f32>(args, 0) {
            layer.display.color_grade.hue_shift_degrees = value;
        }
    });

    with_layer!("/layer/gamma", |layer, args| {
        if let Some(value) = parse::<f32>(args, 0) {
            layer.display.color_grade.gamma = value.max(0.0001);
        }
    });

    with_layer!("/layer/corners", |layer, args| {
        layer.display.corner_deform_enabled = true;
        if let [Some(tlx), Some(tly), Some(trx), Some(try_), Some(blx), Some(bly), Some(brx), Some(bry)] = [
            parse::<f32>(args, 0),
            parse::<f32>(args, 1),
            parse::<f32>(args, 2),
            parse::<f32>(args, 3),
            parse::<f32>(args, 4),
            parse::<f32>(args, 5),
            parse::<f32>(args, 6),
            parse::<f32>(args, 7),
        ] {
            layer.display.corners.top_left = (tlx, tly);
            layer.display.corners.top_right = (trx, try_);
            layer.display.corners.bottom_left = (blx, bly);
            layer.display.corners.bottom_right = (brx, bry);
        }
    });

    for (path, setter) in [
        ("/layer/corner1", CornerSlot::TopLeft),
        ("/layer/corner2", CornerSlot::TopRight),
        ("/layer/corner3", CornerSlot::BottomLeft),
        ("/layer/corner4", CornerSlot::BottomRight),
    ] {
        let layers = layers.clone();
        router.register_layer_command(
            path,
            Box::new(move |id, args| {
                let (Some(x), Some(y)) = (parse::<f32>(args, 0), parse::<f32>(args, 1)) else {
                    return;
                };
                let mut layers = layers.lock();
                let Some(layer) = layers.get_mut(id) else {
                    return;
                };
                layer.display.corner_deform_enabled = true;
                match setter {
                    CornerSlot::TopLeft => layer.display.corners.top_left = (x, y),
                    CornerSlot::TopRight => layer.display.corners.top_right = (x, y),
                    CornerSlot::BottomLeft => layer.display.corners.bottom_left = (x, y),
                    CornerSlot::BottomRight => layer.display.corners.bottom_right = (x, y),
                }
            }),
        );
    }
}

#[derive(Clone, Copy)]
enum CornerSlot {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}
