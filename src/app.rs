//! Application state holding the wgpu graphics context
//!
//! Owns the pipeline components - camera, tracker, engine, overlay - and
//! orchestrates them once per frame: sample the latest camera frame, map the
//! latest hand result to an intensity, update the engine, and render the
//! composed output plus the control panel.

use std::sync::Arc;
use std::time::Instant;

use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::{CameraCapture, CameraInfo, FrameFeed};
use crate::effects::{EffectInfo, EffectRegistry};
use crate::engine::EffectEngine;
use crate::overlay::{OverlayRenderer, SkeletonCanvas};
use crate::tracking::onnx::OnnxHandDetector;
use crate::tracking::{mapper, HandTracker};

/// Effect selected at startup
const DEFAULT_EFFECT: &str = "wave";

/// Main application state
pub struct App {
    /// Reference to the window
    window: Arc<Window>,
    /// The wgpu surface for presenting rendered frames
    surface: wgpu::Surface<'static>,
    /// The wgpu device for creating GPU resources
    device: wgpu::Device,
    /// The command queue for submitting GPU work
    queue: wgpu::Queue,
    /// Surface configuration
    config: wgpu::SurfaceConfiguration,
    /// Current window size in physical pixels
    size: PhysicalSize<u32>,

    // Pipeline components
    camera: Option<Arc<CameraCapture>>,
    tracker: Option<HandTracker>,
    engine: EffectEngine,
    overlay_canvas: SkeletonCanvas,
    overlay: OverlayRenderer,
    overlay_enabled: bool,

    // Gesture-derived state
    base_intensity: f32,
    applied_intensity: f32,
    hand_position: (f32, f32),
    last_overlay_generation: u64,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    // Frame timing
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Create a new App instance with initialized wgpu context
    pub async fn new(window: Arc<Window>) -> Self {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .expect("Failed to create surface");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("Failed to find suitable GPU adapter");

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Gesture Effects Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .expect("Failed to create device");

        let surface_caps = surface.get_capabilities(&adapter);

        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        log::info!("Surface format: {:?}", surface_format);

        let present_mode = if surface_caps
            .present_modes
            .contains(&wgpu::PresentMode::Mailbox)
        {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };

        surface.configure(&device, &config);

        let registry = EffectRegistry::builtin();
        let base_intensity = registry
            .get(DEFAULT_EFFECT)
            .map(|e| e.info.default_intensity)
            .unwrap_or(1.0);
        let engine = EffectEngine::new(&device, registry, surface_format, DEFAULT_EFFECT);
        let overlay = OverlayRenderer::new(&device, surface_format);

        // Initialize egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let now = Instant::now();

        Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            camera: None,
            tracker: None,
            engine,
            overlay_canvas: SkeletonCanvas::new(),
            overlay,
            overlay_enabled: true,
            base_intensity,
            applied_intensity: 0.0,
            hand_position: (0.5, 0.5),
            last_overlay_generation: 0,
            egui_ctx,
            egui_state,
            egui_renderer,
            fps: 60.0,
            last_fps_update: now,
            frames_since_update: 0,
        }
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Get current size
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Connect to a camera and start hand tracking against it
    pub fn connect_camera(&mut self, camera_index: u32) {
        if self.camera.is_some() {
            return;
        }

        log::info!("Connecting to camera {}", camera_index);
        match CameraCapture::open(camera_index) {
            Ok(capture) => {
                self.camera = Some(Arc::new(capture));
                self.start_tracking();
            }
            Err(e) => {
                // Recoverable: the pipeline stays uninitialized
                log::error!("Failed to connect camera: {}", e);
            }
        }
    }

    /// Disconnect the camera, releasing GPU and hardware resources.
    /// Safe to call when nothing is connected.
    pub fn disconnect_camera(&mut self) {
        self.stop_tracking();
        if let Some(camera) = self.camera.take() {
            camera.stop();
        }
        self.engine.reset();
        log::info!("Camera disconnected");
    }

    /// Start the hand tracker against the connected camera
    pub fn start_tracking(&mut self) {
        if self.tracker.is_some() {
            return;
        }
        let Some(camera) = &self.camera else {
            return;
        };

        let detector = match OnnxHandDetector::load() {
            Ok(d) => Box::new(d),
            Err(e) => {
                log::warn!("Hand tracking unavailable: {}", e);
                return;
            }
        };

        let feed: Arc<dyn FrameFeed> = camera.clone();
        match HandTracker::start(feed, detector) {
            Ok(tracker) => self.tracker = Some(tracker),
            Err(e) => log::warn!("Failed to start hand tracker: {}", e),
        }
    }

    /// Stop the hand tracker and clear the overlay. Idempotent.
    pub fn stop_tracking(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.stop();
        }
        self.overlay_canvas.clear();
        self.overlay.teardown();
        self.last_overlay_generation = 0;
    }

    /// Select an effect by id
    pub fn select_effect(&mut self, id: &str) {
        self.engine.set_effect(id);
    }

    /// Select an effect by display position (keyboard shortcuts)
    pub fn select_effect_index(&mut self, index: usize) {
        let id = self.engine.registry().list().nth(index).map(|info| info.id);
        if let Some(id) = id {
            self.engine.set_effect(id);
        }
    }

    /// Toggle the skeleton overlay
    pub fn toggle_overlay(&mut self) {
        self.overlay_enabled = !self.overlay_enabled;
        log::info!("Overlay enabled: {}", self.overlay_enabled);
    }

    /// Per-frame update: gesture mapping, overlay redraw, engine tick
    pub fn update(&mut self) {
        let frame = self.camera.as_ref().and_then(|c| c.latest_frame());

        if let Some(tracker) = &self.tracker {
            let result = tracker.latest_result();
            self.hand_position = mapper::hand_position(&result);
            self.applied_intensity = mapper::effect_intensity(&result, self.base_intensity);

            // Redraw the overlay only when a new result was published
            let generation = tracker.generation();
            if generation != self.last_overlay_generation {
                if let Some(frame) = &frame {
                    self.overlay_canvas.sync_size(frame.width, frame.height);
                }
                self.overlay_canvas.draw(&result);
                self.overlay
                    .upload(&self.device, &self.queue, &self.overlay_canvas);
                self.last_overlay_generation = generation;
            }
        } else {
            // No gesture signal: the slider drives the effect directly
            self.hand_position = (0.5, 0.5);
            self.applied_intensity = self.base_intensity;
        }

        self.engine.set_intensity(self.applied_intensity);
        self.engine.update(&self.device, &self.queue, frame.as_ref());
    }

    /// Render a frame
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        self.engine.render(&mut encoder, &view);

        if self.overlay_enabled && self.tracker.is_some() {
            self.overlay.render(&mut encoder, &view);
        }

        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.update_fps();

        Ok(())
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        // Snapshot UI state before running egui
        let fps = self.fps;
        let camera_connected = self.camera.is_some();
        let camera_frame_count = self.camera.as_ref().map(|c| c.frame_count()).unwrap_or(0);
        let available_cameras: Vec<CameraInfo> = if camera_connected {
            Vec::new()
        } else {
            CameraCapture::list_cameras()
        };
        let effect_infos: Vec<EffectInfo> = self.engine.registry().list().copied().collect();
        let current_effect = self.engine.current_effect().map(|id| id.to_string());
        let engine_state = self.engine.state_name();
        let tracking_active = self.tracker.as_ref().map(|t| t.is_running()).unwrap_or(false);
        let hands_detected = self
            .tracker
            .as_ref()
            .map(|t| t.latest_result().hands.len())
            .unwrap_or(0);
        let hand_position = self.hand_position;
        let applied_intensity = self.applied_intensity;

        let mut base_intensity = self.base_intensity;
        let mut overlay_enabled = self.overlay_enabled;

        // Actions collected from the closure, applied afterwards
        let mut new_effect: Option<&'static str> = None;
        let mut connect_camera_index: Option<u32> = None;
        let mut disconnect_camera = false;

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label("Gesture Effects");
                    ui.separator();
                    ui.label(format!("FPS: {:.1}", fps));
                    ui.separator();
                    ui.label(format!("Pipeline: {}", engine_state));
                    if camera_connected {
                        ui.separator();
                        ui.label(format!("Camera frames: {}", camera_frame_count));
                    }
                });
            });

            egui::SidePanel::left("controls").show(ctx, |ui| {
                ui.heading("Camera");
                ui.separator();

                if camera_connected {
                    ui.label("Camera connected");
                    if ui.button("Disconnect (D)").clicked() {
                        disconnect_camera = true;
                    }
                } else if available_cameras.is_empty() {
                    ui.label("No cameras found");
                } else {
                    ui.label("Available cameras:");
                    for cam in &available_cameras {
                        if ui.button(format!("{}: {}", cam.index, cam.name)).clicked() {
                            connect_camera_index = Some(cam.index);
                        }
                    }
                }

                ui.separator();
                ui.heading("Effects");
                ui.separator();

                for (i, info) in effect_infos.iter().enumerate() {
                    let selected = current_effect.as_deref() == Some(info.id);
                    if ui
                        .selectable_label(selected, format!("{}. {}", i + 1, info.name))
                        .clicked()
                    {
                        new_effect = Some(info.id);
                    }
                }

                if let Some(info) = effect_infos
                    .iter()
                    .find(|info| current_effect.as_deref() == Some(info.id))
                {
                    ui.add_space(4.0);
                    ui.small(info.description);
                }

                ui.add_space(8.0);
                ui.add(
                    egui::Slider::new(&mut base_intensity, 0.0..=2.0)
                        .step_by(0.1)
                        .text("Intensity"),
                );

                ui.separator();
                ui.heading("Tracking");
                ui.separator();

                if tracking_active {
                    ui.label(format!("Hands: {}", hands_detected));
                    ui.label(format!(
                        "Position: ({:.2}, {:.2})",
                        hand_position.0, hand_position.1
                    ));
                    ui.label(format!("Applied intensity: {:.2}", applied_intensity));
                    ui.checkbox(&mut overlay_enabled, "Show skeleton (H)");
                } else if camera_connected {
                    ui.label("Tracker not running");
                } else {
                    ui.label("Connect a camera to start tracking");
                }
            });
        });

        // Apply UI actions
        if let Some(id) = new_effect {
            self.select_effect(id);
        }
        if let Some(idx) = connect_camera_index {
            self.connect_camera(idx);
        }
        if disconnect_camera {
            self.disconnect_camera();
        }
        self.base_intensity = base_intensity;
        self.overlay_enabled = overlay_enabled;

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let render_pass_static: &mut wgpu::RenderPass<'static> =
                unsafe { std::mem::transmute(&mut render_pass) };

            self.egui_renderer
                .render(render_pass_static, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }

    fn update_fps(&mut self) {
        self.frames_since_update += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}
