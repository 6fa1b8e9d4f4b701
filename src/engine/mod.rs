//! Shader composition engine
//!
//! Owns the GPU side of the effect pipeline: the source texture backed by
//! the camera feed, the material (pipeline + uniforms + bindings) built from
//! the selected effect, and the per-frame uniform updates. Exactly one
//! component creates, binds, and releases these resources, driven by an
//! explicit state machine:
//!
//! `Uninitialized` (no decoded frame yet) -> `TextureReady` (source texture
//! exists) -> `Active` (material bound, uniforms updating every frame).
//!
//! Time uniform policy: wall-clock seconds since engine start. There is no
//! gesture-scaled time accumulator; the two policies are never mixed.

use std::time::Instant;

use bytemuck::{Pod, Zeroable};

use crate::camera::CameraFrame;
use crate::effects::{Effect, EffectRegistry};

/// Uniform block shared by every effect shader
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct EffectUniforms {
    /// Seconds since engine start
    pub time: f32,
    /// Current effect intensity
    pub intensity: f32,
    pub _pad: [f32; 2],
}

/// CPU-side effect selection.
///
/// `set_effect` requests are queued here and resolved against the registry
/// on the next frame tick. Unknown ids are dropped with the current
/// selection preserved, and re-selecting the current effect is a no-op, so
/// a material rebuild happens only on an actual switch.
#[derive(Debug, Default)]
pub struct EffectSelection {
    current: Option<String>,
    pending: Option<String>,
}

impl EffectSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a switch request. Fire-and-forget; applied on the next tick.
    pub fn request(&mut self, id: &str) {
        self.pending = Some(id.to_string());
    }

    /// Resolve the queued request. Returns the id to build a material for,
    /// or `None` when nothing needs to change.
    pub fn resolve(&mut self, registry: &EffectRegistry) -> Option<String> {
        let pending = self.pending.take()?;
        if !registry.contains(&pending) {
            log::warn!("Unknown effect '{}', keeping current selection", pending);
            return None;
        }
        if self.current.as_deref() == Some(pending.as_str()) {
            return None;
        }
        Some(pending)
    }

    /// Record a completed switch.
    pub fn commit(&mut self, id: String) {
        self.current = Some(id);
    }

    /// Currently bound effect id, if any.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Forget the bound material but keep the selection queued, so the same
    /// effect is rebuilt after the engine is re-initialized.
    pub fn invalidate(&mut self) {
        if let Some(current) = self.current.take() {
            if self.pending.is_none() {
                self.pending = Some(current);
            }
        }
    }
}

/// GPU texture backed by the camera feed
struct SourceTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    /// Camera frame number last uploaded, for idempotent per-frame updates
    last_frame: u64,
}

/// A bound effect: pipeline, uniform buffer, and texture bindings
struct Material {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    params_buffer: wgpu::Buffer,
}

/// Engine state machine
enum EngineState {
    Uninitialized,
    TextureReady { source: SourceTexture },
    Active { source: SourceTexture, material: Material },
}

impl EngineState {
    fn name(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "Uninitialized",
            EngineState::TextureReady { .. } => "TextureReady",
            EngineState::Active { .. } => "Active",
        }
    }
}

/// The shader composition engine
pub struct EffectEngine {
    registry: EffectRegistry,
    state: EngineState,
    selection: EffectSelection,
    intensity: f32,
    started: Instant,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    output_format: wgpu::TextureFormat,
}

impl EffectEngine {
    pub fn new(
        device: &wgpu::Device,
        registry: EffectRegistry,
        output_format: wgpu::TextureFormat,
        initial_effect: &str,
    ) -> Self {
        // One layout for every material; effects that ignore a binding are
        // still compatible with it.
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Effect Bind Group Layout"),
            entries: &[
                // Source texture
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // Effect uniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Effect Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let mut selection = EffectSelection::new();
        selection.request(initial_effect);

        Self {
            registry,
            state: EngineState::Uninitialized,
            selection,
            intensity: 0.0,
            started: Instant::now(),
            bind_group_layout,
            sampler,
            output_format,
        }
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    /// Request an effect switch. Fire-and-forget, never blocks; takes effect
    /// on the next frame tick. Unknown ids leave the current effect running.
    pub fn set_effect(&mut self, id: &str) {
        self.selection.request(id);
    }

    /// Set the intensity written to the uniforms on the next frame tick.
    pub fn set_intensity(&mut self, value: f32) {
        self.intensity = value;
    }

    pub fn current_effect(&self) -> Option<&str> {
        self.selection.current()
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Per-frame update: ingest the latest camera frame, apply any queued
    /// effect switch, and refresh the uniforms. Safe to call multiple times
    /// within one logical frame - the texture upload is gated on the camera
    /// frame number and `time` is wall-clock, so nothing advances twice.
    pub fn update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame: Option<&CameraFrame>,
    ) {
        if let Some(frame) = frame {
            self.ingest_frame(device, queue, frame);
        }

        self.apply_pending(device);

        if let EngineState::Active { material, .. } = &self.state {
            let uniforms = EffectUniforms {
                time: self.started.elapsed().as_secs_f32(),
                intensity: self.intensity,
                _pad: [0.0; 2],
            };
            queue.write_buffer(&material.params_buffer, 0, bytemuck::bytes_of(&uniforms));
        }
    }

    /// Create or resize the source texture and upload new frame data.
    ///
    /// The first decoded frame is the readiness signal that moves the engine
    /// out of `Uninitialized`.
    fn ingest_frame(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, frame: &CameraFrame) {
        let needs_new_texture = match &self.state {
            EngineState::Uninitialized => true,
            EngineState::TextureReady { source } | EngineState::Active { source, .. } => {
                source.width != frame.width || source.height != frame.height
            }
        };

        if needs_new_texture {
            log::info!("Creating source texture: {}x{}", frame.width, frame.height);
            let source = Self::create_source_texture(device, frame.width, frame.height);

            let state = std::mem::replace(&mut self.state, EngineState::Uninitialized);
            self.state = match state {
                // First frame: the engine becomes TextureReady; a queued
                // effect switch promotes it to Active below.
                EngineState::Uninitialized => EngineState::TextureReady { source },
                EngineState::TextureReady { source: old } => {
                    old.texture.destroy();
                    EngineState::TextureReady { source }
                }
                // Resolution change while active: rebind the material to the
                // new texture, then release the old pair.
                EngineState::Active {
                    source: old,
                    material,
                } => {
                    let rebound = Material {
                        bind_group: Self::create_bind_group(
                            device,
                            &self.bind_group_layout,
                            &self.sampler,
                            &source.view,
                            &material.params_buffer,
                        ),
                        ..material
                    };
                    old.texture.destroy();
                    EngineState::Active {
                        source,
                        material: rebound,
                    }
                }
            };
        }

        // Upload at most once per camera frame
        let source = match &mut self.state {
            EngineState::Uninitialized => return,
            EngineState::TextureReady { source } | EngineState::Active { source, .. } => source,
        };
        if !needs_new_texture && frame.frame_number <= source.last_frame {
            return;
        }
        source.last_frame = frame.frame_number;

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Apply a queued effect switch, in strict order: look up the effect,
    /// build the new material against the current texture, swap it in, and
    /// only then release the old one. No frame ever observes two live
    /// materials or a disposed one.
    fn apply_pending(&mut self, device: &wgpu::Device) {
        // Without a source texture there is nothing to bind; the request
        // stays queued until the first frame arrives.
        if matches!(self.state, EngineState::Uninitialized) {
            return;
        }

        let Some(id) = self.selection.resolve(&self.registry) else {
            return;
        };
        let Some(effect) = self.registry.get(&id) else {
            return;
        };

        let state = std::mem::replace(&mut self.state, EngineState::Uninitialized);
        let (source, old_material) = match state {
            EngineState::TextureReady { source } => (source, None),
            EngineState::Active { source, material } => (source, Some(material)),
            EngineState::Uninitialized => unreachable!("checked above"),
        };

        let material = self.build_material(device, effect, &source.view);
        self.state = EngineState::Active { source, material };
        self.selection.commit(id);

        // The swap is complete; the previous material is released here.
        drop(old_material);
    }

    fn build_material(
        &self,
        device: &wgpu::Device,
        effect: &Effect,
        source_view: &wgpu::TextureView,
    ) -> Material {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(effect.info.id),
            source: wgpu::ShaderSource::Wgsl(effect.shader.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Effect Pipeline Layout"),
            bind_group_layouts: &[&self.bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Effect Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.output_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Effect Params Buffer"),
            size: std::mem::size_of::<EffectUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = Self::create_bind_group(
            device,
            &self.bind_group_layout,
            &self.sampler,
            source_view,
            &params_buffer,
        );

        Material {
            pipeline,
            bind_group,
            params_buffer,
        }
    }

    fn create_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        source_view: &wgpu::TextureView,
        params_buffer: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Effect Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        })
    }

    fn create_source_texture(device: &wgpu::Device, width: u32, height: u32) -> SourceTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Source Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        SourceTexture {
            texture,
            view,
            width,
            height,
            last_frame: 0,
        }
    }

    /// Render the composed frame. When not `Active` yet the target is
    /// cleared instead - no effect this frame is the worst outcome.
    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let material = match &self.state {
            EngineState::Active { material, .. } => Some(material),
            _ => None,
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Effect Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some(material) = material {
            render_pass.set_pipeline(&material.pipeline);
            render_pass.set_bind_group(0, &material.bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
    }

    /// Release the material and the source texture, returning to
    /// `Uninitialized`. The selection stays queued so reconnecting the
    /// camera restores the same effect. Safe to call repeatedly.
    pub fn reset(&mut self) {
        let state = std::mem::replace(&mut self.state, EngineState::Uninitialized);
        match state {
            EngineState::Uninitialized => {}
            EngineState::TextureReady { source } => {
                source.texture.destroy();
            }
            EngineState::Active { source, material } => {
                drop(material);
                source.texture.destroy();
            }
        }
        self.selection.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::NONE_EFFECT;

    #[test]
    fn test_uniforms_layout() {
        // One vec4 on the GPU side
        assert_eq!(std::mem::size_of::<EffectUniforms>(), 16);

        let uniforms = EffectUniforms {
            time: 1.5,
            intensity: 0.5,
            _pad: [0.0; 2],
        };
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &1.5f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &0.5f32.to_le_bytes());
    }

    #[test]
    fn test_selection_resolves_known_effect_once() {
        let registry = EffectRegistry::builtin();
        let mut selection = EffectSelection::new();

        selection.request("wave");
        assert_eq!(selection.resolve(&registry).as_deref(), Some("wave"));
        selection.commit("wave".to_string());
        assert_eq!(selection.current(), Some("wave"));

        // Nothing pending: no rebuild
        assert!(selection.resolve(&registry).is_none());
    }

    #[test]
    fn test_unknown_effect_preserves_current_selection() {
        let registry = EffectRegistry::builtin();
        let mut selection = EffectSelection::new();

        selection.request("wave");
        let resolved = selection.resolve(&registry).unwrap();
        selection.commit(resolved);

        selection.request("not-an-effect");
        assert!(selection.resolve(&registry).is_none());
        assert_eq!(selection.current(), Some("wave"));
    }

    #[test]
    fn test_reselecting_current_effect_is_a_noop() {
        let registry = EffectRegistry::builtin();
        let mut selection = EffectSelection::new();

        selection.request("wave");
        let resolved = selection.resolve(&registry).unwrap();
        selection.commit(resolved);

        selection.request("wave");
        assert!(selection.resolve(&registry).is_none());
        assert_eq!(selection.current(), Some("wave"));
    }

    #[test]
    fn test_switch_back_and_forth_commits_each_time() {
        let registry = EffectRegistry::builtin();
        let mut selection = EffectSelection::new();

        for id in ["wave", "glitch", "wave"] {
            selection.request(id);
            let resolved = selection.resolve(&registry).expect("switch expected");
            assert_eq!(resolved, id);
            selection.commit(resolved);
            // Exactly one current selection at every step
            assert_eq!(selection.current(), Some(id));
        }
    }

    #[test]
    fn test_latest_request_wins() {
        let registry = EffectRegistry::builtin();
        let mut selection = EffectSelection::new();

        // Two requests within one frame: only the last takes effect
        selection.request("glitch");
        selection.request(NONE_EFFECT);
        assert_eq!(selection.resolve(&registry).as_deref(), Some(NONE_EFFECT));
    }

    #[test]
    fn test_invalidate_requeues_current_effect() {
        let registry = EffectRegistry::builtin();
        let mut selection = EffectSelection::new();

        selection.request("distortion");
        let resolved = selection.resolve(&registry).unwrap();
        selection.commit(resolved);

        selection.invalidate();
        assert_eq!(selection.current(), None);
        // The same effect comes back after re-initialization
        assert_eq!(selection.resolve(&registry).as_deref(), Some("distortion"));
    }

    #[test]
    fn test_invalidate_keeps_newer_pending_request() {
        let registry = EffectRegistry::builtin();
        let mut selection = EffectSelection::new();

        selection.request("wave");
        let resolved = selection.resolve(&registry).unwrap();
        selection.commit(resolved);

        selection.request("glitch");
        selection.invalidate();
        assert_eq!(selection.resolve(&registry).as_deref(), Some("glitch"));
    }
}
