//! Skeleton overlay renderer
//!
//! Draws the tracked hand skeletons onto a CPU surface kept at the camera's
//! intrinsic resolution, then composites that surface over the effect output
//! with alpha blending. The drawing half ([`SkeletonCanvas`]) has no GPU
//! dependencies.

use crate::tracking::{HandDetectionResult, Handedness};

/// Static edge table of the 21-point hand topology: the four bone chains of
/// each finger plus the palm edges.
pub const HAND_CONNECTIONS: &[(usize, usize)] = &[
    // Thumb
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    // Index finger
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    // Middle finger
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    // Ring finger
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    // Pinky
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    // Palm
    (5, 9),
    (9, 13),
    (13, 17),
];

const CONNECTION_THICKNESS: i32 = 5;
const LANDMARK_RADIUS: i32 = 3;

const LEFT_CONNECTION_COLOR: [u8; 4] = [0, 255, 0, 255];
const LEFT_LANDMARK_COLOR: [u8; 4] = [255, 0, 0, 255];
const RIGHT_CONNECTION_COLOR: [u8; 4] = [0, 0, 255, 255];
const RIGHT_LANDMARK_COLOR: [u8; 4] = [255, 0, 255, 255];

/// CPU drawing surface for the hand skeletons.
///
/// Pixel resolution tracks the video's intrinsic decoded resolution, not any
/// display size. Every draw starts from a full clear, so a result with zero
/// hands leaves the surface empty and stale strokes never survive a newer
/// result.
pub struct SkeletonCanvas {
    buffer: Vec<u8>,
    width: u32,
    height: u32,
}

impl Default for SkeletonCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl SkeletonCanvas {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    /// Match the surface to the source's intrinsic resolution. A size change
    /// reallocates and clears.
    pub fn sync_size(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        self.width = width;
        self.height = height;
        self.buffer = vec![0; (width * height * 4) as usize];
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_blank(&self) -> bool {
        self.buffer.iter().all(|&b| b == 0)
    }

    /// Clear the surface to fully transparent
    pub fn clear(&mut self) {
        self.buffer.fill(0);
    }

    /// Replace the surface contents with the skeletons of `result`.
    pub fn draw(&mut self, result: &HandDetectionResult) {
        self.clear();
        if self.width == 0 || self.height == 0 {
            return;
        }

        for hand in &result.hands {
            let (connection_color, landmark_color) = match hand.handedness {
                Handedness::Left => (LEFT_CONNECTION_COLOR, LEFT_LANDMARK_COLOR),
                Handedness::Right => (RIGHT_CONNECTION_COLOR, RIGHT_LANDMARK_COLOR),
            };

            // Mirror x so the skeleton lines up with the mirrored preview
            let points: Vec<(f32, f32)> = hand
                .landmarks
                .iter()
                .map(|p| ((1.0 - p.x) * self.width as f32, p.y * self.height as f32))
                .collect();

            for &(a, b) in HAND_CONNECTIONS {
                if let (Some(pa), Some(pb)) = (points.get(a), points.get(b)) {
                    self.draw_line(pa, pb, connection_color, CONNECTION_THICKNESS);
                }
            }

            for &(x, y) in &points {
                self.draw_circle((x as i32, y as i32), LANDMARK_RADIUS, landmark_color);
            }
        }
    }

    fn draw_line(&mut self, p0: &(f32, f32), p1: &(f32, f32), color: [u8; 4], thickness: i32) {
        let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
        let (x1, y1) = (p1.0 as i32, p1.1 as i32);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let radius = (thickness.max(1) - 1) / 2;

        loop {
            self.put_pixel(x0, y0, color);
            if radius > 0 {
                for ox in -radius..=radius {
                    for oy in -radius..=radius {
                        if ox == 0 && oy == 0 {
                            continue;
                        }
                        if ox.abs() + oy.abs() <= radius {
                            self.put_pixel(x0 + ox, y0 + oy, color);
                        }
                    }
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn draw_circle(&mut self, center: (i32, i32), radius: i32, color: [u8; 4]) {
        let (cx, cy) = center;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.put_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn put_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 {
            return;
        }
        let (ux, uy) = (x as u32, y as u32);
        if ux >= self.width || uy >= self.height {
            return;
        }
        let idx = ((uy * self.width + ux) as usize) * 4;
        if idx + 3 < self.buffer.len() {
            self.buffer[idx..idx + 4].copy_from_slice(&color);
        }
    }
}

/// GPU half of the overlay: uploads the canvas into a texture and blends it
/// over the render target.
pub struct OverlayRenderer {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    texture: Option<wgpu::Texture>,
    bind_group: Option<wgpu::BindGroup>,
}

impl OverlayRenderer {
    pub fn new(device: &wgpu::Device, output_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Overlay Shader"),
            source: wgpu::ShaderSource::Wgsl(OVERLAY_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Overlay Bind Group Layout"),
            entries: &[
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
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Overlay Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Overlay Pipeline"),
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
                    format: output_format,
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::SrcAlpha,
                            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                            operation: wgpu::BlendOperation::Add,
                        },
                    }),
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

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Overlay Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            pipeline,
            bind_group_layout,
            sampler,
            texture: None,
            bind_group: None,
        }
    }

    /// Upload the canvas to the GPU, recreating the texture when the canvas
    /// was resized.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, canvas: &SkeletonCanvas) {
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let needs_new_texture = match &self.texture {
            None => true,
            Some(tex) => {
                let size = tex.size();
                size.width != width || size.height != height
            }
        };

        if needs_new_texture {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Overlay Texture"),
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

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Overlay Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });

            // The previous texture is released once the new pair is in place
            let old = self.texture.replace(texture);
            self.bind_group = Some(bind_group);
            if let Some(old) = old {
                old.destroy();
            }
        }

        if let Some(texture) = &self.texture {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                canvas.pixels(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    /// Blend the overlay over the target. No-op until a canvas was uploaded.
    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Overlay Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
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

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }

    /// Release the overlay texture. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.bind_group = None;
        if let Some(texture) = self.texture.take() {
            texture.destroy();
        }
    }
}

/// Fullscreen blend shader for the overlay, mirrored like the effect output.
const OVERLAY_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var out: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    out.position = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, y);
    return out;
}

@group(0) @binding(0) var t_overlay: texture_2d<f32>;
@group(0) @binding(1) var s_overlay: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(t_overlay, s_overlay, in.uv);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{Hand, HandDetectionResult, LandmarkPoint, WRIST};

    fn one_hand_at(x: f32, y: f32, handedness: Handedness) -> HandDetectionResult {
        let mut hand = Hand::default();
        for p in hand.landmarks.iter_mut() {
            *p = LandmarkPoint { x, y, z: 0.0 };
        }
        hand.landmarks[WRIST] = LandmarkPoint { x, y, z: 0.0 };
        hand.handedness = handedness;
        HandDetectionResult { hands: vec![hand] }
    }

    #[test]
    fn test_sync_size_allocates_and_clears() {
        let mut canvas = SkeletonCanvas::new();
        canvas.sync_size(64, 48);
        assert_eq!(canvas.dimensions(), (64, 48));
        assert_eq!(canvas.pixels().len(), 64 * 48 * 4);
        assert!(canvas.is_blank());
    }

    #[test]
    fn test_draw_renders_skeleton_pixels() {
        let mut canvas = SkeletonCanvas::new();
        canvas.sync_size(64, 64);
        canvas.draw(&one_hand_at(0.5, 0.5, Handedness::Left));
        assert!(!canvas.is_blank());
    }

    #[test]
    fn test_empty_result_clears_stale_skeleton() {
        let mut canvas = SkeletonCanvas::new();
        canvas.sync_size(64, 64);
        canvas.draw(&one_hand_at(0.5, 0.5, Handedness::Left));
        assert!(!canvas.is_blank());

        // A newer, empty result must leave no stale strokes behind
        canvas.draw(&HandDetectionResult::default());
        assert!(canvas.is_blank());
    }

    #[test]
    fn test_out_of_range_landmarks_do_not_panic() {
        let mut canvas = SkeletonCanvas::new();
        canvas.sync_size(32, 32);
        canvas.draw(&one_hand_at(-2.0, 3.5, Handedness::Right));
        canvas.draw(&one_hand_at(99.0, -99.0, Handedness::Left));
    }

    #[test]
    fn test_x_axis_is_mirrored() {
        let mut canvas = SkeletonCanvas::new();
        canvas.sync_size(100, 20);
        // Landmarks near x=0 must land on the right side of the surface
        canvas.draw(&one_hand_at(0.02, 0.5, Handedness::Left));

        let (width, height) = canvas.dimensions();
        let row = height / 2;
        let left_half_lit = (0..width / 2)
            .any(|x| canvas.pixels()[((row * width + x) * 4 + 3) as usize] != 0);
        let right_half_lit = (width / 2..width)
            .any(|x| canvas.pixels()[((row * width + x) * 4 + 3) as usize] != 0);
        assert!(right_half_lit);
        assert!(!left_half_lit);
    }

    #[test]
    fn test_draw_before_sync_is_a_noop() {
        let mut canvas = SkeletonCanvas::new();
        canvas.draw(&one_hand_at(0.5, 0.5, Handedness::Left));
        assert!(canvas.pixels().is_empty());
    }

    #[test]
    fn test_connection_table_shape() {
        // 23 static edges over 21 points, every index in range
        assert_eq!(HAND_CONNECTIONS.len(), 23);
        for &(a, b) in HAND_CONNECTIONS {
            assert!(a < 21 && b < 21);
        }
    }
}
