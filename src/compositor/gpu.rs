//! wgpu compute compositor
//!
//! Picture-in-picture mixing on the GPU: both camera frames are uploaded as
//! textures, a compute pass writes the merged frame into a storage texture,
//! and the result is read back into a pooled buffer. All GPU resources are
//! allocated in `prepare`; `mix` only uploads, dispatches, and reads back.

use super::pool::{FramePool, PooledBuffer};
use super::{Compositor, CompositorError, CompositorFactory, MixParams};
use crate::capture::types::{FrameFormat, VideoFrame};
use std::sync::Arc;
use wgpu::{Device, Queue};

const WORKGROUP_SIZE: u32 = 8;

const MIX_SHADER: &str = r#"
struct Params {
    rect: vec4<f32>,
    out_size: vec2<f32>,
    _pad: vec2<f32>,
};

@group(0) @binding(0) var full_tex: texture_2d<f32>;
@group(0) @binding(1) var pip_tex: texture_2d<f32>;
@group(0) @binding(2) var out_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let out_dims = textureDimensions(out_tex);
    if (gid.x >= out_dims.x || gid.y >= out_dims.y) {
        return;
    }

    // Nearest-sample the full-screen stream scaled to the output size.
    let uv = (vec2<f32>(gid.xy) + vec2<f32>(0.5, 0.5)) / params.out_size;
    let full_dims = textureDimensions(full_tex);
    var src = vec2<u32>(uv * vec2<f32>(full_dims));
    src = min(src, full_dims - vec2<u32>(1u, 1u));
    var color = textureLoad(full_tex, src, 0);

    // Inside the overlay rect, the pip stream wins. The rect may extend
    // past the frame edge; the out-of-frame portion is simply not drawn.
    let p = vec2<f32>(gid.xy);
    if (params.rect.z > 0.0 && params.rect.w > 0.0
        && p.x >= params.rect.x && p.x < params.rect.x + params.rect.z
        && p.y >= params.rect.y && p.y < params.rect.y + params.rect.w) {
        let rel = (p - params.rect.xy) / params.rect.zw;
        let pip_dims = textureDimensions(pip_tex);
        var psrc = vec2<u32>(rel * vec2<f32>(pip_dims));
        psrc = min(psrc, pip_dims - vec2<u32>(1u, 1u));
        color = textureLoad(pip_tex, psrc, 0);
    }

    textureStore(out_tex, gid.xy, color);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShaderParams {
    rect: [f32; 4],
    out_size: [f32; 2],
    _pad: [f32; 2],
}

struct PreparedState {
    input_format: FrameFormat,
    output_width: u32,
    output_height: u32,
    full_tex: wgpu::Texture,
    pip_tex: wgpu::Texture,
    out_tex: wgpu::Texture,
    uniform_buf: wgpu::Buffer,
    readback_buf: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    padded_bytes_per_row: u32,
    pool: FramePool,
}

/// GPU picture-in-picture mixer.
///
/// Device and pipeline are created once per instance; textures, the
/// readback buffer, and the output pool are tied to a `prepare`d format.
pub struct WgpuCompositor {
    device: Arc<Device>,
    queue: Arc<Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    prepared: Option<PreparedState>,
}

impl WgpuCompositor {
    pub fn new() -> Result<Self, CompositorError> {
        pollster::block_on(Self::init())
    }

    async fn init() -> Result<Self, CompositorError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| CompositorError::Gpu("no GPU adapter available".into()))?;

        tracing::info!("Compositor using GPU adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Dual Camera Compositor"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| CompositorError::Gpu(format!("failed to create GPU device: {}", e)))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("PiP Mix Shader"),
            source: wgpu::ShaderSource::Wgsl(MIX_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PiP Mix Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("PiP Mix Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("PiP Mix Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            pipeline,
            bind_group_layout,
            prepared: None,
        })
    }

    fn create_input_texture(&self, width: u32, height: u32, label: &str) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            // Pixel bytes pass through untouched, so BGRA data in an RGBA
            // texture reads back in its original channel order.
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    fn upload_frame(&self, texture: &wgpu::Texture, frame: &VideoFrame) {
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.bytes(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * frame.format.width),
                rows_per_image: Some(frame.format.height),
            },
            wgpu::Extent3d {
                width: frame.format.width,
                height: frame.format.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Read the output texture back into a pooled buffer, stripping row
    /// padding. Returns `None` on pool exhaustion or a failed map.
    fn read_back(&self, state: &PreparedState) -> Option<PooledBuffer> {
        let bytes_per_row = 4 * state.output_width;

        let buffer_slice = state.readback_buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            other => {
                tracing::debug!("Readback map failed: {:?}", other);
                return None;
            }
        }

        let mut out = match state.pool.acquire() {
            Some(buf) => buf,
            None => {
                tracing::debug!("Composited frame dropped: output pool exhausted");
                state.readback_buf.unmap();
                return None;
            }
        };

        {
            let data = buffer_slice.get_mapped_range();
            let dst = out.bytes_mut();
            if state.padded_bytes_per_row == bytes_per_row {
                dst.copy_from_slice(&data[..dst.len()]);
            } else {
                for row in 0..state.output_height {
                    let src_start = (row * state.padded_bytes_per_row) as usize;
                    let dst_start = (row * bytes_per_row) as usize;
                    let len = bytes_per_row as usize;
                    dst[dst_start..dst_start + len]
                        .copy_from_slice(&data[src_start..src_start + len]);
                }
            }
        }
        state.readback_buf.unmap();

        Some(out)
    }
}

impl Compositor for WgpuCompositor {
    fn prepare(
        &mut self,
        format: FrameFormat,
        buffer_count_hint: usize,
        target: Option<(u32, u32)>,
    ) -> Result<(), CompositorError> {
        if format.width == 0 || format.height == 0 {
            return Err(CompositorError::UnsupportedFormat(
                format.width,
                format.height,
            ));
        }

        let (output_width, output_height) = target.unwrap_or((format.width, format.height));

        let full_tex = self.create_input_texture(format.width, format.height, "Full Stream");
        let pip_tex = self.create_input_texture(format.width, format.height, "PiP Stream");

        let out_tex = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Composite Output"),
            size: wgpu::Extent3d {
                width: output_width,
                height: output_height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let uniform_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mix Params"),
            size: std::mem::size_of::<ShaderParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // wgpu requires readback rows aligned to 256 bytes
        let bytes_per_row = 4 * output_width;
        let padded_bytes_per_row = (bytes_per_row + 255) & !255;
        let readback_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Composite Readback"),
            size: (padded_bytes_per_row * output_height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("PiP Mix Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(
                        &full_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(
                        &pip_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(
                        &out_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buf.as_entire_binding(),
                },
            ],
        });

        let output_len = output_width as usize * output_height as usize * 4;
        let pool = FramePool::new(output_len, buffer_count_hint.max(1));

        self.prepared = Some(PreparedState {
            input_format: format,
            output_width,
            output_height,
            full_tex,
            pip_tex,
            out_tex,
            uniform_buf,
            readback_buf,
            bind_group,
            padded_bytes_per_row,
            pool,
        });

        tracing::debug!(
            "Compositor prepared: input {}x{}, output {}x{}",
            format.width,
            format.height,
            output_width,
            output_height
        );

        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    fn reset(&mut self) {
        self.prepared = None;
    }

    fn mix(
        &mut self,
        full: &VideoFrame,
        pip: &VideoFrame,
        params: &MixParams,
    ) -> Option<VideoFrame> {
        let state = self.prepared.as_ref()?;

        let (full, pip) = if params.front_is_full_screen {
            (pip, full)
        } else {
            (full, pip)
        };

        if full.format != state.input_format || pip.format != state.input_format {
            tracing::debug!(
                "Skipping mix: frame format {}x{} does not match prepared {}x{}",
                full.format.width,
                full.format.height,
                state.input_format.width,
                state.input_format.height
            );
            return None;
        }

        self.upload_frame(&state.full_tex, full);
        self.upload_frame(&state.pip_tex, pip);

        let rect = params.layout.scaled_to(state.output_width, state.output_height);
        let uniforms = ShaderParams {
            rect: [rect.x, rect.y, rect.width, rect.height],
            out_size: [state.output_width as f32, state.output_height as f32],
            _pad: [0.0, 0.0],
        };
        self.queue
            .write_buffer(&state.uniform_buf, 0, bytemuck::bytes_of(&uniforms));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("PiP Mix Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("PiP Mix Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &state.bind_group, &[]);
            pass.dispatch_workgroups(
                state.output_width.div_ceil(WORKGROUP_SIZE),
                state.output_height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &state.out_tex,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &state.readback_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(state.padded_bytes_per_row),
                    rows_per_image: Some(state.output_height),
                },
            },
            wgpu::Extent3d {
                width: state.output_width,
                height: state.output_height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer = self.read_back(state)?;
        let out_format = FrameFormat::bgra(state.output_width, state.output_height);
        Some(VideoFrame::from_pooled(out_format, buffer, full.pts))
    }
}

/// Builds a [`WgpuCompositor`] per dual-mode session.
pub struct WgpuCompositorFactory;

impl CompositorFactory for WgpuCompositorFactory {
    fn create(&self) -> Result<Box<dyn Compositor>, CompositorError> {
        Ok(Box::new(WgpuCompositor::new()?))
    }
}
