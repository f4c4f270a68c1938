//! Offscreen GPU tone mapping.
//!
//! Lifecycle: `Uninitialized --ensure_ready--> Ready --teardown--> Uninitialized`.
//! The context and the fullscreen quad persist between renders; textures, the
//! shader program and the readback buffer live for a single `render` call.

use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::{GpuError, GpuResult};
use crate::gpu_context::GpuContext;
use crate::gpu_shaders::ShaderSources;
use crate::gpu_types::{QuadVertex, ToneMapUniforms, FULLSCREEN_QUAD};
use crate::processing::color_space::DISPLAY_GAMMA;
use crate::processing::layout::rgb_to_rgba_padded;
use crate::processing::tone_mapping::ToneMapParams;

const INPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;
const OUTPUT_BYTES_PER_PIXEL: u32 = 4;

static PIPELINE: LazyLock<Mutex<GpuPipeline>> = LazyLock::new(|| Mutex::new(GpuPipeline::uninitialized()));

/// The process-wide GPU tone mapper.
///
/// Only reachable through [`GpuPipeline::lock`], so at most one context exists
/// per process and the mutex keeps renders strictly sequential.
pub struct GpuPipeline {
    context: Option<GpuContext>,
    quad: Option<wgpu::Buffer>,
    shaders: ShaderSources,
}

impl GpuPipeline {
    fn uninitialized() -> Self {
        Self {
            context: None,
            quad: None,
            shaders: ShaderSources::builtin(),
        }
    }

    /// Locks the global pipeline, taking over a poisoned lock.
    pub fn lock() -> MutexGuard<'static, GpuPipeline> {
        PIPELINE.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.context.is_some()
    }

    /// Shader pair used by subsequent renders. Returns the pair it replaces.
    pub fn set_shader_sources(&mut self, shaders: ShaderSources) -> ShaderSources {
        tracing::debug!(origin = ?shaders.origin, "GPU shader sources replaced");
        std::mem::replace(&mut self.shaders, shaders)
    }

    pub fn shader_sources(&self) -> &ShaderSources {
        &self.shaders
    }

    pub fn adapter_info(&self) -> Option<wgpu::AdapterInfo> {
        self.context.as_ref().map(|c| c.adapter_info())
    }

    /// Creates the context if needed. Idempotent; on failure the state stays
    /// uninitialized and the caller must not render.
    pub fn ensure_ready(&mut self) -> GpuResult<()> {
        if self.context.is_some() {
            return Ok(());
        }
        let start = Instant::now();
        let context = pollster::block_on(GpuContext::new())?;
        tracing::info!("GPU context ready in {:?}", start.elapsed());
        self.context = Some(context);
        Ok(())
    }

    /// Destroys the quad and the context. Safe when never initialized.
    pub fn teardown(&mut self) {
        if let Some(quad) = self.quad.take() {
            quad.destroy();
        }
        if self.context.take().is_some() {
            tracing::info!("GPU context torn down");
        }
    }

    /// Tone maps an interleaved linear RGB buffer into `output` (BGRA8, `4*w*h` bytes).
    ///
    /// If the render target cannot be built for these dimensions the call is
    /// aborted and `output` is left untouched.
    pub fn render(
        &mut self,
        linear_rgb: &[f32],
        width: u32,
        height: u32,
        params: &ToneMapParams,
        output: &mut [u8],
    ) -> GpuResult<()> {
        let Some(context) = self.context.as_ref() else {
            return Err(GpuError::NotReady);
        };

        check_buffers(linear_rgb, width, height, output)?;

        if let Err(e) = check_target(context, width, height) {
            tracing::error!("{}", e);
            return Err(e);
        }

        let quad = self
            .quad
            .get_or_insert_with(|| context.create_vertex_buffer("fullscreen quad", &FULLSCREEN_QUAD));

        let start = Instant::now();

        let (input, target) = create_targets(context, linear_rgb, width, height)?;

        let program = build_program(context, &self.shaders);

        let uniforms = context.create_uniform_buffer("tonemap params", &ToneMapUniforms::new(params, DISPLAY_GAMMA));
        let input_view = input.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tonemap bind group"),
            layout: &program.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniforms.as_entire_binding(),
                },
            ],
        });

        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = context.create_command_encoder("tonemap encoder");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("tonemap pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    depth_slice: None,
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
            pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, quad.slice(..));
            pass.draw(0..FULLSCREEN_QUAD.len() as u32, 0..1);
        }

        let padded_bpr = padded_bytes_per_row(width);
        let staging = context.create_staging_buffer("tonemap readback", padded_bpr as u64 * height as u64);
        encoder.copy_texture_to_buffer(
            target.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(height),
                },
            },
            extent(width, height),
        );
        context.submit(encoder.finish());

        let readback = read_rows(context, &staging, width, height, padded_bpr, output);

        // Sprzątanie zasobów jednego wywołania
        staging.destroy();
        uniforms.destroy();
        input.destroy();
        target.destroy();
        drop(program);

        readback?;
        tracing::debug!(width, height, "GPU tone map finished in {:?}", start.elapsed());
        Ok(())
    }

    /// Convenience wrapper that allocates the BGRA8 output.
    pub fn render_to_vec(
        &mut self,
        linear_rgb: &[f32],
        width: u32,
        height: u32,
        params: &ToneMapParams,
    ) -> GpuResult<Vec<u8>> {
        let mut out = vec![0u8; width as usize * height as usize * OUTPUT_BYTES_PER_PIXEL as usize];
        self.render(linear_rgb, width, height, params, &mut out)?;
        Ok(out)
    }
}

struct ToneMapProgram {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

/// Compiles and links the shader pair.
///
/// Failures are reported as warnings only; the returned program may be invalid
/// and then renders garbage (or nothing) instead of aborting the call.
fn build_program(context: &GpuContext, shaders: &ShaderSources) -> ToneMapProgram {
    let device = &context.device;

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let vertex = context.create_shader_module("tonemap vertex", &shaders.vertex);
    report_shader_error(device, "VERTEX");

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let fragment = context.create_shader_module("tonemap fragment", &shaders.fragment);
    report_shader_error(device, "FRAGMENT");

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("tonemap bind group layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
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

    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("tonemap pipeline layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("tonemap pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &vertex,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[QuadVertex::layout()],
        },
        fragment: Some(wgpu::FragmentState {
            module: &fragment,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: OUTPUT_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    report_shader_error(device, "PROGRAM");

    ToneMapProgram {
        pipeline,
        bind_group_layout,
    }
}

fn report_shader_error(device: &wgpu::Device, stage: &str) {
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        tracing::warn!(stage, "shader compilation/link error, rendering continues: {}", error);
    }
}

fn check_buffers(linear_rgb: &[f32], width: u32, height: u32, output: &[u8]) -> GpuResult<()> {
    if width == 0 || height == 0 {
        return Err(GpuError::invalid_input(format!("image dimensions must be positive, got {}x{}", width, height)));
    }
    let pixels = width as usize * height as usize;
    if linear_rgb.len() != pixels * 3 {
        return Err(GpuError::invalid_input(format!(
            "expected {} interleaved RGB floats, got {}",
            pixels * 3,
            linear_rgb.len()
        )));
    }
    if output.len() < pixels * OUTPUT_BYTES_PER_PIXEL as usize {
        return Err(GpuError::invalid_input(format!(
            "output buffer holds {} bytes, {} needed",
            output.len(),
            pixels * OUTPUT_BYTES_PER_PIXEL as usize
        )));
    }
    Ok(())
}

/// Counterpart of a framebuffer completeness check, done before any per-call
/// object exists so an abort leaks nothing.
fn check_target(context: &GpuContext, width: u32, height: u32) -> GpuResult<()> {
    let max = context.max_texture_dimension();
    if width > max || height > max {
        return Err(GpuError::IncompleteTarget {
            width,
            height,
            reason: format!("exceeds max texture dimension {}", max),
        });
    }
    if !context.supports_render_target(OUTPUT_FORMAT) {
        return Err(GpuError::IncompleteTarget {
            width,
            height,
            reason: format!("{:?} is not renderable on this adapter", OUTPUT_FORMAT),
        });
    }
    Ok(())
}

/// Input and output textures of one render call.
///
/// Creation runs inside out-of-memory and validation error scopes. A failure
/// is the runtime half of the completeness check: whatever was created is
/// destroyed and the call aborts with `IncompleteTarget`.
fn create_targets(
    context: &GpuContext,
    linear_rgb: &[f32],
    width: u32,
    height: u32,
) -> GpuResult<(wgpu::Texture, wgpu::Texture)> {
    // Wejście HDR
    let input = create_checked_texture(
        context,
        "hdr input",
        width,
        height,
        INPUT_FORMAT,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    )?;
    let target = match create_checked_texture(
        context,
        "tonemap target",
        width,
        height,
        OUTPUT_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    ) {
        Ok(target) => target,
        Err(e) => {
            input.destroy();
            return Err(e);
        }
    };

    let rgba = rgb_to_rgba_padded(linear_rgb);
    context.queue.write_texture(
        input.as_image_copy(),
        bytemuck::cast_slice(&rgba),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 16),
            rows_per_image: Some(height),
        },
        extent(width, height),
    );
    Ok((input, target))
}

fn create_checked_texture(
    context: &GpuContext,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> GpuResult<wgpu::Texture> {
    let device = &context.device;
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let texture = context.create_texture(label, width, height, format, usage);
    // Scopes pop in reverse order, both must be popped
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());

    match validation.or(out_of_memory) {
        None => Ok(texture),
        Some(error) => {
            texture.destroy();
            let e = GpuError::IncompleteTarget {
                width,
                height,
                reason: format!("{} texture could not be created: {}", label, error),
            };
            tracing::error!("{}", e);
            Err(e)
        }
    }
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * OUTPUT_BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Maps the staging buffer and strips row padding into `output`.
fn read_rows(
    context: &GpuContext,
    staging: &wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bpr: u32,
    output: &mut [u8],
) -> GpuResult<()> {
    let slice = staging.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    context.wait_idle()?;

    match receiver.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(GpuError::readback(format!("buffer mapping failed: {}", e))),
        Err(_) => return Err(GpuError::readback("map callback channel disconnected")),
    }

    {
        let data = slice.get_mapped_range();
        let row_bytes = (width * OUTPUT_BYTES_PER_PIXEL) as usize;
        let padded = padded_bpr as usize;
        for row in 0..height as usize {
            let src = row * padded;
            let dst = row * row_bytes;
            output[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
        }
    }
    staging.unmap();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Locks the pipeline and makes sure it is ready; `None` when no GPU is present.
    fn ready_pipeline() -> Option<MutexGuard<'static, GpuPipeline>> {
        let mut pipeline = GpuPipeline::lock();
        match pipeline.ensure_ready() {
            Ok(()) => {
                pipeline.set_shader_sources(ShaderSources::builtin());
                Some(pipeline)
            }
            Err(e) => {
                println!("GPU not available: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_padded_bytes_per_row() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn test_check_buffers() {
        assert!(check_buffers(&[0.0; 12], 2, 2, &[0; 16]).is_ok());
        assert!(check_buffers(&[0.0; 11], 2, 2, &[0; 16]).is_err());
        assert!(check_buffers(&[0.0; 12], 2, 2, &[0; 15]).is_err());
        assert!(check_buffers(&[], 0, 2, &[]).is_err());
    }

    #[test]
    fn test_render_before_ready_is_refused() {
        let mut pipeline = GpuPipeline::lock();
        pipeline.teardown();
        let mut out = [7u8; 4];
        let err = pipeline
            .render(&[1.0, 1.0, 1.0], 1, 1, &ToneMapParams::default(), &mut out)
            .unwrap_err();
        assert!(matches!(err, GpuError::NotReady));
        assert_eq!(out, [7u8; 4]);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut pipeline = GpuPipeline::lock();
        pipeline.teardown();
        pipeline.teardown();
        assert!(!pipeline.is_ready());
    }

    #[test]
    fn test_ensure_ready_is_idempotent() {
        let Some(mut pipeline) = ready_pipeline() else { return };
        assert!(pipeline.ensure_ready().is_ok());
        assert!(pipeline.is_ready());
        assert!(pipeline.adapter_info().is_some());
    }

    #[test]
    fn test_reference_pixel() {
        let Some(mut pipeline) = ready_pipeline() else { return };
        let out = pipeline
            .render_to_vec(&[1.0, 1.0, 1.0], 1, 1, &ToneMapParams::new(1.0, 4.0))
            .unwrap();
        assert_eq!(out[3], 255);
        for &c in &out[..3] {
            assert!((c as i32 - 191).abs() <= 1, "got {}", c);
        }
    }

    #[test]
    fn test_bgra_order_and_non_aligned_width() {
        let Some(mut pipeline) = ready_pipeline() else { return };
        // 3 px wide forces row padding; pure red must land in the third byte
        let (w, h) = (3u32, 2u32);
        let rgb: Vec<f32> = [8.0f32, 0.0, 0.0].iter().copied().cycle().take((w * h * 3) as usize).collect();
        let out = pipeline.render_to_vec(&rgb, w, h, &ToneMapParams::default()).unwrap();
        for px in out.chunks_exact(4) {
            assert!(px[2] > px[0] && px[2] > px[1], "pixel {:?}", px);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_rows_are_not_flipped() {
        let Some(mut pipeline) = ready_pipeline() else { return };
        // Top row bright, bottom row black
        let rgb = vec![4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let out = pipeline.render_to_vec(&rgb, 2, 2, &ToneMapParams::default()).unwrap();
        assert!(out[0] > 200);
        assert!(out[8] < 10);
    }

    #[test]
    fn test_oversized_target_aborts_without_touching_output() {
        let Some(mut pipeline) = ready_pipeline() else { return };
        let max = pipeline.context.as_ref().map(|c| c.max_texture_dimension()).unwrap_or(0);
        let width = max + 1;
        let rgb = vec![1.0f32; width as usize * 3];
        let mut out = vec![9u8; width as usize * 4];
        let err = pipeline.render(&rgb, width, 1, &ToneMapParams::default(), &mut out).unwrap_err();
        assert!(matches!(err, GpuError::IncompleteTarget { .. }));
        assert!(out.iter().all(|&b| b == 9));
        // The context survives the aborted call
        assert!(pipeline.render_to_vec(&[1.0, 1.0, 1.0], 1, 1, &ToneMapParams::default()).is_ok());
    }

    #[test]
    fn test_broken_shader_does_not_abort() {
        let Some(mut pipeline) = ready_pipeline() else { return };
        let builtin = ShaderSources::builtin();
        pipeline.set_shader_sources(ShaderSources::inline(builtin.vertex, "this is not wgsl"));
        let result = pipeline.render_to_vec(&[1.0, 1.0, 1.0], 1, 1, &ToneMapParams::default());
        pipeline.set_shader_sources(ShaderSources::builtin());
        let out = result.unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_failed_texture_creation_aborts_the_call() {
        let Some(pipeline) = ready_pipeline() else { return };
        let Some(context) = pipeline.context.as_ref() else { return };

        // Storage usage on Bgra8Unorm needs a feature the device never requests
        let err = create_checked_texture(
            context,
            "tonemap target",
            4,
            4,
            OUTPUT_FORMAT,
            wgpu::TextureUsages::STORAGE_BINDING,
        )
        .unwrap_err();
        assert!(matches!(err, GpuError::IncompleteTarget { width: 4, height: 4, .. }));

        let (input, target) = create_targets(context, &[0.5; 4 * 4 * 3], 4, 4).unwrap();
        assert_eq!(target.format(), OUTPUT_FORMAT);
        input.destroy();
        target.destroy();
    }
}
