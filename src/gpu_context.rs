use wgpu::{
    Adapter, Device, DeviceDescriptor, Features, Instance, InstanceDescriptor, PollType,
    PowerPreference, Queue, RequestAdapterOptions,
};
use wgpu::util::DeviceExt;

use crate::error::{GpuError, GpuResult};

/// Kontekst GPU: instance, adapter, device and queue of the offscreen renderer.
///
/// There is no window or surface, everything renders into textures.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
}

impl GpuContext {
    /// Acquires an adapter and a device. Backends can be narrowed with `WGPU_BACKEND`.
    pub async fn new() -> GpuResult<Self> {
        let instance = Instance::new(&InstanceDescriptor::from_env_or_default());

        let mut adapter = None;
        let mut last_error = String::from("no adapter candidates");
        for options in adapter_candidates() {
            match instance.request_adapter(&options).await {
                Ok(found) => {
                    adapter = Some(found);
                    break;
                }
                Err(e) => {
                    tracing::debug!(fallback = options.force_fallback_adapter, "adapter request failed: {}", e);
                    last_error = e.to_string();
                }
            }
        }
        let adapter = adapter.ok_or(GpuError::NoAdapter(last_error))?;

        let adapter_info = adapter.get_info();
        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        // Adapter limits so large images are not capped at the 8192 default
        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("hdr_tonemap device"),
                required_features: Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::default(),
            })
            .await
            .map_err(|e| GpuError::DeviceRequest(e.to_string()))?;

        // Errors that escape an error scope are logged, never panic
        device.on_uncaptured_error(Box::new(|error| {
            tracing::error!("uncaptured GPU error: {}", error);
        }));

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Checks that `format` can be rendered into and copied out of on this adapter.
    pub fn supports_render_target(&self, format: wgpu::TextureFormat) -> bool {
        let features = self.adapter.get_texture_format_features(format);
        features
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC)
    }

    pub fn create_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> wgpu::Texture {
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
            format,
            usage,
            view_formats: &[],
        })
    }

    pub fn create_vertex_buffer<T: bytemuck::Pod>(&self, label: &str, data: &[T]) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: wgpu::BufferUsages::VERTEX,
        })
    }

    pub fn create_uniform_buffer<T: bytemuck::Pod>(&self, label: &str, data: &T) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&[*data]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }

    /// Bufor staging do odczytu danych z GPU
    pub fn create_staging_buffer(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    pub fn create_shader_module(&self, label: &str, code: &str) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(code.into()),
        })
    }

    pub fn create_command_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        })
    }

    pub fn submit(&self, commands: wgpu::CommandBuffer) {
        self.queue.submit(std::iter::once(commands));
    }

    /// Blocks until all submitted work has finished.
    pub fn wait_idle(&self) -> GpuResult<()> {
        self.device
            .poll(PollType::Wait)
            .map(|_| ())
            .map_err(|e| GpuError::readback(format!("device poll failed: {}", e)))
    }
}

/// Hardware adapter first, then a software one (llvmpipe, WARP, SwiftShader)
/// for machines without a usable GPU.
fn adapter_candidates() -> [RequestAdapterOptions<'static, 'static>; 2] {
    [
        RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        },
        RequestAdapterOptions {
            power_preference: PowerPreference::LowPower,
            force_fallback_adapter: true,
            compatible_surface: None,
        },
    ]
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        tracing::debug!("GPU context destroyed");
    }
}
