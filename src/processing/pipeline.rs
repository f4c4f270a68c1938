//! Backend selection and timing.
//!
//! CPU: interleaved -> planar -> vector kernel -> interleaved -> BGRA8.
//! GPU: interleaved buffer goes straight to the shared [`GpuPipeline`].

use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

use crate::gpu_processing::GpuPipeline;
use crate::gpu_shaders::ShaderSources;
use crate::processing::color_space::pack_bgra8;
use crate::error::{ErrorClass, GpuError};
use crate::processing::layout::{Layout, LinearImage, RgbBuffer};
use crate::processing::simd_processing::tone_map_buffer;
use crate::processing::tone_mapping::ToneMapParams;
use crate::utils::env_config::{force_cpu, FORCE_CPU_VAR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpu,
    Gpu,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Cpu => "cpu",
            Backend::Gpu => "gpu",
        }
    }
}

/// One tone-mapping implementation: linear image in, BGRA8 display buffer out.
pub trait ToneMapBackend {
    fn kind(&self) -> Backend;

    fn tone_map(&mut self, image: &LinearImage, params: &ToneMapParams) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct CpuBackend {
    /// Split the kernel across the rayon pool.
    pub parallel: bool,
}

impl ToneMapBackend for CpuBackend {
    fn kind(&self) -> Backend {
        Backend::Cpu
    }

    fn tone_map(&mut self, image: &LinearImage, params: &ToneMapParams) -> Result<Vec<u8>> {
        let mut buffer = RgbBuffer::from_interleaved(&image.data, image.pixel_count())?.into_planar()?;
        tone_map_buffer(&mut buffer, params, self.parallel)?;
        let interleaved = buffer.into_interleaved()?;
        Ok(pack_bgra8(interleaved.as_layout(Layout::Interleaved)?))
    }
}

/// Drives the process-wide GPU pipeline. Holds no GPU state itself.
#[derive(Debug, Clone, Default)]
pub struct GpuBackend {
    /// Used for this backend's renders only; the pipeline gets its previous
    /// sources back afterwards. `None` renders with whatever it has.
    pub shaders: Option<ShaderSources>,
}

impl ToneMapBackend for GpuBackend {
    fn kind(&self) -> Backend {
        Backend::Gpu
    }

    fn tone_map(&mut self, image: &LinearImage, params: &ToneMapParams) -> Result<Vec<u8>> {
        let mut pipeline = GpuPipeline::lock();
        let previous = self.shaders.clone().map(|shaders| pipeline.set_shader_sources(shaders));
        let result = pipeline
            .ensure_ready()
            .and_then(|()| pipeline.render_to_vec(&image.data, image.width, image.height, params));
        if let Some(previous) = previous {
            pipeline.set_shader_sources(previous);
        }
        result.map_err(|e| {
            log_gpu_error(&e);
            e.into()
        })
    }
}

fn log_gpu_error(error: &GpuError) {
    match error.class() {
        ErrorClass::FatalToCall => tracing::error!("GPU tone map aborted: {}", error),
        ErrorClass::InvalidInput => tracing::warn!("GPU tone map rejected its input: {}", error),
    }
}

/// Backend for `kind`. With `HDR_TONEMAP_FORCE_CPU` set the GPU request is
/// downgraded to the CPU kernel.
pub fn backend_for(kind: Backend, parallel_cpu: bool, shaders: Option<ShaderSources>) -> Box<dyn ToneMapBackend> {
    match kind {
        Backend::Gpu if force_cpu() => {
            tracing::warn!("{} is set, using the CPU backend instead of the GPU", FORCE_CPU_VAR);
            Box::new(CpuBackend { parallel: parallel_cpu })
        }
        Backend::Gpu => Box::new(GpuBackend { shaders }),
        Backend::Cpu => Box::new(CpuBackend { parallel: parallel_cpu }),
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    /// BGRA8, `4 * width * height` bytes.
    pub bgra: Vec<u8>,
    pub elapsed: Duration,
    /// Backend that actually produced `bgra`.
    pub backend: Backend,
}

/// Runs `backend` and measures the whole call, conversions included.
pub fn run_with(backend: &mut dyn ToneMapBackend, image: &LinearImage, params: &ToneMapParams) -> Result<RunOutput> {
    let start = Instant::now();
    let bgra = backend.tone_map(image, params)?;
    let elapsed = start.elapsed();
    tracing::debug!(
        backend = backend.kind().name(),
        width = image.width,
        height = image.height,
        "tone map finished in {:?}",
        elapsed
    );
    Ok(RunOutput {
        bgra,
        elapsed,
        backend: backend.kind(),
    })
}

/// Tone maps `image` on the chosen backend with default backend settings.
pub fn run(kind: Backend, image: &LinearImage, params: &ToneMapParams) -> Result<RunOutput> {
    let mut backend = backend_for(kind, false, None);
    run_with(backend.as_mut(), image, params)
}

/// CPU vs GPU on the same input.
#[derive(Debug, Clone)]
pub struct BackendComparison {
    pub cpu: RunOutput,
    pub gpu: RunOutput,
    pub max_abs_diff: u8,
    pub mean_abs_diff: f64,
}

pub fn compare_backends(
    image: &LinearImage,
    params: &ToneMapParams,
    parallel_cpu: bool,
    shaders: Option<ShaderSources>,
) -> Result<BackendComparison> {
    if force_cpu() {
        bail!("GPU backend disabled by {}", FORCE_CPU_VAR);
    }
    let cpu = run_with(&mut CpuBackend { parallel: parallel_cpu }, image, params)?;
    let gpu = run_with(&mut GpuBackend { shaders }, image, params)?;
    let (max_abs_diff, mean_abs_diff) = byte_difference(&cpu.bgra, &gpu.bgra)?;
    Ok(BackendComparison {
        cpu,
        gpu,
        max_abs_diff,
        mean_abs_diff,
    })
}

/// Maximum and mean absolute per-byte difference of two equally long buffers.
pub fn byte_difference(a: &[u8], b: &[u8]) -> Result<(u8, f64)> {
    ensure!(a.len() == b.len(), "buffer lengths differ: {} vs {}", a.len(), b.len());
    if a.is_empty() {
        return Ok((0, 0.0));
    }
    let (max, sum) = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| x.abs_diff(y))
        .fold((0u8, 0u64), |(max, sum), d| (max.max(d), sum + d as u64));
    Ok((max, sum as f64 / a.len() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu_shaders::ShaderOrigin;
    use crate::processing::color_space::to_display;
    use crate::processing::tone_mapping::{tone_map_pixel, EPSILON};
    use glam::Vec3;

    #[test]
    fn test_cpu_reference_pixel() {
        let image = LinearImage::filled(1, 1, [1.0, 1.0, 1.0]);
        let out = run(Backend::Cpu, &image, &ToneMapParams::new(1.0, 4.0)).unwrap();
        assert_eq!(out.bgra, vec![191, 191, 191, 255]);
        assert_eq!(out.backend, Backend::Cpu);
    }

    #[test]
    fn test_cpu_black_pixel() {
        let image = LinearImage::filled(1, 1, [0.0, 0.0, 0.0]);
        let out = run(Backend::Cpu, &image, &ToneMapParams::default()).unwrap();
        let expected = to_display(EPSILON);
        assert_eq!(out.bgra, vec![expected, expected, expected, 255]);
    }

    #[test]
    fn test_cpu_output_matches_scalar_operator_in_bgra_order() {
        // 11 px: one full lane group plus a scalar tail
        let data: Vec<f32> = (0..11 * 3).map(|i| (i as f32 * 0.37) % 5.0).collect();
        let image = LinearImage::new(11, 1, data.clone()).unwrap();
        let params = ToneMapParams::new(1.5, 3.0);

        let out = run(Backend::Cpu, &image, &params).unwrap();
        assert_eq!(out.bgra.len(), 11 * 4);
        for (px, rgb) in out.bgra.chunks_exact(4).zip(data.chunks_exact(3)) {
            let m = tone_map_pixel(Vec3::new(rgb[0], rgb[1], rgb[2]), &params);
            assert_eq!(px, &[to_display(m.z), to_display(m.y), to_display(m.x), 255]);
        }
    }

    #[test]
    fn test_parallel_cpu_matches_sequential() {
        let data: Vec<f32> = (0..(300 * 70 * 3)).map(|i| ((i * 7919) % 1000) as f32 / 100.0).collect();
        let image = LinearImage::new(300, 70, data).unwrap();
        let params = ToneMapParams::default();

        let seq = run_with(&mut CpuBackend { parallel: false }, &image, &params).unwrap();
        let par = run_with(&mut CpuBackend { parallel: true }, &image, &params).unwrap();
        assert_eq!(seq.bgra, par.bgra);
    }

    #[test]
    fn test_boost_leaves_original_reusable() {
        let image = LinearImage::filled(4, 2, [0.5, 0.25, 1.0]);
        let params = ToneMapParams::default();
        let plain = run(Backend::Cpu, &image, &params).unwrap();
        let boosted = run(Backend::Cpu, &image.boosted(4.0), &params).unwrap();
        let again = run(Backend::Cpu, &image, &params).unwrap();

        assert_eq!(plain.bgra, again.bgra);
        assert!(boosted.bgra[2] > plain.bgra[2]);
    }

    #[test]
    fn test_byte_difference() {
        assert_eq!(byte_difference(&[10, 20, 30, 255], &[12, 20, 29, 255]).unwrap(), (2, 0.75));
        assert_eq!(byte_difference(&[], &[]).unwrap(), (0, 0.0));
        assert!(byte_difference(&[1], &[1, 2]).is_err());
    }

    #[test]
    fn test_backend_serde_names() {
        assert_eq!(serde_json::to_string(&Backend::Gpu).unwrap(), "\"gpu\"");
        assert_eq!(serde_json::from_str::<Backend>("\"cpu\"").unwrap(), Backend::Cpu);
        assert_eq!(Backend::default(), Backend::Cpu);
    }

    #[test]
    fn test_backend_for_cpu() {
        let backend = backend_for(Backend::Cpu, true, None);
        assert_eq!(backend.kind(), Backend::Cpu);
    }

    #[test]
    fn test_cross_validation_uniform_image() {
        if force_cpu() {
            return;
        }
        let image = LinearImage::filled(37, 19, [2.0, 0.8, 0.1]);
        let params = ToneMapParams::new(1.2, 4.0);
        match compare_backends(&image, &params, false, Some(ShaderSources::builtin())) {
            Ok(cmp) => {
                assert_eq!(cmp.cpu.bgra.len(), cmp.gpu.bgra.len());
                // CPU truncates, the GPU unorm write rounds
                assert!(cmp.max_abs_diff <= 2, "max diff {}", cmp.max_abs_diff);
            }
            Err(e) => println!("GPU not available: {:#}", e),
        }
    }

    #[test]
    fn test_gpu_backend_restores_pipeline_shaders() {
        let mut backend = GpuBackend {
            shaders: Some(ShaderSources::inline("// vertex", "// fragment")),
        };
        let image = LinearImage::filled(1, 1, [1.0, 1.0, 1.0]);
        // Succeeds or fails depending on the machine; the shaders must be restored either way
        let _ = backend.tone_map(&image, &ToneMapParams::default());
        assert_ne!(GpuPipeline::lock().shader_sources().origin, ShaderOrigin::Inline);
    }
}
