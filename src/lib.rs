//! Extended Reinhard HDR tone mapping on two backends: a SIMD CPU kernel and
//! an offscreen wgpu render pipeline.

pub mod error;
pub mod gpu_context;
pub mod gpu_processing;
pub mod gpu_shaders;
pub mod gpu_types;
pub mod io;
pub mod processing;
pub mod utils;

pub use error::{GpuError, GpuResult};
pub use gpu_processing::GpuPipeline;
pub use processing::{Backend, LinearImage, ToneMapParams};
