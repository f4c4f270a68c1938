pub mod color_space;
pub mod layout;
pub mod tone_mapping;
pub mod simd_processing;
pub mod pipeline;

pub use layout::LinearImage;
pub use pipeline::{compare_backends, run, Backend};
pub use tone_mapping::ToneMapParams;
