pub mod image_io;

pub use image_io::{load_linear_image, save_bgra8};
