pub mod config;
pub mod env_config;
pub mod logging;

pub use config::ToneMapConfig;
pub use logging::init_logging;
