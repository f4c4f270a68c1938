//! Error taxonomy for the GPU backend.
//!
//! Shader compile/link problems are not errors here. They are logged and
//! rendering continues with whatever program state exists.

/// How a failure affects the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The call is aborted, the process and (if created) the context stay usable.
    FatalToCall,
    /// Caller handed over something the pipeline cannot work with.
    InvalidInput,
}

#[derive(thiserror::Error, Debug)]
pub enum GpuError {
    #[error("no compatible GPU adapter: {0}")]
    NoAdapter(String),

    #[error("device request failed: {0}")]
    DeviceRequest(String),

    #[error("GPU pipeline is not initialized")]
    NotReady,

    #[error("render target {width}x{height} is incomplete: {reason}")]
    IncompleteTarget { width: u32, height: u32, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("readback failed: {0}")]
    Readback(String),
}

impl GpuError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidInput(_) => ErrorClass::InvalidInput,
            Self::NoAdapter(_)
            | Self::DeviceRequest(_)
            | Self::NotReady
            | Self::IncompleteTarget { .. }
            | Self::Readback(_) => ErrorClass::FatalToCall,
        }
    }

    pub fn invalid_input<T: ToString>(msg: T) -> Self {
        GpuError::InvalidInput(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        GpuError::Readback(msg.to_string())
    }
}

pub type GpuResult<T> = Result<T, GpuError>;
