use std::string::FromUtf8Error;

use penumbra::OptionsError;
use thiserror::Error;

/// Device limit the atlas renderer depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    MaxTextureDimension2d,
    UniformBufferBindingSize,
    MaxBufferSize,
}

/// Reason why the atlas renderer failed to initialize.
#[derive(Error, Debug)]
pub enum AtlasInitError {
    #[error("Invalid shadow atlas options")]
    InvalidOptions(#[from] OptionsError),
    #[error(
        "The device limit of {:?} is {} but the shadow atlas requires at least {}",
        ty,
        device_limit,
        required_limit
    )]
    LowDeviceLimit {
        ty: LimitType,
        device_limit: u64,
        required_limit: u64,
    },
    #[error("Embedded shader {0} is missing")]
    MissingShader(&'static str),
    #[error("Embedded shader {name} is not valid utf-8")]
    ShaderEncoding {
        name: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("Creating the shadow atlas render target failed")]
    RenderTarget(#[source] wgpu::Error),
}
