//! Renderer error types.

use thiserror::Error;

/// Errors that can occur in the rendering engine.
///
/// Setup-time failures (device, pipeline, shader creation) are unrecoverable:
/// they indicate a misconfigured environment and abort initialization.
/// Swapchain out-of-date/suboptimal conditions are *not* errors and never
/// appear here; they are handled inside the frame loop.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Failed to initialize the Vulkan instance, device, or a core subsystem.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// Failed to create a GPU resource (buffer, image, pipeline, ...).
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// Failed to load compiled shader bytecode from disk.
    #[error("failed to load shader `{path}`: {reason}")]
    ShaderLoadFailed { path: String, reason: String },

    /// The device does not support a capability the renderer requires
    /// (e.g. linear filtering for mip generation on a given format).
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),

    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An internal error occurred during frame recording or submission.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the crate.
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");

        let err = RenderError::ShaderLoadFailed {
            path: "shaders/lighting.frag.spv".to_string(),
            reason: "file not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to load shader `shaders/lighting.frag.spv`: file not found"
        );
    }
}
