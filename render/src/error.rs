//! Render error types.

use std::fmt;

use crate::types::Extent2d;

/// Errors that can occur in the render system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the render system or one of its GPU objects.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// Shader source could not be read, parsed, validated or translated.
    ShaderCompilationFailed(String),
    /// A requested feature is not supported.
    FeatureNotSupported(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// A handle did not refer to a live object.
    InvalidHandle(String),
    /// Attachments bound together in one pass disagree on their size.
    AttachmentExtentMismatch {
        /// Extent of the first attachment.
        expected: Extent2d,
        /// Extent of the offending attachment.
        found: Extent2d,
    },
    /// The surface is outdated and the swapchain must be recreated.
    SurfaceOutdated,
    /// The surface was lost and needs to be recreated.
    SurfaceLost,
    /// The configuration could not be parsed or is inconsistent.
    Config(String),
    /// A file could not be read.
    Io(String),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::ShaderCompilationFailed(msg) => write!(f, "shader compilation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::InvalidHandle(msg) => write!(f, "invalid handle: {msg}"),
            Self::AttachmentExtentMismatch { expected, found } => write!(
                f,
                "attachment extent mismatch: expected {}x{}, found {}x{}",
                expected.width, expected.height, found.width, found.height
            ),
            Self::SurfaceOutdated => write!(f, "surface outdated, needs reconfiguration"),
            Self::SurfaceLost => write!(f, "surface lost, needs recreation"),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Io(msg) => write!(f, "io error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}

impl From<std::io::Error> for GraphicsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");
    }

    #[test]
    fn test_extent_mismatch_display() {
        let err = GraphicsError::AttachmentExtentMismatch {
            expected: Extent2d::new(800, 600),
            found: Extent2d::new(400, 300),
        };
        assert_eq!(
            err.to_string(),
            "attachment extent mismatch: expected 800x600, found 400x300"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.wgsl");
        let err: GraphicsError = io.into();
        assert!(matches!(err, GraphicsError::Io(_)));
    }
}
