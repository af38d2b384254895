//! Error types for the ray tracer host layer.

use std::path::PathBuf;
use thiserror::Error;

/// Data class moved between host and device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataClass {
    /// Bounding boxes, primitives and lamps.
    Geometry,
    /// Materials and the per-pixel random seed buffer.
    Materials,
    /// Texture texels and their descriptors.
    Textures,
    /// Frames coming from an attached capture device.
    Capture,
    /// Rendered image and primitive-id buffer (device to host).
    Image,
}

impl std::fmt::Display for DataClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataClass::Geometry => "geometry",
            DataClass::Materials => "materials",
            DataClass::Textures => "textures",
            DataClass::Capture => "capture",
            DataClass::Image => "image",
        };
        f.write_str(name)
    }
}

/// Main error type for host orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// No compute device found, or the selected device could not be queried
    #[error("Compute device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A device buffer could not be allocated; nothing stays allocated
    #[error("Device allocation failed for {buffer} ({bytes} bytes): {reason}")]
    AllocationFailure {
        buffer: &'static str,
        bytes: u64,
        reason: String,
    },

    /// Host to device copy failed; the class stays marked as not uploaded
    #[error("Transfer of {class} failed: {reason}")]
    TransferFailure { class: DataClass, reason: String },

    /// Kernel launch or execution failed
    #[error("Kernel dispatch failed: {0}")]
    DispatchFailure(String),

    /// Device to host readback failed
    #[error("Image readback failed: {0}")]
    Readback(String),

    /// Device ownership was revoked; the session must be torn down
    #[error("Compute device lost: {0}")]
    DeviceLost(String),

    /// Caller supplied inconsistent sizes or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file does not exist
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a transfer failure for the given class.
    pub fn transfer(class: DataClass, reason: impl Into<String>) -> Self {
        Self::TransferFailure {
            class,
            reason: reason.into(),
        }
    }

    /// Whether the session can continue after this error.
    ///
    /// Only device loss requires a full teardown.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}

/// Result type alias for host orchestration.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::transfer(DataClass::Materials, "queue full");
        assert!(e.to_string().contains("materials"));
        assert!(e.to_string().contains("queue full"));

        let e = Error::AllocationFailure {
            buffer: "primitives",
            bytes: 4096,
            reason: "budget exceeded".into(),
        };
        assert!(e.to_string().contains("primitives"));
        assert!(e.to_string().contains("4096"));
    }

    #[test]
    fn test_only_device_loss_is_fatal() {
        assert!(Error::DeviceLost("revoked".into()).is_fatal());
        assert!(!Error::DispatchFailure("timeout".into()).is_fatal());
        assert!(!Error::DeviceUnavailable("none".into()).is_fatal());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
