use thiserror::Error;
use tokio::sync::AcquireError;

#[derive(Debug, Clone, Error)]
pub enum InventoryError {
    #[error("Camera access failed: {0}")]
    DeviceAccess(String),

    #[error("Image decode failed: {0}")]
    ImageDecode(String),

    #[error("Snapshot write failed: {0}")]
    PersistenceWrite(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Equipment {0} not found")]
    NotFound(u64),

    #[error("Photo index {index} out of range for equipment {id} ({len} photos)")]
    PhotoIndexOutOfRange { id: u64, index: usize, len: usize },

    #[error("Invalid capture state: {0}")]
    InvalidState(String),

    #[error("Frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Report rendering failed: {0}")]
    RenderFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Semaphore acquire error: {0}")]
    SemaphoreError(String),
}

impl InventoryError {
    /// Whether the caller can retry or carry on after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            InventoryError::DeviceAccess(_)
                | InventoryError::ImageDecode(_)
                | InventoryError::PersistenceWrite(_)
                | InventoryError::Validation(_)
                | InventoryError::NotFound(_)
                | InventoryError::PhotoIndexOutOfRange { .. }
                | InventoryError::InvalidState(_)
                | InventoryError::CaptureFailed(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            InventoryError::Validation(_) => ErrorSeverity::Low,
            InventoryError::NotFound(_) => ErrorSeverity::Low,
            InventoryError::PhotoIndexOutOfRange { .. } => ErrorSeverity::Low,
            InventoryError::ImageDecode(_) => ErrorSeverity::Low,
            InventoryError::PersistenceWrite(_) => ErrorSeverity::High,
            InventoryError::ConfigurationError(_) => ErrorSeverity::High,
            InventoryError::SerializationError(_) => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<AcquireError> for InventoryError {
    fn from(err: AcquireError) -> Self {
        InventoryError::SemaphoreError(err.to_string())
    }
}

impl From<std::io::Error> for InventoryError {
    fn from(err: std::io::Error) -> Self {
        InventoryError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for InventoryError {
    fn from(err: serde_json::Error) -> Self {
        InventoryError::SerializationError(err.to_string())
    }
}

impl From<image::ImageError> for InventoryError {
    fn from(err: image::ImageError) -> Self {
        InventoryError::ImageDecode(err.to_string())
    }
}

impl From<lopdf::Error> for InventoryError {
    fn from(err: lopdf::Error) -> Self {
        InventoryError::RenderFailed(err.to_string())
    }
}
