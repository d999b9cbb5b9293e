//! Error taxonomy for VM provisioning.
//!
//! Configuration problems are collected as [`ConfigError`] values and
//! surfaced together through [`VmbuildError::Validation`]. Runtime failures
//! map one-to-one onto the step that raised them; driver errors are boxed
//! and kept as the `source` of the step-level error.

use thiserror::Error;

/// Result alias used throughout vmbuild.
pub type VmbuildResult<T> = Result<T, VmbuildError>;

/// A single configuration validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("'vm_name' is required")]
    MissingVmName,

    #[error("'host' or 'cluster' is required")]
    MissingHostOrCluster,

    #[error("'template' is required")]
    MissingTemplate,

    #[error("'linked_clone' and 'disk_size' cannot be used together")]
    LinkedCloneWithDiskSize,

    #[error("'disk_size' is required")]
    MissingDiskSize,

    #[error("'disk_size' must not be negative, got {0}")]
    NegativeDiskSize(i64),

    #[error("'disk_size' and 'storage' cannot be used together")]
    DiskSizeWithStorage,

    #[error("'storage[{index}].disk_size' must be positive, got {size}")]
    InvalidStorageSize { index: usize, size: i64 },

    #[error("'firmware' must be one of {allowed}, got '{value}'")]
    InvalidFirmware { value: String, allowed: String },

    #[error("'network' and 'networks' cannot be used together")]
    NetworkAndNetworks,

    #[error("exactly one of 'create' or 'clone' must be set")]
    SourceRequired,
}

fn join_config_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| format!("\n  * {}", e))
        .collect::<String>()
}

#[derive(Debug, Error)]
pub enum VmbuildError {
    /// Every problem found while preparing a configuration.
    #[error("invalid configuration:{}", join_config_errors(.0))]
    Validation(Vec<ConfigError>),

    #[error("{0} already exists, you can use the force flag to destroy it")]
    AlreadyExists(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("error creating vm: {0}")]
    CreationFailed(#[source] Box<VmbuildError>),

    #[error("error cloning vm: {0}")]
    CloneFailed(#[source] Box<VmbuildError>),

    #[error("error resizing disk: {0}")]
    ResizeFailed(#[source] Box<VmbuildError>),

    #[error("error destroying {name}: {source}")]
    DestroyFailed {
        name: String,
        #[source]
        source: Box<VmbuildError>,
    },

    /// Failure reported by the virtualization platform driver.
    #[error("driver error: {0}")]
    Driver(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VmbuildError {
    /// Wrap a driver failure raised while creating a VM.
    pub fn creation_failed(source: VmbuildError) -> Self {
        Self::CreationFailed(Box::new(source))
    }

    /// Wrap a driver failure raised while cloning a template.
    pub fn clone_failed(source: VmbuildError) -> Self {
        Self::CloneFailed(Box::new(source))
    }

    /// Wrap a driver failure raised while resizing a disk.
    pub fn resize_failed(source: VmbuildError) -> Self {
        Self::ResizeFailed(Box::new(source))
    }

    /// Wrap a driver failure raised while destroying `name`.
    pub fn destroy_failed(name: impl Into<String>, source: VmbuildError) -> Self {
        Self::DestroyFailed {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Validation failures carried by this error, if any.
    pub fn config_errors(&self) -> &[ConfigError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_validation_lists_every_failure() {
        let err = VmbuildError::Validation(vec![
            ConfigError::MissingTemplate,
            ConfigError::LinkedCloneWithDiskSize,
        ]);
        let msg = err.to_string();

        assert!(msg.starts_with("invalid configuration:"));
        assert!(msg.contains("'template' is required"));
        assert!(msg.contains("'linked_clone' and 'disk_size'"));
        assert_eq!(err.config_errors().len(), 2);
    }

    #[test]
    fn test_wrapped_driver_error_is_source() {
        let err = VmbuildError::creation_failed(VmbuildError::Driver("quota exceeded".into()));

        assert_eq!(
            err.to_string(),
            "error creating vm: driver error: quota exceeded"
        );
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("driver error: quota exceeded"));
    }

    #[test]
    fn test_destroy_failed_names_target() {
        let err = VmbuildError::destroy_failed("web-01", VmbuildError::Driver("locked".into()));
        assert_eq!(err.to_string(), "error destroying web-01: driver error: locked");
        assert!(err.config_errors().is_empty());
    }
}
