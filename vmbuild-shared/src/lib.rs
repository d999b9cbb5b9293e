//! Types shared between the vmbuild engine and driver implementations.

pub mod errors;

pub use errors::{ConfigError, VmbuildError, VmbuildResult};
