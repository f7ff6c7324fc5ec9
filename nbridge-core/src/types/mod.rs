//! Core type definitions for nbridge.

mod config;
mod element;
mod error;

pub use config::{BridgeConfig, ExecutionMode, CONFIG_FILE_NAME, DEFAULT_REGISTRY_CAPACITY};
pub use element::{
    is_na_real, na_real, Logical, NativeElement, RComplex, Scalar, VectorKind, NA_INTEGER,
    NA_LOGICAL,
};
pub use error::{BridgeError, ErrorKind};
