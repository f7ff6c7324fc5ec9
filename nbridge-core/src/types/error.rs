//! Bridge error types.
//!
//! This module provides error handling using `exn` for context-aware errors
//! while preserving stable `error_type()` strings for foreign callers.

use std::fmt;

use crate::types::VectorKind;

/// Error kind enum for bridge operations.
///
/// This defines the stable error types that map to `error_type()` strings.
/// Each variant corresponds to a specific error condition.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    /// A native buffer could not be obtained. Fatal to the requesting operation.
    AllocationFailed { bytes: usize },
    /// A foreign operation was sent to a receiver that does not support it.
    CapabilityMismatch {
        receiver: &'static str,
        operation: &'static str,
    },
    /// A native-level capability has no implementation in the current mode.
    Unsupported { feature: String },
    /// A native buffer was released that is not (or no longer) live.
    DoubleRelease { address: usize },
    /// A raw address arriving from foreign code resolves to no object.
    UnknownAddress { address: usize, registered: usize },
    /// A derived address is already registered to a different object.
    AddressCollision { address: usize },
    /// Element index outside the vector.
    IndexOutOfBounds { index: usize, len: usize },
    /// A scalar of one kind was used where another kind was required.
    TypeMismatch {
        expected: VectorKind,
        actual: VectorKind,
    },
    /// An ALTREP or foreign callback produced an unusable result.
    CallbackFailed {
        method: &'static str,
        message: String,
    },
    /// Configuration error.
    ConfigError { message: String },
    /// TOML parsing error.
    TomlError { message: String },
    /// I/O error.
    IoError { message: String },
}

impl ErrorKind {
    /// Get the error type as a string.
    ///
    /// These strings are stable and must not change; foreign callers match
    /// on them.
    pub fn error_type(&self) -> &'static str {
        match self {
            ErrorKind::AllocationFailed { .. } => "allocation_failed",
            ErrorKind::CapabilityMismatch { .. } => "capability_mismatch",
            ErrorKind::Unsupported { .. } => "unsupported",
            ErrorKind::DoubleRelease { .. } => "double_release",
            ErrorKind::UnknownAddress { .. } => "unknown_address",
            ErrorKind::AddressCollision { .. } => "address_collision",
            ErrorKind::IndexOutOfBounds { .. } => "index_out_of_bounds",
            ErrorKind::TypeMismatch { .. } => "type_mismatch",
            ErrorKind::CallbackFailed { .. } => "callback_failed",
            ErrorKind::ConfigError { .. } => "config_error",
            ErrorKind::TomlError { .. } => "toml_error",
            ErrorKind::IoError { .. } => "io_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::AllocationFailed { bytes } => {
                write!(f, "failed to allocate {} bytes of native memory", bytes)
            }
            ErrorKind::CapabilityMismatch {
                receiver,
                operation,
            } => write!(f, "{} receiver does not support {}", receiver, operation),
            ErrorKind::Unsupported { feature } => write!(f, "unsupported: {}", feature),
            ErrorKind::DoubleRelease { address } => {
                write!(f, "native buffer at {:#x} is not live", address)
            }
            ErrorKind::UnknownAddress {
                address,
                registered,
            } => write!(
                f,
                "unknown native reference {}L / {:#x} ({} registered addresses)",
                address, address, registered
            ),
            ErrorKind::AddressCollision { address } => write!(
                f,
                "address {:#x} is already assigned to a different object",
                address
            ),
            ErrorKind::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds for length {}", index, len)
            }
            ErrorKind::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {}, got {}", expected, actual)
            }
            ErrorKind::CallbackFailed { method, message } => {
                write!(f, "{} callback failed: {}", method, message)
            }
            ErrorKind::ConfigError { message } => write!(f, "config error: {}", message),
            ErrorKind::TomlError { message } => write!(f, "toml error: {}", message),
            ErrorKind::IoError { message } => write!(f, "io error: {}", message),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// Main error type for bridge operations.
///
/// This wraps `exn::Exn<ErrorKind>` to provide context-aware error handling
/// while maintaining the stable `error_type()` interface.
#[derive(Debug)]
pub struct BridgeError(exn::Exn<ErrorKind>);

impl BridgeError {
    /// Create a new error from an error kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self(exn::Exn::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_error()
    }

    /// Get the error type as a string.
    pub fn error_type(&self) -> &'static str {
        self.kind().error_type()
    }

    // Convenience constructors

    /// Create an "allocation failed" error.
    pub fn allocation_failed(bytes: usize) -> Self {
        Self::new(ErrorKind::AllocationFailed { bytes })
    }

    /// Create a "capability mismatch" error.
    pub fn capability_mismatch(receiver: &'static str, operation: &'static str) -> Self {
        Self::new(ErrorKind::CapabilityMismatch {
            receiver,
            operation,
        })
    }

    /// Create an "unsupported" error.
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported {
            feature: feature.into(),
        })
    }

    /// Create a "double release" error.
    pub fn double_release(address: usize) -> Self {
        Self::new(ErrorKind::DoubleRelease { address })
    }

    /// Create an "unknown address" error.
    pub fn unknown_address(address: usize, registered: usize) -> Self {
        Self::new(ErrorKind::UnknownAddress {
            address,
            registered,
        })
    }

    /// Create an "address collision" error.
    pub fn address_collision(address: usize) -> Self {
        Self::new(ErrorKind::AddressCollision { address })
    }

    /// Create an "index out of bounds" error.
    pub fn index_out_of_bounds(index: usize, len: usize) -> Self {
        Self::new(ErrorKind::IndexOutOfBounds { index, len })
    }

    /// Create a "type mismatch" error.
    pub fn type_mismatch(expected: VectorKind, actual: VectorKind) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Create a "callback failed" error.
    pub fn callback_failed(method: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CallbackFailed {
            method,
            message: message.into(),
        })
    }

    /// Create a "config error".
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigError {
            message: message.into(),
        })
    }

    /// Check if this is an AllocationFailed error.
    pub fn is_allocation_failed(&self) -> bool {
        matches!(self.kind(), ErrorKind::AllocationFailed { .. })
    }

    /// Check if this is a CapabilityMismatch error.
    pub fn is_capability_mismatch(&self) -> bool {
        matches!(self.kind(), ErrorKind::CapabilityMismatch { .. })
    }

    /// Check if this is an Unsupported error.
    pub fn is_unsupported(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unsupported { .. })
    }

    /// Check if this is an UnknownAddress error.
    pub fn is_unknown_address(&self) -> bool {
        matches!(self.kind(), ErrorKind::UnknownAddress { .. })
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        // ErrorKind is the root cause, no further source
        None
    }
}

impl From<ErrorKind> for BridgeError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError {
            message: e.to_string(),
        })
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(e: toml::de::Error) -> Self {
        Self::new(ErrorKind::TomlError {
            message: e.to_string(),
        })
    }
}

impl From<toml::ser::Error> for BridgeError {
    fn from(e: toml::ser::Error) -> Self {
        Self::new(ErrorKind::TomlError {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_types_are_stable() {
        assert_eq!(
            BridgeError::allocation_failed(16).error_type(),
            "allocation_failed"
        );
        assert_eq!(
            BridgeError::capability_mismatch("function", "read_element").error_type(),
            "capability_mismatch"
        );
        assert_eq!(BridgeError::unsupported("x").error_type(), "unsupported");
        assert_eq!(BridgeError::double_release(1).error_type(), "double_release");
        assert_eq!(
            BridgeError::unknown_address(1, 0).error_type(),
            "unknown_address"
        );
    }

    #[test]
    fn unknown_address_message_mentions_hex_address() {
        let err = BridgeError::unknown_address(0xdef0, 3);
        let msg = err.kind().to_string();
        assert!(msg.contains("0xdef0"));
        assert!(msg.contains("3 registered"));
    }

    #[test]
    fn predicates_match_kind() {
        assert!(BridgeError::unsupported("dataptr").is_unsupported());
        assert!(!BridgeError::unsupported("dataptr").is_capability_mismatch());
        assert!(BridgeError::capability_mismatch("pointer", "get_size").is_capability_mismatch());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BridgeError = io.into();
        assert_eq!(err.error_type(), "io_error");
    }
}
