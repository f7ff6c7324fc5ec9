//! nbridge Core Library
//!
//! Native-memory interop bridge for a managed vector runtime. A vector that
//! normally lives in a managed array can be handed to foreign code as a raw
//! pointer, and foreign code can take over how a vector is stored and read.
//!
//! # Architecture
//!
//! - `types`: element kinds, scalars, NA sentinels, config, errors
//! - `helpers`: completeness tracking and native memory
//! - `vector`: dual-representation cells and typed / type-erased vectors
//! - `altrep`: ALTREP class descriptors and instances
//! - `registry`: process-wide pointer identity table
//! - `mediator`: the foreign operation set and foreign-call scopes

pub mod altrep;
pub mod helpers;
pub mod mediator;
pub mod registry;
pub mod types;
pub mod vector;

// Re-export commonly used types at crate root
pub use types::{
    is_na_real, na_real, BridgeConfig, BridgeError, ErrorKind, ExecutionMode, Logical,
    NativeElement, RComplex, Scalar, VectorKind, NA_INTEGER, NA_LOGICAL,
};

pub use altrep::{AltrepClass, AltrepPayload, AltrepVector, Materialization, Sortedness};
pub use helpers::{Completeness, NaCheck, NativeBuffer, EMPTY_DATA_ADDRESS, NULL_ADDRESS};
pub use mediator::{Capability, ForeignFunction, ForeignValue, Mediator, Message, Receiver, Reply};
pub use registry::{MirrorRef, MirrorRegistry, MirrorTarget, MIRROR_ADDRESS_BASE};
pub use vector::{AnyVector, AtomicVector, NativeCell, NativeScope, Representation};

/// Library version, with the git commit when it was available at build time.
pub fn version() -> &'static str {
    env!("NBRIDGE_VERSION_STRING")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_starts_with_package_version() {
        assert!(version().starts_with(env!("CARGO_PKG_VERSION")));
    }

    // A 10-element integer vector whose class only knows its length: the
    // length comes from the callback, elements from the default storage.
    #[test]
    fn length_callback_with_default_elements() {
        let class = AltrepClass::<i32>::builder("length_only").length(|_| 10).build();
        let storage: Vec<i32> = (1..=10).collect();
        let vector = AtomicVector::altrep(class, AltrepPayload::new(), storage);
        assert_eq!(vector.len(), 10);
        assert_eq!(vector.get(0).unwrap(), 1);
    }
}
