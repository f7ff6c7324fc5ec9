//! Alternate representation (ALTREP) dispatch.
//!
//! An [`AltrepClass`] lets foreign code override how a vector reports its
//! length, reads elements, hands out a data pointer, and reduces, without
//! forcing the data into a managed array. An [`AltrepVector`] is one
//! instance of such a class.

mod class;
mod instance;

pub use class::{
    AltrepClass, AltrepClassBuilder, AltrepPayload, DataptrMethod, DataptrOrNullMethod,
    EltMethod, GetRegionMethod, IsSortedMethod, LengthMethod, NoNaMethod, ReduceMethod,
    Sortedness,
};
pub use instance::{AltrepVector, Materialization};
