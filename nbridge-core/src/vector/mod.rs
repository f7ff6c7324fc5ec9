//! Vectors and their storage.

mod any;
mod atomic;
mod cell;

pub use any::AnyVector;
pub use atomic::{AtomicVector, Representation};
pub use cell::{NativeCell, NativeScope};
