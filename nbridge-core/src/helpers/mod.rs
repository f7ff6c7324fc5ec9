//! Internal helpers: completeness bookkeeping and native memory.

pub mod completeness;
pub mod memory;

pub use completeness::{scan_complete, Completeness, NaCheck};
pub use memory::{
    is_live, leak_report, memory_check_enabled, set_memory_check, LiveAllocation, NativeBuffer, Ownership, EMPTY_DATA_ADDRESS, NULL_ADDRESS,
};
