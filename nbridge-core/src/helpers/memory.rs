//! Native memory owned or borrowed by the bridge.
//!
//! [`NativeBuffer`] is the only way the bridge allocates memory that foreign
//! code may see. Owned buffers are freed when dropped; external buffers
//! wrap memory that belongs to foreign code and are never freed here.
//!
//! When the memory check is on, every owned allocation is recorded in a
//! process-wide table. Freeing an address that is not in the table is
//! logged as a `MEMORY ERROR` and reported as a double release.

use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use ahash::AHashMap;

use crate::BridgeError;

/// Address reported for promoted zero-length data. Never dereferenced.
pub const EMPTY_DATA_ADDRESS: usize = 0xBAD;

/// Address meaning "not promoted" / "no native representation".
pub const NULL_ADDRESS: usize = 0;

// =============================================================================
// Memory check
// =============================================================================

static MEMORY_CHECK: AtomicBool = AtomicBool::new(false);
static LIVE: OnceLock<Mutex<AHashMap<usize, LiveAllocation>>> = OnceLock::new();

/// Held by tests that flip the memory check.
#[cfg(test)]
pub(crate) static CHECK_TOGGLE: Mutex<()> = Mutex::new(());

/// One allocation recorded by the memory check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveAllocation {
    pub address: usize,
    pub bytes: usize,
    pub tag: &'static str,
}

fn lock<T>(table: &'static OnceLock<Mutex<T>>) -> MutexGuard<'static, T>
where
    T: Default,
{
    table
        .get_or_init(|| Mutex::new(T::default()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Turn the live-allocation table on or off. Allocations made while it is
/// off are never recorded.
pub fn set_memory_check(enabled: bool) {
    MEMORY_CHECK.store(enabled, Ordering::Release);
}

pub fn memory_check_enabled() -> bool {
    MEMORY_CHECK.load(Ordering::Acquire)
}

fn record(address: usize, bytes: usize, tag: &'static str) {
    log::trace!("allocated {} bytes at {:#x} ({})", bytes, address, tag);
    let previous = lock(&LIVE).insert(
        address,
        LiveAllocation {
            address,
            bytes,
            tag,
        },
    );
    if let Some(previous) = previous {
        log::error!(
            "MEMORY ERROR: {:#x} allocated while still live ({})",
            address,
            previous.tag
        );
    }
}

fn forget(address: usize) -> Result<(), BridgeError> {
    match lock(&LIVE).remove(&address) {
        Some(_) => Ok(()),
        None => {
            log::error!("MEMORY ERROR: freeing {:#x} which is not live", address);
            Err(BridgeError::double_release(address))
        }
    }
}

/// Whether `address` is a recorded, not yet freed allocation.
pub fn is_live(address: usize) -> bool {
    lock(&LIVE).contains_key(&address)
}

/// Allocations recorded by the memory check that have not been freed,
/// ordered by address.
pub fn leak_report() -> Vec<LiveAllocation> {
    let mut live: Vec<_> = lock(&LIVE).values().cloned().collect();
    live.sort_by_key(|a| a.address);
    for item in &live {
        log::warn!("possible leak: {:#x} ({} bytes, {})", item.address, item.bytes, item.tag);
    }
    live
}

// =============================================================================
// NativeBuffer
// =============================================================================

/// Who frees a [`NativeBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Allocated by the bridge; freed on drop.
    Owned,
    /// Owned by foreign code; never freed by the bridge.
    External,
}

/// A naturally aligned native array of `len` elements of layout `N`.
#[derive(Debug)]
pub struct NativeBuffer<N: Copy> {
    ptr: NonNull<N>,
    len: usize,
    ownership: Ownership,
    tracked: bool,
    tag: &'static str,
    _marker: PhantomData<N>,
}

// SAFETY: the buffer is plain memory of `Copy` elements; synchronising
// element access is the caller's responsibility, as with any raw pointer
// handed to foreign code.
unsafe impl<N: Copy + Send> Send for NativeBuffer<N> {}
unsafe impl<N: Copy + Sync> Sync for NativeBuffer<N> {}

impl<N: Copy> NativeBuffer<N> {
    /// Allocate room for `len` elements. The contents are uninitialised
    /// until written; use [`NativeBuffer::from_slice`] for a filled buffer.
    fn allocate(len: usize, tag: &'static str) -> Result<Self, BridgeError> {
        let bytes = len.saturating_mul(std::mem::size_of::<N>());
        if len == 0 || bytes == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len,
                ownership: Ownership::Owned,
                tracked: false,
                tag,
                _marker: PhantomData,
            });
        }

        let layout = Layout::array::<N>(len).map_err(|_| BridgeError::allocation_failed(bytes))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) } as *mut N;
        let ptr = NonNull::new(raw).ok_or_else(|| BridgeError::allocation_failed(bytes))?;

        let tracked = memory_check_enabled();
        if tracked {
            record(ptr.as_ptr() as usize, bytes, tag);
        }
        Ok(Self {
            ptr,
            len,
            ownership: Ownership::Owned,
            tracked,
            tag,
            _marker: PhantomData,
        })
    }

    /// Allocate a buffer and copy `data` into it.
    pub fn from_slice(data: &[N], tag: &'static str) -> Result<Self, BridgeError> {
        let buffer = Self::allocate(data.len(), tag)?;
        if !data.is_empty() {
            // SAFETY: freshly allocated, sized for data.len() elements, and
            // cannot overlap `data`.
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), buffer.ptr.as_ptr(), data.len());
            }
        }
        Ok(buffer)
    }

    /// Allocate a buffer filled from an iterator of exactly `len` items.
    pub fn from_iter_exact<I>(len: usize, items: I, tag: &'static str) -> Result<Self, BridgeError>
    where
        I: IntoIterator<Item = N>,
    {
        let buffer = Self::allocate(len, tag)?;
        let mut written = 0;
        for (i, item) in items.into_iter().take(len).enumerate() {
            // SAFETY: i < len.
            unsafe { buffer.ptr.as_ptr().add(i).write(item) };
            written += 1;
        }
        if written != len {
            return Err(BridgeError::callback_failed(
                "fill",
                format!("expected {} elements, got {}", len, written),
            ));
        }
        Ok(buffer)
    }

    /// Wrap memory owned by foreign code.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` elements of `N`,
    /// suitably aligned, and stay valid for the lifetime of the buffer.
    pub unsafe fn from_external(ptr: *mut N, len: usize) -> Result<Self, BridgeError> {
        let ptr = if len == 0 {
            NonNull::dangling()
        } else {
            NonNull::new(ptr).ok_or_else(|| {
                BridgeError::callback_failed("external", "null pointer for non-empty buffer")
            })?
        };
        Ok(Self {
            ptr,
            len,
            ownership: Ownership::External,
            tracked: false,
            tag: "external",
            _marker: PhantomData,
        })
    }

    /// The address handed to foreign code.
    pub fn address(&self) -> usize {
        if self.len == 0 {
            EMPTY_DATA_ADDRESS
        } else {
            self.ptr.as_ptr() as usize
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn as_ptr(&self) -> *const N {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut N {
        self.ptr.as_ptr()
    }

    /// Read element `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[inline]
    pub fn read(&self, index: usize) -> N {
        assert!(index < self.len, "index {} out of bounds for length {}", index, self.len);
        // SAFETY: bounds checked; memory valid for len elements.
        unsafe { self.ptr.as_ptr().add(index).read() }
    }

    /// Write element `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[inline]
    pub fn write(&self, index: usize, value: N) {
        assert!(index < self.len, "index {} out of bounds for length {}", index, self.len);
        // SAFETY: bounds checked; memory valid for len elements.
        unsafe { self.ptr.as_ptr().add(index).write(value) }
    }

    /// Copy the whole buffer out.
    pub fn to_vec(&self) -> Vec<N> {
        (0..self.len).map(|i| self.read(i)).collect()
    }

    /// Explicitly free the buffer, reporting a memory-check failure.
    pub fn release(mut self) -> Result<(), BridgeError> {
        let result = self.free();
        self.len = 0;
        result
    }

    fn free(&mut self) -> Result<(), BridgeError> {
        if self.ownership == Ownership::External || self.len == 0 {
            return Ok(());
        }
        let address = self.ptr.as_ptr() as usize;
        log::debug!("releasing {} native buffer at {:#x}", self.tag, address);
        let checked = if self.tracked { forget(address) } else { Ok(()) };
        if let Ok(layout) = Layout::array::<N>(self.len) {
            // SAFETY: allocated in `allocate` with this exact layout; len is
            // zeroed by the caller afterwards so this runs once.
            unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) };
        }
        checked
    }
}

impl<N: Copy> Drop for NativeBuffer<N> {
    fn drop(&mut self) {
        // Errors are already logged by the memory check.
        let _ = self.free();
        self.len = 0;
    }
}
