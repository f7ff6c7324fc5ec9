//! Dual-representation storage for one primitive array.
//!
//! A [`NativeCell`] starts out backed by a managed `Vec`. Promotion copies the
//! contents into a [`NativeBuffer`]; from then until the lease ends every read
//! and write goes through native memory and the `Vec` is only a stale
//! snapshot. Ending the lease copies native content back and frees the
//! buffer exactly once.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, Weak};

use crate::helpers::{Completeness, NativeBuffer, NULL_ADDRESS};
use crate::types::{NativeElement, VectorKind};
use crate::BridgeError;

#[derive(Debug)]
pub struct NativeCell<T: NativeElement> {
    managed: Vec<T>,
    native: Mutex<Option<NativeBuffer<T::Native>>>,
    /// Address of `native`, or `NULL_ADDRESS` while unpromoted.
    address: AtomicUsize,
    owner: Weak<Completeness>,
    leases: AtomicUsize,
}

impl<T: NativeElement> NativeCell<T> {
    /// A managed cell reporting NA writes to `owner`.
    pub fn new(values: Vec<T>, owner: Weak<Completeness>) -> Self {
        Self {
            managed: values,
            native: Mutex::new(None),
            address: AtomicUsize::new(NULL_ADDRESS),
            owner,
            leases: AtomicUsize::new(0),
        }
    }

    /// A cell whose native buffer is already in place.
    ///
    /// The managed array starts as a snapshot of the buffer. No allocation is
    /// counted; the buffer was obtained elsewhere.
    pub fn from_native_buffer(buffer: NativeBuffer<T::Native>, owner: Weak<Completeness>) -> Self {
        let managed: Vec<T> = buffer.to_vec().into_iter().map(T::from_native).collect();
        let address = buffer.address();
        Self {
            managed,
            native: Mutex::new(Some(buffer)),
            address: AtomicUsize::new(address),
            owner,
            leases: AtomicUsize::new(0),
        }
    }

    /// A cell over `len` elements of foreign-owned memory at `ptr`.
    ///
    /// # Safety
    ///
    /// Same contract as [`NativeBuffer::from_external`]: `ptr` must be valid
    /// for `len` elements until the cell is closed or dropped.
    pub unsafe fn from_external(
        ptr: *mut T::Native,
        len: usize,
        owner: Weak<Completeness>,
    ) -> Result<Self, BridgeError> {
        let buffer = NativeBuffer::from_external(ptr, len)?;
        Ok(Self::from_native_buffer(buffer, owner))
    }

    pub fn kind(&self) -> VectorKind {
        T::KIND
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.managed.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.managed.is_empty()
    }

    #[inline]
    pub fn is_promoted(&self) -> bool {
        self.address.load(Ordering::Acquire) != NULL_ADDRESS
    }

    /// The leased native address, if promoted.
    pub fn native_address(&self) -> Option<usize> {
        match self.address.load(Ordering::Acquire) {
            NULL_ADDRESS => None,
            address => Some(address),
        }
    }

    /// Number of native allocations this cell has performed.
    pub fn lease_count(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }

    /// Read element `index` from whichever representation is authoritative.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn read(&self, index: usize) -> T {
        let len = self.len();
        assert!(index < len, "index {} out of bounds for length {}", index, len);
        match self.address.load(Ordering::Acquire) {
            NULL_ADDRESS => self.managed[index],
            address => {
                // SAFETY: a non-null address always belongs to the buffer held
                // in `native`, which is valid for `len` elements and is only
                // taken out by `close`, which needs `&mut self`.
                let native = unsafe { (address as *const T::Native).add(index).read() };
                T::from_native(native)
            }
        }
    }

    /// Write element `index`, degrading the owner's completeness on NA.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn write(&mut self, index: usize, value: T) {
        let len = self.len();
        assert!(index < len, "index {} out of bounds for length {}", index, len);
        match self.native.get_mut().unwrap_or_else(PoisonError::into_inner) {
            Some(buffer) => buffer.write(index, value.to_native()),
            None => self.managed[index] = value,
        }
        if value.is_na() {
            self.notify_na();
        }
    }

    /// Promote to native memory, returning the buffer address.
    ///
    /// Idempotent: only the first call allocates and copies; concurrent
    /// callers are serialised and all observe the same address.
    pub fn convert_to_native(&self) -> Result<usize, BridgeError> {
        let current = self.address.load(Ordering::Acquire);
        if current != NULL_ADDRESS {
            return Ok(current);
        }

        let mut slot = self.native.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(buffer) = slot.as_ref() {
            return Ok(buffer.address());
        }

        let buffer = NativeBuffer::from_iter_exact(
            self.managed.len(),
            self.managed.iter().map(|v| v.to_native()),
            kind_tag(T::KIND),
        )?;
        let address = buffer.address();
        *slot = Some(buffer);
        self.leases.fetch_add(1, Ordering::AcqRel);
        self.address.store(address, Ordering::Release);
        log::debug!(
            "promoted {} vector of length {} to {:#x}",
            T::KIND,
            self.managed.len(),
            address
        );
        Ok(address)
    }

    /// Current contents as a managed array.
    ///
    /// If promoted, native content is first copied back in place; the native
    /// buffer stays leased.
    pub fn materialized_value(&mut self) -> &[T] {
        self.copy_back();
        &self.managed
    }

    /// Copy of the current contents without touching either representation.
    pub fn to_vec(&self) -> Vec<T> {
        (0..self.len()).map(|i| self.read(i)).collect()
    }

    /// End the native lease: copy back and release the buffer.
    ///
    /// Returns whether anything was released. A second call, or a call on an
    /// unpromoted cell, does nothing.
    pub fn close(&mut self) -> bool {
        self.copy_back();
        let buffer = self
            .native
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.address.store(NULL_ADDRESS, Ordering::Release);
        match buffer {
            Some(buffer) => {
                let address = buffer.address();
                if let Err(e) = buffer.release() {
                    log::error!("releasing {:#x} failed: {}", address, e);
                }
                log::debug!("released native lease of {} vector at {:#x}", T::KIND, address);
                true
            }
            None => false,
        }
    }

    /// Promote and return a guard that ends the lease when dropped.
    pub fn lease(&mut self) -> Result<NativeScope<'_, T>, BridgeError> {
        let address = self.convert_to_native()?;
        Ok(NativeScope {
            cell: self,
            address,
        })
    }

    fn copy_back(&mut self) {
        let Self {
            managed,
            native,
            owner,
            ..
        } = self;
        let Some(buffer) = native.get_mut().unwrap_or_else(PoisonError::into_inner) else {
            return;
        };
        let mut saw_na = false;
        for (i, slot) in managed.iter_mut().enumerate() {
            let value = T::from_native(buffer.read(i));
            saw_na |= value.is_na();
            *slot = value;
        }
        if saw_na {
            log::trace!("NA found in native content of {} vector", T::KIND);
            if let Some(flag) = owner.upgrade() {
                flag.set_incomplete();
            }
        }
    }

    fn notify_na(&self) {
        if let Some(flag) = self.owner.upgrade() {
            flag.set_incomplete();
        }
    }
}

fn kind_tag(kind: VectorKind) -> &'static str {
    match kind {
        VectorKind::Double => "double vector",
        VectorKind::Integer => "integer vector",
        VectorKind::Logical => "logical vector",
        VectorKind::Raw => "raw vector",
        VectorKind::Complex => "complex vector",
    }
}

/// A native lease on a [`NativeCell`]. Dropping it copies native content back
/// and releases the buffer.
#[derive(Debug)]
pub struct NativeScope<'a, T: NativeElement> {
    cell: &'a mut NativeCell<T>,
    address: usize,
}

impl<T: NativeElement> NativeScope<'_, T> {
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn as_mut_ptr(&self) -> *mut T::Native {
        self.address as *mut T::Native
    }
}

impl<T: NativeElement> Deref for NativeScope<'_, T> {
    type Target = NativeCell<T>;

    fn deref(&self) -> &Self::Target {
        self.cell
    }
}

impl<T: NativeElement> DerefMut for NativeScope<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cell
    }
}

impl<T: NativeElement> Drop for NativeScope<'_, T> {
    fn drop(&mut self) {
        self.cell.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::memory::CHECK_TOGGLE;
    use crate::helpers::{is_live, set_memory_check, EMPTY_DATA_ADDRESS};
    use crate::types::{na_real, Logical, NA_INTEGER};
    use std::sync::Arc;

    fn owned<T: NativeElement>(values: Vec<T>) -> (Arc<Completeness>, NativeCell<T>) {
        let flag = Arc::new(Completeness::new(true));
        let cell = NativeCell::new(values, Arc::downgrade(&flag));
        (flag, cell)
    }

    #[test]
    fn promotion_is_idempotent() {
        let (_flag, cell) = owned(vec![1.0f64, 2.0, 3.0]);
        let first = cell.convert_to_native().unwrap();
        let second = cell.convert_to_native().unwrap();
        assert_eq!(first, second);
        assert_eq!(cell.lease_count(), 1);
        assert_eq!(cell.native_address(), Some(first));
    }

    #[test]
    fn concurrent_promotion_allocates_once() {
        let (_flag, cell) = owned((0..1000).collect::<Vec<i32>>());
        let addresses: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cell.convert_to_native().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cell.lease_count(), 1);
    }

    #[test]
    fn round_trip_without_native_writes_is_identity() {
        let values = vec![3i32, -1, NA_INTEGER, 7];
        let (_flag, mut cell) = owned(values.clone());
        cell.convert_to_native().unwrap();
        assert_eq!(cell.materialized_value(), values.as_slice());
        assert!(cell.close());
        assert_eq!(cell.to_vec(), values);
    }

    #[test]
    fn reads_and_writes_go_through_native_after_promotion() {
        let (_flag, mut cell) = owned(vec![1i32, 2, 3]);
        let address = cell.convert_to_native().unwrap();
        // foreign code writes through the pointer
        unsafe { (address as *mut i32).add(1).write(20) };
        assert_eq!(cell.read(1), 20);
        cell.write(2, 30);
        assert_eq!(unsafe { (address as *const i32).add(2).read() }, 30);
        assert_eq!(cell.materialized_value(), &[1, 20, 30]);
    }

    #[test]
    fn na_write_degrades_owner() {
        let (flag, mut cell) = owned(vec![1.0f64, 2.0]);
        cell.write(0, 5.0);
        assert!(flag.is_complete());
        cell.write(1, na_real());
        assert!(!flag.is_complete());
        cell.write(1, 2.0);
        assert!(!flag.is_complete());
    }

    #[test]
    fn native_na_is_detected_on_copy_back() {
        let (flag, mut cell) = owned(vec![1i32, 2]);
        let address = cell.convert_to_native().unwrap();
        unsafe { (address as *mut i32).write(NA_INTEGER) };
        assert!(flag.is_complete());
        cell.close();
        assert!(!flag.is_complete());
        assert_eq!(cell.read(0), NA_INTEGER);
    }

    #[test]
    fn close_twice_releases_once() {
        let _guard = CHECK_TOGGLE.lock().unwrap_or_else(PoisonError::into_inner);
        set_memory_check(true);
        let (_flag, mut cell) = owned(vec![1u8, 2, 3]);
        let address = cell.convert_to_native().unwrap();
        assert!(is_live(address));
        assert!(cell.close());
        assert!(!is_live(address));
        assert!(!cell.close());
        assert!(!cell.is_promoted());
    }

    #[test]
    fn promotion_after_close_starts_new_lease() {
        let (_flag, mut cell) = owned(vec![1i32, 2]);
        cell.convert_to_native().unwrap();
        cell.close();
        cell.convert_to_native().unwrap();
        assert_eq!(cell.lease_count(), 2);
        cell.close();
    }

    #[test]
    fn lease_guard_copies_back_on_drop() {
        let (_flag, mut cell) = owned(vec![0.5f64, 1.5]);
        {
            let scope = cell.lease().unwrap();
            unsafe { scope.as_mut_ptr().write(9.5) };
            assert!(scope.is_promoted());
        }
        assert!(!cell.is_promoted());
        assert_eq!(cell.to_vec(), vec![9.5, 1.5]);
    }

    #[test]
    fn empty_vector_promotes_to_bad_address() {
        let (_flag, mut cell) = owned(Vec::<i32>::new());
        assert_eq!(cell.convert_to_native().unwrap(), EMPTY_DATA_ADDRESS);
        assert!(cell.is_promoted());
        assert!(cell.close());
    }

    #[test]
    fn logical_native_layout_is_int() {
        let (_flag, mut cell) = owned(vec![Logical::True, Logical::False, Logical::Na]);
        let address = cell.convert_to_native().unwrap();
        let native = unsafe { std::slice::from_raw_parts(address as *const i32, 3) };
        assert_eq!(native, &[1, 0, NA_INTEGER]);
        unsafe { (address as *mut i32).add(1).write(17) };
        cell.close();
        assert_eq!(cell.read(1), Logical::True);
    }

    #[test]
    fn external_memory_is_written_back_not_freed() {
        let flag = Arc::new(Completeness::new(true));
        let mut backing = vec![1.0f64, 2.0];
        let mut cell = unsafe {
            NativeCell::<f64>::from_external(backing.as_mut_ptr(), 2, Arc::downgrade(&flag))
        }
        .unwrap();
        assert!(cell.is_promoted());
        assert_eq!(cell.lease_count(), 0);
        cell.write(0, 4.0);
        assert!(cell.close());
        assert_eq!(backing, vec![4.0, 2.0]);
        assert_eq!(cell.to_vec(), vec![4.0, 2.0]);
    }

    #[test]
    fn dropped_owner_is_ignored() {
        let (flag, mut cell) = owned(vec![1i32]);
        drop(flag);
        cell.write(0, NA_INTEGER);
        assert_eq!(cell.read(0), NA_INTEGER);
    }
}
