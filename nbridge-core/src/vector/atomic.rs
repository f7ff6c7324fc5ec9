//! Typed vectors: a completeness flag plus one representation.

use std::sync::Arc;

use crate::altrep::{AltrepClass, AltrepPayload, AltrepVector};
use crate::helpers::{scan_complete, Completeness, NativeBuffer};
use crate::types::{NativeElement, Scalar, VectorKind};
use crate::vector::NativeCell;
use crate::BridgeError;

/// How a vector's elements are stored.
#[derive(Debug)]
pub enum Representation<T: NativeElement> {
    /// Managed array, promotable to a native buffer.
    Managed(NativeCell<T>),
    /// Foreign callbacks decide.
    Altrep(AltrepVector<T>),
}

/// A vector of one element family.
///
/// The vector owns its completeness flag; representations only hold a weak
/// reference to it.
#[derive(Debug)]
pub struct AtomicVector<T: NativeElement> {
    completeness: Arc<Completeness>,
    repr: Representation<T>,
}

impl<T: NativeElement> AtomicVector<T> {
    /// A managed vector; completeness is computed from `values`.
    pub fn new(values: Vec<T>) -> Self {
        let complete = scan_complete(&values);
        Self::with_completeness(values, complete)
    }

    /// A managed vector with a caller-supplied completeness flag.
    pub fn with_completeness(values: Vec<T>, complete: bool) -> Self {
        let completeness = Arc::new(Completeness::new(complete));
        let cell = NativeCell::new(values, Arc::downgrade(&completeness));
        Self {
            completeness,
            repr: Representation::Managed(cell),
        }
    }

    /// A vector whose storage is already native.
    pub fn from_native_buffer(buffer: NativeBuffer<T::Native>) -> Self {
        let completeness = Arc::new(Completeness::new(true));
        let cell = NativeCell::from_native_buffer(buffer, Arc::downgrade(&completeness));
        Self::seeded(completeness, cell)
    }

    /// A vector over foreign-owned memory.
    ///
    /// # Safety
    ///
    /// See [`NativeBuffer::from_external`].
    pub unsafe fn from_external(ptr: *mut T::Native, len: usize) -> Result<Self, BridgeError> {
        let completeness = Arc::new(Completeness::new(true));
        let cell = NativeCell::from_external(ptr, len, Arc::downgrade(&completeness))?;
        Ok(Self::seeded(completeness, cell))
    }

    fn seeded(completeness: Arc<Completeness>, cell: NativeCell<T>) -> Self {
        if !scan_complete(&cell.to_vec()) {
            completeness.set_incomplete();
        }
        Self {
            completeness,
            repr: Representation::Managed(cell),
        }
    }

    /// An instance of an ALTREP class. `storage` backs the default
    /// behavior of slots the class leaves empty.
    ///
    /// Completeness is taken from the class's `no_na` answer; without one the
    /// vector is treated as possibly containing NA.
    pub fn altrep(class: Arc<AltrepClass<T>>, payload: AltrepPayload, storage: Vec<T>) -> Self {
        let completeness = Arc::new(Completeness::new(true));
        let instance = AltrepVector::new(class, payload, storage, Arc::downgrade(&completeness));
        if instance.no_na() != Some(true) {
            completeness.set_incomplete();
        }
        Self {
            completeness,
            repr: Representation::Altrep(instance),
        }
    }

    pub fn kind(&self) -> VectorKind {
        T::KIND
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Representation::Managed(cell) => cell.len(),
            Representation::Altrep(alt) => alt.length(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_altrep(&self) -> bool {
        matches!(self.repr, Representation::Altrep(_))
    }

    pub fn representation(&self) -> &Representation<T> {
        &self.repr
    }

    pub fn cell(&self) -> Option<&NativeCell<T>> {
        match &self.repr {
            Representation::Managed(cell) => Some(cell),
            Representation::Altrep(_) => None,
        }
    }

    pub fn cell_mut(&mut self) -> Option<&mut NativeCell<T>> {
        match &mut self.repr {
            Representation::Managed(cell) => Some(cell),
            Representation::Altrep(_) => None,
        }
    }

    pub fn altrep_instance(&self) -> Option<&AltrepVector<T>> {
        match &self.repr {
            Representation::Altrep(alt) => Some(alt),
            Representation::Managed(_) => None,
        }
    }

    pub fn altrep_instance_mut(&mut self) -> Option<&mut AltrepVector<T>> {
        match &mut self.repr {
            Representation::Altrep(alt) => Some(alt),
            Representation::Managed(_) => None,
        }
    }

    /// True while no NA has been stored in this vector.
    pub fn is_complete(&self) -> bool {
        self.completeness.is_complete()
    }

    pub fn completeness(&self) -> &Arc<Completeness> {
        &self.completeness
    }

    pub fn get(&self, index: usize) -> Result<T, BridgeError> {
        match &self.repr {
            Representation::Managed(cell) => {
                check_index(index, cell.len())?;
                Ok(cell.read(index))
            }
            Representation::Altrep(alt) => alt.elt(index),
        }
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<(), BridgeError> {
        match &mut self.repr {
            Representation::Managed(cell) => {
                check_index(index, cell.len())?;
                cell.write(index, value);
                Ok(())
            }
            Representation::Altrep(alt) => alt.set_elt(index, value),
        }
    }

    pub fn get_scalar(&self, index: usize) -> Result<Scalar, BridgeError> {
        self.get(index).map(NativeElement::into_scalar)
    }

    /// Store a type-erased value; its kind must match `T`.
    pub fn set_scalar(&mut self, index: usize, value: Scalar) -> Result<(), BridgeError> {
        self.set(index, T::from_scalar(value)?)
    }

    /// Hand the vector to foreign code as a raw address.
    ///
    /// Managed vectors are promoted; ALTREP vectors are materialized for
    /// writing.
    pub fn to_native(&mut self) -> Result<usize, BridgeError> {
        match &mut self.repr {
            Representation::Managed(cell) => cell.convert_to_native(),
            Representation::Altrep(alt) => alt.dataptr(true),
        }
    }

    /// End a managed vector's native lease. ALTREP materialization is
    /// permanent, so there is nothing to release for those.
    pub fn release_native(&mut self) -> bool {
        match &mut self.repr {
            Representation::Managed(cell) => cell.close(),
            Representation::Altrep(_) => false,
        }
    }

    /// Whether the vector currently has a native (or materialized) address.
    pub fn is_promoted(&self) -> bool {
        match &self.repr {
            Representation::Managed(cell) => cell.is_promoted(),
            Representation::Altrep(alt) => alt.is_materialized(),
        }
    }

    pub fn values(&self) -> Result<Vec<T>, BridgeError> {
        match &self.repr {
            Representation::Managed(cell) => Ok(cell.to_vec()),
            Representation::Altrep(alt) => alt.values(),
        }
    }

    pub fn sum(&self, na_rm: bool) -> Result<Scalar, BridgeError> {
        match &self.repr {
            Representation::Managed(cell) => T::sum_of(managed_iter(cell), na_rm),
            Representation::Altrep(alt) => alt.sum(na_rm),
        }
    }

    pub fn min(&self, na_rm: bool) -> Result<Scalar, BridgeError> {
        match &self.repr {
            Representation::Managed(cell) => T::min_of(managed_iter(cell), na_rm),
            Representation::Altrep(alt) => alt.min(na_rm),
        }
    }

    pub fn max(&self, na_rm: bool) -> Result<Scalar, BridgeError> {
        match &self.repr {
            Representation::Managed(cell) => T::max_of(managed_iter(cell), na_rm),
            Representation::Altrep(alt) => alt.max(na_rm),
        }
    }
}

fn managed_iter<T: NativeElement>(cell: &NativeCell<T>) -> impl Iterator<Item = T> + '_ {
    (0..cell.len()).map(move |i| cell.read(i))
}

fn check_index(index: usize, len: usize) -> Result<(), BridgeError> {
    if index < len {
        Ok(())
    } else {
        Err(BridgeError::index_out_of_bounds(index, len))
    }
}

impl<T: NativeElement> From<Vec<T>> for AtomicVector<T> {
    fn from(values: Vec<T>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{na_real, Logical, NA_INTEGER};

    #[test]
    fn construction_scans_completeness() {
        assert!(AtomicVector::new(vec![1.0, 2.0]).is_complete());
        assert!(!AtomicVector::new(vec![1.0, na_real()]).is_complete());
        assert!(!AtomicVector::with_completeness(vec![1i32], false).is_complete());
    }

    #[test]
    fn completeness_survives_overwriting_the_na() {
        let mut vector = AtomicVector::new(vec![1i32, 2, 3]);
        vector.set(0, NA_INTEGER).unwrap();
        vector.set(0, 4).unwrap();
        assert!(!vector.is_complete());
    }

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let mut vector = AtomicVector::new(vec![Logical::True]);
        assert_eq!(vector.get(1).unwrap_err().error_type(), "index_out_of_bounds");
        assert!(vector.set(3, Logical::False).is_err());
    }

    #[test]
    fn managed_vector_promotes_and_releases() {
        let mut vector = AtomicVector::new(vec![1i32, 2, 3]);
        let address = vector.to_native().unwrap();
        assert_eq!(vector.to_native().unwrap(), address);
        unsafe { (address as *mut i32).add(2).write(30) };
        assert_eq!(vector.get(2).unwrap(), 30);
        assert!(vector.release_native());
        assert!(!vector.is_promoted());
        assert_eq!(vector.values().unwrap(), vec![1, 2, 30]);
        assert_eq!(vector.cell().map(|c| c.lease_count()), Some(1));
    }

    #[test]
    fn native_na_degrades_vector_on_release() {
        let mut vector = AtomicVector::new(vec![1.0f64, 2.0]);
        let address = vector.to_native().unwrap();
        unsafe { (address as *mut f64).write(na_real()) };
        vector.release_native();
        assert!(!vector.is_complete());
    }

    #[test]
    fn altrep_completeness_follows_no_na() {
        let unknown = AltrepClass::<i32>::builder("unknown").build();
        let vector = AtomicVector::altrep(unknown, AltrepPayload::new(), vec![1]);
        assert!(!vector.is_complete());

        let vouched = AltrepClass::<i32>::builder("vouched").no_na(|_| true).build();
        let vector = AtomicVector::altrep(vouched, AltrepPayload::new(), vec![1]);
        assert!(vector.is_complete());
        assert!(vector.is_altrep());
    }

    #[test]
    fn from_native_buffer_is_already_promoted() {
        let buffer = NativeBuffer::from_slice(&[1i32, NA_INTEGER], "test").unwrap();
        let address = buffer.address();
        let mut vector = AtomicVector::<i32>::from_native_buffer(buffer);
        assert!(vector.is_promoted());
        assert!(!vector.is_complete());
        assert_eq!(vector.to_native().unwrap(), address);
        assert_eq!(vector.cell().map(|c| c.lease_count()), Some(0));
    }

    #[test]
    fn managed_reductions() {
        let vector = AtomicVector::new(vec![3.0, -1.0, 2.5]);
        assert_eq!(vector.sum(false).unwrap(), Scalar::Double(4.5));
        assert_eq!(vector.min(false).unwrap(), Scalar::Double(-1.0));
        assert_eq!(vector.max(false).unwrap(), Scalar::Double(3.0));

        let raw = AtomicVector::new(vec![1u8, 2]);
        assert!(raw.sum(false).unwrap_err().is_unsupported());
    }
}
