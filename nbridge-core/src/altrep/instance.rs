//! ALTREP vector instances.

use std::sync::{Arc, Weak};

use crate::altrep::class::{AltrepClass, AltrepPayload, ReduceMethod, Sortedness};
use crate::helpers::Completeness;
use crate::types::{NativeElement, Scalar};
use crate::vector::NativeCell;
use crate::BridgeError;

/// Whether foreign code has been granted a writable pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialization {
    Unmaterialized,
    /// Element access goes through `address`, valid for `len` elements.
    Materialized { address: usize, len: usize },
}

/// One vector of an ALTREP class.
///
/// Until `dataptr(true)` is called, each operation uses its class callback
/// when present and the instance's default storage otherwise. After that,
/// every access goes through the materialized pointer.
#[derive(Debug)]
pub struct AltrepVector<T: NativeElement> {
    class: Arc<AltrepClass<T>>,
    payload: AltrepPayload,
    storage: NativeCell<T>,
    state: Materialization,
    owner: Weak<Completeness>,
}

impl<T: NativeElement> AltrepVector<T> {
    /// `storage` backs the fallbacks for slots the class leaves empty.
    pub fn new(
        class: Arc<AltrepClass<T>>,
        payload: AltrepPayload,
        storage: Vec<T>,
        owner: Weak<Completeness>,
    ) -> Self {
        Self {
            class,
            payload,
            storage: NativeCell::new(storage, owner.clone()),
            state: Materialization::Unmaterialized,
            owner,
        }
    }

    pub fn class(&self) -> &Arc<AltrepClass<T>> {
        &self.class
    }

    pub fn payload(&self) -> &AltrepPayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut AltrepPayload {
        &mut self.payload
    }

    pub fn state(&self) -> Materialization {
        self.state
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.state, Materialization::Materialized { .. })
    }

    pub fn length(&self) -> usize {
        match self.state {
            Materialization::Materialized { len, .. } => len,
            Materialization::Unmaterialized => match &self.class.length {
                Some(length) => length(&self.payload),
                None => {
                    log::trace!("{}: length falls back to storage", self.class.name());
                    self.storage.len()
                }
            },
        }
    }

    pub fn elt(&self, index: usize) -> Result<T, BridgeError> {
        if let Materialization::Materialized { address, len } = self.state {
            check_index(index, len)?;
            // SAFETY: the dataptr contract keeps `address` valid for `len`
            // elements for the life of the instance.
            let native = unsafe { (address as *const T::Native).add(index).read() };
            return Ok(T::from_native(native));
        }

        check_index(index, self.length())?;
        match &self.class.elt {
            Some(elt) => Ok(elt(&self.payload, index)),
            None => {
                log::trace!("{}: elt({}) falls back to storage", self.class.name(), index);
                check_index(index, self.storage.len())?;
                Ok(self.storage.read(index))
            }
        }
    }

    /// Hand out a raw pointer to the data.
    ///
    /// `writable = true` moves the instance to `Materialized`; later calls
    /// return the recorded pointer without invoking the callback again.
    pub fn dataptr(&mut self, writable: bool) -> Result<usize, BridgeError> {
        if let Materialization::Materialized { address, .. } = self.state {
            return Ok(address);
        }

        let (address, len) = match self.class.dataptr.clone() {
            Some(dataptr) => {
                let len = self.length();
                let ptr = dataptr(&mut self.payload, writable);
                if ptr.is_null() {
                    return Err(BridgeError::callback_failed(
                        "dataptr",
                        format!("{} returned a null pointer", self.class.name()),
                    ));
                }
                (ptr as usize, len)
            }
            None => {
                log::trace!("{}: dataptr falls back to storage", self.class.name());
                if !self.storage.is_promoted() {
                    // Storage must hold what length/elt report before
                    // foreign code sees it.
                    let values = self.values()?;
                    self.storage = NativeCell::new(values, self.owner.clone());
                }
                (self.storage.convert_to_native()?, self.storage.len())
            }
        };

        if writable {
            self.state = Materialization::Materialized { address, len };
            log::debug!(
                "materialized {} instance of {} at {:#x}",
                T::KIND,
                self.class.name(),
                address
            );
        }
        Ok(address)
    }

    /// A pointer if one is available without materializing.
    pub fn dataptr_or_null(&self) -> Option<usize> {
        match self.state {
            Materialization::Materialized { address, .. } => Some(address),
            Materialization::Unmaterialized => self
                .class
                .dataptr_or_null
                .as_ref()
                .and_then(|f| f(&self.payload))
                .map(|p| p as usize),
        }
    }

    /// Copy elements starting at `start` into `out`. Returns how many were
    /// copied, clamped to the vector length.
    pub fn get_region(&self, start: usize, out: &mut [T]) -> Result<usize, BridgeError> {
        let n = out.len().min(self.length().saturating_sub(start));
        if n == 0 {
            return Ok(0);
        }
        let out = &mut out[..n];

        if !self.is_materialized() {
            if let Some(get_region) = &self.class.get_region {
                return Ok(get_region(&self.payload, start, out).min(n));
            }
        }
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.elt(start + i)?;
        }
        Ok(n)
    }

    pub fn is_sorted(&self) -> Sortedness {
        match &self.class.is_sorted {
            Some(is_sorted) => is_sorted(&self.payload),
            None => Sortedness::Unknown,
        }
    }

    /// Whether the class vouches that no element is NA. `None` when unknown.
    pub fn no_na(&self) -> Option<bool> {
        self.class.no_na.as_ref().map(|f| f(&self.payload))
    }

    /// Write one element. Materializes the instance first.
    pub fn set_elt(&mut self, index: usize, value: T) -> Result<(), BridgeError> {
        let address = self.dataptr(true)?;
        let len = match self.state {
            Materialization::Materialized { len, .. } => len,
            Materialization::Unmaterialized => 0,
        };
        check_index(index, len)?;
        // SAFETY: the instance is materialized at `address` for `len`
        // elements.
        unsafe { (address as *mut T::Native).add(index).write(value.to_native()) };
        if value.is_na() {
            if let Some(flag) = self.owner.upgrade() {
                flag.set_incomplete();
            }
        }
        Ok(())
    }

    /// All elements, through whichever access path is current.
    pub fn values(&self) -> Result<Vec<T>, BridgeError> {
        let mut out = Vec::with_capacity(self.length());
        for i in 0..self.length() {
            out.push(self.elt(i)?);
        }
        Ok(out)
    }

    pub fn sum(&self, na_rm: bool) -> Result<Scalar, BridgeError> {
        if let Some(result) = self.try_method(&self.class.sum, "sum", na_rm) {
            return Ok(result);
        }
        T::sum_of(self.values()?.into_iter(), na_rm)
    }

    pub fn min(&self, na_rm: bool) -> Result<Scalar, BridgeError> {
        if let Some(result) = self.try_method(&self.class.min, "min", na_rm) {
            return Ok(result);
        }
        T::min_of(self.values()?.into_iter(), na_rm)
    }

    pub fn max(&self, na_rm: bool) -> Result<Scalar, BridgeError> {
        if let Some(result) = self.try_method(&self.class.max, "max", na_rm) {
            return Ok(result);
        }
        T::max_of(self.values()?.into_iter(), na_rm)
    }

    fn try_method(&self, method: &Option<ReduceMethod>, name: &str, na_rm: bool) -> Option<Scalar> {
        if self.is_materialized() {
            return None;
        }
        let result = method.as_ref().and_then(|f| f(&self.payload, na_rm));
        if result.is_none() {
            log::trace!("{}: {} falls back to generic reduction", self.class.name(), name);
        }
        result
    }
}

fn check_index(index: usize, len: usize) -> Result<(), BridgeError> {
    if index < len {
        Ok(())
    } else {
        Err(BridgeError::index_out_of_bounds(index, len))
    }
}
