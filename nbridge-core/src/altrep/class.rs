//! ALTREP class descriptors.
//!
//! A class is a table of optional foreign callbacks shared by every instance
//! of that class. An empty slot means "use the default behavior" for that one
//! method.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::types::{NativeElement, Scalar};

// =============================================================================
// Payload
// =============================================================================

/// Instance-private data handed to every callback. Opaque to the class.
#[derive(Default)]
pub struct AltrepPayload {
    data1: Option<Box<dyn Any + Send + Sync>>,
    data2: Option<Box<dyn Any + Send + Sync>>,
}

impl AltrepPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data1<D: Any + Send + Sync>(mut self, data: D) -> Self {
        self.data1 = Some(Box::new(data));
        self
    }

    pub fn with_data2<D: Any + Send + Sync>(mut self, data: D) -> Self {
        self.data2 = Some(Box::new(data));
        self
    }

    pub fn data1<D: Any>(&self) -> Option<&D> {
        self.data1.as_deref().and_then(|d| d.downcast_ref())
    }

    pub fn data2<D: Any>(&self) -> Option<&D> {
        self.data2.as_deref().and_then(|d| d.downcast_ref())
    }

    pub fn data1_mut<D: Any>(&mut self) -> Option<&mut D> {
        self.data1.as_deref_mut().and_then(|d| d.downcast_mut())
    }

    pub fn data2_mut<D: Any>(&mut self) -> Option<&mut D> {
        self.data2.as_deref_mut().and_then(|d| d.downcast_mut())
    }

    pub fn set_data1<D: Any + Send + Sync>(&mut self, data: D) {
        self.data1 = Some(Box::new(data));
    }

    pub fn set_data2<D: Any + Send + Sync>(&mut self, data: D) {
        self.data2 = Some(Box::new(data));
    }
}

impl fmt::Debug for AltrepPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AltrepPayload")
            .field("data1", &self.data1.is_some())
            .field("data2", &self.data2.is_some())
            .finish()
    }
}

// =============================================================================
// Sortedness
// =============================================================================

/// Sortedness hint reported by `is_sorted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sortedness {
    #[default]
    Unknown,
    KnownUnsorted,
    Increasing,
    Decreasing,
    IncreasingNaFirst,
    DecreasingNaFirst,
}

// =============================================================================
// Slots
// =============================================================================

pub type LengthMethod = Arc<dyn Fn(&AltrepPayload) -> usize + Send + Sync>;
pub type EltMethod<T> = Arc<dyn Fn(&AltrepPayload, usize) -> T + Send + Sync>;
/// Returns a pointer to `length` native elements, or null on failure.
pub type DataptrMethod<T> =
    Arc<dyn Fn(&mut AltrepPayload, bool) -> *mut <T as NativeElement>::Native + Send + Sync>;
pub type DataptrOrNullMethod<T> =
    Arc<dyn Fn(&AltrepPayload) -> Option<*const <T as NativeElement>::Native> + Send + Sync>;
/// Fills `out` starting at element `start` and returns how many were written.
pub type GetRegionMethod<T> = Arc<dyn Fn(&AltrepPayload, usize, &mut [T]) -> usize + Send + Sync>;
pub type IsSortedMethod = Arc<dyn Fn(&AltrepPayload) -> Sortedness + Send + Sync>;
pub type NoNaMethod = Arc<dyn Fn(&AltrepPayload) -> bool + Send + Sync>;
/// A reduction; `None` declines and the generic reduction runs instead.
pub type ReduceMethod = Arc<dyn Fn(&AltrepPayload, bool) -> Option<Scalar> + Send + Sync>;

/// Descriptor for one ALTREP class of element type `T`.
pub struct AltrepClass<T: NativeElement> {
    name: String,
    pub(crate) length: Option<LengthMethod>,
    pub(crate) elt: Option<EltMethod<T>>,
    pub(crate) dataptr: Option<DataptrMethod<T>>,
    pub(crate) dataptr_or_null: Option<DataptrOrNullMethod<T>>,
    pub(crate) get_region: Option<GetRegionMethod<T>>,
    pub(crate) is_sorted: Option<IsSortedMethod>,
    pub(crate) no_na: Option<NoNaMethod>,
    pub(crate) sum: Option<ReduceMethod>,
    pub(crate) min: Option<ReduceMethod>,
    pub(crate) max: Option<ReduceMethod>,
}

impl<T: NativeElement> AltrepClass<T> {
    pub fn builder(name: impl Into<String>) -> AltrepClassBuilder<T> {
        AltrepClassBuilder {
            class: AltrepClass {
                name: name.into(),
                length: None,
                elt: None,
                dataptr: None,
                dataptr_or_null: None,
                get_region: None,
                is_sorted: None,
                no_na: None,
                sum: None,
                min: None,
                max: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_length(&self) -> bool {
        self.length.is_some()
    }

    pub fn has_elt(&self) -> bool {
        self.elt.is_some()
    }

    pub fn has_dataptr(&self) -> bool {
        self.dataptr.is_some()
    }

    pub fn has_sum(&self) -> bool {
        self.sum.is_some()
    }
}

impl<T: NativeElement> fmt::Debug for AltrepClass<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AltrepClass")
            .field("name", &self.name)
            .field("kind", &T::KIND)
            .field("length", &self.length.is_some())
            .field("elt", &self.elt.is_some())
            .field("dataptr", &self.dataptr.is_some())
            .field("dataptr_or_null", &self.dataptr_or_null.is_some())
            .field("get_region", &self.get_region.is_some())
            .field("is_sorted", &self.is_sorted.is_some())
            .field("no_na", &self.no_na.is_some())
            .field("sum", &self.sum.is_some())
            .field("min", &self.min.is_some())
            .field("max", &self.max.is_some())
            .finish()
    }
}

/// Builder for [`AltrepClass`]. Slots not set stay empty.
pub struct AltrepClassBuilder<T: NativeElement> {
    class: AltrepClass<T>,
}

impl<T: NativeElement> AltrepClassBuilder<T> {
    pub fn length<F>(mut self, f: F) -> Self
    where
        F: Fn(&AltrepPayload) -> usize + Send + Sync + 'static,
    {
        self.class.length = Some(Arc::new(f));
        self
    }

    pub fn elt<F>(mut self, f: F) -> Self
    where
        F: Fn(&AltrepPayload, usize) -> T + Send + Sync + 'static,
    {
        self.class.elt = Some(Arc::new(f));
        self
    }

    /// Install the `dataptr` method.
    ///
    /// # Safety
    ///
    /// A non-null pointer returned by `f` must be valid for reads and writes
    /// of as many elements as the instance's length at the time of the call,
    /// and must stay valid for as long as the instance lives.
    pub unsafe fn dataptr<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut AltrepPayload, bool) -> *mut T::Native + Send + Sync + 'static,
    {
        self.class.dataptr = Some(Arc::new(f));
        self
    }

    /// Install the `dataptr_or_null` method.
    ///
    /// # Safety
    ///
    /// Same contract as [`AltrepClassBuilder::dataptr`] for any pointer
    /// returned.
    pub unsafe fn dataptr_or_null<F>(mut self, f: F) -> Self
    where
        F: Fn(&AltrepPayload) -> Option<*const T::Native> + Send + Sync + 'static,
    {
        self.class.dataptr_or_null = Some(Arc::new(f));
        self
    }

    pub fn get_region<F>(mut self, f: F) -> Self
    where
        F: Fn(&AltrepPayload, usize, &mut [T]) -> usize + Send + Sync + 'static,
    {
        self.class.get_region = Some(Arc::new(f));
        self
    }

    pub fn is_sorted<F>(mut self, f: F) -> Self
    where
        F: Fn(&AltrepPayload) -> Sortedness + Send + Sync + 'static,
    {
        self.class.is_sorted = Some(Arc::new(f));
        self
    }

    pub fn no_na<F>(mut self, f: F) -> Self
    where
        F: Fn(&AltrepPayload) -> bool + Send + Sync + 'static,
    {
        self.class.no_na = Some(Arc::new(f));
        self
    }

    pub fn sum<F>(mut self, f: F) -> Self
    where
        F: Fn(&AltrepPayload, bool) -> Option<Scalar> + Send + Sync + 'static,
    {
        self.class.sum = Some(Arc::new(f));
        self
    }

    pub fn min<F>(mut self, f: F) -> Self
    where
        F: Fn(&AltrepPayload, bool) -> Option<Scalar> + Send + Sync + 'static,
    {
        self.class.min = Some(Arc::new(f));
        self
    }

    pub fn max<F>(mut self, f: F) -> Self
    where
        F: Fn(&AltrepPayload, bool) -> Option<Scalar> + Send + Sync + 'static,
    {
        self.class.max = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Arc<AltrepClass<T>> {
        log::debug!("registered ALTREP class {} ({})", self.class.name, T::KIND);
        Arc::new(self.class)
    }
}
