//! Type-erased vectors, as carried through the foreign access mediator.

use crate::types::{Logical, NativeElement, RComplex, Scalar, VectorKind};
use crate::vector::AtomicVector;
use crate::BridgeError;

/// A vector of any supported element family.
#[derive(Debug)]
pub enum AnyVector {
    Double(AtomicVector<f64>),
    Integer(AtomicVector<i32>),
    Logical(AtomicVector<Logical>),
    Raw(AtomicVector<u8>),
    Complex(AtomicVector<RComplex>),
}

/// Run `$body` with `$v` bound to the typed vector inside `$any`.
macro_rules! with_vector {
    ($any:expr, $v:ident => $body:expr) => {
        match $any {
            AnyVector::Double($v) => $body,
            AnyVector::Integer($v) => $body,
            AnyVector::Logical($v) => $body,
            AnyVector::Raw($v) => $body,
            AnyVector::Complex($v) => $body,
        }
    };
}

impl AnyVector {
    pub fn kind(&self) -> VectorKind {
        with_vector!(self, v => v.kind())
    }

    pub fn len(&self) -> usize {
        with_vector!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complete(&self) -> bool {
        with_vector!(self, v => v.is_complete())
    }

    pub fn is_altrep(&self) -> bool {
        with_vector!(self, v => v.is_altrep())
    }

    pub fn is_promoted(&self) -> bool {
        with_vector!(self, v => v.is_promoted())
    }

    /// Native allocations made for a managed vector; `None` for ALTREP.
    pub fn lease_count(&self) -> Option<usize> {
        with_vector!(self, v => v.cell().map(|cell| cell.lease_count()))
    }

    pub fn get(&self, index: usize) -> Result<Scalar, BridgeError> {
        with_vector!(self, v => v.get_scalar(index))
    }

    /// Store `value`; its kind must match the vector's.
    pub fn set(&mut self, index: usize, value: Scalar) -> Result<(), BridgeError> {
        with_vector!(self, v => v.set_scalar(index, value))
    }

    pub fn to_native(&mut self) -> Result<usize, BridgeError> {
        with_vector!(self, v => v.to_native())
    }

    pub fn release_native(&mut self) -> bool {
        with_vector!(self, v => v.release_native())
    }

    pub fn values(&self) -> Result<Vec<Scalar>, BridgeError> {
        with_vector!(self, v => Ok(v
            .values()?
            .into_iter()
            .map(NativeElement::into_scalar)
            .collect()))
    }

    pub fn sum(&self, na_rm: bool) -> Result<Scalar, BridgeError> {
        with_vector!(self, v => v.sum(na_rm))
    }

    pub fn min(&self, na_rm: bool) -> Result<Scalar, BridgeError> {
        with_vector!(self, v => v.min(na_rm))
    }

    pub fn max(&self, na_rm: bool) -> Result<Scalar, BridgeError> {
        with_vector!(self, v => v.max(na_rm))
    }
}

macro_rules! impl_from_atomic {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<AtomicVector<$t>> for AnyVector {
                fn from(v: AtomicVector<$t>) -> Self {
                    AnyVector::$variant(v)
                }
            }

            impl From<Vec<$t>> for AnyVector {
                fn from(values: Vec<$t>) -> Self {
                    AnyVector::$variant(AtomicVector::new(values))
                }
            }
        )*
    };
}

impl_from_atomic! {
    f64 => Double,
    i32 => Integer,
    Logical => Logical,
    u8 => Raw,
    RComplex => Complex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_access_checks_kind() {
        let mut vector = AnyVector::from(vec![1i32, 2, 3]);
        assert_eq!(vector.kind(), VectorKind::Integer);
        assert_eq!(vector.get(1).unwrap(), Scalar::Integer(2));
        vector.set(1, Scalar::Integer(20)).unwrap();
        assert_eq!(vector.get(1).unwrap(), Scalar::Integer(20));

        let err = vector.set(0, Scalar::Double(1.0)).unwrap_err();
        assert_eq!(err.error_type(), "type_mismatch");
        assert_eq!(vector.get(0).unwrap(), Scalar::Integer(1));
    }

    #[test]
    fn complex_values_roundtrip_through_native() {
        let mut vector = AnyVector::from(vec![RComplex::new(1.0, 2.0), RComplex::new(3.0, 4.0)]);
        let address = vector.to_native().unwrap();
        let native = unsafe { std::slice::from_raw_parts(address as *const f64, 4) };
        assert_eq!(native, &[1.0, 2.0, 3.0, 4.0]);
        assert!(vector.release_native());
        assert_eq!(vector.lease_count(), Some(1));
        assert_eq!(vector.sum(false).unwrap(), Scalar::Complex(RComplex::new(4.0, 6.0)));
    }

    #[test]
    fn values_are_type_erased() {
        let vector = AnyVector::from(vec![Logical::True, Logical::Na]);
        assert_eq!(
            vector.values().unwrap(),
            vec![Scalar::Logical(Logical::True), Scalar::Logical(Logical::Na)]
        );
        assert!(!vector.is_complete());
    }
}
