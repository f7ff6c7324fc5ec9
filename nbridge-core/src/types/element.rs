//! Primitive element types bridged between managed and native memory.
//!
//! Every element family has a managed representation (what the runtime's
//! arrays hold) and a native layout (what foreign code sees through a
//! pointer). They coincide for everything except logicals, which foreign
//! code reads as 32-bit integers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BridgeError;

/// NA value for integers.
pub const NA_INTEGER: i32 = i32::MIN;
/// NA value for logical in native layout (same as integer).
pub const NA_LOGICAL: i32 = i32::MIN;
/// Low word of the NA_REAL bit pattern.
const NA_REAL_LOW_WORD: u32 = 1954;
/// Bit pattern of NA_REAL (IEEE NaN with a 1954 payload).
const NA_REAL_BITS: u64 = 0x7FF0_0000_0000_07A2;

/// NA value for reals.
#[inline]
pub fn na_real() -> f64 {
    f64::from_bits(NA_REAL_BITS)
}

/// Whether `x` carries the NA_REAL payload, as opposed to an ordinary NaN.
#[inline]
pub fn is_na_real(x: f64) -> bool {
    x.is_nan() && (x.to_bits() as u32) == NA_REAL_LOW_WORD
}

// =============================================================================
// Vector kinds
// =============================================================================

/// The element family of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    Double,
    Integer,
    Logical,
    Raw,
    Complex,
}

impl fmt::Display for VectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VectorKind::Double => "double",
            VectorKind::Integer => "integer",
            VectorKind::Logical => "logical",
            VectorKind::Raw => "raw",
            VectorKind::Complex => "complex",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Logical value type
// =============================================================================

/// Logical value: TRUE, FALSE, or NA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logical {
    False,
    True,
    Na,
}

impl Logical {
    /// Convert to the native integer representation.
    #[inline]
    pub fn to_native_int(self) -> i32 {
        self.into()
    }

    /// Convert from the native integer representation.
    #[inline]
    pub fn from_native_int(i: i32) -> Self {
        i.into()
    }
}

impl From<Logical> for i32 {
    fn from(logical: Logical) -> i32 {
        match logical {
            Logical::False => 0,
            Logical::True => 1,
            Logical::Na => NA_LOGICAL,
        }
    }
}

/// Any non-zero, non-NA integer reads back as TRUE; foreign code is free to
/// store arbitrary ints into a logical buffer.
impl From<i32> for Logical {
    fn from(i: i32) -> Self {
        match i {
            0 => Logical::False,
            NA_LOGICAL => Logical::Na,
            _ => Logical::True,
        }
    }
}

impl From<bool> for Logical {
    fn from(b: bool) -> Self {
        if b {
            Logical::True
        } else {
            Logical::False
        }
    }
}

// =============================================================================
// Complex value type
// =============================================================================

/// Complex value, laid out as two consecutive doubles in native memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RComplex {
    pub r: f64,
    pub i: f64,
}

impl RComplex {
    pub fn new(r: f64, i: f64) -> Self {
        Self { r, i }
    }
}

// =============================================================================
// Scalars
// =============================================================================

/// One element of any kind, as carried across the foreign access mediator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    Double(f64),
    Integer(i32),
    Logical(Logical),
    Raw(u8),
    Complex(RComplex),
}

impl Scalar {
    /// The element family of this scalar.
    pub fn kind(&self) -> VectorKind {
        match self {
            Scalar::Double(_) => VectorKind::Double,
            Scalar::Integer(_) => VectorKind::Integer,
            Scalar::Logical(_) => VectorKind::Logical,
            Scalar::Raw(_) => VectorKind::Raw,
            Scalar::Complex(_) => VectorKind::Complex,
        }
    }

    /// Whether this scalar is its kind's missing-value sentinel.
    pub fn is_na(&self) -> bool {
        match *self {
            Scalar::Double(v) => v.is_na(),
            Scalar::Integer(v) => v.is_na(),
            Scalar::Logical(v) => v.is_na(),
            Scalar::Raw(v) => v.is_na(),
            Scalar::Complex(v) => v.is_na(),
        }
    }
}

// =============================================================================
// NativeElement
// =============================================================================

/// An element type that can live in a managed array and be promoted to
/// native memory.
///
/// The reductions default to `Unsupported`; families that support `sum`,
/// `min` or `max` override them.
pub trait NativeElement: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Layout of one element as foreign code sees it.
    type Native: Copy + fmt::Debug + Send + Sync + 'static;

    /// The element family.
    const KIND: VectorKind;

    fn to_native(self) -> Self::Native;

    fn from_native(native: Self::Native) -> Self;

    /// Whether this value is the family's missing-value sentinel.
    fn is_na(self) -> bool;

    /// The missing-value sentinel, if the family has one.
    fn na() -> Option<Self>;

    fn into_scalar(self) -> Scalar;

    /// Convert from a scalar of the same family.
    fn from_scalar(scalar: Scalar) -> Result<Self, BridgeError>;

    fn sum_of<I: Iterator<Item = Self>>(_values: I, _na_rm: bool) -> Result<Scalar, BridgeError> {
        Err(BridgeError::unsupported(format!(
            "sum of a {} vector",
            Self::KIND
        )))
    }

    fn min_of<I: Iterator<Item = Self>>(_values: I, _na_rm: bool) -> Result<Scalar, BridgeError> {
        Err(BridgeError::unsupported(format!(
            "min of a {} vector",
            Self::KIND
        )))
    }

    fn max_of<I: Iterator<Item = Self>>(_values: I, _na_rm: bool) -> Result<Scalar, BridgeError> {
        Err(BridgeError::unsupported(format!(
            "max of a {} vector",
            Self::KIND
        )))
    }
}

fn mismatch<T: NativeElement>(scalar: Scalar) -> BridgeError {
    BridgeError::type_mismatch(T::KIND, scalar.kind())
}

impl NativeElement for f64 {
    type Native = f64;
    const KIND: VectorKind = VectorKind::Double;

    #[inline]
    fn to_native(self) -> f64 {
        self
    }

    #[inline]
    fn from_native(native: f64) -> Self {
        native
    }

    #[inline]
    fn is_na(self) -> bool {
        is_na_real(self)
    }

    fn na() -> Option<Self> {
        Some(na_real())
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Double(self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, BridgeError> {
        match scalar {
            Scalar::Double(v) => Ok(v),
            other => Err(mismatch::<Self>(other)),
        }
    }

    fn sum_of<I: Iterator<Item = Self>>(values: I, na_rm: bool) -> Result<Scalar, BridgeError> {
        let mut total = 0.0;
        for v in values {
            if v.is_nan() {
                if na_rm {
                    continue;
                }
                if v.is_na() {
                    return Ok(Scalar::Double(na_real()));
                }
            }
            total += v;
        }
        Ok(Scalar::Double(total))
    }

    fn min_of<I: Iterator<Item = Self>>(values: I, na_rm: bool) -> Result<Scalar, BridgeError> {
        Ok(Scalar::Double(real_extreme(values, na_rm, f64::INFINITY, |a, b| b < a)))
    }

    fn max_of<I: Iterator<Item = Self>>(values: I, na_rm: bool) -> Result<Scalar, BridgeError> {
        Ok(Scalar::Double(real_extreme(values, na_rm, f64::NEG_INFINITY, |a, b| b > a)))
    }
}

/// Shared min/max walk for doubles. NA wins over NaN when both occur.
fn real_extreme<I: Iterator<Item = f64>>(
    values: I,
    na_rm: bool,
    init: f64,
    better: impl Fn(f64, f64) -> bool,
) -> f64 {
    let mut acc = init;
    let mut saw_nan = false;
    for v in values {
        if v.is_nan() {
            if na_rm {
                continue;
            }
            if v.is_na() {
                return na_real();
            }
            saw_nan = true;
        } else if better(acc, v) {
            acc = v;
        }
    }
    if saw_nan {
        f64::NAN
    } else {
        acc
    }
}

impl NativeElement for i32 {
    type Native = i32;
    const KIND: VectorKind = VectorKind::Integer;

    #[inline]
    fn to_native(self) -> i32 {
        self
    }

    #[inline]
    fn from_native(native: i32) -> Self {
        native
    }

    #[inline]
    fn is_na(self) -> bool {
        self == NA_INTEGER
    }

    fn na() -> Option<Self> {
        Some(NA_INTEGER)
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Integer(self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, BridgeError> {
        match scalar {
            Scalar::Integer(v) => Ok(v),
            other => Err(mismatch::<Self>(other)),
        }
    }

    fn sum_of<I: Iterator<Item = Self>>(values: I, na_rm: bool) -> Result<Scalar, BridgeError> {
        let mut total: i64 = 0;
        for v in values {
            if v.is_na() {
                if na_rm {
                    continue;
                }
                return Ok(Scalar::Integer(NA_INTEGER));
            }
            total += i64::from(v);
        }
        // NA_INTEGER itself is not a representable result
        match i32::try_from(total) {
            Ok(t) if t != NA_INTEGER => Ok(Scalar::Integer(t)),
            _ => {
                log::warn!("integer overflow in sum, returning NA");
                Ok(Scalar::Integer(NA_INTEGER))
            }
        }
    }

    fn min_of<I: Iterator<Item = Self>>(values: I, na_rm: bool) -> Result<Scalar, BridgeError> {
        Ok(Scalar::Integer(int_extreme(values, na_rm, |a, b| b < a)))
    }

    fn max_of<I: Iterator<Item = Self>>(values: I, na_rm: bool) -> Result<Scalar, BridgeError> {
        Ok(Scalar::Integer(int_extreme(values, na_rm, |a, b| b > a)))
    }
}

fn int_extreme<I: Iterator<Item = i32>>(values: I, na_rm: bool, better: impl Fn(i32, i32) -> bool) -> i32 {
    let mut acc: Option<i32> = None;
    for v in values {
        if v.is_na() {
            if na_rm {
                continue;
            }
            return NA_INTEGER;
        }
        acc = match acc {
            Some(a) if !better(a, v) => Some(a),
            _ => Some(v),
        };
    }
    acc.unwrap_or(NA_INTEGER)
}

impl NativeElement for Logical {
    type Native = i32;
    const KIND: VectorKind = VectorKind::Logical;

    #[inline]
    fn to_native(self) -> i32 {
        self.into()
    }

    #[inline]
    fn from_native(native: i32) -> Self {
        native.into()
    }

    #[inline]
    fn is_na(self) -> bool {
        self == Logical::Na
    }

    fn na() -> Option<Self> {
        Some(Logical::Na)
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Logical(self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, BridgeError> {
        match scalar {
            Scalar::Logical(v) => Ok(v),
            other => Err(mismatch::<Self>(other)),
        }
    }

    /// Sum of a logical vector is the count of TRUE values.
    fn sum_of<I: Iterator<Item = Self>>(values: I, na_rm: bool) -> Result<Scalar, BridgeError> {
        let mut count: i32 = 0;
        for v in values {
            match v {
                Logical::True => count += 1,
                Logical::False => {}
                Logical::Na if na_rm => {}
                Logical::Na => return Ok(Scalar::Integer(NA_INTEGER)),
            }
        }
        Ok(Scalar::Integer(count))
    }
}

impl NativeElement for u8 {
    type Native = u8;
    const KIND: VectorKind = VectorKind::Raw;

    #[inline]
    fn to_native(self) -> u8 {
        self
    }

    #[inline]
    fn from_native(native: u8) -> Self {
        native
    }

    #[inline]
    fn is_na(self) -> bool {
        false
    }

    fn na() -> Option<Self> {
        None
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Raw(self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, BridgeError> {
        match scalar {
            Scalar::Raw(v) => Ok(v),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl NativeElement for RComplex {
    type Native = RComplex;
    const KIND: VectorKind = VectorKind::Complex;

    #[inline]
    fn to_native(self) -> RComplex {
        self
    }

    #[inline]
    fn from_native(native: RComplex) -> Self {
        native
    }

    #[inline]
    fn is_na(self) -> bool {
        is_na_real(self.r) || is_na_real(self.i)
    }

    fn na() -> Option<Self> {
        Some(RComplex::new(na_real(), na_real()))
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Complex(self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, BridgeError> {
        match scalar {
            Scalar::Complex(v) => Ok(v),
            other => Err(mismatch::<Self>(other)),
        }
    }

    fn sum_of<I: Iterator<Item = Self>>(values: I, na_rm: bool) -> Result<Scalar, BridgeError> {
        let mut total = RComplex::new(0.0, 0.0);
        for v in values {
            if v.r.is_nan() || v.i.is_nan() {
                if na_rm {
                    continue;
                }
                if v.is_na() {
                    return Ok(Scalar::Complex(RComplex::new(na_real(), na_real())));
                }
            }
            total.r += v.r;
            total.i += v.i;
        }
        Ok(Scalar::Complex(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn na_real_is_distinguished_from_nan() {
        assert!(is_na_real(na_real()));
        assert!(!is_na_real(f64::NAN));
        assert!(!is_na_real(1.0));
    }

    #[test]
    fn logical_native_roundtrip_maps_arbitrary_ints_to_true() {
        assert_eq!(Logical::from_native(0), Logical::False);
        assert_eq!(Logical::from_native(1), Logical::True);
        assert_eq!(Logical::from_native(42), Logical::True);
        assert_eq!(Logical::from_native(NA_LOGICAL), Logical::Na);
        assert_eq!(Logical::Na.to_native(), NA_LOGICAL);
    }

    #[test]
    fn raw_has_no_missing_value() {
        assert_eq!(<u8 as NativeElement>::na(), None);
        assert!(!0u8.is_na());
        assert!(u8::sum_of([1u8, 2].into_iter(), false).is_err());
    }

    #[test]
    fn complex_na_when_either_part_is_na() {
        assert!(RComplex::new(na_real(), 0.0).is_na());
        assert!(RComplex::new(0.0, na_real()).is_na());
        assert!(!RComplex::new(f64::NAN, 0.0).is_na());
    }

    #[test]
    fn scalar_conversion_checks_kind() {
        assert_eq!(i32::from_scalar(Scalar::Integer(3)).unwrap(), 3);
        let err = i32::from_scalar(Scalar::Double(3.0)).unwrap_err();
        assert_eq!(err.error_type(), "type_mismatch");
    }

    #[test]
    fn double_sum_propagates_na_unless_removed() {
        let values = [1.0, na_real(), 2.0];
        match f64::sum_of(values.into_iter(), false).unwrap() {
            Scalar::Double(v) => assert!(is_na_real(v)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            f64::sum_of(values.into_iter(), true).unwrap(),
            Scalar::Double(3.0)
        );
    }

    #[test]
    fn integer_sum_overflow_is_na() {
        let values = [i32::MAX, 1];
        assert_eq!(
            i32::sum_of(values.into_iter(), false).unwrap(),
            Scalar::Integer(NA_INTEGER)
        );
        assert_eq!(
            i32::sum_of([1, 2, 3].into_iter(), false).unwrap(),
            Scalar::Integer(6)
        );
    }

    #[test]
    fn logical_sum_counts_true() {
        let values = [Logical::True, Logical::False, Logical::True, Logical::Na];
        assert_eq!(
            Logical::sum_of(values.into_iter(), true).unwrap(),
            Scalar::Integer(2)
        );
        assert_eq!(
            Logical::sum_of(values.into_iter(), false).unwrap(),
            Scalar::Integer(NA_INTEGER)
        );
    }

    #[test]
    fn extremes_of_empty_input() {
        assert_eq!(
            f64::min_of(std::iter::empty(), false).unwrap(),
            Scalar::Double(f64::INFINITY)
        );
        assert_eq!(
            f64::max_of(std::iter::empty(), false).unwrap(),
            Scalar::Double(f64::NEG_INFINITY)
        );
        assert_eq!(
            i32::min_of(std::iter::empty(), true).unwrap(),
            Scalar::Integer(NA_INTEGER)
        );
    }

    #[test]
    fn integer_extremes() {
        let values = [4, -2, 9, NA_INTEGER];
        assert_eq!(i32::min_of(values.into_iter(), true).unwrap(), Scalar::Integer(-2));
        assert_eq!(i32::max_of(values.into_iter(), true).unwrap(), Scalar::Integer(9));
        assert_eq!(
            i32::max_of(values.into_iter(), false).unwrap(),
            Scalar::Integer(NA_INTEGER)
        );
    }
}
