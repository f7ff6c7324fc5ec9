//! Completeness tracking: does a vector contain any NA?

use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::NativeElement;

/// Per-vector "no NA seen" flag.
///
/// Owned by the vector (behind an `Arc`); representations hold a `Weak`
/// reference and only ever degrade it.
#[derive(Debug)]
pub struct Completeness {
    complete: AtomicBool,
}

impl Completeness {
    pub fn new(complete: bool) -> Self {
        Self {
            complete: AtomicBool::new(complete),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Mark the owner as containing an NA. Idempotent and irreversible.
    pub fn set_incomplete(&self) {
        if self.complete.swap(false, Ordering::AcqRel) {
            log::trace!("vector marked incomplete");
        }
    }
}

impl Default for Completeness {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Accumulates NA checks while a vector is built from raw values.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaCheck {
    enabled: bool,
    seen_na: bool,
}

impl NaCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Returns whether `value` is NA, remembering it if so.
    pub fn check<T: NativeElement>(&mut self, value: T) -> bool {
        if !self.enabled {
            return false;
        }
        let na = value.is_na();
        self.seen_na |= na;
        na
    }

    pub fn never_seen_na(&self) -> bool {
        !self.seen_na
    }
}

/// Compute the initial completeness of `values`.
pub fn scan_complete<T: NativeElement>(values: &[T]) -> bool {
    let mut check = NaCheck::new();
    check.enable();
    for &v in values {
        check.check(v);
    }
    check.never_seen_na()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{na_real, NA_INTEGER};

    #[test]
    fn set_incomplete_is_monotonic() {
        let flag = Completeness::new(true);
        assert!(flag.is_complete());
        flag.set_incomplete();
        flag.set_incomplete();
        assert!(!flag.is_complete());
    }

    #[test]
    fn na_check_disabled_reports_nothing() {
        let mut check = NaCheck::new();
        assert!(!check.check(NA_INTEGER));
        assert!(check.never_seen_na());
    }

    #[test]
    fn na_check_remembers_na() {
        let mut check = NaCheck::new();
        check.enable();
        assert!(!check.check(1.5f64));
        assert!(check.check(na_real()));
        assert!(!check.check(2.5f64));
        assert!(!check.never_seen_na());
    }

    #[test]
    fn plain_nan_does_not_count_as_na() {
        assert!(scan_complete(&[1.0, f64::NAN]));
        assert!(!scan_complete(&[1.0, na_real()]));
        assert!(scan_complete::<u8>(&[0, 255]));
    }
}
