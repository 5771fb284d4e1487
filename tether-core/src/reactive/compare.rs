//! Equality policy.
//!
//! Every "did this change" decision goes through a [`Compare`]. A write whose
//! comparator reports equality is dropped before anything is scheduled, and a
//! derived recompute that produces an equal value keeps the old one.
//!
//! The default policy is representation identity ([`Identity`]): floats are
//! compared by bit pattern (so NaN equals NaN and `0.0` differs from `-0.0`)
//! and shared pointers by address.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::error::CompareError;

/// Representation identity.
pub trait Identity {
    /// True iff `self` and `other` are the same value representation.
    fn identical(&self, other: &Self) -> bool;
}

macro_rules! identity_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Identity for $ty {
                fn identical(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

identity_by_value!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, String,
    &'static str,
);

impl Identity for f32 {
    fn identical(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl Identity for f64 {
    fn identical(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl<T: ?Sized> Identity for Arc<T> {
    fn identical(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: Identity> Identity for Option<T> {
    fn identical(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(left), Some(right)) => left.identical(right),
            _ => false,
        }
    }
}

type CompareFn<T> = dyn Fn(&T, &T) -> Result<bool, CompareError> + Send + Sync;

/// A pluggable equality function. `Ok(true)` means "unchanged".
pub struct Compare<T> {
    f: Arc<CompareFn<T>>,
}

impl<T: 'static> Compare<T> {
    /// Wrap an infallible comparator.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self::fallible(move |left, right| Ok(f(left, right)))
    }

    /// Wrap a comparator that may refuse to decide.
    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn(&T, &T) -> Result<bool, CompareError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Representation identity. This is the default policy.
    pub fn identity() -> Self
    where
        T: Identity,
    {
        Self::new(|left: &T, right: &T| left.identical(right))
    }

    /// Structural equality through `PartialEq`.
    pub fn partial_eq() -> Self
    where
        T: PartialEq,
    {
        Self::new(|left: &T, right: &T| left == right)
    }

    /// Treat every write as a change.
    pub fn never() -> Self {
        Self::new(|_, _| false)
    }

    /// Shallow sequence equality: same length and identical elements.
    pub fn shallow<U>() -> Self
    where
        T: Borrow<[U]>,
        U: Identity + 'static,
    {
        Self::new(|left: &T, right: &T| {
            let left: &[U] = <T as Borrow<[U]>>::borrow(left);
            let right: &[U] = <T as Borrow<[U]>>::borrow(right);
            left.len() == right.len() && left.iter().zip(right).all(|(l, r)| l.identical(r))
        })
    }

    /// Comparator for union-shaped values.
    ///
    /// When either operand is of the primary kind the result is plain
    /// identity, so a tag change is detected without running `secondary`.
    /// Otherwise `secondary` decides.
    pub fn union<P>(is_primary: P, secondary: Compare<T>) -> Self
    where
        T: Identity,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::fallible(move |left, right| {
            if is_primary(left) || is_primary(right) {
                Ok(left.identical(right))
            } else {
                secondary.equals(left, right)
            }
        })
    }

    /// Run the comparator.
    pub fn equals(&self, left: &T, right: &T) -> Result<bool, CompareError> {
        (self.f)(left, right)
    }
}

impl<T: Identity + 'static> Default for Compare<T> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<T> Clone for Compare<T> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<T> fmt::Debug for Compare<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compare").finish_non_exhaustive()
    }
}
