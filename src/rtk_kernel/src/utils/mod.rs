//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only for documentation and testing purposes.
pub(crate) mod index_list;
mod prio_bitmap;
pub use self::prio_bitmap::*;

/// Trait for types having a constant default value.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl Init for () {
    const INIT: Self = ();
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

/// Borrow two distinct elements of a slice mutably.
///
/// # Panics
///
/// Panics if `a == b` or either index is out of bounds.
pub(crate) fn pair_mut<T>(slice: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b);
    if a < b {
        let (left, right) = slice.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = slice.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}
