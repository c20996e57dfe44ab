//! Provides `FixedPrioBitmap`, a bit array structure supporting
//! constant-time bit scan operations.
use core::fmt;
use num_traits::{ConstZero, PrimInt};

use super::Init;

/// The maximum bit count supported by [`FixedPrioBitmap`].
pub const FIXED_PRIO_BITMAP_MAX_LEN: usize = WORD_LEN * WORD_LEN;

/// A bit array structure supporting constant-time bit scan operations.
///
/// Stores up to [`FIXED_PRIO_BITMAP_MAX_LEN`] entries.
pub type FixedPrioBitmap = TwoLevelPrioBitmapImpl<OneLevelPrioBitmapImpl<Word>, WORD_LEN>;

/// Trait for [`FixedPrioBitmap`].
///
/// All methods panic when the given bit position is out of range.
pub trait PrioBitmap: Init + Send + Sync + Clone + Copy + fmt::Debug + 'static {
    /// Get the bit at the specified position.
    fn get(&self, i: usize) -> bool;

    /// Clear the bit at the specified position.
    fn clear(&mut self, i: usize);

    /// Set the bit at the specified position.
    fn set(&mut self, i: usize);

    /// Get the position of the first set bit.
    fn find_set(&self) -> Option<usize>;
}

/// Stores `size_of::<T>() * 8` entries.
#[doc(hidden)]
#[derive(Clone, Copy)]
pub struct OneLevelPrioBitmapImpl<T> {
    bits: T,
}

impl<T> OneLevelPrioBitmapImpl<T> {
    const LEN: usize = core::mem::size_of::<T>() * 8;
}

impl<T: ConstZero> Init for OneLevelPrioBitmapImpl<T> {
    const INIT: Self = Self { bits: T::ZERO };
}

impl<T: PrimInt> OneLevelPrioBitmapImpl<T> {
    fn one_digits(&self) -> impl Iterator<Item = usize> {
        let bits = self.bits;
        (0..Self::LEN).filter(move |&i| (bits >> i) & T::one() != T::zero())
    }
}

impl<T: PrimInt> fmt::Debug for OneLevelPrioBitmapImpl<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.one_digits()).finish()
    }
}

impl<T> PrioBitmap for OneLevelPrioBitmapImpl<T>
where
    T: PrimInt + ConstZero + Send + Sync + 'static,
{
    fn get(&self, i: usize) -> bool {
        assert!(i < Self::LEN);
        (self.bits >> i) & T::one() != T::zero()
    }

    fn clear(&mut self, i: usize) {
        assert!(i < Self::LEN);
        self.bits = self.bits & !(T::one() << i);
    }

    fn set(&mut self, i: usize) {
        assert!(i < Self::LEN);
        self.bits = self.bits | (T::one() << i);
    }

    fn find_set(&self) -> Option<usize> {
        let i = self.bits.trailing_zeros() as usize;
        if i >= Self::LEN {
            None
        } else {
            Some(i)
        }
    }
}

/// Stores `WORD_LEN * LEN` entries. `T` must implement `PrioBitmap` and
/// be able to store `LEN` entries.
#[doc(hidden)]
#[derive(Clone, Copy)]
pub struct TwoLevelPrioBitmapImpl<T, const LEN: usize> {
    // Invariant: `first.get(i) == (second[i] != 0)`
    first: T,
    second: [Word; LEN],
}

type Word = usize;
const WORD_LEN: usize = core::mem::size_of::<Word>() * 8;

impl<T: PrioBitmap, const LEN: usize> Init for TwoLevelPrioBitmapImpl<T, LEN> {
    const INIT: Self = Self {
        first: T::INIT,
        second: [0; LEN],
    };
}

impl<T: PrioBitmap, const LEN: usize> fmt::Debug for TwoLevelPrioBitmapImpl<T, LEN> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.second.iter().enumerate().flat_map(|(group_i, &group)| {
                (0..WORD_LEN)
                    .filter(move |&subgroup_i| group & (1 << subgroup_i) != 0)
                    .map(move |subgroup_i| subgroup_i + group_i * WORD_LEN)
            }))
            .finish()
    }
}

impl<T: PrioBitmap, const LEN: usize> PrioBitmap for TwoLevelPrioBitmapImpl<T, LEN> {
    fn get(&self, i: usize) -> bool {
        self.second[i / WORD_LEN] & (1 << (i % WORD_LEN)) != 0
    }

    fn clear(&mut self, i: usize) {
        let group = &mut self.second[i / WORD_LEN];
        *group &= !(1 << (i % WORD_LEN));
        if *group == 0 {
            self.first.clear(i / WORD_LEN);
        }
    }

    fn set(&mut self, i: usize) {
        let group = &mut self.second[i / WORD_LEN];
        *group |= 1 << (i % WORD_LEN);
        self.first.set(i / WORD_LEN);
    }

    fn find_set(&self) -> Option<usize> {
        self.first.find_set().map(|group_i| {
            let group = self.second[group_i];
            let subgroup_i = group.trailing_zeros() as usize;
            debug_assert_ne!(subgroup_i, WORD_LEN);
            subgroup_i + group_i * WORD_LEN
        })
    }
}
