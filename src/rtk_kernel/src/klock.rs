//! Kernel state locking mechanism
use core::ops;

use crate::error::BadContextError;

/// Implemented by the kernel to enter and leave the kernel-wide critical
/// section (CPU Lock).
pub(crate) trait CpuLock {
    /// Activate CPU Lock. Returns `false` if it's already active.
    fn try_enter_cpu_lock(&mut self) -> bool;

    /// Deactivate CPU Lock.
    ///
    /// Precondition: CPU Lock active
    fn leave_cpu_lock(&mut self);
}

/// Attempt to enter a CPU Lock state and get an RAII guard.
/// Return `BadContext` if the kernel is already in a CPU Lock state.
pub(crate) fn lock_cpu<T: CpuLock>(inner: &mut T) -> Result<CpuLockGuard<'_, T>, BadContextError> {
    if inner.try_enter_cpu_lock() {
        Ok(CpuLockGuard { inner })
    } else {
        Err(BadContextError::BadContext)
    }
}

/// RAII guard for a CPU Lock state. Dereferences to the locked kernel state.
pub(crate) struct CpuLockGuard<'a, T: CpuLock> {
    inner: &'a mut T,
}

impl<T: CpuLock> Drop for CpuLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.inner.leave_cpu_lock();
    }
}

impl<T: CpuLock> ops::Deref for CpuLockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl<T: CpuLock> ops::DerefMut for CpuLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner
    }
}
