//! Result codes and per-operation error types
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use rtk_kernel::ResultCode;
            /// assert_eq!(ResultCode::BadObjectState.as_str(), "BadObjectState");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that a kernel operation can
    /// return.
    ///
    /// The numeric values follow μITRON4.0 where a close equivalent exists.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// The operation is not supported, usually because the corresponding
        /// kernel feature is disabled in [`KernelCfg`](crate::KernelCfg).
        NotSupported = -9,
        /// A parameter is invalid in a way that is no covered by any other error
        /// codes.
        BadParam = -17,
        /// The specified object handle is stale. The object was deleted, and
        /// its slot may have been reused for another object.
        NoAccess = -18,
        /// The current context disallows the operation: the caller is an
        /// interrupt handler, the kernel is not running, or the scheduler is
        /// locked while the operation needs to reschedule.
        BadContext = -25,
        /// The caller does not own the resource.
        NotOwner = -29,
        /// The kernel ran out of task slots, object slots, or message pool
        /// entries.
        NoMemory = -33,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// A counter, a nesting level, or a queue would exceed its capacity.
        QueueOverflow = -43,
        /// The wait operation was aborted by another task.
        Interrupted = -49,
        /// The operation timed out, or would block when non-blocking
        /// operation was requested.
        Timeout = -50,
        /// The waited object was deleted.
        Deleted = -51,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_context_error {}
    /// `BadContext`
    pub enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod no_access_error {}
    /// `NoAccess`
    pub enum NoAccessError {
        NoAccess,
    }
}

define_error! {
    mod not_supported_error {}
    /// `NotSupported`
    pub enum NotSupportedError {
        NotSupported,
    }
}

define_error! {
    mod start_error {}
    /// Error type for [`Kernel::start`](crate::Kernel::start).
    pub enum StartError: BadContextError {
        /// The kernel is already running.
        BadContext,
        /// There are no application tasks to run.
        BadObjectState,
    }
}

define_error! {
    mod sched_lock_error {}
    /// Error type for [`Kernel::sched_lock`](crate::Kernel::sched_lock).
    pub enum SchedLockError: BadContextError {
        /// The kernel is not running, or the caller is an interrupt handler.
        BadContext,
        /// The lock nesting count would overflow.
        QueueOverflow,
    }
}

define_error! {
    mod sched_unlock_error {}
    /// Error type for [`Kernel::sched_unlock`](crate::Kernel::sched_unlock).
    pub enum SchedUnlockError: BadContextError {
        /// The kernel is not running, or the caller is an interrupt handler.
        BadContext,
        /// The scheduler is not locked.
        BadObjectState,
    }
}

define_error! {
    mod create_task_error {}
    /// Error type for [`Kernel::create_task`](crate::Kernel::create_task).
    pub enum CreateTaskError: BadContextError {
        /// The caller is an interrupt handler.
        BadContext,
        /// The priority is out of range or reserved for the idle task, or
        /// the stack is too small.
        BadParam,
        /// All task slots are in use.
        NoMemory,
    }
}

define_error! {
    mod delete_task_error {}
    /// Error type for [`Kernel::delete_task`](crate::Kernel::delete_task).
    pub enum DeleteTaskError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running, or the caller is an interrupt handler.
        BadContext,
        /// The target is the idle task.
        BadParam,
    }
}

define_error! {
    mod set_task_priority_error {}
    /// Error type for
    /// [`Kernel::set_task_priority`](crate::Kernel::set_task_priority).
    pub enum SetTaskPriorityError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// The caller is an interrupt handler.
        BadContext,
        /// The priority is out of range or reserved for the idle task.
        BadParam,
    }
}

define_error! {
    mod suspend_task_error {}
    /// Error type for [`Kernel::suspend_task`](crate::Kernel::suspend_task).
    pub enum SuspendTaskError: BadContextError, NoAccessError, NotSupportedError {
        /// Task suspension is disabled.
        NotSupported,
        /// Invalid object access.
        NoAccess,
        /// The caller is an interrupt handler, or the calling task tried to
        /// suspend itself while the scheduler is locked.
        BadContext,
        /// The target is the idle task.
        BadParam,
        /// The suspension nesting count would overflow.
        QueueOverflow,
    }
}

define_error! {
    mod resume_task_error {}
    /// Error type for [`Kernel::resume_task`](crate::Kernel::resume_task).
    pub enum ResumeTaskError: BadContextError, NoAccessError, NotSupportedError {
        /// Task suspension is disabled.
        NotSupported,
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running, or the caller is an interrupt handler.
        BadContext,
        /// The target is the calling task.
        BadParam,
        /// The task is not suspended.
        BadObjectState,
    }
}

define_error! {
    mod time_quanta_set_error {}
    /// Error type for
    /// [`Kernel::set_time_quanta`](crate::Kernel::set_time_quanta).
    pub enum TimeQuantaSetError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// The caller is an interrupt handler.
        BadContext,
    }
}

define_error! {
    mod task_stack_check_error {}
    /// Error type for
    /// [`Kernel::task_stack_check`](crate::Kernel::task_stack_check).
    pub enum TaskStackCheckError: BadContextError, NoAccessError, NotSupportedError {
        /// Stack checking is disabled.
        NotSupported,
        /// Invalid object access.
        NoAccess,
        /// CPU Lock is already active.
        BadContext,
    }
}

define_error! {
    mod task_reg_error {}
    /// Error type for [`Kernel::task_reg_get`](crate::Kernel::task_reg_get)
    /// and [`Kernel::task_reg_set`](crate::Kernel::task_reg_set).
    pub enum TaskRegError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// CPU Lock is already active.
        BadContext,
        /// The register ID is out of range.
        BadParam,
    }
}

define_error! {
    mod task_reg_id_error {}
    /// Error type for
    /// [`Kernel::task_reg_get_id`](crate::Kernel::task_reg_get_id).
    pub enum TaskRegIdError: BadContextError {
        /// CPU Lock is already active.
        BadContext,
        /// All register IDs have been allocated.
        NoMemory,
    }
}

define_error! {
    mod yield_error {}
    /// Error type for
    /// [`Kernel::round_robin_yield`](crate::Kernel::round_robin_yield).
    pub enum YieldError: BadContextError, NotSupportedError {
        /// Round-robin scheduling is disabled.
        NotSupported,
        /// The kernel is not running, the caller is an interrupt handler, or
        /// the scheduler is locked.
        BadContext,
        /// No other task is ready at the calling task's priority.
        BadObjectState,
    }
}

define_error! {
    mod delay_error {}
    /// Error type for [`Kernel::delay`](crate::Kernel::delay).
    pub enum DelayError: BadContextError {
        /// The kernel is not running, the caller is an interrupt handler, or
        /// the scheduler is locked.
        BadContext,
    }
}

define_error! {
    mod delay_resume_error {}
    /// Error type for [`Kernel::delay_resume`](crate::Kernel::delay_resume).
    pub enum DelayResumeError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running, or the caller is an interrupt handler.
        BadContext,
        /// The target is the calling task.
        BadParam,
        /// The task is not delayed.
        BadObjectState,
    }
}

define_error! {
    mod pend_abort_error {}
    /// Error type for the operations that abort a wait, such as
    /// [`Kernel::task_sem_pend_abort`](crate::Kernel::task_sem_pend_abort).
    pub enum PendAbortError: BadContextError, NoAccessError, NotSupportedError {
        /// The required kernel feature is disabled.
        NotSupported,
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running, or the caller is an interrupt handler.
        BadContext,
        /// The target is the calling task.
        BadParam,
        /// No task is waiting for the specified event.
        BadObjectState,
    }
}

define_error! {
    mod task_sem_pend_error {}
    /// Error type for [`Kernel::task_sem_pend`](crate::Kernel::task_sem_pend)
    /// and [`Kernel::task_sem_pend_finish`](crate::Kernel::task_sem_pend_finish).
    pub enum TaskSemPendError: BadContextError {
        /// The kernel is not running, the caller is an interrupt handler, or
        /// the scheduler is locked.
        BadContext,
        /// The wait was aborted.
        Interrupted,
        /// The wait timed out, or no signal was available for a non-blocking
        /// request.
        Timeout,
    }
}

define_error! {
    mod task_sem_post_error {}
    /// Error type for [`Kernel::task_sem_post`](crate::Kernel::task_sem_post).
    pub enum TaskSemPostError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running.
        BadContext,
        /// The signal counter would overflow.
        QueueOverflow,
    }
}

define_error! {
    mod task_sem_set_error {}
    /// Error type for [`Kernel::task_sem_set`](crate::Kernel::task_sem_set).
    pub enum TaskSemSetError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// The caller is an interrupt handler.
        BadContext,
        /// The task is waiting for a signal.
        BadObjectState,
    }
}

define_error! {
    mod task_q_pend_error {}
    /// Error type for [`Kernel::task_q_pend`](crate::Kernel::task_q_pend)
    /// and [`Kernel::task_q_pend_finish`](crate::Kernel::task_q_pend_finish).
    pub enum TaskQPendError: BadContextError, NotSupportedError {
        /// Task message queues are disabled.
        NotSupported,
        /// The kernel is not running, the caller is an interrupt handler, or
        /// the scheduler is locked.
        BadContext,
        /// The wait was aborted.
        Interrupted,
        /// The wait timed out, or no message was available for a
        /// non-blocking request.
        Timeout,
    }
}

define_error! {
    mod task_q_post_error {}
    /// Error type for [`Kernel::task_q_post`](crate::Kernel::task_q_post).
    pub enum TaskQPostError: BadContextError, NoAccessError, NotSupportedError {
        /// Task message queues are disabled.
        NotSupported,
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running.
        BadContext,
        /// The message pool is exhausted.
        NoMemory,
        /// The task's message queue is full.
        QueueOverflow,
    }
}

define_error! {
    mod task_q_flush_error {}
    /// Error type for [`Kernel::task_q_flush`](crate::Kernel::task_q_flush).
    pub enum TaskQFlushError: BadContextError, NoAccessError, NotSupportedError {
        /// Task message queues are disabled.
        NotSupported,
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running, or the caller is an interrupt handler.
        BadContext,
    }
}

define_error! {
    mod create_object_error {}
    /// Error type for [`Kernel::sem_create`](crate::Kernel::sem_create) and
    /// [`Kernel::mutex_create`](crate::Kernel::mutex_create).
    pub enum CreateObjectError: BadContextError, NotSupportedError {
        /// The required kernel feature is disabled.
        NotSupported,
        /// The caller is an interrupt handler.
        BadContext,
        /// All pend object slots are in use.
        NoMemory,
    }
}

define_error! {
    mod delete_object_error {}
    /// Error type for [`Kernel::sem_delete`](crate::Kernel::sem_delete) and
    /// [`Kernel::mutex_delete`](crate::Kernel::mutex_delete).
    pub enum DeleteObjectError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running, or the caller is an interrupt handler.
        BadContext,
    }
}

define_error! {
    mod sem_pend_error {}
    /// Error type for [`Kernel::sem_pend`](crate::Kernel::sem_pend) and
    /// [`Kernel::sem_pend_finish`](crate::Kernel::sem_pend_finish).
    pub enum SemPendError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running, the caller is an interrupt handler, or
        /// the scheduler is locked.
        BadContext,
        /// The wait was aborted.
        Interrupted,
        /// The wait timed out, or the semaphore was not available for a
        /// non-blocking request.
        Timeout,
        /// The semaphore was deleted while waiting.
        Deleted,
    }
}

define_error! {
    mod sem_post_error {}
    /// Error type for [`Kernel::sem_post`](crate::Kernel::sem_post).
    pub enum SemPostError: BadContextError, NoAccessError {
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running.
        BadContext,
        /// The semaphore counter would overflow.
        QueueOverflow,
    }
}

define_error! {
    mod mutex_pend_error {}
    /// Error type for [`Kernel::mutex_pend`](crate::Kernel::mutex_pend) and
    /// [`Kernel::mutex_pend_finish`](crate::Kernel::mutex_pend_finish).
    pub enum MutexPendError: BadContextError, NoAccessError, NotSupportedError {
        /// Mutexes are disabled.
        NotSupported,
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running, the caller is an interrupt handler, or
        /// the scheduler is locked.
        BadContext,
        /// The owner's nesting count would overflow.
        QueueOverflow,
        /// The wait was aborted.
        Interrupted,
        /// The wait timed out, or the mutex was owned by another task for a
        /// non-blocking request.
        Timeout,
        /// The mutex was deleted while waiting.
        Deleted,
    }
}

define_error! {
    mod mutex_post_error {}
    /// Error type for [`Kernel::mutex_post`](crate::Kernel::mutex_post).
    pub enum MutexPostError: BadContextError, NoAccessError, NotSupportedError {
        /// Mutexes are disabled.
        NotSupported,
        /// Invalid object access.
        NoAccess,
        /// The kernel is not running, or the caller is an interrupt handler.
        BadContext,
        /// The calling task does not own the mutex.
        NotOwner,
    }
}
