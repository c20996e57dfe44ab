//! The interface between the kernel and an architecture-specific port
use core::{fmt, ptr};

use crate::{task::TaskId, utils::Init, TaskEntry, Timestamp};

/// The unit of task stack regions.
pub type StackWord = usize;

/// The stack region of a task.
///
/// The kernel takes exclusive ownership of the region when the task is
/// created and hands a copy of this handle to the port, which computes the
/// initial stack pointer from it. Stacks are assumed to grow toward lower
/// addresses; the kernel's stack checks look at the low end of the region.
#[derive(Clone, Copy)]
pub struct StackHunk {
    ptr: *mut StackWord,
    len: usize,
}

impl fmt::Debug for StackHunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("StackHunk").field(&self.as_ptr()).finish()
    }
}

impl Init for StackHunk {
    const INIT: Self = Self {
        ptr: ptr::null_mut(),
        len: 0,
    };
}

impl StackHunk {
    pub(crate) fn from_slice(stack: &'static mut [StackWord]) -> Self {
        Self {
            len: stack.len(),
            ptr: stack.as_mut_ptr(),
        }
    }

    /// Get a raw pointer to the region.
    #[inline]
    pub fn as_ptr(&self) -> *mut [StackWord] {
        ptr::slice_from_raw_parts_mut(self.ptr, self.len)
    }

    /// Get the length of the region, measured in [`StackWord`]s.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the word at `i`.
    ///
    /// # Safety
    ///
    /// `i` must be in range, and the region must not be accessed by the
    /// port concurrently.
    #[inline]
    pub(crate) unsafe fn read(&self, i: usize) -> StackWord {
        debug_assert!(i < self.len);
        self.ptr.add(i).read_volatile()
    }

    /// Write `value` to the word at `i`.
    ///
    /// # Safety
    ///
    /// See [`Self::read`].
    #[inline]
    pub(crate) unsafe fn write(&self, i: usize, value: StackWord) {
        debug_assert!(i < self.len);
        self.ptr.add(i).write_volatile(value)
    }
}

/// A task as seen by the port: its handle and the port-specific state (usually
/// the saved stack pointer) stored in its control block.
pub struct PortTask<'a, PortTaskState> {
    pub id: TaskId,
    pub state: &'a mut PortTaskState,
}

impl<PortTaskState: fmt::Debug> fmt::Debug for PortTask<'_, PortTaskState> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PortTask")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

/// Implemented by a port.
///
/// The kernel only decides *that* a context switch is needed and *to whom*;
/// the port decides *how*. All methods except `enter_cpu_lock` are called
/// with CPU Lock active. A port is expected to defer the actual register
/// save/restore requested by `switch_from_task` and `switch_from_interrupt`
/// until CPU Lock is released (e.g., by pending a software interrupt).
pub trait Port {
    /// Per-task state owned by the port, stored in the task control block.
    type PortTaskState: Copy + Send + Sync + Init + fmt::Debug + 'static;

    /// Disable all kernel-managed interrupts (this state is called
    /// *CPU Lock*).
    ///
    /// Precondition: CPU Lock inactive
    fn enter_cpu_lock(&mut self);

    /// Re-enable kernel-managed interrupts previously disabled by
    /// `enter_cpu_lock`, thus deactivating the CPU Lock state.
    ///
    /// Precondition: CPU Lock active
    fn leave_cpu_lock(&mut self);

    /// Prepare a newly created task so that it starts execution from `entry`
    /// with `arg` next time it receives the control. `stack` is the memory
    /// region the task will use as its stack. If the stack redzone is
    /// enabled, its lowest [`KernelCfg::stack_redzone_depth`] words are
    /// already filled and must be left untouched.
    ///
    /// [`KernelCfg::stack_redzone_depth`]: crate::KernelCfg::stack_redzone_depth
    fn initialize_task_state(
        &mut self,
        state: &mut Self::PortTaskState,
        entry: TaskEntry,
        arg: usize,
        stack: StackHunk,
    );

    /// Transfer the control to the first task, discarding the current
    /// (startup) context.
    fn dispatch_first_task(&mut self, to: PortTask<'_, Self::PortTaskState>);

    /// Switch from the current task to `to` at task level. `from` is `None`
    /// if the current task was deleted.
    fn switch_from_task(
        &mut self,
        from: Option<PortTask<'_, Self::PortTaskState>>,
        to: PortTask<'_, Self::PortTaskState>,
    );

    /// Switch to `to` on the return from the outermost interrupt handler.
    fn switch_from_interrupt(
        &mut self,
        from: Option<PortTask<'_, Self::PortTaskState>>,
        to: PortTask<'_, Self::PortTaskState>,
    );

    /// Read the free-running timestamp counter recorded by posts and aborts.
    fn timestamp(&mut self) -> Timestamp {
        0
    }
}
