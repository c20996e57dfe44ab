//! Kernel configuration
use bitflags::bitflags;

use crate::{task::TaskId, Ticks};

/// Kernel-wide configuration, resolved once at [`Kernel::new`].
///
/// [`Kernel::new`]: crate::Kernel::new
#[derive(Debug, Clone, Copy)]
pub struct KernelCfg {
    /// Enable round-robin scheduling among tasks sharing a priority level.
    /// Can be toggled later by [`Kernel::configure_round_robin`].
    ///
    /// [`Kernel::configure_round_robin`]: crate::Kernel::configure_round_robin
    pub round_robin: bool,
    /// The time quantum given to tasks that don't specify one. `0` means
    /// `tick_rate_hz / 10`.
    pub round_robin_default_quanta: Ticks,
    /// Enable the per-task message queues.
    pub task_queue: bool,
    /// Enable task suspension.
    pub suspend: bool,
    /// Enable mutexes.
    pub mutex: bool,
    /// Create the idle task at the lowest priority level.
    pub idle_task: bool,
    /// The frequency of [`Kernel::tick`](crate::Kernel::tick) calls.
    pub tick_rate_hz: u32,
    /// The minimum stack size accepted by
    /// [`Kernel::create_task`](crate::Kernel::create_task), measured in
    /// [`StackWord`](crate::StackWord)s.
    pub min_stack_len: usize,
    /// Clear task stacks at creation so that
    /// [`Kernel::task_stack_check`](crate::Kernel::task_stack_check) can
    /// measure their usage.
    pub stack_check: bool,
    /// Fill the lowest words of each task stack with a known pattern and
    /// verify it whenever the task gives up the CPU. A corrupted redzone is
    /// reported to [`KernelHooks::stack_overflow`].
    pub stack_redzone: bool,
    /// The number of [`StackWord`](crate::StackWord)s in a stack redzone.
    pub stack_redzone_depth: usize,
    /// Application hooks.
    pub hooks: KernelHooks,
}

impl KernelCfg {
    pub const fn new() -> Self {
        Self {
            round_robin: false,
            round_robin_default_quanta: 0,
            task_queue: true,
            suspend: true,
            mutex: true,
            idle_task: true,
            tick_rate_hz: 1000,
            min_stack_len: 64,
            stack_check: false,
            stack_redzone: false,
            stack_redzone_depth: 8,
            hooks: KernelHooks::new(),
        }
    }

    pub const fn with_round_robin(self, enable: bool, default_quanta: Ticks) -> Self {
        Self {
            round_robin: enable,
            round_robin_default_quanta: default_quanta,
            ..self
        }
    }

    pub const fn with_task_queue(self, enable: bool) -> Self {
        Self {
            task_queue: enable,
            ..self
        }
    }

    pub const fn with_suspend(self, enable: bool) -> Self {
        Self {
            suspend: enable,
            ..self
        }
    }

    pub const fn with_mutex(self, enable: bool) -> Self {
        Self {
            mutex: enable,
            ..self
        }
    }

    pub const fn with_idle_task(self, enable: bool) -> Self {
        Self {
            idle_task: enable,
            ..self
        }
    }

    pub const fn with_tick_rate_hz(self, tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..self
        }
    }

    pub const fn with_min_stack_len(self, min_stack_len: usize) -> Self {
        Self {
            min_stack_len,
            ..self
        }
    }

    pub const fn with_stack_check(self, enable: bool) -> Self {
        Self {
            stack_check: enable,
            ..self
        }
    }

    pub const fn with_stack_redzone(self, enable: bool, depth: usize) -> Self {
        Self {
            stack_redzone: enable,
            stack_redzone_depth: depth,
            ..self
        }
    }

    /// Get the number of stack words reserved for the redzone.
    pub(crate) const fn redzone_len(&self) -> usize {
        if self.stack_redzone {
            self.stack_redzone_depth
        } else {
            0
        }
    }

    pub const fn with_hooks(self, hooks: KernelHooks) -> Self {
        Self { hooks, ..self }
    }

    /// Resolve a round-robin quantum, substituting the default for `0`.
    pub(crate) const fn default_quanta_or(&self, quanta: Ticks) -> Ticks {
        if quanta != 0 {
            quanta
        } else if self.round_robin_default_quanta != 0 {
            self.round_robin_default_quanta
        } else {
            self.tick_rate_hz / 10
        }
    }
}

impl Default for KernelCfg {
    fn default() -> Self {
        Self::new()
    }
}

/// Application callbacks. All but `idle` are invoked with CPU Lock active.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelHooks {
    /// Called after a task is created and before it's made Ready.
    pub task_create: Option<fn(TaskId)>,
    /// Called while a task is being deleted.
    pub task_delete: Option<fn(TaskId)>,
    /// Called before every context switch with the outgoing task (if it
    /// still exists) and the incoming task.
    pub task_switch: Option<fn(Option<TaskId>, TaskId)>,
    /// Called from each iteration of the idle task by
    /// [`Kernel::idle`](crate::Kernel::idle).
    pub idle: Option<fn()>,
    /// Called with a task whose stack redzone was found corrupted. If
    /// unset, the kernel panics instead.
    pub stack_overflow: Option<fn(TaskId)>,
}

impl KernelHooks {
    pub const fn new() -> Self {
        Self {
            task_create: None,
            task_delete: None,
            task_switch: None,
            idle: None,
            stack_overflow: None,
        }
    }
}

bitflags! {
    /// Options for the pend operations.
    #[derive(Default)]
    pub struct PendOpt: u8 {
        /// Return `Timeout` immediately instead of blocking.
        const NON_BLOCKING = 1 << 0;
    }
}

bitflags! {
    /// Options for the post operations.
    #[derive(Default)]
    pub struct PostOpt: u8 {
        /// Don't call the scheduler after readying a waiter.
        const NO_SCHED = 1 << 0;
        /// Enqueue the message at the front of the queue.
        const LIFO = 1 << 1;
        /// Wake up all waiters instead of the first one.
        const ALL = 1 << 2;
    }
}
