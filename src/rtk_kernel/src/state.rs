//! Global kernel state and context checks
use crate::{error::BadContextError, utils::Init, Ticks};

/// The maximum nesting depth of interrupt handlers and scheduler locks.
pub const NESTING_MAX: u8 = 250;

/// Kernel-global state other than the object tables.
#[derive(Debug, Clone, Copy)]
pub(crate) struct State {
    /// `true` after [`Kernel::start`](crate::Kernel::start).
    pub running: bool,
    /// The task that owns the CPU (the running task), as an index into the
    /// task table.
    pub running_task: Option<usize>,
    /// The nesting depth of interrupt handlers.
    pub int_nesting: u8,
    /// The nesting depth of [`Kernel::sched_lock`](crate::Kernel::sched_lock).
    pub sched_lock_nesting: u8,
    /// `true` while the kernel-wide critical section is held.
    pub cpu_lock: bool,
    pub tick_count: Ticks,
    /// The number of existing tasks, including the idle task.
    pub task_count: usize,
    pub context_switch_count: u32,
    pub idle_task: Option<usize>,
    pub idle_count: u32,
    pub round_robin: bool,
    pub round_robin_default_quanta: Ticks,
    /// The next ID to be returned by
    /// [`Kernel::task_reg_get_id`](crate::Kernel::task_reg_get_id).
    pub next_task_reg_id: usize,
}

impl Init for State {
    const INIT: Self = Self {
        running: false,
        running_task: None,
        int_nesting: 0,
        sched_lock_nesting: 0,
        cpu_lock: false,
        tick_count: 0,
        task_count: 0,
        context_switch_count: 0,
        idle_task: None,
        idle_count: 0,
        round_robin: false,
        round_robin_default_quanta: 0,
        next_task_reg_id: 0,
    };
}

impl State {
    #[inline]
    pub fn is_task_context(&self) -> bool {
        self.int_nesting == 0
    }

    /// Resolve a task's round-robin quantum, substituting the kernel-wide
    /// default for `0`.
    #[inline]
    pub fn time_quanta_or_default(&self, time_quanta: Ticks) -> Ticks {
        if time_quanta != 0 {
            time_quanta
        } else {
            self.round_robin_default_quanta
        }
    }

    /// If the current context is not a task context, return `Err(BadContext)`.
    pub fn expect_task_context(&self) -> Result<(), BadContextError> {
        if !self.is_task_context() {
            Err(BadContextError::BadContext)
        } else {
            Ok(())
        }
    }

    /// If the kernel is not running, return `Err(BadContext)`.
    pub fn expect_running(&self) -> Result<(), BadContextError> {
        if !self.running {
            Err(BadContextError::BadContext)
        } else {
            Ok(())
        }
    }

    /// If the current context is not a running task's context, return
    /// `Err(BadContext)`.
    pub fn expect_running_task_context(&self) -> Result<(), BadContextError> {
        self.expect_running()?;
        self.expect_task_context()
    }

    /// If the current context is not waitable, return `Err(BadContext)`.
    pub fn expect_waitable_context(&self) -> Result<(), BadContextError> {
        self.expect_running_task_context()?;
        if self.sched_lock_nesting > 0 {
            Err(BadContextError::BadContext)
        } else {
            Ok(())
        }
    }
}
