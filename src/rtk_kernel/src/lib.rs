//! The scheduling core of a single-core, priority-based, preemptive real-time
//! kernel.
//!
//! All kernel state lives in one [`Kernel`] value. A port (see [`Port`])
//! owns the value and forwards application calls, interrupt entry/exit, and
//! timer ticks to it. The kernel decides which task runs and asks the port to
//! perform the actual context switches.
//!
//! # Priorities
//!
//! A smaller number means a higher priority. Priority `0` is the highest,
//! and `NUM_PRIOS - 1` is reserved for the idle task when it's enabled.
//!
//! # Blocking operations
//!
//! An operation that may block the calling task (e.g.,
//! [`Kernel::sem_pend`]) returns `Ok(Poll::Ready(_))` if it could complete
//! without blocking. Otherwise, it removes the caller from the ready queue,
//! asks the port to switch to another task, and returns `Ok(Poll::Pending)`.
//! When the task is resumed, it calls the matching `*_finish` method (e.g.,
//! [`Kernel::sem_pend_finish`]) to learn how the wait ended.
//!
//! # Task states
//!
//! <pre>
//!                  create
//!                    │
//!                    v     pend / delay           post / timeout / abort
//!   ┌──────────── Ready ───────────────> Pending*, Delayed ──────────> Ready
//!   │   suspend      ^                         │
//!   v                │ resume                  │ suspend (nests)
//! Suspended ─────────┘                         v
//!                                    *Suspended variants
//! </pre>
//!
//! Any state except `Deleted` moves to `Deleted` by [`Kernel::delete_task`].
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)

#[macro_use]
mod error;
mod cfg;
mod klock;
mod msg;
mod mutex;
mod port;
mod round_robin;
mod sched;
mod semaphore;
mod state;
mod task;
mod timeout;
pub mod utils;
mod wait;

#[cfg(test)]
mod tests;

pub use self::{
    cfg::*, error::*, msg::Msg, mutex::MutexId, port::*, semaphore::SemaphoreId,
    state::NESTING_MAX, task::*, wait::{PendObjInfo, PendOn, PendStatus},
};

use self::{
    msg::MsgPool,
    state::State,
    task::readyqueue::ReadyQueue,
    utils::{index_list::ListHead, Init, FIXED_PRIO_BITMAP_MAX_LEN},
    wait::PendObjCb,
};

/// Task priority. A smaller value means a higher priority.
pub type Priority = usize;

/// Duration measured in timer ticks.
pub type Ticks = u32;

/// A value of the port's free-running timestamp counter.
pub type Timestamp = u32;

/// The value type of signal and semaphore counters.
pub type SemCount = u32;

/// Task entry point. Receives [`TaskAttr::arg`].
pub type TaskEntry = fn(usize);

/// The kernel context value.
///
///  - `NUM_TASKS` is the capacity of the task table (including the idle task).
///  - `NUM_PRIOS` is the number of priority levels. It must be in range
///    `2..=FIXED_PRIO_BITMAP_MAX_LEN`.
///  - `NUM_OBJS` is the capacity of the table of waitable objects
///    (semaphores and mutexes).
///  - `NUM_MSGS` is the capacity of the message pool shared by all task
///    message queues.
pub struct Kernel<
    P: Port,
    const NUM_TASKS: usize,
    const NUM_PRIOS: usize,
    const NUM_OBJS: usize,
    const NUM_MSGS: usize,
> {
    pub(crate) port: P,
    pub(crate) cfg: KernelCfg,
    pub(crate) state: State,
    pub(crate) tasks: [TaskCb<P::PortTaskState>; NUM_TASKS],
    pub(crate) ready_queue: ReadyQueue<NUM_PRIOS>,
    pub(crate) objs: [PendObjCb; NUM_OBJS],
    pub(crate) msg_pool: MsgPool<NUM_MSGS>,
    /// The delta list of tasks waiting for a timeout, sorted by expiration.
    pub(crate) tick_list: ListHead,
}

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    const PARAMS_VALID: () = assert!(
        NUM_TASKS > 0 && NUM_PRIOS >= 2 && NUM_PRIOS <= FIXED_PRIO_BITMAP_MAX_LEN,
        "`NUM_TASKS` must be non-zero, and `NUM_PRIOS` must be in range \
        `2..=FIXED_PRIO_BITMAP_MAX_LEN`",
    );

    /// Construct a kernel in the initial (not running) state. Call
    /// [`Self::init`] and create tasks before calling [`Self::start`].
    pub fn new(port: P, cfg: KernelCfg) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::PARAMS_VALID;

        let mut state = State::INIT;
        state.round_robin = cfg.round_robin;
        state.round_robin_default_quanta = cfg.default_quanta_or(0);

        Self {
            port,
            cfg,
            state,
            tasks: [TaskCb::INIT; NUM_TASKS],
            ready_queue: ReadyQueue::INIT,
            objs: [PendObjCb::INIT; NUM_OBJS],
            msg_pool: MsgPool::INIT,
            tick_list: ListHead::INIT,
        }
    }

    /// Get a reference to the port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Get the configuration the kernel was constructed with.
    pub fn cfg(&self) -> &KernelCfg {
        &self.cfg
    }

    /// Get a flag indicating whether [`Self::start`] has been called.
    pub fn is_running(&self) -> bool {
        self.state.running
    }

    /// Get the current nesting depth of interrupt handlers.
    pub fn int_nesting(&self) -> u8 {
        self.state.int_nesting
    }

    /// Get the current nesting depth of the scheduler lock.
    pub fn sched_lock_nesting(&self) -> u8 {
        self.state.sched_lock_nesting
    }

    /// Get the number of ticks elapsed since the kernel was constructed.
    pub fn tick_count(&self) -> Ticks {
        self.state.tick_count
    }

    /// Get the number of existing tasks, including the idle task.
    pub fn task_count(&self) -> usize {
        self.state.task_count
    }

    /// Get the total number of context switches performed.
    pub fn context_switch_count(&self) -> u32 {
        self.state.context_switch_count
    }

    /// Get the number of idle task iterations (see [`Self::idle`]).
    pub fn idle_count(&self) -> u32 {
        self.state.idle_count
    }

    /// Get the number of free entries in the message pool.
    pub fn free_msg_count(&self) -> usize {
        self.msg_pool.free_count()
    }

    /// Verify the kernel's internal invariants, returning a description of
    /// the first violation found.
    ///
    /// This performs a full scan of all data structures and is meant for
    /// debugging and testing.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        self.ready_queue.check(&self.tasks)?;
        self.check_task_links()?;
        self.check_pend_lists()?;
        self.check_tick_list()?;
        self.check_mutex_groups()?;
        Ok(())
    }
}

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > klock::CpuLock for Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    fn try_enter_cpu_lock(&mut self) -> bool {
        if self.state.cpu_lock {
            false
        } else {
            self.port.enter_cpu_lock();
            self.state.cpu_lock = true;
            true
        }
    }

    fn leave_cpu_lock(&mut self) {
        debug_assert!(self.state.cpu_lock);
        self.state.cpu_lock = false;
        self.port.leave_cpu_lock();
    }
}
