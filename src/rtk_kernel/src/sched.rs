//! The scheduler: kernel startup, dispatching, interrupt nesting, and the
//! scheduler lock
use crate::{
    error::{BadContextError, CreateTaskError, SchedLockError, SchedUnlockError, StartError},
    klock,
    port::{Port, PortTask, StackWord},
    state::NESTING_MAX,
    task::{TaskAttr, TaskSt},
    utils::pair_mut,
    Kernel, TaskEntry,
};

/// The context from which a context switch is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchFrom {
    Task,
    Interrupt,
}

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    /// Initialize the kernel, creating the idle task at priority
    /// `NUM_PRIOS - 1` if [`KernelCfg::idle_task`] is set. Otherwise,
    /// `idle_entry` and `idle_stack` are unused.
    ///
    /// The idle task's entry point is expected to call [`Self::idle`] in an
    /// endless loop.
    ///
    /// [`KernelCfg::idle_task`]: crate::KernelCfg::idle_task
    pub fn init(
        &mut self,
        idle_entry: TaskEntry,
        idle_stack: &'static mut [StackWord],
    ) -> Result<(), CreateTaskError> {
        let mut lock = klock::lock_cpu(self)?;
        if lock.state.running || lock.state.idle_task.is_some() {
            return Err(CreateTaskError::BadContext);
        }

        if lock.cfg.idle_task {
            let attr = TaskAttr::new("idle", idle_entry, NUM_PRIOS - 1);
            let task = lock.create_task_inner(attr, idle_stack)?;
            lock.state.idle_task = Some(task.index);
        }

        log::debug!("initialized (idle task = {:?})", lock.state.idle_task);
        Ok(())
    }

    /// Start multitasking by dispatching the highest-priority Ready task.
    ///
    /// At least one application task must have been created.
    pub fn start(&mut self) -> Result<(), StartError> {
        let mut lock = klock::lock_cpu(self)?;
        if lock.state.running {
            return Err(StartError::BadContext);
        }
        if lock.cfg.idle_task && lock.state.idle_task.is_none() {
            return Err(StartError::BadObjectState);
        }

        let num_kernel_tasks = lock.state.idle_task.is_some() as usize;
        if lock.state.task_count <= num_kernel_tasks {
            return Err(StartError::BadObjectState);
        }

        let Some(first) = lock.ready_queue.first() else {
            return Err(StartError::BadObjectState);
        };

        lock.state.running = true;
        lock.state.running_task = Some(first);
        lock.state.context_switch_count = lock.state.context_switch_count.wrapping_add(1);
        lock.tasks[first].context_switch_count =
            lock.tasks[first].context_switch_count.wrapping_add(1);

        let id = lock.task_id(first);
        log::debug!("starting with {:?}", id);

        let kernel = &mut *lock;
        kernel.port.dispatch_first_task(PortTask {
            id,
            state: &mut kernel.tasks[first].port_task_state,
        });

        Ok(())
    }

    /// Request a context switch if the highest-priority Ready task is not
    /// the running task. Does nothing if the scheduler is locked or the
    /// caller is an interrupt handler.
    pub fn sched(&mut self) -> Result<(), BadContextError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running()?;
        lock.check_preemption();
        Ok(())
    }

    /// The body of [`Self::sched`], used by every operation that may change
    /// the highest-priority Ready task at task level.
    pub(crate) fn check_preemption(&mut self) {
        if !self.state.running
            || !self.state.is_task_context()
            || self.state.sched_lock_nesting > 0
        {
            return;
        }
        self.switch_to_first_ready(SwitchFrom::Task);
    }

    fn switch_to_first_ready(&mut self, from: SwitchFrom) {
        let Some(next) = self.ready_queue.first() else {
            log::trace!("no Ready task");
            return;
        };
        if Some(next) == self.state.running_task {
            if from == SwitchFrom::Interrupt {
                // The interrupted task resumes
                self.check_stack_redzone(next);
            }
            return;
        }
        self.switch_to(next, from);
    }

    /// Make `next` the running task and ask the port to switch to it.
    fn switch_to(&mut self, next: usize, from: SwitchFrom) {
        let prev = self
            .state
            .running_task
            .filter(|&prev| self.tasks[prev].st != TaskSt::Deleted);
        let prev_id = prev.map(|prev| self.task_id(prev));
        let next_id = self.task_id(next);

        if let Some(prev) = prev {
            self.check_stack_redzone(prev);
        }

        if let Some(hook) = self.cfg.hooks.task_switch {
            hook(prev_id, next_id);
        }

        log::trace!("switching from {:?} to {:?} ({:?})", prev_id, next_id, from);

        self.state.running_task = Some(next);
        self.state.context_switch_count = self.state.context_switch_count.wrapping_add(1);
        self.tasks[next].context_switch_count =
            self.tasks[next].context_switch_count.wrapping_add(1);

        let (from_task, to_task) = match (prev, prev_id) {
            (Some(prev), Some(prev_id)) => {
                let (prev_cb, next_cb) = pair_mut(&mut self.tasks, prev, next);
                (
                    Some(PortTask {
                        id: prev_id,
                        state: &mut prev_cb.port_task_state,
                    }),
                    PortTask {
                        id: next_id,
                        state: &mut next_cb.port_task_state,
                    },
                )
            }
            _ => (
                None,
                PortTask {
                    id: next_id,
                    state: &mut self.tasks[next].port_task_state,
                },
            ),
        };

        match from {
            SwitchFrom::Task => self.port.switch_from_task(from_task, to_task),
            SwitchFrom::Interrupt => self.port.switch_from_interrupt(from_task, to_task),
        }
    }

    /// Notify the kernel that an interrupt handler has started. Must be
    /// paired with [`Self::int_exit`]. Ignored if the kernel is not running
    /// or the nesting limit ([`NESTING_MAX`]) has been reached.
    pub fn int_enter(&mut self) {
        let Ok(mut lock) = klock::lock_cpu(self) else {
            return;
        };
        if !lock.state.running || lock.state.int_nesting >= NESTING_MAX {
            return;
        }
        lock.state.int_nesting += 1;
    }

    /// Notify the kernel that an interrupt handler is about to return. On
    /// the return from the outermost handler, switches to the
    /// highest-priority Ready task if it's not the interrupted task.
    pub fn int_exit(&mut self) {
        let Ok(mut lock) = klock::lock_cpu(self) else {
            return;
        };
        if !lock.state.running || lock.state.int_nesting == 0 {
            return;
        }

        lock.state.int_nesting -= 1;
        if lock.state.int_nesting > 0 || lock.state.sched_lock_nesting > 0 {
            return;
        }

        lock.switch_to_first_ready(SwitchFrom::Interrupt);
    }

    /// Prevent task switches until a matching [`Self::sched_unlock`].
    /// Interrupts are still serviced. Locks nest up to [`NESTING_MAX`]
    /// levels.
    pub fn sched_lock(&mut self) -> Result<(), SchedLockError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;

        if lock.state.sched_lock_nesting >= NESTING_MAX {
            return Err(SchedLockError::QueueOverflow);
        }
        lock.state.sched_lock_nesting += 1;
        Ok(())
    }

    /// Undo one [`Self::sched_lock`]. Returns the remaining nesting depth.
    /// When the depth reaches zero, a pending preemption takes place.
    pub fn sched_unlock(&mut self) -> Result<u8, SchedUnlockError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;

        if lock.state.sched_lock_nesting == 0 {
            return Err(SchedUnlockError::BadObjectState);
        }
        lock.state.sched_lock_nesting -= 1;

        let remaining = lock.state.sched_lock_nesting;
        if remaining == 0 {
            lock.check_preemption();
        }
        Ok(remaining)
    }

    /// One iteration of the idle task: counts the iteration and calls the
    /// idle hook.
    pub fn idle(&mut self) {
        let Ok(mut lock) = klock::lock_cpu(self) else {
            return;
        };
        lock.state.idle_count = lock.state.idle_count.wrapping_add(1);
        let hook = lock.cfg.hooks.idle;
        drop(lock);

        if let Some(hook) = hook {
            hook();
        }
    }
}
