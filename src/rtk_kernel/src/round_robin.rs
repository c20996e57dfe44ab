//! Round-robin scheduling among tasks sharing a priority level
use crate::{
    error::{BadContextError, YieldError},
    klock,
    port::Port,
    Kernel, Priority, Ticks,
};

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    /// Enable or disable round-robin scheduling and set the default time
    /// quantum. A `default_quanta` of `0` selects `tick_rate_hz / 10`.
    pub fn configure_round_robin(
        &mut self,
        enable: bool,
        default_quanta: Ticks,
    ) -> Result<(), BadContextError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.round_robin = enable;
        lock.state.round_robin_default_quanta = if default_quanta == 0 {
            lock.cfg.tick_rate_hz / 10
        } else {
            default_quanta
        };

        log::debug!(
            "round-robin {} (default quanta = {})",
            if enable { "enabled" } else { "disabled" },
            lock.state.round_robin_default_quanta
        );
        Ok(())
    }

    /// Get a flag indicating whether round-robin scheduling is enabled.
    pub fn is_round_robin_enabled(&self) -> bool {
        self.state.round_robin
    }

    /// Give up the remainder of the calling task's time quantum to the next
    /// task at the same priority.
    pub fn round_robin_yield(&mut self) -> Result<(), YieldError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_waitable_context()?;

        if !lock.state.round_robin {
            return Err(YieldError::NotSupported);
        }

        let Some(priority) = lock.running_priority() else {
            return Err(YieldError::BadContext);
        };
        if lock.ready_queue.len_at(priority) < 2 {
            return Err(YieldError::BadObjectState);
        }

        lock.rotate_level(priority);
        lock.check_preemption();
        Ok(())
    }

    /// Account a tick to the running task's time quantum, rotating its level
    /// when the quantum is exhausted. The resulting switch (if any) happens
    /// at [`Self::int_exit`].
    pub(crate) fn round_robin_tick(&mut self) {
        if !self.state.round_robin {
            return;
        }
        let Some(running_task) = self.state.running_task else {
            return;
        };
        if Some(running_task) == self.state.idle_task {
            return;
        }

        let priority = self.tasks[running_task].priority;
        let Some(first) = self.ready_queue.first_at(priority) else {
            return;
        };

        let task_cb = &mut self.tasks[first];
        if task_cb.time_quanta_count > 0 {
            task_cb.time_quanta_count -= 1;
        }
        if task_cb.time_quanta_count > 0 {
            return;
        }

        if self.ready_queue.len_at(priority) < 2 || self.state.sched_lock_nesting > 0 {
            return;
        }

        self.rotate_level(priority);
    }

    /// Move the first task at `priority` to the tail and refill the time
    /// quantum of the new first task.
    fn rotate_level(&mut self, priority: Priority) {
        let Some(first) = self.ready_queue.rotate(&mut self.tasks, priority) else {
            return;
        };
        let time_quanta = self
            .state
            .time_quanta_or_default(self.tasks[first].time_quanta);
        self.tasks[first].time_quanta_count = time_quanta;

        log::trace!(
            "round-robin: {:?} is now first at priority {}",
            self.task_id(first),
            priority
        );
    }
}
