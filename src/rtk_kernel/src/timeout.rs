//! Manages timeouts and the system tick.
//!
//! Tasks waiting for a timeout form the *tick list*, a delta list sorted by
//! expiration. Each entry stores the number of ticks remaining after the
//! expiration of the preceding entry, so a tick only ever touches the head of
//! the list. Entries expiring at the same tick are kept in insertion order.
//!
//! ```text
//!  tick_list ──> [A: 3] ──> [B: 0] ──> [C: 5]
//!                expires     expires    expires
//!                in 3        in 3       in 8
//! ```
use crate::{
    error::{BadContextError, DelayError, DelayResumeError},
    klock,
    port::Port,
    task::{TaskCb, TaskId, TaskSt},
    utils::{
        index_list::{self, Link, ListAccessor},
        Init,
    },
    wait::PendStatus,
    Kernel, Ticks,
};

/// A task's entry in the tick list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TickLink {
    link: Link,
    /// The number of ticks remaining after the preceding entry expires.
    delta: Ticks,
}

fn tick_link<S>(task_cb: &mut TaskCb<S>) -> &mut Link {
    match &mut task_cb.tick {
        Some(tick) => &mut tick.link,
        None => unreachable!("task is not in the tick list"),
    }
}

fn tick_link_ref<S>(task_cb: &TaskCb<S>) -> Option<&Link> {
    task_cb.tick.as_ref().map(|tick| &tick.link)
}

fn tick_delta<S>(task_cb: &mut TaskCb<S>) -> &mut Ticks {
    match &mut task_cb.tick {
        Some(tick) => &mut tick.delta,
        None => unreachable!("task is not in the tick list"),
    }
}

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    /// Insert `task` into the tick list so that it expires after `ticks`
    /// ticks.
    pub(crate) fn tick_list_insert(&mut self, task: usize, ticks: Ticks) {
        debug_assert!(ticks > 0);
        debug_assert!(self.tasks[task].tick.is_none());

        let mut delta = ticks;
        let mut at = self.tick_list.first;
        while let Some(i) = at {
            let i_delta = *tick_delta(&mut self.tasks[i]);
            if delta < i_delta {
                *tick_delta(&mut self.tasks[i]) = i_delta - delta;
                break;
            }
            delta -= i_delta;
            at = tick_link(&mut self.tasks[i]).next;
        }

        self.tasks[task].tick = Some(TickLink {
            link: Link::INIT,
            delta,
        });
        ListAccessor::new(
            &mut self.tick_list,
            &mut self.tasks,
            tick_link::<P::PortTaskState>,
        )
        .insert(task, at);
    }

    /// Remove `task` from the tick list, giving its remaining delta to its
    /// successor.
    pub(crate) fn tick_list_remove(&mut self, task: usize) {
        let delta = *tick_delta(&mut self.tasks[task]);
        if let Some(next) = tick_link(&mut self.tasks[task]).next {
            *tick_delta(&mut self.tasks[next]) += delta;
        }

        ListAccessor::new(
            &mut self.tick_list,
            &mut self.tasks,
            tick_link::<P::PortTaskState>,
        )
        .remove(task);
        self.tasks[task].tick = None;
    }

    /// Get the number of ticks remaining until `task`'s timeout expires.
    pub fn task_remaining_ticks(&self, task: TaskId) -> Option<Ticks> {
        let i = self.task_index(task).ok()?;
        self.tasks[i].tick.as_ref()?;

        let entries = index_list::iter(
            &self.tick_list,
            &self.tasks,
            tick_link_ref::<P::PortTaskState>,
        );
        let mut remaining = 0;
        for j in entries {
            remaining += self.tasks[j].tick.map_or(0, |tick| tick.delta);
            if j == i {
                return Some(remaining);
            }
        }
        None
    }

    /// Advance the tick list by one tick and expire the due entries.
    fn tick_list_update(&mut self) {
        let Some(first) = self.tick_list.first else {
            return;
        };
        let delta = tick_delta(&mut self.tasks[first]);
        *delta = delta.saturating_sub(1);

        while let Some(first) = self.tick_list.first {
            if *tick_delta(&mut self.tasks[first]) != 0 {
                break;
            }
            self.tick_list_remove(first);
            self.expire_timeout(first);
        }
    }

    fn expire_timeout(&mut self, task: usize) {
        match self.tasks[task].st {
            TaskSt::Delayed => self.make_ready(task),
            TaskSt::DelayedSuspended => self.tasks[task].st = TaskSt::Suspended,
            TaskSt::PendingTimeout | TaskSt::PendingTimeoutSuspended => {
                let ts = self.port.timestamp();
                self.abort_wait(task, PendStatus::Timeout, ts);
            }
            st => unreachable!("task in the tick list is in state {:?}", st),
        }
        log::trace!("timeout of {:?} expired", self.task_id(task));
    }

    /// Announce a timer tick.
    ///
    /// This must be called by the port's timer interrupt handler between
    /// [`Self::int_enter`] and [`Self::int_exit`]. Tasks made Ready by this
    /// method are dispatched by `int_exit`.
    pub fn tick(&mut self) {
        let Ok(mut lock) = klock::lock_cpu(self) else {
            return;
        };
        lock.state.tick_count = lock.state.tick_count.wrapping_add(1);

        if !lock.state.running {
            return;
        }

        lock.tick_list_update();
        lock.round_robin_tick();
    }

    /// Overwrite the tick counter returned by [`Self::tick_count`]. Pending
    /// delays and timeouts are relative and not affected.
    pub fn set_tick_count(&mut self, ticks: Ticks) -> Result<(), BadContextError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.tick_count = ticks;
        Ok(())
    }

    /// Block the calling task for `ticks` ticks. Returns immediately if
    /// `ticks` is zero.
    pub fn delay(&mut self, ticks: Ticks) -> Result<(), DelayError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_waitable_context()?;

        if ticks == 0 {
            return Ok(());
        }

        let Some(task) = lock.state.running_task else {
            return Err(DelayError::BadContext);
        };
        let kernel = &mut *lock;
        kernel.ready_queue.remove(&mut kernel.tasks, task);
        lock.tasks[task].st = TaskSt::Delayed;
        lock.tick_list_insert(task, ticks);

        log::trace!("{:?} delayed for {} ticks", lock.task_id(task), ticks);

        lock.check_preemption();
        Ok(())
    }

    /// Cancel the delay of a task blocked by [`Self::delay`]. A delayed task
    /// that is also suspended stays suspended.
    pub fn delay_resume(&mut self, task: TaskId) -> Result<(), DelayResumeError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let i = lock.task_index(task)?;

        if Some(i) == lock.state.running_task {
            return Err(DelayResumeError::BadParam);
        }

        match lock.tasks[i].st {
            TaskSt::Delayed => {
                lock.tick_list_remove(i);
                lock.make_ready(i);
            }
            TaskSt::DelayedSuspended => {
                lock.tick_list_remove(i);
                lock.tasks[i].st = TaskSt::Suspended;
            }
            _ => return Err(DelayResumeError::BadObjectState),
        }

        lock.check_preemption();
        Ok(())
    }

    /// Verify the structural invariants of the tick list.
    pub(crate) fn check_tick_list(&self) -> Result<(), &'static str> {
        let len = index_list::iter(
            &self.tick_list,
            &self.tasks,
            tick_link_ref::<P::PortTaskState>,
        )
        .count();
        let num_ticking = self.tasks.iter().filter(|t| t.tick.is_some()).count();
        if len != num_ticking {
            return Err("tick list length is out of sync");
        }
        Ok(())
    }
}
