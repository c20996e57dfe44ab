//! Tasks
use core::fmt;

use arrayvec::ArrayVec;

use crate::{
    error::{
        CreateTaskError, DeleteTaskError, NoAccessError, ResumeTaskError, SetTaskPriorityError,
        SuspendTaskError, TimeQuantaSetError,
    },
    klock,
    msg::{Msg, MsgQ},
    port::{Port, StackHunk, StackWord},
    timeout::TickLink,
    utils::{index_list::Link, Init},
    wait::{PendOn, PendStatus},
    Kernel, Priority, SemCount, TaskEntry, Ticks, Timestamp,
};

#[doc(hidden)]
pub mod queue;
#[doc(hidden)]
pub mod readyqueue;
mod reg;
#[doc(hidden)]
pub mod signal;
mod stack;

pub use self::{
    reg::{TaskRegId, NUM_TASK_REGS},
    stack::TaskStackInfo,
};

/// Identifies a task.
///
/// A handle becomes stale when the task is deleted. Operations on a stale
/// handle fail with `NoAccess` even if the slot has been reused by another
/// task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl TaskId {
    /// Get the position of the task in the task table.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// The properties of a task to be created by [`Kernel::create_task`].
#[derive(Debug, Clone, Copy)]
pub struct TaskAttr {
    pub name: &'static str,
    pub entry: TaskEntry,
    /// The parameter passed to `entry`.
    pub arg: usize,
    pub priority: Priority,
    /// The round-robin time quantum. `0` selects the kernel-wide default.
    pub time_quanta: Ticks,
    /// The capacity of the task's message queue.
    pub queue_size: usize,
}

impl TaskAttr {
    pub const fn new(name: &'static str, entry: TaskEntry, priority: Priority) -> Self {
        Self {
            name,
            entry,
            arg: 0,
            priority,
            time_quanta: 0,
            queue_size: 0,
        }
    }

    pub const fn arg(self, arg: usize) -> Self {
        Self { arg, ..self }
    }

    pub const fn time_quanta(self, time_quanta: Ticks) -> Self {
        Self {
            time_quanta,
            ..self
        }
    }

    pub const fn queue_size(self, queue_size: usize) -> Self {
        Self { queue_size, ..self }
    }
}

/// Task state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSt {
    /// The task is in the ready queue. The running task is also `Ready`.
    Ready,
    /// The task is waiting for a timeout.
    Delayed,
    /// The task is waiting for an object or a signal with no timeout.
    Pending,
    /// The task is waiting for an object or a signal with a timeout.
    PendingTimeout,
    Suspended,
    DelayedSuspended,
    PendingSuspended,
    PendingTimeoutSuspended,
    /// The slot holds no task.
    Deleted,
}

impl Init for TaskSt {
    const INIT: Self = Self::Deleted;
}

impl TaskSt {
    /// Get a flag indicating whether the task is waiting for an object or a
    /// signal (whether or not it's also suspended).
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::PendingTimeout
                | Self::PendingSuspended
                | Self::PendingTimeoutSuspended
        )
    }

    pub fn is_suspended(self) -> bool {
        matches!(
            self,
            Self::Suspended
                | Self::DelayedSuspended
                | Self::PendingSuspended
                | Self::PendingTimeoutSuspended
        )
    }

    /// Apply a suspension to a state that is not already suspended.
    fn suspended(self) -> Self {
        match self {
            Self::Ready => Self::Suspended,
            Self::Delayed => Self::DelayedSuspended,
            Self::Pending => Self::PendingSuspended,
            Self::PendingTimeout => Self::PendingTimeoutSuspended,
            other => other,
        }
    }

    /// Remove a suspension from a suspended state.
    fn resumed(self) -> Self {
        match self {
            Self::Suspended => Self::Ready,
            Self::DelayedSuspended => Self::Delayed,
            Self::PendingSuspended => Self::Pending,
            Self::PendingTimeoutSuspended => Self::PendingTimeout,
            other => other,
        }
    }
}

/// The list a task is linked to through [`TaskCb::link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListLink {
    Unlinked,
    /// The task is in the ready queue at the level of its current priority.
    Ready(Link),
    /// The task is in the pend list of the object `obj`.
    Pend { obj: usize, link: Link },
}

/// *Task control block* - the state data of a task.
#[derive(Clone, Copy)]
pub(crate) struct TaskCb<PortTaskState> {
    pub port_task_state: PortTaskState,

    /// Incremented whenever the slot is reused so that stale [`TaskId`]s
    /// can be detected.
    pub generation: u32,

    pub st: TaskSt,
    pub name: &'static str,
    pub stack: StackHunk,

    /// The task's base priority.
    pub base_priority: Priority,

    /// The task's effective priority. It equals `base_priority` unless it's
    /// temporarily raised by priority inheritance. The effective priority
    /// determines the task's position in the ready queue and pend lists.
    pub priority: Priority,

    /// The number of outstanding suspensions. Non-zero iff `st.is_suspended()`.
    pub suspend_nesting: u8,

    pub link: ListLink,

    /// The task's entry in the tick list, present iff it's waiting for a
    /// timeout.
    pub tick: Option<TickLink>,

    pub pend_on: PendOn,
    /// How the last wait ended.
    pub pend_status: PendStatus,
    /// The message delivered by the last successful wait on the message
    /// queue.
    pub pend_msg: Option<Msg>,
    /// The timestamp recorded by the last post or abort.
    pub ts: Timestamp,

    /// The task's built-in counting semaphore.
    pub sem_count: SemCount,
    pub msg_q: MsgQ,

    pub time_quanta: Ticks,
    pub time_quanta_count: Ticks,

    /// The last mutex locked by the task. The mutexes held by a task form a
    /// singly linked list through [`MutexCb::prev_mutex_held`].
    ///
    /// [`MutexCb::prev_mutex_held`]: crate::mutex::MutexCb::prev_mutex_held
    pub last_mutex_held: Option<usize>,

    pub context_switch_count: u32,

    /// Task registers (see [`Kernel::task_reg_get`]).
    pub regs: [usize; NUM_TASK_REGS],
}

impl<PortTaskState: Init> Init for TaskCb<PortTaskState> {
    const INIT: Self = Self {
        port_task_state: PortTaskState::INIT,
        generation: 0,
        st: TaskSt::INIT,
        name: "",
        stack: StackHunk::INIT,
        base_priority: 0,
        priority: 0,
        suspend_nesting: 0,
        link: ListLink::Unlinked,
        tick: None,
        pend_on: PendOn::Nothing,
        pend_status: PendStatus::Ok,
        pend_msg: None,
        ts: 0,
        sem_count: 0,
        msg_q: MsgQ::INIT,
        time_quanta: 0,
        time_quanta_count: 0,
        last_mutex_held: None,
        context_switch_count: 0,
        regs: [0; NUM_TASK_REGS],
    };
}

impl<PortTaskState: fmt::Debug> fmt::Debug for TaskCb<PortTaskState> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("port_task_state", &self.port_task_state)
            .field("name", &self.name)
            .field("st", &self.st)
            .field("base_priority", &self.base_priority)
            .field("priority", &self.priority)
            .field("suspend_nesting", &self.suspend_nesting)
            .field("link", &self.link)
            .field("tick", &self.tick)
            .field("pend_on", &self.pend_on)
            .field("pend_status", &self.pend_status)
            .field("sem_count", &self.sem_count)
            .field("msg_q", &self.msg_q)
            .field("last_mutex_held", &self.last_mutex_held)
            .finish()
    }
}

/// A snapshot of a task's properties returned by [`Kernel::task_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: &'static str,
    pub state: TaskSt,
    pub priority: Priority,
    pub base_priority: Priority,
    pub suspend_nesting: u8,
    pub pend_on: PendOn,
    pub pend_status: PendStatus,
    pub sem_count: SemCount,
    pub queue_len: usize,
    pub time_quanta: Ticks,
    pub context_switch_count: u32,
}

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    /// Resolve a `TaskId` to an index into the task table.
    pub(crate) fn task_index(&self, task: TaskId) -> Result<usize, NoAccessError> {
        match self.tasks.get(task.index) {
            Some(task_cb)
                if task_cb.generation == task.generation && task_cb.st != TaskSt::Deleted =>
            {
                Ok(task.index)
            }
            _ => Err(NoAccessError::NoAccess),
        }
    }

    #[inline]
    pub(crate) fn task_id(&self, i: usize) -> TaskId {
        TaskId {
            index: i,
            generation: self.tasks[i].generation,
        }
    }

    /// Get the effective priority of the running task.
    #[inline]
    pub(crate) fn running_priority(&self) -> Option<Priority> {
        self.state.running_task.map(|i| self.tasks[i].priority)
    }

    /// Check if `priority` can be assigned to an application task.
    fn is_valid_app_priority(&self, priority: Priority) -> bool {
        priority < NUM_PRIOS && !(self.cfg.idle_task && priority == NUM_PRIOS - 1)
    }

    /// Transition a task into the Ready state and insert it into the ready
    /// queue.
    pub(crate) fn make_ready(&mut self, i: usize) {
        let running_priority = self.running_priority();
        self.tasks[i].st = TaskSt::Ready;
        self.ready_queue
            .insert_on_ready(&mut self.tasks, i, running_priority);
    }

    /// Create a task and insert it into the ready queue. If the kernel is
    /// running and the new task has a higher priority than the caller, the
    /// new task preempts the caller.
    pub fn create_task(
        &mut self,
        attr: TaskAttr,
        stack: &'static mut [StackWord],
    ) -> Result<TaskId, CreateTaskError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_task_context()?;

        if !lock.is_valid_app_priority(attr.priority) {
            return Err(CreateTaskError::BadParam);
        }

        let task = lock.create_task_inner(attr, stack)?;

        if lock.state.running {
            lock.check_preemption();
        }

        Ok(task)
    }

    pub(crate) fn create_task_inner(
        &mut self,
        attr: TaskAttr,
        stack: &'static mut [StackWord],
    ) -> Result<TaskId, CreateTaskError> {
        if stack.len() < self.cfg.min_stack_len || stack.len() <= self.cfg.redzone_len() {
            return Err(CreateTaskError::BadParam);
        }

        let i = self
            .tasks
            .iter()
            .position(|task_cb| task_cb.st == TaskSt::Deleted)
            .ok_or(CreateTaskError::NoMemory)?;

        let time_quanta = self.state.time_quanta_or_default(attr.time_quanta);
        let queue_size = if self.cfg.task_queue {
            attr.queue_size
        } else {
            0
        };

        let stack = StackHunk::from_slice(stack);
        self.init_stack(&stack);

        let task_cb = &mut self.tasks[i];
        *task_cb = TaskCb {
            generation: task_cb.generation.wrapping_add(1),
            name: attr.name,
            stack,
            base_priority: attr.priority,
            priority: attr.priority,
            time_quanta: attr.time_quanta,
            time_quanta_count: time_quanta,
            msg_q: MsgQ::with_capacity(queue_size),
            ..TaskCb::INIT
        };
        self.port.initialize_task_state(
            &mut self.tasks[i].port_task_state,
            attr.entry,
            attr.arg,
            stack,
        );

        let task = self.task_id(i);
        if let Some(hook) = self.cfg.hooks.task_create {
            hook(task);
        }

        self.tasks[i].st = TaskSt::Ready;
        self.ready_queue.insert_at_creation(&mut self.tasks, i);
        self.state.task_count += 1;

        log::debug!(
            "created {:?} ({:?}) at priority {}",
            task,
            attr.name,
            attr.priority
        );

        Ok(task)
    }

    /// Delete a task, releasing every resource it holds.
    ///
    /// The idle task can't be deleted. A task can delete itself unless the
    /// scheduler is locked.
    pub fn delete_task(&mut self, task: TaskId) -> Result<(), DeleteTaskError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let i = lock.task_index(task)?;

        if Some(i) == lock.state.idle_task {
            return Err(DeleteTaskError::BadParam);
        }
        if Some(i) == lock.state.running_task && lock.state.sched_lock_nesting > 0 {
            return Err(DeleteTaskError::BadContext);
        }

        lock.delete_task_inner(i);
        lock.check_preemption();

        Ok(())
    }

    fn delete_task_inner(&mut self, i: usize) {
        let task = self.task_id(i);

        match self.tasks[i].st {
            TaskSt::Ready => self.ready_queue.remove(&mut self.tasks, i),
            TaskSt::Suspended => {}
            TaskSt::Delayed | TaskSt::DelayedSuspended => self.tick_list_remove(i),
            TaskSt::Pending
            | TaskSt::PendingTimeout
            | TaskSt::PendingSuspended
            | TaskSt::PendingTimeoutSuspended => {
                if self.tasks[i].tick.is_some() {
                    self.tick_list_remove(i);
                }
                self.detach_waiter(i);
            }
            TaskSt::Deleted => unreachable!(),
        }

        if self.tasks[i].last_mutex_held.is_some() {
            self.mutex_release_all(i);
        }

        let num_freed = self.tasks[i].msg_q.clear(&mut self.msg_pool);

        if let Some(hook) = self.cfg.hooks.task_delete {
            hook(task);
        }

        self.state.task_count -= 1;

        let generation = self.tasks[i].generation;
        self.tasks[i] = TaskCb {
            generation,
            ..TaskCb::INIT
        };

        log::debug!("deleted {:?} ({} queued messages freed)", task, num_freed);
    }

    /// Set a task's base priority.
    ///
    /// If the task holds mutexes and the new priority is lower than its
    /// current effective priority, the effective priority doesn't go below
    /// the highest priority among the tasks waiting for those mutexes.
    pub fn set_task_priority(
        &mut self,
        task: TaskId,
        priority: Priority,
    ) -> Result<(), SetTaskPriorityError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_task_context()?;
        let i = lock.task_index(task)?;

        if Some(i) == lock.state.idle_task || !lock.is_valid_app_priority(priority) {
            return Err(SetTaskPriorityError::BadParam);
        }

        lock.tasks[i].base_priority = priority;

        let mut effective_priority = priority;
        if lock.tasks[i].last_mutex_held.is_some() && priority > lock.tasks[i].priority {
            effective_priority = effective_priority.min(lock.mutex_group_highest_priority(i));
        }

        lock.change_effective_priority(i, effective_priority);

        if lock.state.running {
            lock.check_preemption();
        }

        Ok(())
    }

    /// Change a task's effective priority and propagate the change through
    /// the chain of mutex owners the task is (transitively) waiting for.
    ///
    /// A Ready task is moved to the tail of its new level, except the running
    /// task, which is moved to the head so that it keeps the CPU among its
    /// peers.
    pub(crate) fn change_effective_priority(&mut self, mut i: usize, mut priority: Priority) {
        // Each step moves to a different task's owner, and a chain can't
        // revisit a task, so the number of steps is bounded by `NUM_TASKS`
        for _ in 0..NUM_TASKS {
            let old_priority = self.tasks[i].priority;

            match self.tasks[i].st {
                TaskSt::Ready => {
                    self.ready_queue.remove(&mut self.tasks, i);
                    self.tasks[i].priority = priority;
                    if Some(i) == self.state.running_task {
                        self.ready_queue.push_front(&mut self.tasks, i);
                    } else {
                        self.ready_queue.push_back(&mut self.tasks, i);
                    }
                }
                TaskSt::Delayed | TaskSt::Suspended | TaskSt::DelayedSuspended => {
                    self.tasks[i].priority = priority;
                }
                TaskSt::Pending
                | TaskSt::PendingTimeout
                | TaskSt::PendingSuspended
                | TaskSt::PendingTimeoutSuspended => {
                    self.tasks[i].priority = priority;

                    let ListLink::Pend { obj, .. } = self.tasks[i].link else {
                        break;
                    };
                    self.pend_list_change_priority(obj, i);

                    let Some(owner) = self.mutex_owner_of(obj) else {
                        break;
                    };
                    let owner_priority = self.tasks[owner].priority;

                    if priority < old_priority {
                        // The waiter was raised; the owner inherits the new
                        // priority if it's lower
                        if owner_priority <= priority {
                            break;
                        }
                    } else {
                        // The waiter was lowered; if the owner inherited its
                        // priority from this waiter, re-evaluate it
                        if owner_priority != old_priority {
                            break;
                        }
                        let new_priority = self
                            .mutex_group_highest_priority(owner)
                            .min(self.tasks[owner].base_priority);
                        if new_priority == owner_priority {
                            break;
                        }
                        priority = new_priority;
                    }

                    log::trace!(
                        "propagating priority {} to the owner of object {}",
                        priority,
                        obj
                    );
                    i = owner;
                    continue;
                }
                TaskSt::Deleted => unreachable!(),
            }
            break;
        }
    }

    /// Suspend a task. Suspensions nest; the task stays suspended until it
    /// has been resumed the same number of times.
    pub fn suspend_task(&mut self, task: TaskId) -> Result<(), SuspendTaskError> {
        let mut lock = klock::lock_cpu(self)?;
        if !lock.cfg.suspend {
            return Err(SuspendTaskError::NotSupported);
        }
        lock.state.expect_task_context()?;
        let i = lock.task_index(task)?;

        if Some(i) == lock.state.idle_task {
            return Err(SuspendTaskError::BadParam);
        }
        if Some(i) == lock.state.running_task && lock.state.sched_lock_nesting > 0 {
            return Err(SuspendTaskError::BadContext);
        }

        let st = lock.tasks[i].st;
        if st.is_suspended() {
            let task_cb = &mut lock.tasks[i];
            task_cb.suspend_nesting = task_cb
                .suspend_nesting
                .checked_add(1)
                .ok_or(SuspendTaskError::QueueOverflow)?;
        } else {
            if st == TaskSt::Ready {
                let kernel = &mut *lock;
                kernel.ready_queue.remove(&mut kernel.tasks, i);
            }
            let task_cb = &mut lock.tasks[i];
            task_cb.st = st.suspended();
            task_cb.suspend_nesting = 1;
        }

        log::debug!(
            "suspended {:?} (nesting = {})",
            task,
            lock.tasks[i].suspend_nesting
        );

        if lock.state.running {
            lock.check_preemption();
        }

        Ok(())
    }

    /// Undo one suspension of a task.
    pub fn resume_task(&mut self, task: TaskId) -> Result<(), ResumeTaskError> {
        let mut lock = klock::lock_cpu(self)?;
        if !lock.cfg.suspend {
            return Err(ResumeTaskError::NotSupported);
        }
        lock.state.expect_running_task_context()?;
        let i = lock.task_index(task)?;

        if Some(i) == lock.state.running_task {
            return Err(ResumeTaskError::BadParam);
        }

        let st = lock.tasks[i].st;
        if !st.is_suspended() {
            return Err(ResumeTaskError::BadObjectState);
        }

        lock.tasks[i].suspend_nesting -= 1;
        if lock.tasks[i].suspend_nesting > 0 {
            return Ok(());
        }

        if st == TaskSt::Suspended {
            lock.make_ready(i);
        } else {
            lock.tasks[i].st = st.resumed();
        }

        log::debug!("resumed {:?} ({:?})", task, lock.tasks[i].st);

        lock.check_preemption();

        Ok(())
    }

    /// Set a task's round-robin time quantum. `0` selects the kernel-wide
    /// default.
    ///
    /// If the task has less than the new quantum left, its remaining quantum
    /// is raised to the new quantum. Otherwise, the new quantum takes effect
    /// from the next time slice.
    pub fn set_time_quanta(
        &mut self,
        task: TaskId,
        time_quanta: Ticks,
    ) -> Result<(), TimeQuantaSetError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_task_context()?;
        let i = lock.task_index(task)?;

        let effective = lock.state.time_quanta_or_default(time_quanta);
        let task_cb = &mut lock.tasks[i];
        task_cb.time_quanta = time_quanta;
        if effective > task_cb.time_quanta_count {
            task_cb.time_quanta_count = effective;
        }

        Ok(())
    }

    /// Get the running task. Returns `None` before [`Self::start`] and in an
    /// interrupt context.
    pub fn current_task(&self) -> Option<TaskId> {
        if !self.state.is_task_context() {
            return None;
        }
        let i = self.state.running_task?;
        (self.tasks[i].st != TaskSt::Deleted).then(|| self.task_id(i))
    }

    /// Get the idle task.
    pub fn idle_task(&self) -> Option<TaskId> {
        self.state.idle_task.map(|i| self.task_id(i))
    }

    pub fn task_state(&self, task: TaskId) -> Result<TaskSt, NoAccessError> {
        Ok(self.tasks[self.task_index(task)?].st)
    }

    /// Get a task's effective priority.
    pub fn task_priority(&self, task: TaskId) -> Result<Priority, NoAccessError> {
        Ok(self.tasks[self.task_index(task)?].priority)
    }

    pub fn task_base_priority(&self, task: TaskId) -> Result<Priority, NoAccessError> {
        Ok(self.tasks[self.task_index(task)?].base_priority)
    }

    pub fn task_info(&self, task: TaskId) -> Result<TaskInfo, NoAccessError> {
        let task_cb = &self.tasks[self.task_index(task)?];
        Ok(TaskInfo {
            name: task_cb.name,
            state: task_cb.st,
            priority: task_cb.priority,
            base_priority: task_cb.base_priority,
            suspend_nesting: task_cb.suspend_nesting,
            pend_on: task_cb.pend_on,
            pend_status: task_cb.pend_status,
            sem_count: task_cb.sem_count,
            queue_len: task_cb.msg_q.len(),
            time_quanta: task_cb.time_quanta,
            context_switch_count: task_cb.context_switch_count,
        })
    }

    /// Get the highest priority among Ready tasks.
    pub fn highest_ready_priority(&self) -> Option<Priority> {
        self.ready_queue.highest_priority()
    }

    /// List the Ready tasks at `priority` in scheduling order.
    pub fn ready_tasks_at(&self, priority: Priority) -> ArrayVec<TaskId, NUM_TASKS> {
        self.ready_queue
            .iter_at(&self.tasks, priority)
            .map(|i| self.task_id(i))
            .collect()
    }

    /// Verify that each task's list membership matches its state.
    pub(crate) fn check_task_links(&self) -> Result<(), &'static str> {
        let mut num_tasks = 0;
        for task_cb in self.tasks.iter() {
            let st = task_cb.st;
            if st != TaskSt::Deleted {
                num_tasks += 1;
            }

            let link_ok = match (st, task_cb.link) {
                (TaskSt::Ready, ListLink::Ready(_)) => true,
                (_, ListLink::Ready(_)) => false,
                (_, ListLink::Pend { .. }) => st.is_pending() && task_cb.pend_on == PendOn::Object,
                (TaskSt::Ready, ListLink::Unlinked) => false,
                (_, ListLink::Unlinked) => {
                    !(st.is_pending() && task_cb.pend_on == PendOn::Object)
                }
            };
            if !link_ok {
                return Err("task's list link doesn't match its state");
            }

            let expects_tick = matches!(
                st,
                TaskSt::Delayed
                    | TaskSt::DelayedSuspended
                    | TaskSt::PendingTimeout
                    | TaskSt::PendingTimeoutSuspended
            );
            if expects_tick != task_cb.tick.is_some() {
                return Err("task's tick list membership doesn't match its state");
            }

            if st.is_suspended() != (task_cb.suspend_nesting > 0) {
                return Err("suspension count doesn't match the task state");
            }
            if task_cb.priority > task_cb.base_priority && st != TaskSt::Deleted {
                return Err("effective priority is lower than the base priority");
            }
        }

        if num_tasks != self.state.task_count {
            return Err("task count is out of sync");
        }
        Ok(())
    }
}
