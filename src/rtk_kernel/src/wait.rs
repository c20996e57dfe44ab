//! Pend lists and the generic wait/wake protocol shared by all waitable
//! objects
use crate::{
    msg::Msg,
    mutex::MutexCb,
    port::Port,
    semaphore::SemaphoreCb,
    task::{ListLink, TaskCb, TaskSt},
    utils::{
        index_list::{self, Link, ListAccessor, ListHead},
        Init,
    },
    Kernel, Ticks, Timestamp,
};

/// What a task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendOn {
    Nothing,
    /// A semaphore or a mutex.
    Object,
    /// The task's own message queue.
    TaskQueue,
    /// The task's own signal counter.
    TaskSignal,
}

/// How a task's most recent wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendStatus {
    /// The wait was satisfied by a post.
    Ok,
    /// The wait was cancelled by a pend abort operation.
    Aborted,
    /// The object was deleted while the task was waiting for it.
    Deleted,
    /// The wait timed out.
    Timeout,
}

/// *Pend object control block* - the state data of a semaphore or mutex.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendObjCb {
    /// Incremented whenever the slot is reused so that stale handles can be
    /// detected.
    pub generation: u32,
    pub name: &'static str,

    /// The tasks waiting for this object, sorted by effective priority. Tasks
    /// with equal priorities are in FIFO order.
    pub wait_queue: ListHead,
    pub num_waiters: usize,

    /// The name of the first waiter, for debuggers.
    pub first_waiter_name: &'static str,

    pub body: PendObjBody,
}

/// A snapshot of a semaphore's or mutex's wait state returned by
/// [`Kernel::sem_info`] and [`Kernel::mutex_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendObjInfo {
    pub name: &'static str,
    pub num_waiters: usize,
    /// The name of the first waiter, or `""` if there are no waiters.
    pub first_waiter_name: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PendObjBody {
    Free,
    Semaphore(SemaphoreCb),
    Mutex(MutexCb),
}

impl Init for PendObjCb {
    const INIT: Self = Self {
        generation: 0,
        name: "",
        wait_queue: ListHead::INIT,
        num_waiters: 0,
        first_waiter_name: "",
        body: PendObjBody::Free,
    };
}

fn pend_link<S>(task_cb: &mut TaskCb<S>) -> &mut Link {
    match &mut task_cb.link {
        ListLink::Pend { link, .. } => link,
        _ => unreachable!("task is not in a pend list"),
    }
}

fn pend_link_ref<S>(task_cb: &TaskCb<S>) -> Option<&Link> {
    match &task_cb.link {
        ListLink::Pend { link, .. } => Some(link),
        _ => None,
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
    /// Resolve an object handle to an index into the object table.
    pub(crate) fn obj_index(&self, index: usize, generation: u32) -> Option<usize> {
        match self.objs.get(index) {
            Some(obj_cb)
                if obj_cb.generation == generation
                    && !matches!(obj_cb.body, PendObjBody::Free) =>
            {
                Some(index)
            }
            _ => None,
        }
    }

    /// Allocate an object slot.
    pub(crate) fn alloc_obj(&mut self, name: &'static str, body: PendObjBody) -> Option<usize> {
        let i = self
            .objs
            .iter()
            .position(|obj_cb| matches!(obj_cb.body, PendObjBody::Free))?;
        let obj_cb = &mut self.objs[i];
        *obj_cb = PendObjCb {
            generation: obj_cb.generation.wrapping_add(1),
            name,
            body,
            ..PendObjCb::INIT
        };
        Some(i)
    }

    pub(crate) fn obj_info(&self, obj: usize) -> PendObjInfo {
        let obj_cb = &self.objs[obj];
        PendObjInfo {
            name: obj_cb.name,
            num_waiters: obj_cb.num_waiters,
            first_waiter_name: obj_cb.first_waiter_name,
        }
    }

    /// Release an object slot. The object must have no waiters.
    pub(crate) fn free_obj(&mut self, obj: usize) {
        debug_assert!(self.objs[obj].wait_queue.is_empty());
        let generation = self.objs[obj].generation;
        self.objs[obj] = PendObjCb {
            generation,
            ..PendObjCb::INIT
        };
    }

    /// Insert `task` into the pend list of `obj`, after all waiters having
    /// the same or higher priorities.
    fn pend_list_insert(&mut self, obj: usize, task: usize) {
        let priority = self.tasks[task].priority;
        let at = index_list::iter(
            &self.objs[obj].wait_queue,
            &self.tasks,
            pend_link_ref::<P::PortTaskState>,
        )
        .find(|&i| self.tasks[i].priority > priority);

        debug_assert_eq!(self.tasks[task].link, ListLink::Unlinked);
        self.tasks[task].link = ListLink::Pend {
            obj,
            link: Link::INIT,
        };

        let obj_cb = &mut self.objs[obj];
        ListAccessor::new(
            &mut obj_cb.wait_queue,
            &mut self.tasks,
            pend_link::<P::PortTaskState>,
        )
        .insert(task, at);
        obj_cb.num_waiters += 1;
        self.update_first_waiter_name(obj);
    }

    /// Remove `task` from the pend list it's linked to.
    pub(crate) fn pend_list_remove(&mut self, task: usize) {
        let ListLink::Pend { obj, .. } = self.tasks[task].link else {
            return;
        };

        let obj_cb = &mut self.objs[obj];
        ListAccessor::new(
            &mut obj_cb.wait_queue,
            &mut self.tasks,
            pend_link::<P::PortTaskState>,
        )
        .remove(task);
        obj_cb.num_waiters -= 1;
        self.tasks[task].link = ListLink::Unlinked;
        self.update_first_waiter_name(obj);
    }

    /// Reposition `task` in the pend list of `obj` after a change in its
    /// effective priority.
    pub(crate) fn pend_list_change_priority(&mut self, obj: usize, task: usize) {
        if self.objs[obj].num_waiters > 1 {
            self.pend_list_remove(task);
            self.pend_list_insert(obj, task);
        }
    }

    fn update_first_waiter_name(&mut self, obj: usize) {
        let obj_cb = &mut self.objs[obj];
        obj_cb.first_waiter_name = match obj_cb.wait_queue.first {
            Some(first) => self.tasks[first].name,
            None => "",
        };
    }

    /// Get the first waiter of `obj`, which has the highest priority.
    #[inline]
    pub(crate) fn first_waiter(&self, obj: usize) -> Option<usize> {
        self.objs[obj].wait_queue.first
    }

    /// Block the running task.
    ///
    /// The task leaves the ready queue and, if `obj` is given, joins the pend
    /// list of `obj`. If `timeout` is non-zero, the task also joins the tick
    /// list. The caller is responsible for calling
    /// [`Self::check_preemption`] afterwards.
    pub(crate) fn block_running_task(
        &mut self,
        obj: Option<usize>,
        pend_on: PendOn,
        timeout: Ticks,
    ) {
        let Some(task) = self.state.running_task else {
            return;
        };

        self.ready_queue.remove(&mut self.tasks, task);

        let task_cb = &mut self.tasks[task];
        task_cb.pend_on = pend_on;
        task_cb.pend_status = PendStatus::Ok;
        task_cb.pend_msg = None;

        if timeout > 0 {
            task_cb.st = TaskSt::PendingTimeout;
            self.tick_list_insert(task, timeout);
        } else {
            task_cb.st = TaskSt::Pending;
        }

        if let Some(obj) = obj {
            self.pend_list_insert(obj, task);
        }

        log::trace!(
            "{:?} blocked on {:?} (object = {:?}, timeout = {})",
            self.task_id(task),
            pend_on,
            obj,
            timeout
        );
    }

    /// End the wait of `task` with `status`, delivering `msg` and `ts`.
    ///
    /// A pending task becomes Ready, or Suspended if it was suspended while
    /// waiting. This is a no-op for a task that is not pending.
    pub(crate) fn complete_wait(
        &mut self,
        task: usize,
        status: PendStatus,
        msg: Option<Msg>,
        ts: Timestamp,
    ) {
        let st = self.tasks[task].st;
        if !st.is_pending() {
            return;
        }

        self.pend_list_remove(task);
        if self.tasks[task].tick.is_some() {
            self.tick_list_remove(task);
        }

        let task_cb = &mut self.tasks[task];
        task_cb.pend_msg = msg;
        task_cb.ts = ts;
        task_cb.pend_status = status;
        task_cb.pend_on = PendOn::Nothing;

        if st.is_suspended() {
            task_cb.st = TaskSt::Suspended;
        } else {
            self.make_ready(task);
        }

        log::trace!("{:?} woken up ({:?})", self.task_id(task), status);
    }

    /// Deliver a post to a waiting `task`.
    #[inline]
    pub(crate) fn post_to(&mut self, task: usize, msg: Option<Msg>, ts: Timestamp) {
        self.complete_wait(task, PendStatus::Ok, msg, ts);
    }

    /// Cancel the wait of `task` with `status` (`Aborted`, `Deleted`, or
    /// `Timeout`).
    ///
    /// If the task was waiting for a mutex and the mutex owner had inherited
    /// its priority from the task, the owner's priority is re-evaluated.
    pub(crate) fn abort_wait(&mut self, task: usize, status: PendStatus, ts: Timestamp) {
        if !self.tasks[task].st.is_pending() {
            return;
        }

        let waited_obj = match self.tasks[task].link {
            ListLink::Pend { obj, .. } => Some(obj),
            _ => None,
        };

        self.complete_wait(task, status, None, ts);

        if let Some(obj) = waited_obj {
            self.mutex_waiter_left(obj, self.tasks[task].priority);
        }
    }

    /// Remove a pending `task` from its pend list without waking it up, as
    /// part of its deletion.
    pub(crate) fn detach_waiter(&mut self, task: usize) {
        let ListLink::Pend { obj, .. } = self.tasks[task].link else {
            return;
        };
        self.pend_list_remove(task);
        self.mutex_waiter_left(obj, self.tasks[task].priority);
    }

    /// Wake up all waiters of `obj` with `status`. Returns the number of
    /// tasks woken up.
    pub(crate) fn abort_all_waiters(&mut self, obj: usize, status: PendStatus) -> usize {
        let ts = self.port.timestamp();
        let mut count = 0;
        while let Some(task) = self.first_waiter(obj) {
            self.complete_wait(task, status, None, ts);
            count += 1;
        }
        count
    }

    /// Take the result of the running task's last wait.
    pub(crate) fn take_wait_result(&mut self) -> Option<(PendStatus, Option<Msg>, Timestamp)> {
        let task_cb = &mut self.tasks[self.state.running_task?];
        Some((task_cb.pend_status, task_cb.pend_msg.take(), task_cb.ts))
    }

    /// Verify the structural invariants of all pend lists.
    pub(crate) fn check_pend_lists(&self) -> Result<(), &'static str> {
        let mut num_linked = 0;
        for (obj, obj_cb) in self.objs.iter().enumerate() {
            let mut len = 0;
            let mut last_priority = 0;
            let waiters = index_list::iter(
                &obj_cb.wait_queue,
                &self.tasks,
                pend_link_ref::<P::PortTaskState>,
            );
            for task in waiters {
                let task_cb = &self.tasks[task];
                if !matches!(task_cb.link, ListLink::Pend { obj: o, .. } if o == obj) {
                    return Err("pend list contains a task waiting for another object");
                }
                if task_cb.priority < last_priority {
                    return Err("pend list is not sorted by priority");
                }
                last_priority = task_cb.priority;
                len += 1;
            }
            if len != obj_cb.num_waiters {
                return Err("pend list length is out of sync");
            }
            if matches!(obj_cb.body, PendObjBody::Free) && len != 0 {
                return Err("a free object has waiters");
            }
            num_linked += len;
        }

        let num_pend_linked = self
            .tasks
            .iter()
            .filter(|task_cb| matches!(task_cb.link, ListLink::Pend { .. }))
            .count();
        if num_pend_linked != num_linked {
            return Err("a waiting task is missing from its pend list");
        }
        Ok(())
    }
}
