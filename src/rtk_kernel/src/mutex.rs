//! Mutexes with priority inheritance
//!
//! A task waiting for a mutex lends its effective priority to the mutex's
//! owner if the owner's priority is lower. The loan is transitive: if the
//! owner is itself waiting for another mutex, the priority travels along
//! the chain of owners (see [`Kernel::change_effective_priority`]).
//!
//! Each task keeps the mutexes it holds in a singly linked list (the
//! *ownership group*) so that its effective priority can be recomputed
//! whenever it releases one of them or a waiter leaves.
use core::task::Poll;

use crate::{
    cfg::{PendOpt, PostOpt},
    error::{
        CreateObjectError, DeleteObjectError, MutexPendError, MutexPostError, NoAccessError,
        PendAbortError,
    },
    klock,
    port::Port,
    task::{TaskId, TaskSt},
    utils::Init,
    wait::{PendObjBody, PendObjInfo, PendOn, PendStatus},
    Kernel, Priority, Ticks, Timestamp,
};

/// Identifies a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId {
    index: usize,
    generation: u32,
}

/// The mutex-specific part of a pend object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MutexCb {
    /// The task currently holding the mutex.
    pub owner: Option<usize>,

    /// The number of times the owner re-acquired the mutex.
    pub nesting: u8,

    /// The next mutex in the owner's ownership group.
    pub prev_mutex_held: Option<usize>,
}

impl Init for MutexCb {
    const INIT: Self = Self {
        owner: None,
        nesting: 0,
        prev_mutex_held: None,
    };
}

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    fn mutex_index(&self, mutex: MutexId) -> Result<usize, NoAccessError> {
        match self.obj_index(mutex.index, mutex.generation) {
            Some(i) if matches!(self.objs[i].body, PendObjBody::Mutex(_)) => Ok(i),
            _ => Err(NoAccessError::NoAccess),
        }
    }

    fn mutex_cb(&self, obj: usize) -> Option<&MutexCb> {
        match &self.objs[obj].body {
            PendObjBody::Mutex(mutex_cb) => Some(mutex_cb),
            _ => None,
        }
    }

    fn mutex_cb_mut(&mut self, obj: usize) -> &mut MutexCb {
        match &mut self.objs[obj].body {
            PendObjBody::Mutex(mutex_cb) => mutex_cb,
            _ => unreachable!("object {} is not a mutex", obj),
        }
    }

    /// Get the owner of `obj`. Returns `None` if `obj` is not a mutex or is
    /// not held by any task.
    pub(crate) fn mutex_owner_of(&self, obj: usize) -> Option<usize> {
        self.mutex_cb(obj)?.owner
    }

    /// Create a mutex.
    pub fn mutex_create(&mut self, name: &'static str) -> Result<MutexId, CreateObjectError> {
        let mut lock = klock::lock_cpu(self)?;
        if !lock.cfg.mutex {
            return Err(CreateObjectError::NotSupported);
        }
        lock.state.expect_task_context()?;

        let index = lock
            .alloc_obj(name, PendObjBody::Mutex(MutexCb::INIT))
            .ok_or(CreateObjectError::NoMemory)?;

        log::debug!("created mutex {} ({:?})", index, name);

        Ok(MutexId {
            index,
            generation: lock.objs[index].generation,
        })
    }

    /// Delete a mutex. All waiting tasks are woken up, and their pend
    /// operations fail with `Deleted`. If the mutex is held, the owner loses
    /// any priority it inherited through it. Returns the number of tasks
    /// woken up.
    pub fn mutex_delete(&mut self, mutex: MutexId) -> Result<usize, DeleteObjectError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_task_context()?;
        let obj = lock.mutex_index(mutex)?;

        let num_woken = lock.abort_all_waiters(obj, PendStatus::Deleted);

        if let Some(owner) = lock.mutex_owner_of(obj) {
            lock.mutex_group_remove(owner, obj);
            let priority = lock.mutex_inherited_priority(owner);
            if priority != lock.tasks[owner].priority {
                lock.change_effective_priority(owner, priority);
            }
        }

        lock.free_obj(obj);

        log::debug!("deleted mutex {} ({} waiters woken)", obj, num_woken);

        lock.check_preemption();
        Ok(num_woken)
    }

    /// Acquire a mutex.
    ///
    /// Re-acquiring a mutex the caller already owns increments its nesting
    /// count. If the mutex is held by another task, the owner inherits the
    /// caller's priority if it's lower, the caller is blocked for at most
    /// `timeout` ticks (`0` = forever), and `Poll::Pending` is returned;
    /// call [`Self::mutex_pend_finish`] when the task resumes.
    pub fn mutex_pend(
        &mut self,
        mutex: MutexId,
        timeout: Ticks,
        opt: PendOpt,
    ) -> Result<Poll<()>, MutexPendError> {
        let mut lock = klock::lock_cpu(self)?;
        if !lock.cfg.mutex {
            return Err(MutexPendError::NotSupported);
        }
        lock.state.expect_running_task_context()?;
        let obj = lock.mutex_index(mutex)?;
        let Some(task) = lock.state.running_task else {
            return Err(MutexPendError::BadContext);
        };

        match lock.mutex_owner_of(obj) {
            None => {
                let mutex_cb = lock.mutex_cb_mut(obj);
                mutex_cb.owner = Some(task);
                mutex_cb.nesting = 0;
                lock.mutex_group_add(task, obj);
                return Ok(Poll::Ready(()));
            }
            Some(owner) if owner == task => {
                let mutex_cb = lock.mutex_cb_mut(obj);
                mutex_cb.nesting = mutex_cb
                    .nesting
                    .checked_add(1)
                    .ok_or(MutexPendError::QueueOverflow)?;
                return Ok(Poll::Ready(()));
            }
            Some(owner) => {
                if opt.contains(PendOpt::NON_BLOCKING) {
                    return Err(MutexPendError::Timeout);
                }
                if lock.state.sched_lock_nesting > 0 {
                    return Err(MutexPendError::BadContext);
                }

                let priority = lock.tasks[task].priority;
                if lock.tasks[owner].priority > priority {
                    log::trace!(
                        "{:?} inherits priority {} from {:?}",
                        lock.task_id(owner),
                        priority,
                        lock.task_id(task)
                    );
                    lock.change_effective_priority(owner, priority);
                }
            }
        }

        lock.block_running_task(Some(obj), PendOn::Object, timeout);
        lock.check_preemption();
        Ok(Poll::Pending)
    }

    /// Complete a [`Self::mutex_pend`] call that returned `Poll::Pending`.
    /// On success, the caller now owns the mutex.
    pub fn mutex_pend_finish(&mut self) -> Result<Timestamp, MutexPendError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let Some((status, _, ts)) = lock.take_wait_result() else {
            return Err(MutexPendError::BadContext);
        };
        match status {
            PendStatus::Ok => Ok(ts),
            PendStatus::Aborted => Err(MutexPendError::Interrupted),
            PendStatus::Timeout => Err(MutexPendError::Timeout),
            PendStatus::Deleted => Err(MutexPendError::Deleted),
        }
    }

    /// Release a mutex held by the calling task.
    ///
    /// A nested acquisition only decrements the nesting count. Otherwise,
    /// the caller drops any priority it inherited through this mutex, and
    /// ownership passes to the highest-priority waiter, if any.
    pub fn mutex_post(&mut self, mutex: MutexId, opt: PostOpt) -> Result<(), MutexPostError> {
        let mut lock = klock::lock_cpu(self)?;
        if !lock.cfg.mutex {
            return Err(MutexPostError::NotSupported);
        }
        lock.state.expect_running_task_context()?;
        let obj = lock.mutex_index(mutex)?;
        let Some(task) = lock.state.running_task else {
            return Err(MutexPostError::BadContext);
        };

        if lock.mutex_owner_of(obj) != Some(task) {
            return Err(MutexPostError::NotOwner);
        }

        let mutex_cb = lock.mutex_cb_mut(obj);
        if mutex_cb.nesting > 0 {
            mutex_cb.nesting -= 1;
            return Ok(());
        }

        lock.mutex_group_remove(task, obj);

        let task_cb = &lock.tasks[task];
        if task_cb.priority != task_cb.base_priority {
            let priority = lock.mutex_inherited_priority(task);
            if priority > lock.tasks[task].priority {
                // The running task goes to the tail of its new level
                let kernel = &mut *lock;
                kernel.ready_queue.remove(&mut kernel.tasks, task);
                kernel.tasks[task].priority = priority;
                kernel.ready_queue.push_back(&mut kernel.tasks, task);

                log::trace!("{:?} reverts to priority {}", kernel.task_id(task), priority);
            }
        }

        let ts = lock.port.timestamp();
        lock.mutex_hand_over(obj, ts);

        if !opt.contains(PostOpt::NO_SCHED) {
            lock.check_preemption();
        }
        Ok(())
    }

    /// Abort the wait of the first task (or all tasks with
    /// [`PostOpt::ALL`]) waiting for a mutex. Returns the number of tasks
    /// woken up.
    pub fn mutex_pend_abort(&mut self, mutex: MutexId, opt: PostOpt) -> Result<usize, PendAbortError> {
        let mut lock = klock::lock_cpu(self)?;
        if !lock.cfg.mutex {
            return Err(PendAbortError::NotSupported);
        }
        lock.state.expect_running_task_context()?;
        let obj = lock.mutex_index(mutex)?;
        lock.abort_object_waiters(obj, opt)
    }

    /// Get the task currently holding a mutex.
    pub fn mutex_owner(&self, mutex: MutexId) -> Result<Option<TaskId>, NoAccessError> {
        let obj = self.mutex_index(mutex)?;
        Ok(self.mutex_owner_of(obj).map(|task| self.task_id(task)))
    }

    /// Get the name and the waiters of a mutex.
    pub fn mutex_info(&self, mutex: MutexId) -> Result<PendObjInfo, NoAccessError> {
        Ok(self.obj_info(self.mutex_index(mutex)?))
    }

    /// Give `obj` to its first waiter, or leave it unowned if there's none.
    fn mutex_hand_over(&mut self, obj: usize, ts: Timestamp) {
        let next_owner = self.first_waiter(obj);

        let mutex_cb = self.mutex_cb_mut(obj);
        mutex_cb.owner = next_owner;
        mutex_cb.nesting = 0;

        if let Some(next_owner) = next_owner {
            self.mutex_group_add(next_owner, obj);
            self.post_to(next_owner, None, ts);

            log::trace!(
                "mutex {} handed over to {:?}",
                obj,
                self.task_id(next_owner)
            );
        }
    }

    fn mutex_group_add(&mut self, task: usize, obj: usize) {
        let prev = self.tasks[task].last_mutex_held;
        self.mutex_cb_mut(obj).prev_mutex_held = prev;
        self.tasks[task].last_mutex_held = Some(obj);
    }

    fn mutex_group_remove(&mut self, task: usize, obj: usize) {
        let next = self.mutex_cb_mut(obj).prev_mutex_held.take();

        if self.tasks[task].last_mutex_held == Some(obj) {
            self.tasks[task].last_mutex_held = next;
            return;
        }

        let mut cursor = self.tasks[task].last_mutex_held;
        while let Some(held) = cursor {
            let held_cb = self.mutex_cb_mut(held);
            if held_cb.prev_mutex_held == Some(obj) {
                held_cb.prev_mutex_held = next;
                return;
            }
            cursor = held_cb.prev_mutex_held;
        }

        debug_assert!(false, "mutex {} is not in the group of task {}", obj, task);
    }

    /// Get the highest priority among the tasks waiting for any mutex held
    /// by `task`. Returns the lowest priority if there are no such tasks.
    pub(crate) fn mutex_group_highest_priority(&self, task: usize) -> Priority {
        let mut highest = NUM_PRIOS - 1;
        let mut cursor = self.tasks[task].last_mutex_held;
        while let Some(obj) = cursor {
            if let Some(waiter) = self.first_waiter(obj) {
                highest = highest.min(self.tasks[waiter].priority);
            }
            cursor = self.mutex_cb(obj).and_then(|mutex_cb| mutex_cb.prev_mutex_held);
        }
        highest
    }

    /// The effective priority `task` is entitled to given its base priority
    /// and the mutexes it currently holds.
    fn mutex_inherited_priority(&self, task: usize) -> Priority {
        self.mutex_group_highest_priority(task)
            .min(self.tasks[task].base_priority)
    }

    /// Release all mutexes held by `task`, which is being deleted.
    pub(crate) fn mutex_release_all(&mut self, task: usize) {
        let ts = self.port.timestamp();
        while let Some(obj) = self.tasks[task].last_mutex_held {
            self.mutex_group_remove(task, obj);
            self.mutex_hand_over(obj, ts);
        }
    }

    /// Re-evaluate the priority of the owner of `obj` after a task with
    /// priority `waiter_priority` stopped waiting for it.
    pub(crate) fn mutex_waiter_left(&mut self, obj: usize, waiter_priority: Priority) {
        let Some(owner) = self.mutex_owner_of(obj) else {
            return;
        };

        let owner_cb = &self.tasks[owner];
        if owner_cb.priority == owner_cb.base_priority || owner_cb.priority != waiter_priority {
            return;
        }

        let priority = self.mutex_inherited_priority(owner);
        if priority != self.tasks[owner].priority {
            log::trace!(
                "{:?} reverts to priority {} after a waiter left",
                self.task_id(owner),
                priority
            );
            self.change_effective_priority(owner, priority);
        }
    }

    /// Verify that every held mutex is in its owner's ownership group and
    /// that no task is waiting for a mutex it holds.
    pub(crate) fn check_mutex_groups(&self) -> Result<(), &'static str> {
        let mut num_in_groups = 0;
        for (task, task_cb) in self.tasks.iter().enumerate() {
            let mut cursor = task_cb.last_mutex_held;
            while let Some(obj) = cursor {
                let Some(mutex_cb) = self.mutex_cb(obj) else {
                    return Err("ownership group contains a non-mutex object");
                };
                if mutex_cb.owner != Some(task) {
                    return Err("ownership group contains a mutex held by another task");
                }
                if task_cb.st == TaskSt::Deleted {
                    return Err("a deleted task holds a mutex");
                }
                num_in_groups += 1;
                if num_in_groups > NUM_OBJS {
                    return Err("ownership group is cyclic");
                }
                cursor = mutex_cb.prev_mutex_held;
            }
        }

        let num_held = self
            .objs
            .iter()
            .filter(|obj_cb| {
                matches!(obj_cb.body, PendObjBody::Mutex(MutexCb { owner: Some(_), .. }))
            })
            .count();
        if num_held != num_in_groups {
            return Err("a held mutex is missing from its owner's ownership group");
        }
        Ok(())
    }
}
