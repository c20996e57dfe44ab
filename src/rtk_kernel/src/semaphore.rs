//! Counting semaphores
use core::task::Poll;

use crate::{
    cfg::{PendOpt, PostOpt},
    error::{
        CreateObjectError, DeleteObjectError, NoAccessError, PendAbortError, SemPendError,
        SemPostError,
    },
    klock,
    port::Port,
    wait::{PendObjBody, PendObjInfo, PendOn, PendStatus},
    Kernel, SemCount, Ticks, Timestamp,
};

/// Identifies a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId {
    index: usize,
    generation: u32,
}

/// The semaphore-specific part of a pend object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SemaphoreCb {
    pub count: SemCount,
    /// The timestamp of the last post.
    pub ts: Timestamp,
}

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    fn sem_index(&self, sem: SemaphoreId) -> Result<usize, NoAccessError> {
        match self.obj_index(sem.index, sem.generation) {
            Some(i) if matches!(self.objs[i].body, PendObjBody::Semaphore(_)) => Ok(i),
            _ => Err(NoAccessError::NoAccess),
        }
    }

    fn sem_cb(&mut self, obj: usize) -> &mut SemaphoreCb {
        match &mut self.objs[obj].body {
            PendObjBody::Semaphore(sem_cb) => sem_cb,
            _ => unreachable!(),
        }
    }

    /// Create a semaphore with the initial count `count`.
    pub fn sem_create(
        &mut self,
        name: &'static str,
        count: SemCount,
    ) -> Result<SemaphoreId, CreateObjectError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_task_context()?;

        let body = PendObjBody::Semaphore(SemaphoreCb { count, ts: 0 });
        let index = lock
            .alloc_obj(name, body)
            .ok_or(CreateObjectError::NoMemory)?;

        log::debug!("created semaphore {} ({:?}, count = {})", index, name, count);

        Ok(SemaphoreId {
            index,
            generation: lock.objs[index].generation,
        })
    }

    /// Delete a semaphore. All waiting tasks are woken up, and their pend
    /// operations fail with `Deleted`. Returns the number of such tasks.
    pub fn sem_delete(&mut self, sem: SemaphoreId) -> Result<usize, DeleteObjectError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_task_context()?;
        let obj = lock.sem_index(sem)?;

        let num_woken = lock.abort_all_waiters(obj, PendStatus::Deleted);
        lock.free_obj(obj);

        log::debug!("deleted semaphore {} ({} waiters woken)", obj, num_woken);

        lock.check_preemption();
        Ok(num_woken)
    }

    /// Take a semaphore, returning the remaining count.
    ///
    /// If the count is zero, blocks the caller for at most `timeout` ticks
    /// (`0` = forever) and returns `Poll::Pending`; call
    /// [`Self::sem_pend_finish`] when the task resumes.
    pub fn sem_pend(
        &mut self,
        sem: SemaphoreId,
        timeout: Ticks,
        opt: PendOpt,
    ) -> Result<Poll<SemCount>, SemPendError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let obj = lock.sem_index(sem)?;

        let sem_cb = lock.sem_cb(obj);
        if sem_cb.count > 0 {
            sem_cb.count -= 1;
            let count = sem_cb.count;
            if let Some(task) = lock.state.running_task {
                let ts = lock.sem_cb(obj).ts;
                lock.tasks[task].ts = ts;
            }
            return Ok(Poll::Ready(count));
        }

        if opt.contains(PendOpt::NON_BLOCKING) {
            return Err(SemPendError::Timeout);
        }
        if lock.state.sched_lock_nesting > 0 {
            return Err(SemPendError::BadContext);
        }

        lock.block_running_task(Some(obj), PendOn::Object, timeout);
        lock.check_preemption();
        Ok(Poll::Pending)
    }

    /// Complete a [`Self::sem_pend`] call that returned `Poll::Pending`.
    /// Returns the timestamp of the post that woke up the caller.
    pub fn sem_pend_finish(&mut self) -> Result<Timestamp, SemPendError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let Some((status, _, ts)) = lock.take_wait_result() else {
            return Err(SemPendError::BadContext);
        };
        match status {
            PendStatus::Ok => Ok(ts),
            PendStatus::Aborted => Err(SemPendError::Interrupted),
            PendStatus::Timeout => Err(SemPendError::Timeout),
            PendStatus::Deleted => Err(SemPendError::Deleted),
        }
    }

    /// Release a semaphore, returning the count after the operation.
    ///
    /// If tasks are waiting, the first one (or all of them with
    /// [`PostOpt::ALL`]) is woken up instead of incrementing the count. This
    /// can be called from an interrupt handler.
    pub fn sem_post(&mut self, sem: SemaphoreId, opt: PostOpt) -> Result<SemCount, SemPostError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running()?;
        let obj = lock.sem_index(sem)?;
        let ts = lock.port.timestamp();

        if lock.first_waiter(obj).is_none() {
            let sem_cb = lock.sem_cb(obj);
            sem_cb.count = sem_cb
                .count
                .checked_add(1)
                .ok_or(SemPostError::QueueOverflow)?;
            sem_cb.ts = ts;
            return Ok(sem_cb.count);
        }

        while let Some(task) = lock.first_waiter(obj) {
            lock.post_to(task, None, ts);
            if !opt.contains(PostOpt::ALL) {
                break;
            }
        }

        if !opt.contains(PostOpt::NO_SCHED) {
            lock.check_preemption();
        }
        Ok(lock.sem_cb(obj).count)
    }

    /// Abort the wait of the first task (or all tasks with
    /// [`PostOpt::ALL`]) waiting for a semaphore. Returns the number of
    /// tasks woken up.
    pub fn sem_pend_abort(
        &mut self,
        sem: SemaphoreId,
        opt: PostOpt,
    ) -> Result<usize, PendAbortError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let obj = lock.sem_index(sem)?;
        lock.abort_object_waiters(obj, opt)
    }

    /// Get the current count of a semaphore.
    pub fn sem_count(&self, sem: SemaphoreId) -> Result<SemCount, NoAccessError> {
        let obj = self.sem_index(sem)?;
        match &self.objs[obj].body {
            PendObjBody::Semaphore(sem_cb) => Ok(sem_cb.count),
            _ => unreachable!(),
        }
    }

    /// Get the name and the waiters of a semaphore.
    pub fn sem_info(&self, sem: SemaphoreId) -> Result<PendObjInfo, NoAccessError> {
        Ok(self.obj_info(self.sem_index(sem)?))
    }

    /// Abort the waits of the first task (or all tasks with
    /// [`PostOpt::ALL`]) waiting for a semaphore or mutex.
    pub(crate) fn abort_object_waiters(
        &mut self,
        obj: usize,
        opt: PostOpt,
    ) -> Result<usize, PendAbortError> {
        if self.first_waiter(obj).is_none() {
            return Err(PendAbortError::BadObjectState);
        }

        let ts = self.port.timestamp();
        let mut count = 0;
        while let Some(task) = self.first_waiter(obj) {
            self.abort_wait(task, PendStatus::Aborted, ts);
            count += 1;
            if !opt.contains(PostOpt::ALL) {
                break;
            }
        }

        if !opt.contains(PostOpt::NO_SCHED) {
            self.check_preemption();
        }
        Ok(count)
    }
}
