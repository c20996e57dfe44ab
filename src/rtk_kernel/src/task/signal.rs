//! The built-in signal counter of each task
use core::task::Poll;

use crate::{
    cfg::{PendOpt, PostOpt},
    error::{PendAbortError, TaskSemPendError, TaskSemPostError, TaskSemSetError},
    klock,
    port::Port,
    task::TaskId,
    wait::{PendOn, PendStatus},
    Kernel, SemCount, Ticks, Timestamp,
};

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    /// Wait for a signal sent to the calling task by [`Self::task_sem_post`].
    ///
    /// If the signal counter is non-zero, decrements it and returns the new
    /// value along with the timestamp of the last post. Otherwise, blocks
    /// the caller for at most `timeout` ticks (`0` = forever) and returns
    /// `Poll::Pending`; call [`Self::task_sem_pend_finish`] when the task
    /// resumes.
    pub fn task_sem_pend(
        &mut self,
        timeout: Ticks,
        opt: PendOpt,
    ) -> Result<Poll<(SemCount, Timestamp)>, TaskSemPendError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let Some(task) = lock.state.running_task else {
            return Err(TaskSemPendError::BadContext);
        };

        let task_cb = &mut lock.tasks[task];
        if task_cb.sem_count > 0 {
            task_cb.sem_count -= 1;
            return Ok(Poll::Ready((task_cb.sem_count, task_cb.ts)));
        }

        if opt.contains(PendOpt::NON_BLOCKING) {
            return Err(TaskSemPendError::Timeout);
        }
        if lock.state.sched_lock_nesting > 0 {
            return Err(TaskSemPendError::BadContext);
        }

        lock.block_running_task(None, PendOn::TaskSignal, timeout);
        lock.check_preemption();
        Ok(Poll::Pending)
    }

    /// Complete a [`Self::task_sem_pend`] call that returned
    /// `Poll::Pending`.
    pub fn task_sem_pend_finish(&mut self) -> Result<(SemCount, Timestamp), TaskSemPendError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let Some((status, _, ts)) = lock.take_wait_result() else {
            return Err(TaskSemPendError::BadContext);
        };
        let Some(task) = lock.state.running_task else {
            return Err(TaskSemPendError::BadContext);
        };

        match status {
            PendStatus::Ok => Ok((lock.tasks[task].sem_count, ts)),
            PendStatus::Aborted | PendStatus::Deleted => Err(TaskSemPendError::Interrupted),
            PendStatus::Timeout => Err(TaskSemPendError::Timeout),
        }
    }

    /// Send a signal to a task. Returns the task's signal counter after the
    /// operation.
    ///
    /// If the task is waiting for a signal, it's woken up and the counter is
    /// left unchanged. This can be called from an interrupt handler.
    pub fn task_sem_post(
        &mut self,
        task: TaskId,
        opt: PostOpt,
    ) -> Result<SemCount, TaskSemPostError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running()?;
        let i = lock.task_index(task)?;
        let ts = lock.port.timestamp();

        let task_cb = &mut lock.tasks[i];
        if task_cb.st.is_pending() && task_cb.pend_on == PendOn::TaskSignal {
            lock.post_to(i, None, ts);
            if !opt.contains(PostOpt::NO_SCHED) {
                lock.check_preemption();
            }
        } else {
            task_cb.sem_count = task_cb
                .sem_count
                .checked_add(1)
                .ok_or(TaskSemPostError::QueueOverflow)?;
            task_cb.ts = ts;
        }

        Ok(lock.tasks[i].sem_count)
    }

    /// Set a task's signal counter. Returns the previous value.
    pub fn task_sem_set(
        &mut self,
        task: TaskId,
        count: SemCount,
    ) -> Result<SemCount, TaskSemSetError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_task_context()?;
        let i = lock.task_index(task)?;

        let task_cb = &mut lock.tasks[i];
        if task_cb.st.is_pending() && task_cb.pend_on == PendOn::TaskSignal {
            return Err(TaskSemSetError::BadObjectState);
        }

        Ok(core::mem::replace(&mut task_cb.sem_count, count))
    }

    /// Abort a task's wait for a signal. The task's pend operation fails
    /// with `Interrupted`.
    pub fn task_sem_pend_abort(
        &mut self,
        task: TaskId,
        opt: PostOpt,
    ) -> Result<(), PendAbortError> {
        self.abort_task_wait(task, PendOn::TaskSignal, opt)
    }

    /// Abort a task's wait on its own signal counter or message queue.
    pub(crate) fn abort_task_wait(
        &mut self,
        task: TaskId,
        pend_on: PendOn,
        opt: PostOpt,
    ) -> Result<(), PendAbortError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let i = lock.task_index(task)?;

        if Some(i) == lock.state.running_task {
            return Err(PendAbortError::BadParam);
        }

        let task_cb = &lock.tasks[i];
        if !(task_cb.st.is_pending() && task_cb.pend_on == pend_on) {
            return Err(PendAbortError::BadObjectState);
        }

        let ts = lock.port.timestamp();
        lock.abort_wait(i, PendStatus::Aborted, ts);

        log::debug!("aborted the wait of {:?} on {:?}", task, pend_on);

        if !opt.contains(PostOpt::NO_SCHED) {
            lock.check_preemption();
        }
        Ok(())
    }
}
