//! The built-in message queue of each task
use core::task::Poll;

use crate::{
    cfg::{PendOpt, PostOpt},
    error::{NoAccessError, PendAbortError, TaskQFlushError, TaskQPendError, TaskQPostError},
    klock,
    msg::{Msg, MsgQPutError},
    port::Port,
    task::TaskId,
    wait::{PendOn, PendStatus},
    Kernel, Ticks, Timestamp,
};

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    /// Receive a message from the calling task's message queue.
    ///
    /// If the queue is empty, blocks the caller for at most `timeout` ticks
    /// (`0` = forever) and returns `Poll::Pending`; call
    /// [`Self::task_q_pend_finish`] when the task resumes.
    pub fn task_q_pend(
        &mut self,
        timeout: Ticks,
        opt: PendOpt,
    ) -> Result<Poll<(Msg, Timestamp)>, TaskQPendError> {
        let mut lock = klock::lock_cpu(self)?;
        if !lock.cfg.task_queue {
            return Err(TaskQPendError::NotSupported);
        }
        lock.state.expect_running_task_context()?;
        let Some(task) = lock.state.running_task else {
            return Err(TaskQPendError::BadContext);
        };

        let kernel = &mut *lock;
        if let Some(received) = kernel.tasks[task].msg_q.get(&mut kernel.msg_pool) {
            return Ok(Poll::Ready(received));
        }

        if opt.contains(PendOpt::NON_BLOCKING) {
            return Err(TaskQPendError::Timeout);
        }
        if lock.state.sched_lock_nesting > 0 {
            return Err(TaskQPendError::BadContext);
        }

        lock.block_running_task(None, PendOn::TaskQueue, timeout);
        lock.check_preemption();
        Ok(Poll::Pending)
    }

    /// Complete a [`Self::task_q_pend`] call that returned `Poll::Pending`.
    pub fn task_q_pend_finish(&mut self) -> Result<(Msg, Timestamp), TaskQPendError> {
        let mut lock = klock::lock_cpu(self)?;
        lock.state.expect_running_task_context()?;
        let Some((status, msg, ts)) = lock.take_wait_result() else {
            return Err(TaskQPendError::BadContext);
        };

        match (status, msg) {
            (PendStatus::Ok, Some(msg)) => Ok((msg, ts)),
            (PendStatus::Timeout, _) => Err(TaskQPendError::Timeout),
            _ => Err(TaskQPendError::Interrupted),
        }
    }

    /// Send a message to a task.
    ///
    /// If the task is waiting for a message, the message is handed to it
    /// directly. Otherwise, the message is enqueued at the back of the
    /// task's queue, or at the front if [`PostOpt::LIFO`] is given. This can
    /// be called from an interrupt handler.
    pub fn task_q_post(
        &mut self,
        task: TaskId,
        msg: Msg,
        opt: PostOpt,
    ) -> Result<(), TaskQPostError> {
        let mut lock = klock::lock_cpu(self)?;
        if !lock.cfg.task_queue {
            return Err(TaskQPostError::NotSupported);
        }
        lock.state.expect_running()?;
        let i = lock.task_index(task)?;
        let ts = lock.port.timestamp();

        let task_cb = &lock.tasks[i];
        if task_cb.st.is_pending() && task_cb.pend_on == PendOn::TaskQueue {
            lock.post_to(i, Some(msg), ts);
            if !opt.contains(PostOpt::NO_SCHED) {
                lock.check_preemption();
            }
            return Ok(());
        }

        let kernel = &mut *lock;
        kernel.tasks[i]
            .msg_q
            .put(&mut kernel.msg_pool, msg, ts, opt.contains(PostOpt::LIFO))
            .map_err(|e| match e {
                MsgQPutError::Full => TaskQPostError::QueueOverflow,
                MsgQPutError::PoolEmpty => TaskQPostError::NoMemory,
            })
    }

    /// Discard all messages queued for a task. Returns the number of
    /// messages discarded.
    pub fn task_q_flush(&mut self, task: TaskId) -> Result<usize, TaskQFlushError> {
        let mut lock = klock::lock_cpu(self)?;
        if !lock.cfg.task_queue {
            return Err(TaskQFlushError::NotSupported);
        }
        lock.state.expect_running_task_context()?;
        let i = lock.task_index(task)?;

        let kernel = &mut *lock;
        Ok(kernel.tasks[i].msg_q.clear(&mut kernel.msg_pool))
    }

    /// Abort a task's wait for a message. The task's pend operation fails
    /// with `Interrupted`.
    pub fn task_q_pend_abort(&mut self, task: TaskId, opt: PostOpt) -> Result<(), PendAbortError> {
        if !self.cfg.task_queue {
            return Err(PendAbortError::NotSupported);
        }
        self.abort_task_wait(task, PendOn::TaskQueue, opt)
    }

    /// Get the number of messages queued for a task and the largest number
    /// observed so far.
    pub fn task_q_len(&self, task: TaskId) -> Result<(usize, usize), NoAccessError> {
        let msg_q = &self.tasks[self.task_index(task)?].msg_q;
        Ok((msg_q.len(), msg_q.peak_len()))
    }
}
