//! Stack usage measurement and stack redzones
use crate::{
    error::TaskStackCheckError,
    klock,
    port::{Port, StackHunk, StackWord},
    task::TaskId,
    Kernel,
};

/// The pattern filling a stack redzone.
const REDZONE_WORD: StackWord = 0xabcd_2345;

/// The stack usage of a task returned by [`Kernel::task_stack_check`].
///
/// `free + used` plus the redzone depth equals the stack length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStackInfo {
    /// The number of words above the redzone never written since the task
    /// was created.
    pub free: usize,
    /// The number of words written at some point, not including the
    /// redzone.
    pub used: usize,
}

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    /// Prepare the stack of a task being created, before the port writes the
    /// initial frame.
    pub(super) fn init_stack(&self, stack: &StackHunk) {
        let redzone_len = self.cfg.redzone_len();

        // Safety: The task doesn't exist yet, so the port doesn't access the
        // stack, and `create_task_inner` ensures `redzone_len < stack.len()`
        unsafe {
            if self.cfg.stack_check {
                for i in redzone_len..stack.len() {
                    stack.write(i, 0);
                }
            }
            for i in 0..redzone_len {
                stack.write(i, REDZONE_WORD);
            }
        }
    }

    /// Verify the stack redzone of task `i`, which has been executing until
    /// now. A corruption is reported to [`KernelHooks::stack_overflow`].
    ///
    /// [`KernelHooks::stack_overflow`]: crate::KernelHooks::stack_overflow
    pub(crate) fn check_stack_redzone(&self, i: usize) {
        if !self.cfg.stack_redzone {
            return;
        }

        let stack = &self.tasks[i].stack;
        // Safety: CPU Lock is active, and the redzone lies within the stack
        let intact =
            (0..self.cfg.redzone_len()).all(|k| unsafe { stack.read(k) } == REDZONE_WORD);
        if intact {
            return;
        }

        let task = self.task_id(i);
        log::error!(
            "stack redzone of {:?} ({:?}) is corrupted",
            task,
            self.tasks[i].name
        );
        match self.cfg.hooks.stack_overflow {
            Some(hook) => hook(task),
            None => panic!("stack overflow in {:?}", task),
        }
    }

    /// Measure a task's stack usage by counting the untouched words above
    /// the redzone. Requires [`KernelCfg::stack_check`].
    ///
    /// The result is a high-water mark; a word that happens to be written
    /// with zero is counted as free.
    ///
    /// [`KernelCfg::stack_check`]: crate::KernelCfg::stack_check
    pub fn task_stack_check(&mut self, task: TaskId) -> Result<TaskStackInfo, TaskStackCheckError> {
        let lock = klock::lock_cpu(self)?;
        if !lock.cfg.stack_check {
            return Err(TaskStackCheckError::NotSupported);
        }
        let i = lock.task_index(task)?;

        let stack = &lock.tasks[i].stack;
        let redzone_len = lock.cfg.redzone_len();
        // Safety: CPU Lock is active. The running task (if it's the target)
        // is executing this method and doesn't touch the words below its
        // stack pointer.
        let free = (redzone_len..stack.len())
            .take_while(|&k| unsafe { stack.read(k) } == 0)
            .count();

        Ok(TaskStackInfo {
            free,
            used: stack.len() - redzone_len - free,
        })
    }
}
