//! Task registers: a few words of task-local storage in each task control
//! block
use crate::{
    error::{TaskRegError, TaskRegIdError},
    klock,
    port::Port,
    task::TaskId,
    Kernel,
};

/// The number of registers in each task.
pub const NUM_TASK_REGS: usize = 4;

/// Identifies a task register, usually allocated by
/// [`Kernel::task_reg_get_id`].
pub type TaskRegId = usize;

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_PRIOS: usize,
        const NUM_OBJS: usize,
        const NUM_MSGS: usize,
    > Kernel<P, NUM_TASKS, NUM_PRIOS, NUM_OBJS, NUM_MSGS>
{
    /// Allocate a register ID, so that independent software components can
    /// use the same register slot in every task without colliding. IDs are
    /// never released.
    pub fn task_reg_get_id(&mut self) -> Result<TaskRegId, TaskRegIdError> {
        let mut lock = klock::lock_cpu(self)?;
        let id = lock.state.next_task_reg_id;
        if id >= NUM_TASK_REGS {
            return Err(TaskRegIdError::NoMemory);
        }
        lock.state.next_task_reg_id += 1;
        Ok(id)
    }

    /// Get the value of a task register. Registers are zero when a task is
    /// created.
    pub fn task_reg_get(&self, task: TaskId, id: TaskRegId) -> Result<usize, TaskRegError> {
        let i = self.task_index(task)?;
        self.tasks[i]
            .regs
            .get(id)
            .copied()
            .ok_or(TaskRegError::BadParam)
    }

    /// Set the value of a task register. This can be called from an
    /// interrupt handler.
    pub fn task_reg_set(
        &mut self,
        task: TaskId,
        id: TaskRegId,
        value: usize,
    ) -> Result<(), TaskRegError> {
        let mut lock = klock::lock_cpu(self)?;
        let i = lock.task_index(task)?;
        let reg = lock.tasks[i]
            .regs
            .get_mut(id)
            .ok_or(TaskRegError::BadParam)?;
        *reg = value;
        Ok(())
    }
}
