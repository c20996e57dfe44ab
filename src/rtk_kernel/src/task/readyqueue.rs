//! Task ready queue implementation (internal use only).
//!
//! **This module is exempt from the API stability guarantee.**
use core::fmt;

use crate::{
    task::{ListLink, TaskCb, TaskSt},
    utils::{
        index_list::{self, Link, ListAccessor, ListHead},
        FixedPrioBitmap, Init, PrioBitmap,
    },
    Priority,
};

/// The ready queue, which tracks the Ready tasks in a set of FIFO lists
/// segregated by their effective priorities.
///
/// The running task stays in the ready queue, usually at the head of the
/// highest-priority non-empty level.
#[derive(Clone, Copy)]
pub(crate) struct ReadyQueue<const LEN: usize> {
    /// Invariant: `levels[i].list.first.is_some() == bitmap.get(i)`
    levels: [ReadyLevel; LEN],

    /// The task ready bitmap, in which each bit indicates whether the
    /// level corresponding to that bit contains a task or not.
    bitmap: FixedPrioBitmap,
}

#[derive(Debug, Clone, Copy)]
struct ReadyLevel {
    list: ListHead,
    len: usize,
}

impl Init for ReadyLevel {
    const INIT: Self = Self {
        list: ListHead::INIT,
        len: 0,
    };
}

impl<const LEN: usize> Init for ReadyQueue<LEN> {
    const INIT: Self = Self {
        levels: [ReadyLevel::INIT; LEN],
        bitmap: FixedPrioBitmap::INIT,
    };
}

impl<const LEN: usize> fmt::Debug for ReadyQueue<LEN> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReadyQueue")
            .field("bitmap", &self.bitmap)
            .finish_non_exhaustive()
    }
}

fn ready_link<S>(task_cb: &mut TaskCb<S>) -> &mut Link {
    match &mut task_cb.link {
        ListLink::Ready(link) => link,
        _ => unreachable!("task is not in the ready queue"),
    }
}

fn ready_link_ref<S>(task_cb: &TaskCb<S>) -> Option<&Link> {
    match &task_cb.link {
        ListLink::Ready(link) => Some(link),
        _ => None,
    }
}

impl<const LEN: usize> ReadyQueue<LEN> {
    /// Get the highest priority that has a Ready task.
    #[inline]
    pub fn highest_priority(&self) -> Option<Priority> {
        self.bitmap.find_set()
    }

    /// Get the first task at the highest non-empty level. This is the task
    /// that should be running.
    #[inline]
    pub fn first(&self) -> Option<usize> {
        self.first_at(self.highest_priority()?)
    }

    #[inline]
    pub fn first_at(&self, priority: Priority) -> Option<usize> {
        self.levels[priority].list.first
    }

    #[inline]
    pub fn len_at(&self, priority: Priority) -> usize {
        self.levels[priority].len
    }

    pub fn iter_at<'a, S>(
        &self,
        tasks: &'a [TaskCb<S>],
        priority: Priority,
    ) -> impl Iterator<Item = usize> + 'a {
        index_list::iter(&self.levels[priority].list, tasks, ready_link_ref::<S>)
    }

    /// Insert a newly created task at the tail of its level.
    #[inline]
    pub fn insert_at_creation<S>(&mut self, tasks: &mut [TaskCb<S>], task: usize) {
        self.push_back(tasks, task);
    }

    /// Insert a task that has just become Ready.
    ///
    /// If the task has the same priority as the running task, it's inserted
    /// at the tail so that the running task isn't displaced from the head.
    /// Otherwise, it's inserted at the head of its level.
    pub fn insert_on_ready<S>(
        &mut self,
        tasks: &mut [TaskCb<S>],
        task: usize,
        running_priority: Option<Priority>,
    ) {
        if Some(tasks[task].priority) == running_priority {
            self.push_back(tasks, task);
        } else {
            self.push_front(tasks, task);
        }
    }

    pub fn push_front<S>(&mut self, tasks: &mut [TaskCb<S>], task: usize) {
        let priority = self.link(tasks, task);
        let level = &mut self.levels[priority];
        ListAccessor::new(&mut level.list, tasks, ready_link::<S>).push_front(task);
        level.len += 1;
        self.bitmap.set(priority);
    }

    pub fn push_back<S>(&mut self, tasks: &mut [TaskCb<S>], task: usize) {
        let priority = self.link(tasks, task);
        let level = &mut self.levels[priority];
        ListAccessor::new(&mut level.list, tasks, ready_link::<S>).push_back(task);
        level.len += 1;
        self.bitmap.set(priority);
    }

    /// Prepare `task` for insertion and return its level.
    fn link<S>(&self, tasks: &mut [TaskCb<S>], task: usize) -> Priority {
        let task_cb = &mut tasks[task];
        debug_assert_eq!(task_cb.link, ListLink::Unlinked);
        debug_assert_eq!(task_cb.st, TaskSt::Ready);
        task_cb.link = ListLink::Ready(Link::INIT);
        task_cb.priority
    }

    /// Remove `task` from the level of its current effective priority.
    pub fn remove<S>(&mut self, tasks: &mut [TaskCb<S>], task: usize) {
        let priority = tasks[task].priority;
        let level = &mut self.levels[priority];
        ListAccessor::new(&mut level.list, tasks, ready_link::<S>).remove(task);
        tasks[task].link = ListLink::Unlinked;
        level.len -= 1;
        if level.len == 0 {
            self.bitmap.clear(priority);
        }
    }

    /// Move the first task at `priority` to the tail of the same level.
    /// Returns the new first task.
    pub fn rotate<S>(&mut self, tasks: &mut [TaskCb<S>], priority: Priority) -> Option<usize> {
        let level = &mut self.levels[priority];
        if level.len < 2 {
            return level.list.first;
        }

        let mut accessor = ListAccessor::new(&mut level.list, tasks, ready_link::<S>);
        if let Some(first) = accessor.pop_front() {
            accessor.push_back(first);
        }
        accessor.first()
    }

    /// Verify the structural invariants of the ready queue against the task
    /// table.
    pub fn check<S>(&self, tasks: &[TaskCb<S>]) -> Result<(), &'static str> {
        let mut num_linked = 0;
        for (priority, level) in self.levels.iter().enumerate() {
            if level.list.first.is_some() != self.bitmap.get(priority) {
                return Err("ready bitmap is out of sync");
            }

            let mut len = 0;
            for task in self.iter_at(tasks, priority) {
                if tasks[task].st != TaskSt::Ready || tasks[task].priority != priority {
                    return Err("ready queue contains a task at a wrong level or state");
                }
                len += 1;
            }
            if len != level.len {
                return Err("ready level length is out of sync");
            }
            num_linked += len;
        }

        let num_ready = tasks.iter().filter(|t| t.st == TaskSt::Ready).count();
        if num_ready != num_linked {
            return Err("a Ready task is missing from the ready queue");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::VecDeque;

    const NUM_TASKS: usize = 8;
    const NUM_PRIOS: usize = 4;

    struct Model {
        queue: ReadyQueue<NUM_PRIOS>,
        tasks: [TaskCb<()>; NUM_TASKS],
        reference: Vec<VecDeque<usize>>,
    }

    impl Model {
        fn new() -> Self {
            Self {
                queue: ReadyQueue::INIT,
                tasks: [TaskCb::INIT; NUM_TASKS],
                reference: vec![VecDeque::new(); NUM_PRIOS],
            }
        }

        fn ready(&mut self, task: usize, priority: Priority) {
            self.tasks[task].st = TaskSt::Ready;
            self.tasks[task].priority = priority;
        }

        fn assert_consistent(&self) {
            self.queue.check(&self.tasks).unwrap();
            for (priority, reference) in self.reference.iter().enumerate() {
                let actual: Vec<usize> = self.queue.iter_at(&self.tasks, priority).collect();
                assert_eq!(actual, Vec::from(reference.clone()), "level {}", priority);
            }
            let expected_first = self
                .reference
                .iter()
                .find_map(|level| level.front().copied());
            assert_eq!(self.queue.first(), expected_first);
        }
    }

    #[test]
    fn insert_on_ready_respects_running_level() {
        let mut m = Model::new();
        for (task, priority) in [(0, 2), (1, 2), (2, 1)] {
            m.ready(task, priority);
            m.queue.insert_at_creation(&mut m.tasks, task);
        }

        // Same level as the running task: goes to the tail
        m.ready(3, 2);
        m.queue.insert_on_ready(&mut m.tasks, 3, Some(2));
        // Different level: goes to the head
        m.ready(4, 1);
        m.queue.insert_on_ready(&mut m.tasks, 4, Some(2));

        assert_eq!(m.queue.iter_at(&m.tasks, 2).collect::<Vec<_>>(), [0, 1, 3]);
        assert_eq!(m.queue.iter_at(&m.tasks, 1).collect::<Vec<_>>(), [4, 2]);
        assert_eq!(m.queue.highest_priority(), Some(1));
        assert_eq!(m.queue.first(), Some(4));
    }

    #[test]
    fn rotate_moves_head_to_tail() {
        let mut m = Model::new();
        for task in 0..3 {
            m.ready(task, 3);
            m.queue.insert_at_creation(&mut m.tasks, task);
        }
        assert_eq!(m.queue.rotate(&mut m.tasks, 3), Some(1));
        assert_eq!(m.queue.iter_at(&m.tasks, 3).collect::<Vec<_>>(), [1, 2, 0]);
        assert_eq!(m.queue.rotate(&mut m.tasks, 0), None);
    }

    /// Apply random insertions and removals and compare the result against a
    /// set of `VecDeque`s.
    #[quickcheck]
    fn matches_reference(bytecode: Vec<u8>) {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut m = Model::new();
        for instr in bytecode.chunks_exact(3) {
            let task = instr[0] as usize % NUM_TASKS;
            let priority = instr[1] as usize % NUM_PRIOS;

            if m.tasks[task].st == TaskSt::Ready {
                let old = m.tasks[task].priority;
                log::trace!("remove {} from {}", task, old);
                m.queue.remove(&mut m.tasks, task);
                m.tasks[task].st = TaskSt::Deleted;
                m.reference[old].retain(|&x| x != task);
            } else {
                m.ready(task, priority);
                match instr[2] % 3 {
                    0 => {
                        log::trace!("push_back {} at {}", task, priority);
                        m.queue.push_back(&mut m.tasks, task);
                        m.reference[priority].push_back(task);
                    }
                    1 => {
                        log::trace!("push_front {} at {}", task, priority);
                        m.queue.push_front(&mut m.tasks, task);
                        m.reference[priority].push_front(task);
                    }
                    _ => {
                        log::trace!("rotate {}", priority);
                        m.tasks[task].st = TaskSt::Deleted;
                        m.queue.rotate(&mut m.tasks, priority);
                        if m.reference[priority].len() >= 2 {
                            let first = m.reference[priority].pop_front().unwrap();
                            m.reference[priority].push_back(first);
                        }
                    }
                }
            }

            m.assert_consistent();
        }
    }
}
