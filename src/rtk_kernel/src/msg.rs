//! Message pool and per-task message queues
use core::fmt;

use crate::{utils::Init, Timestamp};

/// A message passed through a task message queue. The kernel never
/// dereferences `ptr`; its meaning is up to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Msg {
    pub ptr: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy)]
struct MsgNode {
    msg: Msg,
    ts: Timestamp,
    next: Option<usize>,
}

impl Init for MsgNode {
    const INIT: Self = Self {
        msg: Msg { ptr: 0, size: 0 },
        ts: 0,
        next: None,
    };
}

/// A fixed-capacity pool of message nodes shared by all message queues.
/// Free nodes are chained through [`MsgNode::next`].
#[derive(Clone, Copy)]
pub(crate) struct MsgPool<const LEN: usize> {
    nodes: [MsgNode; LEN],
    free: Option<usize>,
    num_free: usize,
    /// `false` until the free chain is built on the first allocation.
    initialized: bool,
}

impl<const LEN: usize> Init for MsgPool<LEN> {
    const INIT: Self = Self {
        nodes: [MsgNode::INIT; LEN],
        free: None,
        num_free: LEN,
        initialized: false,
    };
}

impl<const LEN: usize> fmt::Debug for MsgPool<LEN> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MsgPool")
            .field("num_free", &self.num_free)
            .finish_non_exhaustive()
    }
}

impl<const LEN: usize> MsgPool<LEN> {
    #[inline]
    pub fn free_count(&self) -> usize {
        self.num_free
    }

    fn ensure_initialized(&mut self) {
        if self.initialized {
            return;
        }
        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.next = if i + 1 < LEN { Some(i + 1) } else { None };
        }
        self.free = if LEN > 0 { Some(0) } else { None };
        self.initialized = true;
    }

    fn alloc(&mut self, msg: Msg, ts: Timestamp) -> Option<usize> {
        self.ensure_initialized();
        let i = self.free?;
        let node = &mut self.nodes[i];
        self.free = node.next;
        *node = MsgNode {
            msg,
            ts,
            next: None,
        };
        self.num_free -= 1;
        Some(i)
    }

    fn free(&mut self, i: usize) {
        self.nodes[i].next = self.free;
        self.free = Some(i);
        self.num_free += 1;
    }
}

/// Why [`MsgQ::put`] failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MsgQPutError {
    /// The queue has reached its capacity.
    Full,
    /// The message pool is exhausted.
    PoolEmpty,
}

/// A task's message queue: a singly linked list of pool nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MsgQ {
    first: Option<usize>,
    last: Option<usize>,
    len: usize,
    capacity: usize,
    /// The largest `len` observed.
    peak_len: usize,
}

impl Init for MsgQ {
    const INIT: Self = Self::with_capacity(0);
}

impl MsgQ {
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            first: None,
            last: None,
            len: 0,
            capacity,
            peak_len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn peak_len(&self) -> usize {
        self.peak_len
    }

    /// Enqueue a message at the back, or at the front if `lifo` is set.
    pub fn put<const LEN: usize>(
        &mut self,
        pool: &mut MsgPool<LEN>,
        msg: Msg,
        ts: Timestamp,
        lifo: bool,
    ) -> Result<(), MsgQPutError> {
        if self.len >= self.capacity {
            return Err(MsgQPutError::Full);
        }
        let node = pool.alloc(msg, ts).ok_or(MsgQPutError::PoolEmpty)?;

        if lifo {
            pool.nodes[node].next = self.first;
            self.first = Some(node);
            if self.last.is_none() {
                self.last = Some(node);
            }
        } else {
            match self.last {
                Some(last) => pool.nodes[last].next = Some(node),
                None => self.first = Some(node),
            }
            self.last = Some(node);
        }

        self.len += 1;
        self.peak_len = self.peak_len.max(self.len);
        Ok(())
    }

    /// Dequeue the message at the front.
    pub fn get<const LEN: usize>(&mut self, pool: &mut MsgPool<LEN>) -> Option<(Msg, Timestamp)> {
        let node = self.first?;
        let MsgNode { msg, ts, next } = pool.nodes[node];

        self.first = next;
        if next.is_none() {
            self.last = None;
        }
        self.len -= 1;
        pool.free(node);

        Some((msg, ts))
    }

    /// Discard all messages, returning them to the pool. Returns the number
    /// of messages discarded.
    pub fn clear<const LEN: usize>(&mut self, pool: &mut MsgPool<LEN>) -> usize {
        let mut count = 0;
        while self.get(pool).is_some() {
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(ptr: usize) -> Msg {
        Msg { ptr, size: 1 }
    }

    #[test]
    fn fifo_and_lifo() {
        let mut pool = MsgPool::<4>::INIT;
        let mut q = MsgQ::with_capacity(4);

        q.put(&mut pool, msg(1), 10, false).unwrap();
        q.put(&mut pool, msg(2), 20, false).unwrap();
        q.put(&mut pool, msg(0), 30, true).unwrap();
        assert_eq!(pool.free_count(), 1);

        assert_eq!(q.get(&mut pool), Some((msg(0), 30)));
        assert_eq!(q.get(&mut pool), Some((msg(1), 10)));
        assert_eq!(q.get(&mut pool), Some((msg(2), 20)));
        assert_eq!(q.get(&mut pool), None);
        assert_eq!(pool.free_count(), 4);
        assert_eq!(q.peak_len(), 3);
    }

    #[test]
    fn capacity_and_pool_exhaustion() {
        let mut pool = MsgPool::<3>::INIT;
        let mut q1 = MsgQ::with_capacity(2);
        let mut q2 = MsgQ::with_capacity(8);

        q1.put(&mut pool, msg(1), 0, false).unwrap();
        q1.put(&mut pool, msg(2), 0, false).unwrap();
        assert_eq!(q1.put(&mut pool, msg(3), 0, false), Err(MsgQPutError::Full));

        q2.put(&mut pool, msg(4), 0, false).unwrap();
        assert_eq!(
            q2.put(&mut pool, msg(5), 0, false),
            Err(MsgQPutError::PoolEmpty)
        );

        assert_eq!(q1.clear(&mut pool), 2);
        assert_eq!(pool.free_count(), 2);
        q2.put(&mut pool, msg(5), 0, true).unwrap();
        assert_eq!(q2.get(&mut pool), Some((msg(5), 0)));
        assert_eq!(q2.get(&mut pool), Some((msg(4), 0)));
    }

    #[test]
    fn zero_capacity_rejects() {
        let mut pool = MsgPool::<2>::INIT;
        let mut q = MsgQ::INIT;
        assert_eq!(q.put(&mut pool, msg(1), 0, false), Err(MsgQPutError::Full));
        assert_eq!(pool.free_count(), 2);
    }
}
