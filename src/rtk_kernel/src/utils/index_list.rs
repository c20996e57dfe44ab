//! Doubly linked lists threaded through a pool of elements by index
//!
//! A list is represented by a [`ListHead`] stored somewhere and a [`Link`]
//! stored in each element. Elements are addressed by their positions in the
//! pool, so a list never holds a reference to an element.
use core::fmt;

use super::Init;

/// The head of a list.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListHead {
    pub first: Option<usize>,
    pub last: Option<usize>,
}

impl Init for ListHead {
    const INIT: Self = Self {
        first: None,
        last: None,
    };
}

impl ListHead {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

impl fmt::Debug for ListHead {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListHead({:?}..={:?})", self.first, self.last)
    }
}

/// Links to the neighbors of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

impl Init for Link {
    const INIT: Self = Self {
        prev: None,
        next: None,
    };
}

/// Provides list operations on a `ListHead` and the pool its elements live
/// in. `map_link` projects an element to the `Link` used by this particular
/// list; it panics if the element is not linked to a list of this kind.
pub(crate) struct ListAccessor<'a, Element, MapLink> {
    head: &'a mut ListHead,
    pool: &'a mut [Element],
    map_link: MapLink,
}

impl<'a, Element, MapLink> ListAccessor<'a, Element, MapLink>
where
    MapLink: Fn(&mut Element) -> &mut Link,
{
    #[inline]
    pub fn new(head: &'a mut ListHead, pool: &'a mut [Element], map_link: MapLink) -> Self {
        Self {
            head,
            pool,
            map_link,
        }
    }

    #[inline]
    fn link(&mut self, i: usize) -> &mut Link {
        (self.map_link)(&mut self.pool[i])
    }

    #[inline]
    pub fn first(&self) -> Option<usize> {
        self.head.first
    }

    /// Insert `i` before `at`. If `at` is `None`, `i` is appended to the
    /// back of the list.
    ///
    /// `i`'s link must have been reset to [`Link::INIT`] by the caller.
    pub fn insert(&mut self, i: usize, at: Option<usize>) {
        debug_assert_eq!(*self.link(i), Link::INIT);

        let prev = match at {
            Some(at) => self.link(at).prev,
            None => self.head.last,
        };

        *self.link(i) = Link { prev, next: at };

        match prev {
            Some(prev) => self.link(prev).next = Some(i),
            None => self.head.first = Some(i),
        }
        match at {
            Some(at) => self.link(at).prev = Some(i),
            None => self.head.last = Some(i),
        }
    }

    #[inline]
    pub fn push_back(&mut self, i: usize) {
        self.insert(i, None);
    }

    #[inline]
    pub fn push_front(&mut self, i: usize) {
        let first = self.head.first;
        self.insert(i, first);
    }

    /// Remove `i` from the list. Its link is reset to [`Link::INIT`].
    pub fn remove(&mut self, i: usize) {
        let Link { prev, next } = *self.link(i);

        match prev {
            Some(prev) => self.link(prev).next = next,
            None => {
                debug_assert_eq!(self.head.first, Some(i));
                self.head.first = next;
            }
        }
        match next {
            Some(next) => self.link(next).prev = prev,
            None => {
                debug_assert_eq!(self.head.last, Some(i));
                self.head.last = prev;
            }
        }

        *self.link(i) = Link::INIT;
    }

    /// Remove the first element and return it.
    pub fn pop_front(&mut self) -> Option<usize> {
        let first = self.head.first?;
        self.remove(first);
        Some(first)
    }
}

/// Iterate over the elements of a list, given a read-only projection from an
/// element to its `Link`.
pub(crate) fn iter<'a, Element>(
    head: &ListHead,
    pool: &'a [Element],
    map_link: impl Fn(&Element) -> Option<&Link> + 'a,
) -> impl Iterator<Item = usize> + 'a {
    let mut cur = head.first;
    core::iter::from_fn(move || {
        let i = cur?;
        cur = map_link(&pool[i]).and_then(|link| link.next);
        Some(i)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy)]
    struct El {
        link: Link,
    }

    fn el_link(el: &mut El) -> &mut Link {
        &mut el.link
    }

    fn collect(head: &ListHead, pool: &[El]) -> Vec<usize> {
        iter(head, pool, |el| Some(&el.link)).collect()
    }

    fn collect_rev(head: &ListHead, pool: &[El]) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = head.last;
        while let Some(i) = cur {
            out.push(i);
            cur = pool[i].link.prev;
        }
        out
    }

    #[test]
    fn push_and_remove() {
        let mut pool = [El { link: Link::INIT }; 4];
        let mut head = ListHead::INIT;

        {
            let mut accessor = ListAccessor::new(&mut head, &mut pool, el_link);
            accessor.push_back(1);
            accessor.push_back(2);
            accessor.push_front(0);
            accessor.insert(3, Some(2));
        }
        assert_eq!(collect(&head, &pool), [0, 1, 3, 2]);
        assert_eq!(collect_rev(&head, &pool), [2, 3, 1, 0]);

        ListAccessor::new(&mut head, &mut pool, el_link).remove(1);
        assert_eq!(collect(&head, &pool), [0, 3, 2]);

        let popped = ListAccessor::new(&mut head, &mut pool, el_link).pop_front();
        assert_eq!(popped, Some(0));
        assert_eq!(collect(&head, &pool), [3, 2]);
        assert_eq!(pool[0].link, Link::INIT);
    }

    /// Apply random pushes and removals and compare the result against
    /// `VecDeque`.
    #[quickcheck]
    fn matches_vec_deque(bytecode: Vec<u8>) {
        const LEN: usize = 16;
        let mut pool = [El { link: Link::INIT }; LEN];
        let mut head = ListHead::INIT;
        let mut reference = VecDeque::new();

        for instr in bytecode.chunks_exact(2) {
            let i = instr[1] as usize % LEN;
            let mut accessor = ListAccessor::new(&mut head, &mut pool, el_link);
            if let Some(pos) = reference.iter().position(|&x| x == i) {
                accessor.remove(i);
                reference.remove(pos);
            } else if instr[0] % 2 == 0 {
                accessor.push_back(i);
                reference.push_back(i);
            } else {
                accessor.push_front(i);
                reference.push_front(i);
            }

            assert_eq!(collect(&head, &pool), Vec::from(reference.clone()));
            assert_eq!(head.is_empty(), reference.is_empty());
        }
    }
}
