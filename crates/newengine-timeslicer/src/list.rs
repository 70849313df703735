use std::cmp::Ordering;
use std::fmt;

/// Stable handle to a node of a [`PreallocList`].
///
/// Valid until the node is removed. Slots are reused, so a handle also carries the slot
/// generation: a stale handle is rejected instead of aliasing whatever took its place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

struct Node<T> {
    value: Option<T>,
    prev: Option<u32>,
    next: Option<u32>,
    generation: u32,
}

/// Doubly linked list backed by a slot arena.
///
/// Removed nodes go onto a free list and are handed out again by the next insert,
/// so add/remove at frame cadence never touches the allocator once the arena is warm.
pub struct PreallocList<T> {
    nodes: Vec<Node<T>>,
    head: Option<u32>,
    tail: Option<u32>,
    free: Option<u32>,
    len: usize,
}

impl<T> Default for PreallocList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for PreallocList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> PreallocList<T> {
    #[inline]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: None,
            tail: None,
            free: None,
            len: 0,
        }
    }

    /// Preallocates `capacity` free nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut list = Self {
            nodes: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            free: None,
            len: 0,
        };
        for _ in 0..capacity {
            let index = list.nodes.len() as u32;
            list.nodes.push(Node {
                value: None,
                prev: None,
                next: list.free,
                generation: 0,
            });
            list.free = Some(index);
        }
        list
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slots owned by the arena, live and free.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn first_handle(&self) -> Option<NodeHandle> {
        self.head.map(|i| self.handle_of(i))
    }

    #[inline]
    pub fn last_handle(&self) -> Option<NodeHandle> {
        self.tail.map(|i| self.handle_of(i))
    }

    #[inline]
    pub fn first(&self) -> Option<&T> {
        self.head.and_then(|i| self.nodes[i as usize].value.as_ref())
    }

    #[inline]
    pub fn last(&self) -> Option<&T> {
        self.tail.and_then(|i| self.nodes[i as usize].value.as_ref())
    }

    pub fn get(&self, node: NodeHandle) -> Option<&T> {
        self.resolve(node)
            .and_then(|i| self.nodes[i as usize].value.as_ref())
    }

    pub fn get_mut(&mut self, node: NodeHandle) -> Option<&mut T> {
        let i = self.resolve(node)?;
        self.nodes[i as usize].value.as_mut()
    }

    pub fn next_handle(&self, node: NodeHandle) -> Option<NodeHandle> {
        let i = self.resolve(node)?;
        self.nodes[i as usize].next.map(|n| self.handle_of(n))
    }

    pub fn add_first(&mut self, value: T) -> NodeHandle {
        let i = self.alloc(value);
        self.link_before_head(i);
        self.handle_of(i)
    }

    pub fn add_last(&mut self, value: T) -> NodeHandle {
        let i = self.alloc(value);
        self.link_after_tail(i);
        self.handle_of(i)
    }

    /// Inserts `value` right after `node`. Hands the value back when the handle is stale.
    pub fn add_after(&mut self, node: NodeHandle, value: T) -> Result<NodeHandle, T> {
        let Some(at) = self.resolve(node) else {
            return Err(value);
        };

        let i = self.alloc(value);
        let next = self.nodes[at as usize].next;
        {
            let n = &mut self.nodes[i as usize];
            n.prev = Some(at);
            n.next = next;
        }
        self.nodes[at as usize].next = Some(i);
        match next {
            Some(nx) => self.nodes[nx as usize].prev = Some(i),
            None => self.tail = Some(i),
        }
        self.len += 1;
        Ok(self.handle_of(i))
    }

    pub fn remove_first(&mut self) -> Option<T> {
        let i = self.head?;
        Some(self.unlink(i))
    }

    /// O(1) removal by handle. Stale handles return `None`.
    pub fn remove_node(&mut self, node: NodeHandle) -> Option<T> {
        let i = self.resolve(node)?;
        Some(self.unlink(i))
    }

    /// Removes the first element matching `pred` (linear scan).
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut cur = self.head;
        while let Some(i) = cur {
            let n = &self.nodes[i as usize];
            if n.value.as_ref().is_some_and(&mut pred) {
                return Some(self.unlink(i));
            }
            cur = n.next;
        }
        None
    }

    /// Returns every node to the free list. Capacity is kept.
    pub fn clear(&mut self) {
        while let Some(i) = self.head {
            drop(self.unlink(i));
        }
    }

    /// Moves every element out, front to back, without releasing the nodes.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { list: self }
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cur: self.head,
            remaining: self.len,
        }
    }

    /// Walks the list and removes every element for which `f` returns `false`, preserving order.
    pub fn retain(&mut self, mut f: impl FnMut(&T) -> bool) {
        let mut cur = self.head;
        while let Some(i) = cur {
            let n = &self.nodes[i as usize];
            cur = n.next;
            if !n.value.as_ref().is_some_and(&mut f) {
                drop(self.unlink(i));
            }
        }
    }

    /// Inserts `value` after every element that does not compare greater than it.
    ///
    /// Equal keys keep insertion order.
    pub fn add_sorted_by(
        &mut self,
        value: T,
        mut cmp: impl FnMut(&T, &T) -> Ordering,
    ) -> NodeHandle {
        let goes_last = match self.last() {
            None => true,
            Some(last) => cmp(last, &value) != Ordering::Greater,
        };
        if goes_last {
            return self.add_last(value);
        }
        if self
            .first()
            .is_some_and(|first| cmp(first, &value) == Ordering::Greater)
        {
            return self.add_first(value);
        }

        // Head is <= value and tail is > value, so the walk stops before running off the end.
        let mut at = self.head.unwrap_or_default();
        while let Some(next) = self.nodes[at as usize].next {
            match self.nodes[next as usize].value.as_ref() {
                Some(v) if cmp(v, &value) != Ordering::Greater => at = next,
                _ => break,
            }
        }

        let handle = self.handle_of(at);
        match self.add_after(handle, value) {
            Ok(h) => h,
            Err(value) => self.add_last(value),
        }
    }

    /// Sorted merge of `src` into `self`, leaving `src` empty.
    ///
    /// Both lists must already be sorted by `cmp`. Runs in `O(self.len() + src.len())`; elements
    /// equal to ones already in `self` land after them, and `src` keeps its own relative order.
    pub fn merge_sorted_from(
        &mut self,
        src: &mut PreallocList<T>,
        mut cmp: impl FnMut(&T, &T) -> Ordering,
    ) {
        if src.is_empty() {
            return;
        }

        // Insertion cursor: `None` means "before the current head".
        let mut after: Option<u32> = None;

        while let Some(value) = src.remove_first() {
            loop {
                let next = match after {
                    None => self.head,
                    Some(i) => self.nodes[i as usize].next,
                };
                match next.and_then(|n| self.nodes[n as usize].value.as_ref().map(|v| (n, v))) {
                    Some((n, v)) if cmp(v, &value) != Ordering::Greater => after = Some(n),
                    _ => break,
                }
            }

            let i = self.alloc(value);
            match after {
                None => self.link_before_head(i),
                Some(at) => {
                    let next = self.nodes[at as usize].next;
                    {
                        let n = &mut self.nodes[i as usize];
                        n.prev = Some(at);
                        n.next = next;
                    }
                    self.nodes[at as usize].next = Some(i);
                    match next {
                        Some(nx) => self.nodes[nx as usize].prev = Some(i),
                        None => self.tail = Some(i),
                    }
                    self.len += 1;
                }
            }
            after = Some(i);
        }
    }

    #[inline]
    fn handle_of(&self, index: u32) -> NodeHandle {
        NodeHandle {
            index,
            generation: self.nodes[index as usize].generation,
        }
    }

    #[inline]
    fn resolve(&self, node: NodeHandle) -> Option<u32> {
        let n = self.nodes.get(node.index as usize)?;
        (n.generation == node.generation && n.value.is_some()).then_some(node.index)
    }

    fn alloc(&mut self, value: T) -> u32 {
        match self.free {
            Some(i) => {
                let n = &mut self.nodes[i as usize];
                self.free = n.next;
                n.value = Some(value);
                n.prev = None;
                n.next = None;
                i
            }
            None => {
                let i = self.nodes.len() as u32;
                self.nodes.push(Node {
                    value: Some(value),
                    prev: None,
                    next: None,
                    generation: 0,
                });
                i
            }
        }
    }

    fn link_before_head(&mut self, i: u32) {
        let old = self.head;
        {
            let n = &mut self.nodes[i as usize];
            n.prev = None;
            n.next = old;
        }
        match old {
            Some(h) => self.nodes[h as usize].prev = Some(i),
            None => self.tail = Some(i),
        }
        self.head = Some(i);
        self.len += 1;
    }

    fn link_after_tail(&mut self, i: u32) {
        let old = self.tail;
        {
            let n = &mut self.nodes[i as usize];
            n.prev = old;
            n.next = None;
        }
        match old {
            Some(t) => self.nodes[t as usize].next = Some(i),
            None => self.head = Some(i),
        }
        self.tail = Some(i);
        self.len += 1;
    }

    /// Detaches a live node, bumps its generation and pushes it on the free list.
    fn unlink(&mut self, i: u32) -> T {
        let (prev, next, value) = {
            let n = &mut self.nodes[i as usize];
            let value = n.value.take();
            (n.prev.take(), n.next.take(), value)
        };

        match prev {
            Some(p) => self.nodes[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(nx) => self.nodes[nx as usize].prev = prev,
            None => self.tail = prev,
        }

        let n = &mut self.nodes[i as usize];
        n.generation = n.generation.wrapping_add(1);
        n.next = self.free;
        self.free = Some(i);
        self.len -= 1;

        match value {
            Some(v) => v,
            None => crate::invariants::bad_state("linked node without a value"),
        }
    }
}

impl<T: PartialEq> PreallocList<T> {
    /// Removes the first element equal to `value` (linear scan).
    #[inline]
    pub fn remove(&mut self, value: &T) -> Option<T> {
        self.remove_where(|v| v == value)
    }

    #[inline]
    pub fn contains(&self, value: &T) -> bool {
        self.iter().any(|v| v == value)
    }
}

pub struct Iter<'a, T> {
    list: &'a PreallocList<T>,
    cur: Option<u32>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let i = self.cur?;
        let n = &self.list.nodes[i as usize];
        self.cur = n.next;
        self.remaining = self.remaining.saturating_sub(1);
        n.value.as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a PreallocList<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

pub struct Drain<'a, T> {
    list: &'a mut PreallocList<T>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        self.list.remove_first()
    }
}

impl<T> Drop for Drain<'_, T> {
    fn drop(&mut self) {
        self.list.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(list: &PreallocList<i32>) -> Vec<i32> {
        list.iter().copied().collect()
    }

    #[test]
    fn add_and_remove_keep_links_consistent() {
        let mut l = PreallocList::new();
        let b = l.add_last(2);
        l.add_first(1);
        l.add_last(4);
        l.add_after(b, 3).unwrap();
        assert_eq!(collect(&l), vec![1, 2, 3, 4]);

        assert_eq!(l.remove_node(b), Some(2));
        assert_eq!(collect(&l), vec![1, 3, 4]);
        assert_eq!(l.remove_first(), Some(1));
        assert_eq!(l.remove(&4), Some(4));
        assert_eq!(collect(&l), vec![3]);
        assert_eq!(l.first(), l.last());
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn released_nodes_are_reused() {
        let mut l = PreallocList::with_capacity(4);
        assert_eq!(l.capacity(), 4);

        for round in 0..100 {
            for v in 0..4 {
                l.add_last(round * 4 + v);
            }
            l.clear();
        }
        assert_eq!(l.capacity(), 4);
        assert!(l.is_empty());
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut l = PreallocList::new();
        let a = l.add_last(10);
        assert_eq!(l.remove_node(a), Some(10));

        let b = l.add_last(20);
        assert_ne!(a, b);
        assert_eq!(l.get(a), None);
        assert_eq!(l.remove_node(a), None);
        assert_eq!(l.add_after(a, 30), Err(30));
        assert_eq!(l.get(b), Some(&20));
    }

    #[test]
    fn add_sorted_is_stable_for_equal_keys() {
        let mut l: PreallocList<(i32, char)> = PreallocList::new();
        let by_key = |a: &(i32, char), b: &(i32, char)| a.0.cmp(&b.0);
        for item in [(2, 'a'), (1, 'b'), (2, 'c'), (3, 'd'), (1, 'e'), (2, 'f')] {
            l.add_sorted_by(item, by_key);
        }
        let got: Vec<_> = l.iter().map(|x| x.1).collect();
        assert_eq!(got, vec!['b', 'e', 'a', 'c', 'f', 'd']);
    }

    #[test]
    fn merge_interleaves_and_drains_source() {
        let mut dest = PreallocList::new();
        let mut src = PreallocList::new();
        for v in [1, 4, 4, 9] {
            dest.add_last(v);
        }
        for v in [0, 4, 5, 10, 11] {
            src.add_last(v);
        }

        dest.merge_sorted_from(&mut src, |a, b| a.cmp(b));
        assert_eq!(collect(&dest), vec![0, 1, 4, 4, 4, 5, 9, 10, 11]);
        assert!(src.is_empty());
    }

    #[test]
    fn merge_keeps_destination_first_on_ties() {
        let mut dest: PreallocList<(i32, char)> = PreallocList::new();
        let mut src: PreallocList<(i32, char)> = PreallocList::new();
        dest.add_last((1, 'd'));
        src.add_last((1, 's'));
        src.add_last((1, 't'));

        dest.merge_sorted_from(&mut src, |a, b| a.0.cmp(&b.0));
        let got: Vec<_> = dest.iter().map(|x| x.1).collect();
        assert_eq!(got, vec!['d', 's', 't']);
    }

    #[test]
    fn merge_into_empty_appends() {
        let mut dest = PreallocList::new();
        let mut src = PreallocList::new();
        src.add_last(3);
        src.add_last(7);
        dest.merge_sorted_from(&mut src, |a: &i32, b| a.cmp(b));
        assert_eq!(collect(&dest), vec![3, 7]);
    }

    #[test]
    fn retain_and_drain() {
        let mut l = PreallocList::new();
        for v in 0..6 {
            l.add_last(v);
        }
        l.retain(|v| v % 2 == 0);
        assert_eq!(collect(&l), vec![0, 2, 4]);

        let drained: Vec<_> = l.drain().collect();
        assert_eq!(drained, vec![0, 2, 4]);
        assert!(l.is_empty());
        assert_eq!(l.capacity(), 6);
    }
}
