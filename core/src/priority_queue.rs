//! Binary-heap priority queues for best-first search.
//!
//! [`PriorityQueue`] is a plain heap; [`TracedPriorityQueue`] additionally
//! tracks each item's heap position by key, which enables the conditional
//! decrease-key operation [`TracedPriorityQueue::insert_or_relax`] that A*
//! style searches rely on.
//!
//! Both queues take the priority relation as a plain function: `precedes(a,
//! b)` must return true when `a` should be popped before `b`.

use std::hash::Hash;

pub struct PriorityQueue<T> {
    heap: Vec<T>,
    precedes: fn(&T, &T) -> bool,
}

impl<T: std::fmt::Debug> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue").field("heap", &self.heap).finish()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new(precedes: fn(&T, &T) -> bool) -> Self {
        PriorityQueue {
            heap: Vec::new(),
            precedes,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn top(&self) -> &T {
        assert!(!self.heap.is_empty());
        &self.heap[0]
    }

    pub fn insert(&mut self, item: T) {
        self.heap.push(item);
        self.sift_up(self.heap.len() - 1);
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let item = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        item
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if (self.precedes)(&self.heap[i], &self.heap[parent]) {
                self.heap.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let mut best = i;
            for child in [2 * i + 1, 2 * i + 2] {
                if child < self.heap.len() && (self.precedes)(&self.heap[child], &self.heap[best])
                {
                    best = child;
                }
            }
            if best == i {
                break;
            }
            self.heap.swap(i, best);
            i = best;
        }
    }
}

/// Heap with per-key position tracking.
///
/// Each item carries a key (extracted by the `key` function); the queue keeps
/// at most one item per key and supports replacing an item by a
/// higher-priority one in place.
pub struct TracedPriorityQueue<T, K: Eq + Hash + Copy> {
    heap: Vec<T>,
    positions: ahash::AHashMap<K, usize>,
    key: fn(&T) -> K,
    precedes: fn(&T, &T) -> bool,
}

impl<T, K: Eq + Hash + Copy> TracedPriorityQueue<T, K> {
    pub fn new(key: fn(&T) -> K, precedes: fn(&T, &T) -> bool) -> Self {
        TracedPriorityQueue {
            heap: Vec::new(),
            positions: ahash::AHashMap::new(),
            key,
            precedes,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.positions.clear();
    }

    pub fn contains(&self, k: &K) -> bool {
        self.positions.contains_key(k)
    }

    pub fn top(&self) -> &T {
        assert!(!self.heap.is_empty());
        &self.heap[0]
    }

    pub fn insert(&mut self, item: T) {
        debug_assert!(!self.contains(&(self.key)(&item)));
        self.positions.insert((self.key)(&item), self.heap.len());
        self.heap.push(item);
        self.sift_up(self.heap.len() - 1);
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        self.positions.remove(&(self.key)(&self.heap[0]));
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let item = self.heap.pop();
        if !self.heap.is_empty() {
            self.positions.insert((self.key)(&self.heap[0]), 0);
            self.sift_down(0);
        }
        item
    }

    /// Conditional update with higher priority.
    ///
    /// If the queue holds an item with the same key but lower priority it is
    /// replaced by `item`; if the key is absent `item` is inserted. Returns
    /// true when the queue changed.
    pub fn insert_or_relax(&mut self, item: T) -> bool {
        if let Some(&i) = self.positions.get(&(self.key)(&item)) {
            if (self.precedes)(&item, &self.heap[i]) {
                self.heap[i] = item;
                self.sift_up(i);
                true
            } else {
                false
            }
        } else {
            self.insert(item);
            true
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.positions.insert((self.key)(&self.heap[i]), i);
        self.positions.insert((self.key)(&self.heap[j]), j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if (self.precedes)(&self.heap[i], &self.heap[parent]) {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
        self.positions.insert((self.key)(&self.heap[i]), i);
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let mut best = i;
            for child in [2 * i + 1, 2 * i + 2] {
                if child < self.heap.len() && (self.precedes)(&self.heap[child], &self.heap[best])
                {
                    best = child;
                }
            }
            if best == i {
                break;
            }
            self.swap(i, best);
            i = best;
        }
    }
}
