//! # Priority queue
//!
//! A fixed number of FIFO bands, strict-priority drained highest band first.
//! `pop`/`top` always return the front of the highest-numbered non-empty
//! band; within a band, ordering is FIFO. This is the queue discipline used
//! for every inbound worker queue and the I/O multiplexer's outbound queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A strict-priority, FIFO-within-band queue with a fixed band count.
///
/// `top()` on an empty queue returns a caller-supplied default instead of an
/// `Option`, matching the original `prio_queue<Value>` template's
/// constructor, which takes the default value up front.
pub struct PriorityQueue<T: Clone> {
    bands: Vec<VecDeque<T>>,
    default: T,
    len: usize,
}

impl<T: Clone> PriorityQueue<T> {
    /// Build a queue with `bands` priority bands (numbered `0..bands`,
    /// highest drains first) and the given default returned by `top()` when
    /// empty.
    pub fn new(bands: usize, default: T) -> Self {
        PriorityQueue {
            bands: (0..bands).map(|_| VecDeque::new()).collect(),
            default,
            len: 0,
        }
    }

    /// Number of priority bands this queue was constructed with.
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Append `value` to the back of `priority`'s band.
    pub fn push(&mut self, priority: usize, value: T) {
        self.bands[priority].push_back(value);
        self.len += 1;
    }

    /// Remove and return the front of the highest-numbered non-empty band.
    /// Panics if the queue is empty; callers should check [`PriorityQueue::is_empty`]
    /// first, matching the original's unchecked `pop()`.
    pub fn pop(&mut self) -> T {
        for band in self.bands.iter_mut().rev() {
            if let Some(v) = band.pop_front() {
                self.len -= 1;
                return v;
            }
        }
        panic!("pop() called on empty PriorityQueue");
    }

    /// Peek the front of the highest-numbered non-empty band, or the
    /// constructor-supplied default if every band is empty.
    pub fn top(&self) -> T {
        for band in self.bands.iter().rev() {
            if let Some(v) = band.front() {
                return v.clone();
            }
        }
        self.default.clone()
    }

    /// Raw band index that the next `pop()` would drain from.
    pub fn priority_next(&self) -> usize {
        for (idx, band) in self.bands.iter().enumerate().rev() {
            if !band.is_empty() {
                return idx;
            }
        }
        0
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        for band in self.bands.iter_mut() {
            band.clear();
        }
        self.len = 0;
    }

    /// Iterate every element highest-band-first, FIFO within a band.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.bands.iter().rev().flat_map(|band| band.iter())
    }
}

/// A [`PriorityQueue`] guarded by a mutex and condvar, the form actually
/// used by worker inbound queues and the I/O multiplexer's outbound queue:
/// producers push and notify, a single consumer thread waits for
/// non-emptiness (optionally bounded by a timeout so periodic timer work
/// still runs with no traffic).
pub struct BlockingPriorityQueue<T: Clone> {
    inner: Mutex<PriorityQueue<T>>,
    cond: Condvar,
}

impl<T: Clone> BlockingPriorityQueue<T> {
    pub fn new(bands: usize, default: T) -> Self {
        BlockingPriorityQueue {
            inner: Mutex::new(PriorityQueue::new(bands, default)),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, priority: usize, value: T) {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        q.push(priority, value);
        self.cond.notify_one();
    }

    /// Pop if non-empty, otherwise `None` without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if q.is_empty() {
            None
        } else {
            Some(q.pop())
        }
    }

    /// Block until non-empty or `timeout` elapses, then pop if possible.
    pub fn pop_timeout(&self, timeout: std::time::Duration) -> Option<T> {
        let q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (mut q, _timed_out) = self
            .cond
            .wait_timeout_while(q, timeout, |q| q.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        if q.is_empty() {
            None
        } else {
            Some(q.pop())
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn band_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).band_count()
    }

    /// Wake every thread blocked in `pop_timeout`, e.g. on shutdown.
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Drain every pending element, highest-band-first.
    pub fn drain(&self) -> Vec<T> {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity(q.size());
        while !q.is_empty() {
            out.push(q.pop());
        }
        out
    }
}
