//! Sequence-gated ordered buffer.
//!
//! A list behind a reader/writer lock. `append_on_seq` is the only way the
//! transfer engine grows a chunk buffer: it checks the position and appends
//! under one write lock, so concurrent arrivals of the same sequence number
//! cannot both be accepted.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
pub struct SeqBuffer<T> {
    items: RwLock<Vec<T>>,
}

impl<T> Default for SeqBuffer<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Clone> SeqBuffer<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }

    /// Append unconditionally.
    pub fn append(&self, item: T) {
        self.write().push(item);
    }

    /// Append only if `seq_no` is the next 1-based position.
    ///
    /// Returns `false` and leaves the buffer untouched for duplicates,
    /// gaps, and sequence number zero.
    pub fn append_on_seq(&self, seq_no: u32, item: T) -> bool {
        let mut items = self.write();
        if seq_no as usize != items.len() + 1 {
            return false;
        }
        items.push(item);
        true
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ordered copy of the contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.read().clone()
    }

    pub fn replace_all(&self, items: Vec<T>) {
        *self.write() = items;
    }

    // A panicking writer cannot leave the Vec half-updated, so a poisoned
    // lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.items.write().unwrap_or_else(|e| e.into_inner())
    }
}
