#![forbid(unsafe_code)]

//! Bounded undo/redo over data snapshots.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::snapshot::Snapshot;

/// Past and future snapshots around the current one.
///
/// At most `limit` past entries are kept; the oldest is evicted first.
/// Recording a new entry discards the redo branch.
pub(crate) struct History<T> {
    limit: usize,
    past: VecDeque<Rc<Snapshot<T>>>,
    current: Option<Rc<Snapshot<T>>>,
    future: Vec<Rc<Snapshot<T>>>,
}

impl<T> History<T> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            past: VecDeque::new(),
            current: None,
            future: Vec::new(),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub(crate) fn record(&mut self, snapshot: Rc<Snapshot<T>>) {
        if !self.is_enabled() {
            return;
        }
        if let Some(previous) = self.current.replace(snapshot) {
            self.past.push_back(previous);
            while self.past.len() > self.limit {
                self.past.pop_front();
            }
        }
        self.future.clear();
    }

    pub(crate) fn undo(&mut self) -> Option<Rc<Snapshot<T>>> {
        let previous = self.past.pop_back()?;
        if let Some(current) = self.current.replace(Rc::clone(&previous)) {
            self.future.push(current);
        }
        Some(previous)
    }

    pub(crate) fn redo(&mut self) -> Option<Rc<Snapshot<T>>> {
        let next = self.future.pop()?;
        if let Some(current) = self.current.replace(Rc::clone(&next)) {
            self.past.push_back(current);
        }
        Some(next)
    }

    /// The latest recorded data snapshot.
    pub(crate) fn current(&self) -> Option<Rc<Snapshot<T>>> {
        self.current.clone()
    }

    pub(crate) fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub(crate) fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Forget everything except the current entry.
    pub(crate) fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    pub(crate) fn reset(&mut self) {
        self.clear();
        self.current = None;
    }
}
