//! Pending idle tasks, ordered by readiness, priority and submission order.
//!
//! Tasks wait in a time-ordered heap until their earliest start time passes,
//! then move to a `(priority, sequence)` heap from which `pop_due` serves.
//! Removal (cancel, coalesce) deletes the task from the slot map and leaves
//! its heap key behind; stale keys are skipped when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use lull_core::{Priority, TaskId, TaskState};

use crate::task::{Task, TaskHandle};

/// Outcome of [`TaskQueue::pop_due`].
#[derive(Debug)]
pub enum Pop {
    /// The highest-priority due task.
    Ready(Task),
    /// Nothing is due yet; the earliest pending task becomes due at `next_due`.
    NotReady { next_due: Instant },
    /// No pending tasks at all.
    Empty,
}

#[derive(Debug)]
struct Slot {
    task: Task,
    seq: u64,
    key: Option<String>,
    promoted: bool,
}

/// Ordered collection of pending idle tasks.
#[derive(Debug, Default)]
pub struct TaskQueue {
    slots: HashMap<TaskId, Slot>,
    /// Due tasks: lowest priority value first, then FIFO.
    ready: BinaryHeap<Reverse<(Priority, u64, TaskId)>>,
    /// Not-yet-promoted tasks, earliest start first.
    delayed: BinaryHeap<Reverse<(Instant, u64, TaskId)>>,
    /// Named tasks in submission order.
    by_key: HashMap<String, Vec<TaskId>>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task. O(log n).
    pub fn push(&mut self, task: Task) -> TaskHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = task.name().map(str::to_owned);
        self.insert(task, seq, key, false)
    }

    fn insert(&mut self, task: Task, seq: u64, key: Option<String>, promoted: bool) -> TaskHandle {
        let id = task.id();
        let handle = task.handle().clone();
        if promoted {
            self.ready.push(Reverse((task.priority, seq, id)));
        } else {
            self.delayed.push(Reverse((task.earliest, seq, id)));
        }
        if let Some(key) = &key {
            self.by_key.entry(key.clone()).or_default().push(id);
        }
        self.slots.insert(
            id,
            Slot {
                task,
                seq,
                key,
                promoted,
            },
        );
        handle
    }

    /// Pop the highest-priority pending task whose earliest start is `<= now`.
    pub fn pop_due(&mut self, now: Instant) -> Pop {
        self.promote(now);
        while let Some(Reverse((_, _, id))) = self.ready.pop() {
            let Some(slot) = self.remove_slot(&id) else {
                continue;
            };
            // Cancelled through its handle while queued.
            if slot.task.handle.state() != TaskState::Pending {
                continue;
            }
            return Pop::Ready(slot.task);
        }
        match self.peek_delayed() {
            Some(next_due) => Pop::NotReady { next_due },
            None => Pop::Empty,
        }
    }

    /// Whether a pending task is due at `now`.
    pub fn has_due(&mut self, now: Instant) -> bool {
        self.promote(now);
        while let Some(Reverse((_, _, id))) = self.ready.peek() {
            let id = *id;
            match self.slots.get(&id) {
                Some(slot) if slot.task.handle.state() == TaskState::Pending => return true,
                Some(_) => {
                    self.ready.pop();
                    self.remove_slot(&id);
                }
                None => {
                    self.ready.pop();
                }
            }
        }
        false
    }

    /// Cancel a queued task by id. Unknown or already-finished ids are a no-op.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        match self.remove_slot(&id) {
            Some(slot) => slot.task.handle.cancel(),
            None => false,
        }
    }

    /// Cancel every queued task with the given name. Returns how many were cancelled.
    pub fn cancel_named(&mut self, key: &str) -> usize {
        let ids = self.by_key.get(key).cloned().unwrap_or_default();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Insert `task` under `key`, replacing the oldest pending task with the
    /// same key if there is one.
    ///
    /// The replacement inherits the displaced task's priority, earliest start
    /// and queue position; the displaced task is marked cancelled.
    pub fn coalesce(&mut self, key: &str, mut task: Task) -> TaskHandle {
        let Some(existing) = self.first_pending(key) else {
            let seq = self.next_seq;
            self.next_seq += 1;
            return self.insert(task, seq, Some(key.to_owned()), false);
        };
        let Some(old) = self.remove_slot(&existing.id()) else {
            return self.push(task);
        };
        old.task.handle.cancel();
        task.priority = old.task.priority;
        task.earliest = old.task.earliest;
        self.insert(task, old.seq, Some(key.to_owned()), old.promoted)
    }

    /// Handle of the oldest pending task queued under `key`.
    pub fn first_pending(&self, key: &str) -> Option<TaskHandle> {
        self.by_key.get(key)?.iter().find_map(|id| {
            self.slots
                .get(id)
                .filter(|slot| slot.task.handle.state() == TaskState::Pending)
                .map(|slot| slot.task.handle.clone())
        })
    }

    /// Whether a pending task is queued under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.first_pending(key).is_some()
    }

    /// Number of queued tasks (including ones cancelled through their
    /// handle that have not been purged yet).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Earliest start time over all queued tasks.
    pub fn next_due(&self) -> Option<Instant> {
        self.slots.values().map(|slot| slot.task.earliest).min()
    }

    /// Cancel and remove everything. Returns how many tasks were cancelled.
    pub fn clear(&mut self) -> usize {
        let cancelled = self
            .slots
            .drain()
            .filter(|(_, slot)| slot.task.handle.cancel())
            .count();
        self.ready.clear();
        self.delayed.clear();
        self.by_key.clear();
        cancelled
    }

    fn promote(&mut self, now: Instant) {
        while let Some(Reverse((earliest, _, _))) = self.delayed.peek() {
            if *earliest > now {
                break;
            }
            let Some(Reverse((_, seq, id))) = self.delayed.pop() else {
                break;
            };
            if let Some(slot) = self.slots.get_mut(&id) {
                // A coalesced replacement reuses the sequence but has its own id,
                // so a stale key can never promote a live slot twice.
                if !slot.promoted && slot.seq == seq {
                    slot.promoted = true;
                    self.ready.push(Reverse((slot.task.priority, seq, id)));
                }
            }
        }
    }

    fn peek_delayed(&mut self) -> Option<Instant> {
        while let Some(Reverse((earliest, _, id))) = self.delayed.peek() {
            let (earliest, id) = (*earliest, *id);
            match self.slots.get(&id) {
                Some(slot) if slot.task.handle.state() == TaskState::Pending => {
                    return Some(earliest);
                }
                Some(_) => {
                    self.delayed.pop();
                    self.remove_slot(&id);
                }
                None => {
                    self.delayed.pop();
                }
            }
        }
        None
    }

    fn remove_slot(&mut self, id: &TaskId) -> Option<Slot> {
        let slot = self.slots.remove(id)?;
        if let Some(key) = &slot.key {
            if let Some(ids) = self.by_key.get_mut(key) {
                ids.retain(|other| other != id);
                if ids.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
        Some(slot)
    }
}
