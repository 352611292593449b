//! Controller and element lock sets.
//!
//! A lock set acquires a list of locks in the order given and releases them
//! in exact reverse order, either explicitly through `release()` or on drop.
//! Callers order the input by ascending id so that any two operations
//! acquire shared locks in the same order.
//!
//! Every lock held through a lock set is counted per thread; the outbox
//! refuses (in debug builds) to flush while the count is non-zero.

use crate::controller::{ControllerGuard, PoolController};
use crate::element::Element;
use parking_lot::MutexGuard;
use pool_common::controller::Controller;
use pool_common::element::{ControllerId, ElementId};
use std::cell::Cell;
use tracing::trace;

thread_local! {
    static HELD_LOCKS: Cell<usize> = const { Cell::new(0) };
}

/// Number of engine locks held by the current thread through lock sets.
pub fn held_lock_count() -> usize {
    HELD_LOCKS.with(Cell::get)
}

fn note_acquired() {
    HELD_LOCKS.with(|c| c.set(c.get() + 1));
}

fn note_released() {
    HELD_LOCKS.with(|c| c.set(c.get().saturating_sub(1)));
}

/// Acquisition and release order of one lock set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTrace<Id> {
    /// Ids in acquisition order.
    pub acquired: Vec<Id>,
    /// Ids in release order.
    pub released: Vec<Id>,
}

impl<Id> Default for LockTrace<Id> {
    fn default() -> Self {
        Self {
            acquired: Vec::new(),
            released: Vec::new(),
        }
    }
}

impl<Id: PartialEq> LockTrace<Id> {
    /// True when the release order is the exact reverse of the acquisition
    /// order.
    pub fn is_symmetric(&self) -> bool {
        self.acquired.len() == self.released.len()
            && self
                .acquired
                .iter()
                .rev()
                .zip(&self.released)
                .all(|(a, r)| a == r)
    }
}

// ─── Controllers ────────────────────────────────────────────────────

/// Locks held on a set of controllers.
pub struct ControllerLockSet<'a> {
    held: Vec<(ControllerId, ControllerGuard<'a>)>,
    trace: LockTrace<ControllerId>,
}

impl<'a> ControllerLockSet<'a> {
    /// Lock every controller, in iteration order.
    pub fn acquire<I>(controllers: I) -> Self
    where
        I: IntoIterator<Item = &'a PoolController>,
    {
        let mut set = Self {
            held: Vec::new(),
            trace: LockTrace::default(),
        };
        for ctrl in controllers {
            let guard = ctrl.lock();
            note_acquired();
            trace!("Locked controller {}", ctrl.name());
            set.trace.acquired.push(ctrl.id());
            set.held.push((ctrl.id(), guard));
        }
        set
    }

    /// Plugin of the `index`-th locked controller.
    pub fn get_mut(&mut self, index: usize) -> &mut dyn Controller {
        &mut **self.held[index].1
    }

    /// Number of locks held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// True when no lock is held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release every lock in reverse order.
    pub fn release(mut self) -> LockTrace<ControllerId> {
        self.release_all();
        std::mem::take(&mut self.trace)
    }

    fn release_all(&mut self) {
        while let Some((id, guard)) = self.held.pop() {
            drop(guard);
            note_released();
            trace!("Unlocked controller {}", id);
            self.trace.released.push(id);
        }
    }
}

impl Drop for ControllerLockSet<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

// ─── Elements ───────────────────────────────────────────────────────

/// Operation locks held on a set of elements.
pub struct ElementLockSet<'a> {
    held: Vec<(ElementId, MutexGuard<'a, ()>)>,
    trace: LockTrace<ElementId>,
}

impl<'a> ElementLockSet<'a> {
    /// Lock set holding nothing.
    pub fn empty() -> Self {
        Self {
            held: Vec::new(),
            trace: LockTrace::default(),
        }
    }

    /// Lock every element, in iteration order.
    pub fn acquire<I>(elements: I) -> Self
    where
        I: IntoIterator<Item = &'a Element>,
    {
        let mut set = Self::empty();
        for element in elements {
            let guard = element.lock_operation();
            note_acquired();
            trace!("Locked element {}", element.name());
            set.trace.acquired.push(element.id());
            set.held.push((element.id(), guard));
        }
        set
    }

    /// Number of locks held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// True when no lock is held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release every lock in reverse order.
    pub fn release(mut self) -> LockTrace<ElementId> {
        self.release_all();
        std::mem::take(&mut self.trace)
    }

    fn release_all(&mut self) {
        while let Some((id, guard)) = self.held.pop() {
            drop(guard);
            note_released();
            trace!("Unlocked element {}", id);
            self.trace.released.push(id);
        }
    }
}

impl Drop for ElementLockSet<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
