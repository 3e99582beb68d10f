//! Thenables - the foreign handles components suspend on.
//!
//! The reconciler never awaits anything. A component that depends on data
//! that is not ready returns `Thrown::Suspend` carrying one of these; the
//! work loop registers a continuation and yields. When the producer resolves
//! the thenable, every registered continuation runs - ours pings the
//! scheduler, which re-renders the suspended tree.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ErrorValue;

/// The subscription surface the work loop needs from a pending dependency.
///
/// Continuations registered while pending run (in order) at resolution time;
/// subscribing to an already-settled wakeable runs the continuation
/// immediately.
pub trait Wakeable {
    fn is_resolved(&self) -> bool;

    fn rejection(&self) -> Option<ErrorValue> {
        None
    }

    fn subscribe(&self, continuation: Box<dyn FnOnce()>);
}

enum ThenableState<T> {
    Pending,
    Fulfilled(T),
    Rejected(ErrorValue),
}

/// A single-assignment cell with subscriber callbacks. The in-tree
/// implementation of [`Wakeable`]; hosts with their own promise machinery can
/// implement the trait directly instead.
pub struct Thenable<T> {
    state: RefCell<ThenableState<T>>,
    subscribers: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl<T: Clone> Thenable<T> {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(ThenableState::Pending),
            subscribers: RefCell::new(Vec::new()),
        })
    }

    pub fn resolved(value: T) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(ThenableState::Fulfilled(value)),
            subscribers: RefCell::new(Vec::new()),
        })
    }

    /// Fulfil the thenable and run every waiting continuation.
    ///
    /// Resolving twice is a producer bug; the second value is ignored.
    pub fn resolve(&self, value: T) {
        {
            let mut state = self.state.borrow_mut();
            if !matches!(*state, ThenableState::Pending) {
                log::warn!("thenable resolved more than once; ignoring");
                return;
            }
            *state = ThenableState::Fulfilled(value);
        }
        self.notify();
    }

    pub fn reject(&self, error: ErrorValue) {
        {
            let mut state = self.state.borrow_mut();
            if !matches!(*state, ThenableState::Pending) {
                return;
            }
            *state = ThenableState::Rejected(error);
        }
        self.notify();
    }

    /// The fulfilled value, if any.
    pub fn get(&self) -> Option<T> {
        match &*self.state.borrow() {
            ThenableState::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    fn notify(&self) {
        // Drain before running: a continuation may subscribe again.
        let subscribers = std::mem::take(&mut *self.subscribers.borrow_mut());
        for continuation in subscribers {
            continuation();
        }
    }
}

impl<T: Clone> Wakeable for Thenable<T> {
    fn is_resolved(&self) -> bool {
        matches!(*self.state.borrow(), ThenableState::Fulfilled(_))
    }

    fn rejection(&self) -> Option<ErrorValue> {
        match &*self.state.borrow() {
            ThenableState::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }

    fn subscribe(&self, continuation: Box<dyn FnOnce()>) {
        if matches!(*self.state.borrow(), ThenableState::Pending) {
            self.subscribers.borrow_mut().push(continuation);
        } else {
            continuation();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuations_run_on_resolve() {
        let thenable: Rc<Thenable<u32>> = Thenable::new();
        let hits = Rc::new(RefCell::new(0));

        for _ in 0..2 {
            let hits = hits.clone();
            thenable.subscribe(Box::new(move || *hits.borrow_mut() += 1));
        }
        assert_eq!(*hits.borrow(), 0);

        thenable.resolve(7);
        assert_eq!(*hits.borrow(), 2);
        assert_eq!(thenable.get(), Some(7));
    }

    #[test]
    fn late_subscription_runs_immediately() {
        let thenable = Thenable::resolved("ready");
        let hit = Rc::new(RefCell::new(false));
        let flag = hit.clone();
        thenable.subscribe(Box::new(move || *flag.borrow_mut() = true));
        assert!(*hit.borrow());
    }
}
