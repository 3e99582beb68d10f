//! Error taxonomy.
//!
//! Two very different things can go wrong. Component code may *throw a value*
//! (an error it wants a boundary to catch, or a pending dependency it wants
//! the work loop to wait on) - those travel as [`Thrown`] and never unwind the
//! Rust stack. Misusing the reconciler itself (re-entering the work loop,
//! handing it a corrupt tree, an update storm) is a [`ReconcileError`] and is
//! surfaced as a hard `Err` from the public entry points.

use std::rc::Rc;

use crate::fiber::FiberTag;
use crate::suspense::Wakeable;

/// A value thrown from user code, caught by a boundary or reported to the
/// root's error hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorValue {
    message: Rc<str>,
}

impl ErrorValue {
    pub fn new(message: impl Into<Rc<str>>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// The Rust rendition of a component "throwing" during render.
#[derive(Clone)]
pub enum Thrown {
    /// A dependency is not ready yet. The work loop suspends around it.
    Suspend(Rc<dyn Wakeable>),
    /// A plain error, looking for the nearest error boundary.
    Error(ErrorValue),
}

impl std::fmt::Debug for Thrown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Thrown::Suspend(_) => f.debug_tuple("Suspend").finish(),
            Thrown::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

/// Fatal misuse of the reconciler. These are caller bugs, not UI errors, so
/// they come back as `Err` instead of flowing through error boundaries.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("should not already be working - render or commit is on the stack")]
    AlreadyWorking,

    #[error("unknown unit of work tag: {0:?}")]
    UnknownFiberTag(FiberTag),

    #[error("maximum update depth exceeded - a component repeatedly schedules updates from commit")]
    InfiniteUpdateLoop,

    #[error("root {0} is not registered with this reconciler")]
    UnknownRoot(usize),
}

/// Hook invoked with errors that reached the root or a boundary.
pub type ErrorHook = Rc<dyn Fn(&ErrorValue)>;
