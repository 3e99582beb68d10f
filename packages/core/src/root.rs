//! The per-tree container.
//!
//! A [`FiberRoot`] owns the handle to the host container, points at the
//! committed tree, and carries all per-tree lane bookkeeping: what is
//! pending, what is suspended waiting on data, what has been pinged awake,
//! what has starved long enough to be forced synchronous, and which lanes are
//! entangled with which.

use crate::arena::FiberId;
use crate::error::ErrorHook;
use crate::flags::Mode;
use crate::host::{CallbackHandle, HostHandle};
use crate::lanes::{Lane, Lanes, Timestamp, NO_TIMESTAMP, TOTAL_LANES};
use crate::nodes::{StateRecord, ViewNode};

/// Identifies a root registered with the reconciler. The opaque value
/// `create_container` returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RootId(pub usize);

impl std::fmt::Display for RootId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "root#{}", self.0)
    }
}

/// How a root renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RootTag {
    /// Cooperative, time-sliced rendering.
    #[default]
    Concurrent,
    /// Every render runs to completion synchronously.
    Blocking,
}

impl RootTag {
    pub(crate) fn mode(self) -> Mode {
        match self {
            RootTag::Concurrent => Mode::CONCURRENT,
            RootTag::Blocking => Mode::empty(),
        }
    }
}

/// Error hooks and identity options passed to `create_container`.
#[derive(Clone, Default)]
pub struct RootOptions {
    pub identifier_prefix: Option<String>,
    /// An error crossed the root without meeting a boundary.
    pub on_uncaught_error: Option<ErrorHook>,
    /// An error was captured by a boundary.
    pub on_caught_error: Option<ErrorHook>,
    /// A concurrent render errored but a synchronous retry succeeded.
    pub on_recoverable_error: Option<ErrorHook>,
}

pub struct FiberRoot {
    pub id: RootId,
    pub tag: RootTag,
    /// Opaque handle forwarded to every container-level host call.
    pub container: HostHandle,
    /// Root fiber of the committed tree.
    pub current: FiberId,

    pub pending_lanes: Lanes,
    pub suspended_lanes: Lanes,
    pub pinged_lanes: Lanes,
    pub expired_lanes: Lanes,
    pub entangled_lanes: Lanes,
    /// `entanglements[i]` = lanes that must render whenever lane `i` does.
    pub entanglements: [Lanes; TOTAL_LANES],
    pub expiration_times: [Timestamp; TOTAL_LANES],

    /// The scheduled host callback for this root, if any.
    pub callback_node: Option<CallbackHandle>,
    pub callback_priority: Lanes,
    /// Host timeout armed to commit a suspense fallback; cancelled on resume.
    pub timeout_handle: Option<CallbackHandle>,

    /// Render output waiting for the commit driver.
    pub finished_work: Option<FiberId>,
    pub finished_lanes: Lanes,

    pub options: RootOptions,

    // Intrusive membership in the reconciler's schedule list.
    pub(crate) next_scheduled: Option<RootId>,
    pub(crate) is_scheduled: bool,
}

impl FiberRoot {
    pub(crate) fn new(
        id: RootId,
        tag: RootTag,
        container: HostHandle,
        current: FiberId,
        options: RootOptions,
    ) -> Self {
        Self {
            id,
            tag,
            container,
            current,
            pending_lanes: Lanes::NONE,
            suspended_lanes: Lanes::NONE,
            pinged_lanes: Lanes::NONE,
            expired_lanes: Lanes::NONE,
            entangled_lanes: Lanes::NONE,
            entanglements: [Lanes::NONE; TOTAL_LANES],
            expiration_times: [NO_TIMESTAMP; TOTAL_LANES],
            callback_node: None,
            callback_priority: Lanes::NONE,
            timeout_handle: None,
            finished_work: None,
            finished_lanes: Lanes::NONE,
            options,
            next_scheduled: None,
            is_scheduled: false,
        }
    }

    /// Record newly scheduled work and clear any stale suspended state for
    /// its lane - new updates un-suspend the lane they land on.
    pub(crate) fn mark_updated(&mut self, lane: Lane) {
        self.pending_lanes |= lane;
        self.suspended_lanes = self.suspended_lanes.remove(lane);
        self.pinged_lanes = self.pinged_lanes.remove(lane);
    }

    /// Stamp deadlines for newly pending lanes and promote overdue lanes to
    /// `expired_lanes`. Called from every scheduler tick.
    pub(crate) fn mark_starved_lanes_as_expired(&mut self, now: Timestamp) {
        let candidates = self
            .pending_lanes
            .remove(self.suspended_lanes.remove(self.pinged_lanes));
        for lane in candidates.iter() {
            let index = lane.index();
            let expiration = self.expiration_times[index];
            if expiration == NO_TIMESTAMP {
                if let Some(budget) = lane.expiration_budget() {
                    self.expiration_times[index] = now.saturating_add(budget);
                }
            } else if expiration <= now {
                self.expired_lanes |= lane;
            }
        }
    }

    /// Entangle `lane` with everything in `with`: whenever `lane` renders,
    /// `with` must render too.
    pub(crate) fn entangle(&mut self, lane: Lane, with: Lanes) {
        self.entangled_lanes |= lane;
        let index = lane.index();
        self.entanglements[index] |= with;
    }

    /// The transitive entanglement closure of a render selection.
    pub(crate) fn entangled_render_lanes(&self, lanes: Lanes) -> Lanes {
        let mut result = lanes;
        let mut worklist = lanes.intersect(self.entangled_lanes);
        while !worklist.is_empty() {
            let lane = worklist.highest_priority_lane();
            worklist = worklist.remove(lane);
            let extra = self.entanglements[lane.index()].remove(result);
            worklist |= extra.intersect(self.entangled_lanes);
            result |= extra;
        }
        result
    }

    /// A render attempt for `lanes` yielded waiting on data.
    pub(crate) fn mark_suspended(&mut self, lanes: Lanes) {
        let newly = lanes.remove(self.pinged_lanes);
        self.suspended_lanes |= newly;
        self.pending_lanes |= newly;
    }

    /// A wakeable for suspended work resolved.
    pub(crate) fn mark_pinged(&mut self, lanes: Lanes) {
        self.pinged_lanes |= self.suspended_lanes.intersect(lanes);
    }

    /// Commit finished for `lanes`; only `remaining` is still pending.
    pub(crate) fn mark_finished(&mut self, lanes: Lanes, remaining: Lanes) {
        let no_longer_pending = self.pending_lanes.remove(remaining);
        self.pending_lanes = remaining;
        self.suspended_lanes = Lanes::NONE;
        self.pinged_lanes = Lanes::NONE;
        self.expired_lanes = self.expired_lanes.intersect(remaining);
        self.entangled_lanes = self.entangled_lanes.intersect(remaining);
        for lane in no_longer_pending.iter() {
            let index = lane.index();
            self.expiration_times[index] = NO_TIMESTAMP;
            self.entanglements[index] = Lanes::NONE;
        }
        let _ = lanes;
    }
}

/// State-record field the root's element lives under.
pub(crate) const ELEMENT_FIELD: &str = "element";

/// The root's update payload: a new element (or `None` to clear the tree).
pub(crate) fn element_state(element: Option<ViewNode>) -> StateRecord {
    match element {
        Some(node) => StateRecord::new().with(ELEMENT_FIELD, node),
        None => StateRecord::new().with(ELEMENT_FIELD, crate::nodes::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn test_root() -> FiberRoot {
        FiberRoot::new(
            RootId(0),
            RootTag::Concurrent,
            Rc::new(()),
            FiberId(0),
            RootOptions::default(),
        )
    }

    #[test]
    fn starved_lane_expires_after_its_budget() {
        let mut root = test_root();
        root.mark_updated(Lanes::DEFAULT);

        root.mark_starved_lanes_as_expired(1_000);
        assert!(root.expired_lanes.is_empty());

        // not yet: deadline is 1_000 + 5_000
        root.mark_starved_lanes_as_expired(5_999);
        assert!(root.expired_lanes.is_empty());

        root.mark_starved_lanes_as_expired(6_000);
        assert_eq!(root.expired_lanes, Lanes::DEFAULT);
    }

    #[test]
    fn entanglement_closure_is_transitive() {
        let mut root = test_root();
        let a = Lanes::NONE.next_transition_lane();
        let b = a.next_transition_lane();
        let c = b.next_transition_lane();
        root.entangle(a, b);
        root.entangle(b, c);

        let rendered = root.entangled_render_lanes(a);
        assert!(b.is_subset_of(rendered));
        assert!(c.is_subset_of(rendered));
    }

    #[test]
    fn finishing_clears_bookkeeping_for_retired_lanes() {
        let mut root = test_root();
        root.mark_updated(Lanes::DEFAULT);
        root.mark_updated(Lanes::SYNC);
        root.mark_starved_lanes_as_expired(0);

        root.mark_finished(Lanes::SYNC, Lanes::DEFAULT);
        assert_eq!(root.pending_lanes, Lanes::DEFAULT);
        assert_eq!(root.expiration_times[Lanes::SYNC.index()], NO_TIMESTAMP);
    }
}
