//! Per-fiber queues of pending state mutations.
//!
//! Producers append to `shared.pending`, a circular singly-linked ring, so
//! an enqueue is one splice regardless of queue length. The drain walks the
//! linear base list and folds every update whose lane is visible in the
//! current render into the new state.
//!
//! The subtle part is the rebase discipline: when an update is skipped
//! because its lane is not being rendered, the fold keeps going, but from the
//! first skip onward *every* update - applied or not - is cloned onto a new
//! base list, and `base_state` is frozen at the pre-skip value. When the
//! skipped lane finally renders, the whole tail replays in original order on
//! top of that frozen state, so the final state is identical to having
//! rendered everything at once.

use std::cell::RefCell;
use std::rc::Rc;

use crate::arena::{FiberArena, FiberId};
use crate::fiber::{FiberTag, StateNode};
use crate::flags::FiberFlags;
use crate::lanes::{Lane, Lanes};
use crate::nodes::{Props, StateRecord};
use crate::root::RootId;

/// Commit-time hook attached to an update; runs during the layout phase.
pub type UpdateCallback = Rc<dyn Fn()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateTag {
    /// Shallow-merge a partial into the state.
    UpdateState,
    /// Replace the state wholesale.
    ReplaceState,
    /// Re-render without touching state.
    ForceUpdate,
    /// Merge state derived from a captured error; flips the capture flags.
    CaptureUpdate,
}

#[derive(Clone)]
pub enum UpdatePayload {
    Partial(StateRecord),
    /// Computed from `(prev_state, next_props)`; `None` is a no-op.
    Compute(Rc<dyn Fn(&StateRecord, &Props) -> Option<StateRecord>>),
}

impl UpdatePayload {
    fn eval(&self, prev: &StateRecord, props: &Props) -> Option<StateRecord> {
        match self {
            UpdatePayload::Partial(partial) => Some(partial.clone()),
            UpdatePayload::Compute(compute) => compute(prev, props),
        }
    }
}

/// A single pending mutation.
pub struct Update {
    pub lane: Lane,
    pub tag: UpdateTag,
    pub payload: UpdatePayload,
    pub callback: Option<UpdateCallback>,
    pub(crate) next: Option<UpdateRef>,
}

pub(crate) type UpdateRef = Rc<RefCell<Update>>;

impl Update {
    pub fn new(lane: Lane, payload: UpdatePayload) -> Self {
        Self {
            lane,
            tag: UpdateTag::UpdateState,
            payload,
            callback: None,
            next: None,
        }
    }

    fn clone_node(&self, lane: Lane, callback: Option<UpdateCallback>) -> UpdateRef {
        Rc::new(RefCell::new(Update {
            lane,
            tag: self.tag,
            payload: self.payload.clone(),
            callback,
            next: None,
        }))
    }
}

/// Producer side of a queue. One ring shared by a fiber and its alternate.
pub(crate) struct SharedQueue {
    /// Tail of the circular pending list; `tail.next` is the head.
    pub pending: Option<UpdateRef>,
    /// Union of lanes enqueued since the last drain.
    pub lanes: Lanes,
}

impl Drop for SharedQueue {
    fn drop(&mut self) {
        // Break the ring so the Rc cycle cannot outlive the queue.
        if let Some(tail) = self.pending.take() {
            tail.borrow_mut().next = None;
        }
    }
}

/// The queue attached to root and stateful fibers.
pub struct UpdateQueue {
    pub base_state: StateRecord,
    pub(crate) first_base_update: Option<UpdateRef>,
    pub(crate) last_base_update: Option<UpdateRef>,
    pub(crate) shared: Rc<RefCell<SharedQueue>>,
    /// Callbacks collected by the last drain, consumed by the commit.
    pub(crate) callbacks: Vec<UpdateCallback>,
}

impl UpdateQueue {
    pub fn new(base_state: StateRecord) -> Self {
        Self {
            base_state,
            first_base_update: None,
            last_base_update: None,
            shared: Rc::new(RefCell::new(SharedQueue {
                pending: None,
                lanes: Lanes::NONE,
            })),
            callbacks: Vec::new(),
        }
    }

    /// The work-in-progress copy: its own base list pointers (which may
    /// diverge during a skip), the same shared ring, a fresh callback batch.
    pub(crate) fn clone_for_wip(&self) -> UpdateQueue {
        UpdateQueue {
            base_state: self.base_state.clone(),
            first_base_update: self.first_base_update.clone(),
            last_base_update: self.last_base_update.clone(),
            shared: self.shared.clone(),
            callbacks: Vec::new(),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.shared.borrow().pending.is_some() || self.first_base_update.is_some()
    }

    pub(crate) fn take_callbacks(&mut self) -> Vec<UpdateCallback> {
        std::mem::take(&mut self.callbacks)
    }
}

/// Outcome of a drain, reported back to the work loop.
#[derive(Default)]
pub(crate) struct ProcessResult {
    /// Lanes of skipped updates; the fiber keeps them and the root re-renders
    /// them later.
    pub skipped_lanes: Lanes,
    pub has_force_update: bool,
}

/// Append one update to the fiber's pending ring and bubble its lane to the
/// root.
///
/// Returns the root the fiber belongs to, or `None` if the fiber was torn
/// down (the update is silently dropped, matching unmounted-target policy).
/// Single splice, no locks: producers are guaranteed to run on the mutator
/// thread.
pub(crate) fn enqueue_update(
    arena: &mut FiberArena,
    fiber: FiberId,
    update: Update,
) -> Option<RootId> {
    let lane = update.lane;
    let shared = match arena.get(fiber).update_queue.as_ref() {
        Some(queue) => queue.shared.clone(),
        None => {
            log::debug!("dropping update for unmounted fiber {fiber:?}");
            return None;
        }
    };

    let node = Rc::new(RefCell::new(update));
    {
        let mut shared = shared.borrow_mut();
        match shared.pending.take() {
            None => {
                // first update closes the ring on itself
                node.borrow_mut().next = Some(node.clone());
            }
            Some(tail) => {
                let head = tail.borrow_mut().next.take();
                node.borrow_mut().next = head;
                tail.borrow_mut().next = Some(node.clone());
            }
        }
        shared.pending = Some(node);
        shared.lanes |= lane;
    }

    mark_update_lane_from_fiber_to_root(arena, fiber, lane)
}

/// Merge `lane` into the fiber, its alternate, and `child_lanes` up the
/// parent chain, so `get_next_lanes` can see the work from the root.
pub(crate) fn mark_update_lane_from_fiber_to_root(
    arena: &mut FiberArena,
    fiber: FiberId,
    lane: Lanes,
) -> Option<RootId> {
    {
        let alternate = {
            let f = arena.get_mut(fiber);
            f.lanes |= lane;
            f.alternate
        };
        if let Some(alternate) = alternate {
            arena.get_mut(alternate).lanes |= lane;
        }
    }

    let mut node = fiber;
    while let Some(parent) = arena.get(node).parent {
        let alternate = {
            let p = arena.get_mut(parent);
            p.child_lanes |= lane;
            p.alternate
        };
        if let Some(alternate) = alternate {
            arena.get_mut(alternate).child_lanes |= lane;
        }
        node = parent;
    }

    let top = arena.get(node);
    match (&top.tag, &top.state_node) {
        (FiberTag::HostRoot, StateNode::Root(root)) => Some(*root),
        _ => None,
    }
}

/// Drain the queue on `wip` against the visible lanes.
///
/// Splices the pending ring into the base list (structurally sharing the
/// nodes with the alternate's queue), folds visible updates into
/// `memoized_state`, and rebuilds the base list per the rebase rules.
pub(crate) fn process_update_queue(
    arena: &mut FiberArena,
    wip: FiberId,
    props: &Props,
    render_lanes: Lanes,
    wip_root_render_lanes: Lanes,
) -> ProcessResult {
    let mut result = ProcessResult::default();
    let Some(mut queue) = arena.get_mut(wip).update_queue.take() else {
        return result;
    };

    loop {
        // Splice whatever producers appended since the last pass.
        let pending = queue.shared.borrow_mut().pending.take();
        if let Some(tail) = pending {
            let head = tail.borrow_mut().next.take().expect("pending ring is circular");

            match queue.last_base_update.take() {
                None => queue.first_base_update = Some(head.clone()),
                Some(last) => last.borrow_mut().next = Some(head.clone()),
            }
            queue.last_base_update = Some(tail.clone());

            // If the alternate's queue has diverged, append the same nodes
            // there too: both queues must see this batch exactly once.
            if let Some(current_id) = arena.get(wip).alternate {
                if let Some(current_queue) = arena.get_mut(current_id).update_queue.as_mut() {
                    let diverged = !matches!(
                        (&current_queue.last_base_update, &queue.last_base_update),
                        (Some(a), Some(b)) if Rc::ptr_eq(a, b)
                    );
                    if diverged {
                        match current_queue.last_base_update.take() {
                            None => current_queue.first_base_update = Some(head.clone()),
                            Some(last) => last.borrow_mut().next = Some(head),
                        }
                        current_queue.last_base_update = Some(tail);
                    }
                }
            }
        }

        if queue.first_base_update.is_none() {
            break;
        }

        let mut new_state = queue.base_state.clone();
        let mut new_lanes = Lanes::NONE;
        let mut new_base_state: Option<StateRecord> = None;
        let mut new_first: Option<UpdateRef> = None;
        let mut new_last: Option<UpdateRef> = None;

        let mut cursor = queue.first_base_update.clone();
        while let Some(node) = cursor {
            let update = node.borrow();
            let update_lane = update.lane.remove(Lanes::OFFSCREEN);
            let is_hidden = update_lane != update.lane;

            // Hidden-tree updates check against the root's full render lanes;
            // everything else against this pass's lanes.
            let visible = if is_hidden {
                update_lane.is_subset_of(wip_root_render_lanes)
            } else {
                update_lane.is_subset_of(render_lanes)
            };

            if !visible {
                // Priority too low: park a clone on the new base list and
                // freeze the base state at the first skip.
                let clone = update.clone_node(update.lane, update.callback.clone());
                match new_last.take() {
                    None => {
                        new_first = Some(clone.clone());
                        new_base_state = Some(new_state.clone());
                    }
                    Some(last) => last.borrow_mut().next = Some(clone.clone()),
                }
                new_last = Some(clone);
                new_lanes |= update_lane;
            } else {
                if new_last.is_some() {
                    // Applied after a skip: clone with no lane so the replay
                    // re-applies it unconditionally. The callback stays on
                    // this pass only.
                    let clone = update.clone_node(Lanes::NONE, None);
                    if let Some(last) = new_last.take() {
                        last.borrow_mut().next = Some(clone.clone());
                    }
                    new_last = Some(clone);
                }

                match update.tag {
                    UpdateTag::UpdateState => {
                        if let Some(partial) = update.payload.eval(&new_state, props) {
                            new_state = new_state.merged(&partial);
                        }
                    }
                    UpdateTag::ReplaceState => {
                        if let Some(next) = update.payload.eval(&new_state, props) {
                            new_state = next;
                        }
                    }
                    UpdateTag::CaptureUpdate => {
                        let fiber = arena.get_mut(wip);
                        fiber.flags.remove(FiberFlags::SHOULD_CAPTURE);
                        fiber.flags.insert(FiberFlags::DID_CAPTURE);
                        if let Some(partial) = update.payload.eval(&new_state, props) {
                            new_state = new_state.merged(&partial);
                        }
                    }
                    UpdateTag::ForceUpdate => {
                        result.has_force_update = true;
                    }
                }

                if let Some(callback) = update.callback.clone() {
                    let fiber = arena.get_mut(wip);
                    fiber.flags.insert(FiberFlags::CALLBACK);
                    if is_hidden {
                        fiber.flags.insert(FiberFlags::VISIBILITY);
                    }
                    queue.callbacks.push(callback);
                }
            }

            cursor = update.next.clone();
        }

        queue.base_state = new_base_state.unwrap_or_else(|| new_state.clone());
        queue.first_base_update = new_first;
        queue.last_base_update = new_last;

        {
            let fiber = arena.get_mut(wip);
            fiber.lanes = new_lanes;
            fiber.memoized_state = Some(new_state);
        }
        result.skipped_lanes = new_lanes;

        // A callback may have enqueued more work mid-drain; keep folding
        // until the ring stays empty.
        if queue.shared.borrow().pending.is_none() {
            break;
        }
    }

    queue.shared.borrow_mut().lanes = Lanes::NONE;
    arena.get_mut(wip).update_queue = Some(queue);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::{Fiber, FiberProps, FiberTag};
    use crate::flags::Mode;
    use crate::nodes::Value;

    fn stateful_fiber(arena: &mut FiberArena, base: StateRecord) -> FiberId {
        let mut fiber = Fiber::new(FiberTag::Stateful, FiberProps::None, None, Mode::CONCURRENT);
        fiber.update_queue = Some(UpdateQueue::new(base));
        arena.alloc(fiber)
    }

    fn set_update(lane: Lanes, name: &str, value: i64) -> Update {
        Update::new(lane, UpdatePayload::Partial(StateRecord::new().with(name, value)))
    }

    fn drain(arena: &mut FiberArena, fiber: FiberId, lanes: Lanes) -> StateRecord {
        process_update_queue(arena, fiber, &Props::default(), lanes, lanes);
        arena.get(fiber).memoized_state.clone().unwrap()
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut arena = FiberArena::new();
        let fiber = stateful_fiber(&mut arena, StateRecord::new());

        for value in 1..=3 {
            enqueue_update(&mut arena, fiber, set_update(Lanes::DEFAULT, "n", value));
        }

        let state = drain(&mut arena, fiber, Lanes::DEFAULT);
        assert_eq!(state.get("n"), Some(&Value::Int(3)));
    }

    #[test]
    fn randomized_enqueue_links_each_update_exactly_once() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut arena = FiberArena::new();
        let fiber = stateful_fiber(&mut arena, StateRecord::new());

        let n: i64 = 50;
        for value in 0..n {
            // simulate interleaved producers with random-priority lanes that
            // are all visible this render
            let lane = if rng.gen_bool(0.5) { Lanes::DEFAULT } else { Lanes::SYNC };
            enqueue_update(&mut arena, fiber, set_update(lane, "last", value));
            enqueue_update(
                &mut arena,
                fiber,
                Update::new(
                    lane,
                    UpdatePayload::Compute(Rc::new(|prev, _| {
                        let seen = match prev.get("count") {
                            Some(Value::Int(count)) => *count,
                            _ => 0,
                        };
                        Some(StateRecord::new().with("count", seen + 1))
                    })),
                ),
            );
        }

        let state = drain(&mut arena, fiber, Lanes::SYNC | Lanes::DEFAULT);
        assert_eq!(state.get("last"), Some(&Value::Int(n - 1)));
        assert_eq!(state.get("count"), Some(&Value::Int(n)));
    }

    #[test]
    fn skipped_updates_rebase_onto_frozen_state() {
        let mut arena = FiberArena::new();
        let fiber = stateful_fiber(&mut arena, StateRecord::new().with("n", 0i64));

        let bump = |amount: i64| {
            UpdatePayload::Compute(Rc::new(move |prev, _| {
                let n = match prev.get("n") {
                    Some(Value::Int(n)) => *n,
                    _ => 0,
                };
                Some(StateRecord::new().with("n", n + amount))
            }))
        };

        // +1 at default, +10 at transition, *then* +1 at default again.
        let transition = Lanes::NONE.next_transition_lane();
        enqueue_update(&mut arena, fiber, Update::new(Lanes::DEFAULT, bump(1)));
        enqueue_update(&mut arena, fiber, Update::new(transition, bump(10)));
        enqueue_update(&mut arena, fiber, Update::new(Lanes::DEFAULT, bump(1)));

        // First render skips the transition but still applies both defaults.
        let state = drain(&mut arena, fiber, Lanes::DEFAULT);
        assert_eq!(state.get("n"), Some(&Value::Int(2)));
        assert_eq!(arena.get(fiber).lanes, transition);

        // Rebase: the skipped lane renders later and replays the tail in
        // original order, landing on the same result as one big render.
        let state = drain(&mut arena, fiber, Lanes::DEFAULT | transition);
        assert_eq!(state.get("n"), Some(&Value::Int(12)));
        assert_eq!(arena.get(fiber).lanes, Lanes::NONE);
    }

    #[test]
    fn replace_state_discards_previous_fields() {
        let mut arena = FiberArena::new();
        let fiber = stateful_fiber(&mut arena, StateRecord::new().with("a", 1i64));

        let mut update = Update::new(
            Lanes::SYNC,
            UpdatePayload::Partial(StateRecord::new().with("b", 2i64)),
        );
        update.tag = UpdateTag::ReplaceState;
        enqueue_update(&mut arena, fiber, update);

        let state = drain(&mut arena, fiber, Lanes::SYNC);
        assert_eq!(state.get("a"), None);
        assert_eq!(state.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn unmounted_fiber_drops_updates() {
        let mut arena = FiberArena::new();
        let fiber = arena.alloc(Fiber::new(
            FiberTag::Stateful,
            FiberProps::None,
            None,
            Mode::CONCURRENT,
        ));
        assert!(enqueue_update(&mut arena, fiber, set_update(Lanes::SYNC, "n", 1)).is_none());
    }
}
