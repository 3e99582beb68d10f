//! # The reconciler
//!
//! This module provides the primary mechanics to drive a concurrent,
//! renderer-agnostic fiber tree for Rust.
//!
//! ## Guide
//!
//! A [`Reconciler`] is constructed around two host-provided objects: a
//! [`HostConfig`] that knows how to create and mutate platform nodes, and a
//! [`HostScheduler`] that provides time and a cooperative task queue.
//!
//! ```rust, ignore
//! let mut reconciler = Reconciler::new(host, scheduler);
//! let root = reconciler.create_container(container, RootTag::Concurrent, RootOptions::default());
//!
//! reconciler.update_container(Some(app()), root, None)?;
//! ```
//!
//! Rendering is pull-based: `update_container` only *schedules* work. The
//! host's event loop pops fired tasks from its scheduler and hands them back:
//!
//! ```rust, ignore
//! while let Some(task) = scheduler.pop_task() {
//!     reconciler.run_task(task)?;
//! }
//! ```
//!
//! Between tasks the work loop may have yielded (time slice over) or
//! suspended (a component returned `Thrown::Suspend`). Either way the
//! reconciler re-arms its own callbacks; the embedder just keeps pumping.

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use slab::Slab;

use crate::arena::{FiberArena, FiberId};
use crate::context::{ContextId, ContextRegistry};
use crate::error::{ErrorValue, ReconcileError, Thrown};
use crate::fiber::{Fiber, FiberProps, FiberTag, StateNode};
use crate::flags::ExecutionContext;
use crate::host::{CallbackHandle, HostConfig, HostHandle, HostScheduler, SchedulerTask};
use crate::lanes::{Lane, Lanes};
use crate::nodes::{StateRecord, Value, ViewNode};
use crate::root::{element_state, FiberRoot, RootId, RootOptions, RootTag};
use crate::update_queue::{
    enqueue_update, Update, UpdateCallback, UpdatePayload, UpdateQueue, UpdateTag,
};
use crate::work_loop::{RootExitStatus, SuspendedReason};

/// In-process wakeups delivered to the work loop at safepoints.
pub(crate) enum SchedulerMsg {
    /// A wakeable that suspended `root`'s render resolved.
    Pinged { root: RootId, lanes: Lanes },
    /// A wakeable a committed fallback was waiting on resolved; re-attempt
    /// the boundary's primary children on a retry lane.
    Retry { root: RootId, boundary: FiberId, lane: Lanes },
}

/// The reconciler: every piece of process-wide mutable state the pipeline
/// needs, owned by one value and threaded explicitly.
///
/// The `&mut self` discipline *is* the concurrency model: one mutator at a
/// time, interruption only at safepoints, producers reach in only through the
/// message channel.
pub struct Reconciler {
    pub(crate) arena: FiberArena,
    pub(crate) roots: Slab<FiberRoot>,
    pub(crate) host: Box<dyn HostConfig>,
    pub(crate) scheduler: Box<dyn HostScheduler>,
    pub(crate) contexts: ContextRegistry,

    // ---- root schedule ----
    pub(crate) first_scheduled_root: Option<RootId>,
    pub(crate) last_scheduled_root: Option<RootId>,
    pub(crate) did_schedule_microtask: bool,
    pub(crate) might_have_pending_sync_work: bool,
    pub(crate) is_flushing_work: bool,
    pub(crate) execution_context: ExecutionContext,

    // ---- priority channel ----
    pub(crate) current_update_priority: Lanes,
    pub(crate) current_event_transition_lane: Lanes,
    pub(crate) in_transition: bool,
    pub(crate) last_transition_lane: Lanes,
    pub(crate) last_retry_lane: Lanes,

    // ---- work-in-progress globals ----
    pub(crate) wip_root: Option<RootId>,
    pub(crate) wip: Option<FiberId>,
    pub(crate) wip_root_render_lanes: Lanes,
    pub(crate) entangled_render_lanes: Lanes,
    pub(crate) wip_root_exit_status: RootExitStatus,
    pub(crate) wip_suspended_reason: SuspendedReason,
    pub(crate) wip_thrown_value: Option<Thrown>,
    pub(crate) wip_root_skipped_lanes: Lanes,
    pub(crate) wip_root_pinged_lanes: Lanes,
    pub(crate) wip_root_recoverable_errors: Vec<ErrorValue>,
    pub(crate) wip_root_did_attempt_sync_recovery: bool,
    pub(crate) did_receive_update: bool,

    /// Fibers allocated by the in-flight render that are not alternate-paired
    /// with the committed tree. Freed if the render is abandoned, forgotten
    /// on commit.
    pub(crate) render_allocated: Vec<FiberId>,

    // ---- deferred effects ----
    pub(crate) root_with_pending_passive_effects: Option<RootId>,
    pub(crate) pending_passive_callback: Option<CallbackHandle>,
    /// Subtrees removed by the last commit, awaiting arena reclamation in
    /// the passive pass.
    pub(crate) pending_deletions: Vec<FiberId>,

    // ---- wakeup channel ----
    pub(crate) tx: UnboundedSender<SchedulerMsg>,
    pub(crate) rx: UnboundedReceiver<SchedulerMsg>,
}

impl Reconciler {
    pub fn new(host: Box<dyn HostConfig>, scheduler: Box<dyn HostScheduler>) -> Self {
        let (tx, rx) = futures_channel::mpsc::unbounded();
        Self {
            arena: FiberArena::new(),
            roots: Slab::new(),
            host,
            scheduler,
            contexts: ContextRegistry::default(),
            first_scheduled_root: None,
            last_scheduled_root: None,
            did_schedule_microtask: false,
            might_have_pending_sync_work: false,
            is_flushing_work: false,
            execution_context: ExecutionContext::empty(),
            current_update_priority: Lanes::NONE,
            current_event_transition_lane: Lanes::NONE,
            in_transition: false,
            last_transition_lane: Lanes::NONE,
            last_retry_lane: Lanes::NONE,
            wip_root: None,
            wip: None,
            wip_root_render_lanes: Lanes::NONE,
            entangled_render_lanes: Lanes::NONE,
            wip_root_exit_status: RootExitStatus::InProgress,
            wip_suspended_reason: SuspendedReason::NotSuspended,
            wip_thrown_value: None,
            wip_root_skipped_lanes: Lanes::NONE,
            wip_root_pinged_lanes: Lanes::NONE,
            wip_root_recoverable_errors: Vec::new(),
            wip_root_did_attempt_sync_recovery: false,
            did_receive_update: false,
            render_allocated: Vec::new(),
            root_with_pending_passive_effects: None,
            pending_passive_callback: None,
            pending_deletions: Vec::new(),
            tx,
            rx,
        }
    }

    /// Register a host container and return the handle all further calls for
    /// this tree go through.
    pub fn create_container(
        &mut self,
        container: HostHandle,
        tag: RootTag,
        options: RootOptions,
    ) -> RootId {
        let entry = self.roots.vacant_entry();
        let root_id = RootId(entry.key());

        let mut fiber = Fiber::new(FiberTag::HostRoot, FiberProps::None, None, tag.mode());
        fiber.state_node = StateNode::Root(root_id);
        fiber.memoized_state = Some(StateRecord::new());
        fiber.update_queue = Some(UpdateQueue::new(StateRecord::new()));
        let fiber_id = self.arena.alloc(fiber);

        entry.insert(FiberRoot::new(root_id, tag, container, fiber_id, options));
        log::debug!("created {root_id} (current fiber {fiber_id:?})");
        root_id
    }

    /// Tear the tree down: render an empty element synchronously, then drop
    /// the root and its fibers.
    pub fn destroy_container(&mut self, root: RootId) -> Result<(), ReconcileError> {
        self.discrete_updates(|r| r.update_container(None, root, None))?;
        self.flush_sync_work_across_roots()?;
        self.flush_passive_effects();

        if let Some(fiber_root) = self.roots.try_remove(root.0) {
            if let Some(handle) = fiber_root.callback_node {
                self.scheduler.cancel_callback(handle);
            }
            self.arena.free_subtree(fiber_root.current);
        }
        Ok(())
    }

    /// Schedule rendering `element` into `root`. Returns the lane the update
    /// was scheduled on.
    ///
    /// This is the write path: it enqueues one `UpdateState` update carrying
    /// the element on the root fiber and arms the scheduler. Nothing renders
    /// until the corresponding task fires (or a sync flush picks it up).
    pub fn update_container(
        &mut self,
        element: Option<ViewNode>,
        root: RootId,
        callback: Option<UpdateCallback>,
    ) -> Result<Lane, ReconcileError> {
        if !self.roots.contains(root.0) {
            return Err(ReconcileError::UnknownRoot(root.0));
        }
        let lane = self.request_update_lane(root);
        let root_fiber = self.roots[root.0].current;

        let mut update = Update::new(lane, UpdatePayload::Partial(element_state(element)));
        update.callback = callback;

        if self.execution_context.contains(ExecutionContext::RENDER) {
            // Render-phase update: legal but unusual; it lands in the shared
            // ring like any other and is picked up by this very render.
            log::warn!("update_container called from inside a render");
        }

        if enqueue_update(&mut self.arena, root_fiber, update).is_some() {
            self.mark_root_updated(root, lane);
            self.ensure_root_is_scheduled(root);
        }
        Ok(lane)
    }

    /// Enqueue a state update for a stateful fiber.
    pub fn set_state(
        &mut self,
        fiber: FiberId,
        partial: StateRecord,
    ) -> Result<Lane, ReconcileError> {
        self.schedule_state_update(fiber, UpdateTag::UpdateState, UpdatePayload::Partial(partial))
    }

    /// Enqueue a computed state update (`(prev_state, props) -> partial`).
    pub fn set_state_with(
        &mut self,
        fiber: FiberId,
        compute: std::rc::Rc<dyn Fn(&StateRecord, &crate::nodes::Props) -> Option<StateRecord>>,
    ) -> Result<Lane, ReconcileError> {
        self.schedule_state_update(fiber, UpdateTag::UpdateState, UpdatePayload::Compute(compute))
    }

    /// Re-render a stateful fiber without changing state.
    pub fn force_update(&mut self, fiber: FiberId) -> Result<Lane, ReconcileError> {
        self.schedule_state_update(
            fiber,
            UpdateTag::ForceUpdate,
            UpdatePayload::Partial(StateRecord::new()),
        )
    }

    fn schedule_state_update(
        &mut self,
        fiber: FiberId,
        tag: UpdateTag,
        payload: UpdatePayload,
    ) -> Result<Lane, ReconcileError> {
        let Some(root) = self.root_of(fiber) else {
            // Unmounted target: drop silently, matching the enqueue path.
            return Ok(Lanes::NONE);
        };
        let lane = self.request_update_lane(root);
        let mut update = Update::new(lane, payload);
        update.tag = tag;
        if enqueue_update(&mut self.arena, fiber, update).is_some() {
            self.mark_root_updated(root, lane);
            self.ensure_root_is_scheduled(root);
        }
        Ok(lane)
    }

    /// Note new pending work on a root and entangle transition updates with
    /// any transitions already in flight.
    pub(crate) fn mark_root_updated(&mut self, root: RootId, lane: Lane) {
        let fiber_root = &mut self.roots[root.0];
        if lane.is_transition() {
            let in_flight = fiber_root.pending_lanes.intersect(Lanes::TRANSITION_MASK);
            if !in_flight.is_empty() {
                fiber_root.entangle(lane, in_flight.merge(lane));
            }
        }
        fiber_root.mark_updated(lane);
    }

    /// Run `f` with every update it schedules forced onto the sync lane,
    /// then flush that work before returning.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcileError> {
        let prev_priority = self.current_update_priority;
        let prev_context = self.execution_context;
        self.current_update_priority = Lanes::SYNC;
        self.execution_context.insert(ExecutionContext::BATCHED);

        let result = f(self);

        self.current_update_priority = prev_priority;
        self.execution_context = prev_context;
        if !self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            self.flush_sync_work_across_roots()?;
        }
        Ok(result)
    }

    /// Batch every update scheduled by `f` into one render.
    pub fn batched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let prev = self.execution_context;
        self.execution_context.insert(ExecutionContext::BATCHED);
        let result = f(self);
        self.execution_context = prev;
        result
    }

    /// Run `f` with discrete-event (sync) priority without the exit flush.
    pub fn discrete_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let prev = self.current_update_priority;
        self.current_update_priority = Lanes::SYNC;
        let result = f(self);
        self.current_update_priority = prev;
        result
    }

    /// Updates scheduled by `f` are non-urgent: they share a transition lane
    /// and may be interrupted by anything more pressing.
    pub fn start_transition<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let prev = self.in_transition;
        self.in_transition = true;
        let result = f(self);
        self.in_transition = prev;
        if !prev {
            self.current_event_transition_lane = Lanes::NONE;
        }
        result
    }

    /// Register a context with its default value.
    pub fn create_context(&mut self, default: Value) -> ContextId {
        self.contexts.register(default)
    }

    /// Entry point for fired scheduler callbacks.
    pub fn run_task(&mut self, task: SchedulerTask) -> Result<(), ReconcileError> {
        self.drain_messages();
        match task {
            SchedulerTask::ProcessRootSchedule => self.process_root_schedule(),
            SchedulerTask::RenderRoot(root) => self.perform_work_on_root_via_scheduler_task(root),
            SchedulerTask::FlushPassiveEffects => {
                self.flush_passive_effects();
                Ok(())
            }
        }
    }

    /// Drain queued wakeups and re-arm scheduling.
    ///
    /// Thenables resolved from outside any reconciler task only leave a
    /// message in the channel; embedders call this after resolving external
    /// work so suspended roots wake up. Fired tasks drain implicitly.
    pub fn pump(&mut self) {
        self.drain_messages();
    }

    /// Apply queued wakeups (thenable resolutions) to root state.
    pub(crate) fn drain_messages(&mut self) {
        while let Ok(Some(msg)) = self.rx.try_next() {
            match msg {
                SchedulerMsg::Pinged { root, lanes } => self.ping_suspended_root(root, lanes),
                SchedulerMsg::Retry { root, boundary, lane } => {
                    self.retry_timed_out_boundary(root, boundary, lane)
                }
            }
        }
    }

    /// Data a committed fallback was waiting on arrived; schedule the
    /// boundary's primary content on its retry lane.
    pub(crate) fn retry_timed_out_boundary(
        &mut self,
        root: RootId,
        boundary: FiberId,
        lane: Lanes,
    ) {
        if !self.roots.contains(root.0) || !self.arena.contains(boundary) {
            return;
        }
        crate::update_queue::mark_update_lane_from_fiber_to_root(&mut self.arena, boundary, lane);
        self.mark_root_updated(root, lane);
        self.ensure_root_is_scheduled(root);
    }

    // ---- inspection ----

    /// The committed root fiber of a tree.
    pub fn current_fiber(&self, root: RootId) -> FiberId {
        self.roots[root.0].current
    }

    /// Read-only access to the fiber arena, for tests and devtools.
    pub fn fibers(&self) -> &FiberArena {
        &self.arena
    }

    /// Pending lanes on a root, for tests and devtools.
    pub fn pending_lanes(&self, root: RootId) -> Lanes {
        self.roots[root.0].pending_lanes
    }

    /// Walk parent links to the root this fiber belongs to.
    pub(crate) fn root_of(&self, fiber: FiberId) -> Option<RootId> {
        let mut node = fiber;
        loop {
            let f = self.arena.get(node);
            match f.parent {
                Some(parent) => node = parent,
                None => {
                    return match (&f.tag, &f.state_node) {
                        (FiberTag::HostRoot, StateNode::Root(root)) => Some(*root),
                        _ => None,
                    }
                }
            }
        }
    }
}
