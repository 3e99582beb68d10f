//! The work loop - the cooperative render-phase traversal.
//!
//! A render is a depth-first walk over the work-in-progress tree: `begin`
//! on the way down (run user code, fork children), `complete` on the way up
//! (reify host nodes, bubble effect flags). The walk has exactly one kind of
//! safepoint: the gap between two units of work. Time-sliced renders check
//! the host's `should_yield` there and hand control back mid-tree; the next
//! scheduler callback picks the walk up where it stopped.
//!
//! Thrown values surface here too. A throw never unwinds the Rust stack -
//! handlers return it - so the loop decides per reason: suspend-and-yield
//! when data may arrive (the unit is replayed later, as if it had never
//! run), or unwind to the nearest boundary and render its fallback path.
//!
//! There is no cancel token. A more urgent update simply makes the next
//! `prepare_fresh_stack` throw the half-built tree away; the abandoned
//! fibers were never observable because commit requires a completed root.

use crate::arena::FiberId;
use crate::error::{ErrorValue, ReconcileError, Thrown};
use crate::fiber::{FiberProps, FiberTag};
use crate::flags::{ExecutionContext, FiberFlags};
use crate::lanes::Lanes;
use crate::reconciler::{Reconciler, SchedulerMsg};
use crate::root::RootId;
use crate::update_queue::{enqueue_update, Update, UpdatePayload, UpdateTag};

/// Where a render attempt ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootExitStatus {
    /// Yielded mid-tree; the scheduler will call back in.
    InProgress,
    /// An error escaped every boundary on the first concurrent attempt.
    Errored,
    /// The render could not complete even its unwind path.
    FatalErrored,
    /// Waiting on data; nothing to commit yet.
    Suspended,
    /// A finished tree is ready for the commit driver.
    Completed,
}

/// Why the loop stopped at a fiber instead of finishing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuspendedReason {
    NotSuspended,
    /// A thenable is pending; the unit will be replayed when it resolves.
    SuspendedOnData,
    /// A plain error; unwinds to a boundary.
    SuspendedOnError,
    /// The awaited thenable resolved while we were yielded.
    SuspendedAndReadyToContinue,
}

/// How one unit of work ended.
pub(crate) enum UnitOutcome {
    Continue,
    Thrown(FiberId, Thrown),
}

/// How one pass of an inner loop ended.
enum LoopExit {
    Done,
    Yielded,
    Thrown(FiberId, Thrown),
}

impl Reconciler {
    /// Render `lanes` on `root` and commit if a tree completes.
    ///
    /// The single entry point for actually doing work; everything in
    /// scheduler.rs funnels here. Must not be called while a render or
    /// commit is already on the stack.
    pub(crate) fn perform_work_on_root(
        &mut self,
        root: RootId,
        lanes: Lanes,
        force_sync: bool,
    ) -> Result<(), ReconcileError> {
        if self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return Err(ReconcileError::AlreadyWorking);
        }

        let expired = lanes.intersects(self.roots[root.0].expired_lanes);
        let mut should_time_slice = !force_sync && !lanes.is_blocking() && !expired;
        self.wip_root_did_attempt_sync_recovery = false;

        loop {
            let exit = if should_time_slice {
                self.render_root_concurrent(root, lanes)?
            } else {
                self.render_root_sync(root, lanes)?
            };

            match exit {
                RootExitStatus::InProgress => {
                    // Yielded. If the hold-up is data, park the lanes so the
                    // scheduler stops picking them until a ping arrives.
                    if self.wip_suspended_reason == SuspendedReason::SuspendedOnData {
                        self.roots[root.0].mark_suspended(lanes);
                    }
                    return Ok(());
                }
                RootExitStatus::Errored => {
                    if !self.wip_root_did_attempt_sync_recovery {
                        // Replay synchronously: deterministic ordering gives
                        // boundaries a clean shot at capturing.
                        log::warn!("{root} errored concurrently; retrying synchronously");
                        self.wip_root_did_attempt_sync_recovery = true;
                        should_time_slice = false;
                        self.prepare_fresh_stack(root, lanes);
                        continue;
                    }
                    self.abandon_failed_render(root, lanes);
                    return Ok(());
                }
                RootExitStatus::FatalErrored => {
                    self.abandon_failed_render(root, lanes);
                    return Ok(());
                }
                RootExitStatus::Suspended => {
                    self.roots[root.0].mark_suspended(lanes);
                    self.reset_wip_stack();
                    return Ok(());
                }
                RootExitStatus::Completed => {
                    let finished = self
                        .arena
                        .get(self.roots[root.0].current)
                        .alternate
                        .expect("a completed render always has a work-in-progress root");
                    self.roots[root.0].finished_work = Some(finished);
                    self.roots[root.0].finished_lanes = lanes;
                    self.commit_root(root)?;
                    self.ensure_root_is_scheduled(root);
                    return Ok(());
                }
            }
        }
    }

    /// Drop an unfinishable render on the floor, retiring its lanes so the
    /// scheduler does not spin on them.
    fn abandon_failed_render(&mut self, root: RootId, lanes: Lanes) {
        log::error!("{root} failed to render {lanes:?}; abandoning the attempt");
        self.reset_wip_stack();
        let fiber_root = &mut self.roots[root.0];
        fiber_root.pending_lanes = fiber_root.pending_lanes.remove(lanes);
        fiber_root.expired_lanes = fiber_root.expired_lanes.remove(lanes);
    }

    /// Throw away whatever render was in flight and set up a clean walk of
    /// `root` at `lanes`.
    pub(crate) fn prepare_fresh_stack(&mut self, root: RootId, lanes: Lanes) {
        if self.wip_root.is_some() {
            log::trace!("discarding in-flight render for a fresh stack");
        }
        self.reclaim_abandoned_fibers();

        let timeout = self.roots[root.0].timeout_handle.take();
        if let Some(handle) = timeout {
            self.scheduler.cancel_callback(handle);
        }
        self.roots[root.0].finished_work = None;
        self.contexts.reset();

        let root_fiber = self.roots[root.0].current;
        let wip = self.arena.create_work_in_progress(root_fiber, FiberProps::None);

        self.wip_root = Some(root);
        self.wip = Some(wip);
        self.wip_root_render_lanes = lanes;
        self.entangled_render_lanes = self.roots[root.0].entangled_render_lanes(lanes);
        self.wip_root_exit_status = RootExitStatus::InProgress;
        self.wip_suspended_reason = SuspendedReason::NotSuspended;
        self.wip_thrown_value = None;
        self.wip_root_skipped_lanes = Lanes::NONE;
        self.wip_root_pinged_lanes = Lanes::NONE;
        if !self.wip_root_did_attempt_sync_recovery {
            self.wip_root_recoverable_errors.clear();
        }
        log::trace!("fresh stack for {root} at {lanes:?}");
    }

    pub(crate) fn reset_wip_stack(&mut self) {
        self.reclaim_abandoned_fibers();
        self.wip_root = None;
        self.wip = None;
        self.wip_root_render_lanes = Lanes::NONE;
        self.wip_suspended_reason = SuspendedReason::NotSuspended;
        self.wip_thrown_value = None;
        self.contexts.reset();
    }

    /// Free first-mount fibers left over from an abandoned attempt. Fibers
    /// with an alternate stay: they are reachable from the committed tree
    /// and will be reused by the next clone.
    fn reclaim_abandoned_fibers(&mut self) {
        let orphans = std::mem::take(&mut self.render_allocated);
        for id in orphans {
            if self.arena.contains(id) && self.arena.get(id).alternate.is_none() {
                self.arena.free(id);
            }
        }
    }

    // ---- render entries ----

    fn render_root_sync(
        &mut self,
        root: RootId,
        lanes: Lanes,
    ) -> Result<RootExitStatus, ReconcileError> {
        let prev_context = self.execution_context;
        self.execution_context.insert(ExecutionContext::RENDER);

        if self.wip_root != Some(root) || self.wip_root_render_lanes != lanes {
            self.prepare_fresh_stack(root, lanes);
        }

        let result = loop {
            // A sync render cannot wait: thrown data unwinds to a fallback
            // right away.
            if self.wip_suspended_reason != SuspendedReason::NotSuspended {
                let reason = std::mem::replace(
                    &mut self.wip_suspended_reason,
                    SuspendedReason::NotSuspended,
                );
                let thrown = self.wip_thrown_value.take();
                match (reason, self.wip, thrown) {
                    (SuspendedReason::SuspendedAndReadyToContinue, Some(unit), _) => {
                        if let Err(err) = self.replay_suspended_unit_of_work(unit) {
                            break Err(err);
                        }
                    }
                    (_, Some(unit), Some(thrown)) => {
                        self.throw_and_unwind_work_loop(root, unit, thrown)
                    }
                    _ => {}
                }
            }

            match self.work_loop_sync()? {
                LoopExit::Done => {
                    if self.wip_root_exit_status == RootExitStatus::InProgress {
                        self.wip_root_exit_status = RootExitStatus::Completed;
                    }
                    break Ok(self.wip_root_exit_status);
                }
                LoopExit::Thrown(unit, thrown) => {
                    self.record_thrown(unit, thrown);
                }
                LoopExit::Yielded => unreachable!("sync loop does not yield"),
            }
        };

        self.execution_context = prev_context;
        result
    }

    fn render_root_concurrent(
        &mut self,
        root: RootId,
        lanes: Lanes,
    ) -> Result<RootExitStatus, ReconcileError> {
        let prev_context = self.execution_context;
        self.execution_context.insert(ExecutionContext::RENDER);

        if self.wip_root != Some(root) || self.wip_root_render_lanes != lanes {
            self.prepare_fresh_stack(root, lanes);
        }

        let result = 'outer: loop {
            match self.wip_suspended_reason {
                SuspendedReason::NotSuspended => {}
                SuspendedReason::SuspendedOnError => {
                    let thrown = self.wip_thrown_value.take();
                    self.wip_suspended_reason = SuspendedReason::NotSuspended;
                    if let (Some(unit), Some(thrown)) = (self.wip, thrown) {
                        self.throw_and_unwind_work_loop(root, unit, thrown);
                    }
                    if self.wip_root_exit_status != RootExitStatus::InProgress {
                        break Ok(self.wip_root_exit_status);
                    }
                }
                SuspendedReason::SuspendedOnData => {
                    let wakeable = match &self.wip_thrown_value {
                        Some(Thrown::Suspend(wakeable)) => wakeable.clone(),
                        _ => {
                            self.wip_suspended_reason = SuspendedReason::NotSuspended;
                            continue 'outer;
                        }
                    };
                    if let Some(error) = wakeable.rejection() {
                        self.wip_suspended_reason = SuspendedReason::NotSuspended;
                        self.wip_thrown_value = None;
                        if let Some(unit) = self.wip {
                            self.throw_and_unwind_work_loop(root, unit, Thrown::Error(error));
                        }
                    } else if wakeable.is_resolved() {
                        self.wip_suspended_reason = SuspendedReason::NotSuspended;
                        self.wip_thrown_value = None;
                        if let Some(unit) = self.wip {
                            self.replay_suspended_unit_of_work(unit)?;
                        }
                    } else {
                        // Still pending: wake us back up on resolution, then
                        // yield with the unit untouched.
                        let tx = self.tx.clone();
                        let ping_lanes = self.wip_root_render_lanes;
                        wakeable.subscribe(Box::new(move || {
                            let _ = tx.unbounded_send(SchedulerMsg::Pinged {
                                root,
                                lanes: ping_lanes,
                            });
                        }));
                        break Ok(RootExitStatus::InProgress);
                    }
                }
                SuspendedReason::SuspendedAndReadyToContinue => {
                    self.wip_suspended_reason = SuspendedReason::NotSuspended;
                    self.wip_thrown_value = None;
                    if let Some(unit) = self.wip {
                        self.replay_suspended_unit_of_work(unit)?;
                    }
                }
            }

            match self.work_loop_concurrent()? {
                LoopExit::Done => {
                    if self.wip_root_exit_status == RootExitStatus::InProgress {
                        self.wip_root_exit_status = RootExitStatus::Completed;
                    }
                    break Ok(self.wip_root_exit_status);
                }
                LoopExit::Yielded => break Ok(RootExitStatus::InProgress),
                LoopExit::Thrown(unit, thrown) => {
                    self.record_thrown(unit, thrown);
                }
            }
        };

        self.execution_context = prev_context;
        result
    }

    /// Stash a thrown value; the outer loop decides what to do with it at
    /// the next safepoint.
    fn record_thrown(&mut self, unit: FiberId, thrown: Thrown) {
        debug_assert_eq!(self.wip, Some(unit));
        self.wip_suspended_reason = match &thrown {
            Thrown::Suspend(_) => SuspendedReason::SuspendedOnData,
            Thrown::Error(_) => SuspendedReason::SuspendedOnError,
        };
        self.wip_thrown_value = Some(thrown);
    }

    // ---- inner loops ----

    fn work_loop_sync(&mut self) -> Result<LoopExit, ReconcileError> {
        while let Some(unit) = self.wip {
            match self.perform_unit_of_work(unit)? {
                UnitOutcome::Continue => {}
                UnitOutcome::Thrown(fiber, thrown) => return Ok(LoopExit::Thrown(fiber, thrown)),
            }
        }
        Ok(LoopExit::Done)
    }

    fn work_loop_concurrent(&mut self) -> Result<LoopExit, ReconcileError> {
        // Belt and braces: respect the host's should_yield when it has one,
        // and keep a time budget of our own for hosts that always say no.
        let non_idle = self.wip_root_render_lanes.intersects(Lanes::NON_IDLE);
        let budget = if non_idle { 25 } else { 5 };
        let yield_after = self.scheduler.now().saturating_add(budget);

        while let Some(unit) = self.wip {
            if self.scheduler.should_yield() || self.scheduler.now() >= yield_after {
                return Ok(LoopExit::Yielded);
            }
            match self.perform_unit_of_work(unit)? {
                UnitOutcome::Continue => {}
                UnitOutcome::Thrown(fiber, thrown) => return Ok(LoopExit::Thrown(fiber, thrown)),
            }
        }
        Ok(LoopExit::Done)
    }

    /// Begin one fiber and either descend into its first child or complete
    /// up the tree. Indivisible: no yielding inside.
    pub(crate) fn perform_unit_of_work(
        &mut self,
        unit: FiberId,
    ) -> Result<UnitOutcome, ReconcileError> {
        let current = self.arena.get(unit).alternate;
        match self.begin_work(current, unit)? {
            Ok(next) => {
                let pending = self.arena.get(unit).pending_props.clone();
                self.arena.get_mut(unit).memoized_props = pending;
                match next {
                    Some(child) => self.wip = Some(child),
                    None => self.complete_unit_of_work(unit),
                }
                Ok(UnitOutcome::Continue)
            }
            Err(thrown) => Ok(UnitOutcome::Thrown(unit, thrown)),
        }
    }

    /// Re-run a unit whose dependency has arrived, as if it never threw.
    pub(crate) fn replay_suspended_unit_of_work(
        &mut self,
        unit: FiberId,
    ) -> Result<(), ReconcileError> {
        log::trace!("replaying suspended unit {unit:?}");
        match self.perform_unit_of_work(unit)? {
            UnitOutcome::Continue => Ok(()),
            UnitOutcome::Thrown(fiber, thrown) => {
                // Suspended again (or errored) on replay; back to the outer
                // loop with a fresh reason.
                self.record_thrown(fiber, thrown);
                Ok(())
            }
        }
    }

    /// Post-order leg: complete fibers upward until a sibling offers more
    /// begin-phase work, unwinding instead wherever a throw left its mark.
    pub(crate) fn complete_unit_of_work(&mut self, start: FiberId) {
        let mut node = Some(start);

        while let Some(unit) = node {
            if self.arena.get(unit).flags.contains(FiberFlags::INCOMPLETE) {
                if let Some(boundary) = self.unwind_work(unit) {
                    // A boundary captured; restart the walk there on its
                    // second-pass (fallback) path.
                    self.wip = Some(boundary);
                    return;
                }

                let parent = self.arena.get(unit).parent;
                {
                    let fiber = self.arena.get_mut(unit);
                    fiber.flags = fiber.flags.intersection(
                        FiberFlags::HOST_EFFECT_MASK.union(FiberFlags::STATIC_MASK),
                    );
                }
                match parent {
                    Some(parent) => {
                        let fiber = self.arena.get_mut(parent);
                        fiber.flags.insert(FiberFlags::INCOMPLETE);
                        fiber.subtree_flags = FiberFlags::empty();
                        fiber.deletions.clear();
                    }
                    None => {
                        // Nothing captured all the way up.
                        self.wip_root_exit_status = RootExitStatus::FatalErrored;
                        self.wip = None;
                        return;
                    }
                }
                // Siblings of an incomplete fiber are skipped; the boundary
                // pass will re-render them.
                node = parent;
                continue;
            }

            self.complete_work(unit);

            if let Some(sibling) = self.arena.get(unit).sibling {
                self.wip = Some(sibling);
                return;
            }
            node = self.arena.get(unit).parent;
        }

        self.wip = None;
        if self.wip_root_exit_status == RootExitStatus::InProgress {
            self.wip_root_exit_status = RootExitStatus::Completed;
        }
    }

    // ---- throw handling ----

    /// Route a thrown value to its handler and unwind the tree to that
    /// handler's fiber.
    pub(crate) fn throw_and_unwind_work_loop(
        &mut self,
        root: RootId,
        unit: FiberId,
        thrown: Thrown,
    ) {
        self.throw_exception(root, unit, thrown);
        self.arena.get_mut(unit).flags.insert(FiberFlags::INCOMPLETE);
        self.complete_unit_of_work(unit);
    }

    /// Find the handler for a thrown value and mark it for capture.
    fn throw_exception(&mut self, root: RootId, unit: FiberId, thrown: Thrown) {
        match thrown {
            Thrown::Suspend(wakeable) => {
                if let Some(boundary) = self.nearest_suspense_boundary(unit) {
                    let fiber = self.arena.get_mut(boundary);
                    fiber.flags.insert(FiberFlags::SHOULD_CAPTURE);
                    fiber.wakeables.push(wakeable.clone());
                    self.attach_ping_listener(root, &wakeable);
                } else {
                    // Suspending with nowhere to show a fallback is an error
                    // from the tree's point of view.
                    let error = ErrorValue::new(
                        "a component suspended but no suspense boundary was above it",
                    );
                    self.attach_ping_listener(root, &wakeable);
                    self.capture_error(root, unit, error);
                }
            }
            Thrown::Error(error) => {
                self.capture_error(root, unit, error);
            }
        }
    }

    /// Wake the root when suspended data resolves.
    fn attach_ping_listener(&mut self, root: RootId, wakeable: &std::rc::Rc<dyn crate::suspense::Wakeable>) {
        let tx = self.tx.clone();
        let lanes = self.wip_root_render_lanes;
        wakeable.subscribe(Box::new(move || {
            let _ = tx.unbounded_send(SchedulerMsg::Pinged { root, lanes });
        }));
    }

    /// Walk ancestors for an error boundary; fall back to capturing at the
    /// root (which renders an empty tree and reports the error as uncaught).
    fn capture_error(&mut self, root: RootId, unit: FiberId, error: ErrorValue) {
        let capture_lane = self.wip_root_render_lanes.highest_priority_lane();

        let mut cursor = self.arena.get(unit).parent;
        while let Some(candidate) = cursor {
            let fiber = self.arena.get(candidate);
            let already_captured = fiber.flags.contains(FiberFlags::DID_CAPTURE);
            if fiber.tag == FiberTag::Stateful && !already_captured {
                if let Some(component) = fiber.component() {
                    if let Some(partial) = component.state_from_error(&error) {
                        self.arena
                            .get_mut(candidate)
                            .flags
                            .insert(FiberFlags::SHOULD_CAPTURE);

                        let mut update =
                            Update::new(capture_lane, UpdatePayload::Partial(partial));
                        update.tag = UpdateTag::CaptureUpdate;
                        if let Some(hook) = self.roots[root.0].options.on_caught_error.clone() {
                            let reported = error.clone();
                            update.callback = Some(std::rc::Rc::new(move || hook(&reported)));
                        }
                        enqueue_update(&mut self.arena, candidate, update);
                        log::debug!("error captured by boundary {candidate:?}: {error}");
                        return;
                    }
                }
            }
            cursor = fiber.parent;
        }

        // No boundary: the root itself captures and renders nothing. A
        // second uncaught error in the same render means even that failed.
        let root_fiber = match self.arena.get(self.roots[root.0].current).alternate {
            Some(fiber) => fiber,
            None => {
                self.wip_root_recoverable_errors.push(error);
                self.wip_root_exit_status = RootExitStatus::Errored;
                self.wip = None;
                return;
            }
        };
        if self.arena.get(root_fiber).flags.contains(FiberFlags::DID_CAPTURE) {
            self.wip_root_recoverable_errors.push(error);
            self.wip_root_exit_status = RootExitStatus::Errored;
            self.wip = None;
            return;
        }

        self.arena
            .get_mut(root_fiber)
            .flags
            .insert(FiberFlags::SHOULD_CAPTURE);
        let mut update = Update::new(
            capture_lane,
            UpdatePayload::Partial(crate::root::element_state(None)),
        );
        update.tag = UpdateTag::CaptureUpdate;
        let hook = self.roots[root.0].options.on_uncaught_error.clone();
        let reported = error.clone();
        update.callback = Some(std::rc::Rc::new(move || {
            log::error!("uncaught error reached the root: {reported}");
            if let Some(hook) = &hook {
                hook(&reported);
            }
        }));
        enqueue_update(&mut self.arena, root_fiber, update);
    }

    fn nearest_suspense_boundary(&self, unit: FiberId) -> Option<FiberId> {
        let mut cursor = self.arena.get(unit).parent;
        while let Some(candidate) = cursor {
            let fiber = self.arena.get(candidate);
            if fiber.tag == FiberTag::Suspense && !fiber.flags.contains(FiberFlags::DID_CAPTURE) {
                return Some(candidate);
            }
            cursor = fiber.parent;
        }
        None
    }

    /// Pop whatever `begin` pushed for this fiber and, if it is a marked
    /// boundary, convert it to its capture pass.
    fn unwind_work(&mut self, unit: FiberId) -> Option<FiberId> {
        let tag = self.arena.get(unit).tag;
        if tag == FiberTag::ContextProvider {
            if let Some(crate::nodes::ViewType::Provider(id)) = self.arena.get(unit).ty.clone() {
                self.contexts.pop(id);
            }
        }

        let captures = matches!(
            tag,
            FiberTag::Stateful | FiberTag::Suspense | FiberTag::HostRoot
        );
        if captures && self.arena.get(unit).flags.contains(FiberFlags::SHOULD_CAPTURE) {
            let fiber = self.arena.get_mut(unit);
            fiber.flags.remove(FiberFlags::SHOULD_CAPTURE);
            fiber.flags.remove(FiberFlags::INCOMPLETE);
            fiber.flags.insert(FiberFlags::DID_CAPTURE);
            return Some(unit);
        }
        None
    }
}
