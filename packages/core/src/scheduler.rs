/*
Welcome to the root scheduler.

Some essential reading:
- https://github.com/WICG/is-input-pending
- https://web.dev/rail/

# What's going on?

Rendering is split from scheduling. The work loop (work_loop.rs) knows how to
build a tree; this module decides *when* and *at what priority* each root gets
to run, and it is the only code that talks to the host's task queue.

Every root with pending work sits in one intrusive list. Whenever anything
schedules an update we arm a single microtask (debounced by a flag); when it
fires we walk the list once and settle, per root, whether its next batch of
lanes is sync (flushed inline before the microtask returns) or async (a host
callback at the translated priority). Armed callbacks are kept if the priority
didn't change, cancelled and replaced if it did.

# Starvation

Priorities alone would let a stream of urgent updates starve a transition
forever. Every scheduler tick therefore stamps a deadline on newly pending
lanes and promotes overdue lanes to `expired_lanes`; expired work is treated
exactly like sync work - flushed inline, no time slicing - no matter what
priority it started at.
*/

use crate::error::ReconcileError;
use crate::flags::ExecutionContext;
use crate::host::{SchedulerPriority, SchedulerTask};
use crate::lanes::{Lane, Lanes};
use crate::reconciler::Reconciler;
use crate::root::{RootId, RootTag};

/// Iteration bound for the sync flush loop. A commit that keeps scheduling
/// more sync work on the same root will hit this and fail loudly instead of
/// hanging the host.
pub(crate) const NESTED_UPDATE_LIMIT: u32 = 50;

impl Reconciler {
    /// The lane for an update scheduled right now, from the priority channel:
    /// blocking roots are always sync; transition scopes share a claimed
    /// transition lane; host event dispatch may have pinned a priority;
    /// everything else is default.
    pub fn request_update_lane(&mut self, root: RootId) -> Lane {
        if self.roots[root.0].tag == RootTag::Blocking {
            return Lanes::SYNC;
        }

        if self.in_transition {
            if self.current_event_transition_lane.is_empty() {
                // All transitions scheduled in one event share a lane so they
                // render (and commit) together.
                self.last_transition_lane = self.last_transition_lane.next_transition_lane();
                self.current_event_transition_lane = self.last_transition_lane;
            }
            return self.current_event_transition_lane;
        }

        if !self.current_update_priority.is_empty() {
            return self.current_update_priority;
        }

        Lanes::DEFAULT
    }

    /// Pin the priority channel while dispatching a host event.
    pub fn set_current_update_priority(&mut self, priority: Lanes) {
        self.current_update_priority = priority;
    }

    /// Make sure `root` is in the schedule list and a settle pass is armed.
    pub(crate) fn ensure_root_is_scheduled(&mut self, root: RootId) {
        {
            let fiber_root = &mut self.roots[root.0];
            if !fiber_root.is_scheduled {
                fiber_root.is_scheduled = true;
                fiber_root.next_scheduled = None;
                match self.last_scheduled_root {
                    None => {
                        self.first_scheduled_root = Some(root);
                        self.last_scheduled_root = Some(root);
                    }
                    Some(last) => {
                        self.roots[last.0].next_scheduled = Some(root);
                        self.last_scheduled_root = Some(root);
                    }
                }
            }
        }

        self.might_have_pending_sync_work = true;

        if !self.did_schedule_microtask {
            self.did_schedule_microtask = true;
            let in_work = self
                .execution_context
                .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT);
            if self.scheduler.supports_microtasks() && !in_work {
                self.scheduler.schedule_microtask(SchedulerTask::ProcessRootSchedule);
            } else {
                self.scheduler
                    .schedule_callback(SchedulerPriority::Immediate, SchedulerTask::ProcessRootSchedule);
            }
        }
    }

    /// The settle pass: walk the schedule list, drop roots with nothing to
    /// do, (re)arm callbacks for the rest, then flush whatever is sync.
    pub(crate) fn process_root_schedule(&mut self) -> Result<(), ReconcileError> {
        self.did_schedule_microtask = false;
        self.might_have_pending_sync_work = false;

        let now = self.scheduler.now();
        let mut prev: Option<RootId> = None;
        let mut cursor = self.first_scheduled_root;

        while let Some(root) = cursor {
            let next = self.roots[root.0].next_scheduled;
            let keep = self.schedule_task_for_root(root, now);
            if keep {
                prev = Some(root);
            } else {
                match prev {
                    None => self.first_scheduled_root = next,
                    Some(p) => self.roots[p.0].next_scheduled = next,
                }
                if self.last_scheduled_root == Some(root) {
                    self.last_scheduled_root = prev;
                }
                let fiber_root = &mut self.roots[root.0];
                fiber_root.next_scheduled = None;
                fiber_root.is_scheduled = false;
            }
            cursor = next;
        }

        self.flush_sync_work_across_roots()
    }

    /// Decide how one root's next batch runs. Returns whether the root stays
    /// in the schedule list.
    fn schedule_task_for_root(&mut self, root: RootId, now: u64) -> bool {
        self.roots[root.0].mark_starved_lanes_as_expired(now);

        let wip_lanes = if self.wip_root == Some(root) {
            self.wip_root_render_lanes
        } else {
            Lanes::NONE
        };
        let next_lanes = self.get_next_lanes(root, wip_lanes);

        if next_lanes.is_empty() {
            let handle = {
                let fiber_root = &mut self.roots[root.0];
                fiber_root.callback_priority = Lanes::NONE;
                fiber_root.callback_node.take()
            };
            if let Some(handle) = handle {
                self.scheduler.cancel_callback(handle);
            }
            return false;
        }

        let expired = next_lanes.intersects(self.roots[root.0].expired_lanes);
        if next_lanes.intersects(Lanes::SYNC) || expired {
            // Sync work is flushed inline after the settle pass; an async
            // callback would only get in the way.
            let handle = {
                let fiber_root = &mut self.roots[root.0];
                fiber_root.callback_priority = Lanes::SYNC;
                fiber_root.callback_node.take()
            };
            if let Some(handle) = handle {
                self.scheduler.cancel_callback(handle);
            }
            self.might_have_pending_sync_work = true;
            return true;
        }

        let priority_lane = next_lanes.highest_priority_lane();
        let existing = {
            let fiber_root = &self.roots[root.0];
            (fiber_root.callback_priority, fiber_root.callback_node)
        };
        if existing.0 == priority_lane && existing.1.is_some() {
            // Priority unchanged; the armed callback still fits.
            return true;
        }
        if let Some(handle) = existing.1 {
            self.scheduler.cancel_callback(handle);
        }

        let priority = scheduler_priority_for_lane(priority_lane);
        let handle = self
            .scheduler
            .schedule_callback(priority, SchedulerTask::RenderRoot(root));
        let fiber_root = &mut self.roots[root.0];
        fiber_root.callback_priority = priority_lane;
        fiber_root.callback_node = Some(handle);
        true
    }

    /// Flush every root whose next lanes include sync or expired work, and
    /// keep scanning until a full pass performs nothing.
    pub(crate) fn flush_sync_work_across_roots(&mut self) -> Result<(), ReconcileError> {
        if self.is_flushing_work || !self.might_have_pending_sync_work {
            return Ok(());
        }
        self.is_flushing_work = true;
        let mut iterations = 0u32;

        let result = 'flush: loop {
            let mut did_perform_work = false;

            let mut cursor = self.first_scheduled_root;
            let mut scheduled = Vec::new();
            while let Some(root) = cursor {
                cursor = self.roots[root.0].next_scheduled;
                scheduled.push(root);
            }

            for root in scheduled {
                if !self.roots.contains(root.0) {
                    continue;
                }
                let wip_lanes = if self.wip_root == Some(root) {
                    self.wip_root_render_lanes
                } else {
                    Lanes::NONE
                };
                let lanes = self.get_next_lanes(root, wip_lanes);
                let flush = lanes.intersects(Lanes::SYNC)
                    || lanes.intersects(self.roots[root.0].expired_lanes);
                if flush {
                    did_perform_work = true;
                    if let Err(err) = self.perform_sync_work_on_root(root, lanes) {
                        break 'flush Err(err);
                    }
                }
            }

            if !did_perform_work {
                break Ok(());
            }
            iterations += 1;
            if iterations > NESTED_UPDATE_LIMIT {
                log::error!("sync flush did not converge after {NESTED_UPDATE_LIMIT} passes");
                break Err(ReconcileError::InfiniteUpdateLoop);
            }
        };

        self.is_flushing_work = false;
        self.might_have_pending_sync_work = false;
        result
    }

    fn perform_sync_work_on_root(&mut self, root: RootId, lanes: Lanes) -> Result<(), ReconcileError> {
        self.flush_passive_effects();
        self.perform_work_on_root(root, lanes, true)
    }

    /// A `RenderRoot` callback fired.
    pub(crate) fn perform_work_on_root_via_scheduler_task(
        &mut self,
        root: RootId,
    ) -> Result<(), ReconcileError> {
        if !self.roots.contains(root.0) {
            return Ok(());
        }
        // Commits deferred past the last task run before new render work.
        self.flush_passive_effects();

        {
            let fiber_root = &mut self.roots[root.0];
            fiber_root.callback_node = None;
            fiber_root.callback_priority = Lanes::NONE;
        }

        let now = self.scheduler.now();
        self.roots[root.0].mark_starved_lanes_as_expired(now);

        let wip_lanes = if self.wip_root == Some(root) {
            self.wip_root_render_lanes
        } else {
            Lanes::NONE
        };
        let lanes = self.get_next_lanes(root, wip_lanes);
        if lanes.is_empty() {
            return Ok(());
        }

        self.perform_work_on_root(root, lanes, false)?;
        self.ensure_root_is_scheduled(root);
        Ok(())
    }

    /// The lane set to render next for `root`, per the selection rules:
    /// expired lanes always ride along, suspended lanes are excluded unless
    /// pinged, transitions render as a class, and an in-flight render's lanes
    /// win unless the new selection is more urgent.
    pub(crate) fn get_next_lanes(&self, root: RootId, wip_lanes: Lanes) -> Lanes {
        let fiber_root = &self.roots[root.0];
        let pending = fiber_root.pending_lanes;
        if pending.is_empty() {
            return Lanes::NONE;
        }

        let suspended = fiber_root.suspended_lanes;
        let pinged = fiber_root.pinged_lanes;

        let mut next = Lanes::NONE;
        let non_idle = pending.intersect(Lanes::NON_IDLE);
        if !non_idle.is_empty() {
            let unblocked = non_idle.remove(suspended);
            if !unblocked.is_empty() {
                next = highest_priority_class(unblocked);
            } else {
                let awakened = non_idle.intersect(pinged);
                if !awakened.is_empty() {
                    next = highest_priority_class(awakened);
                }
            }
        } else {
            let unblocked = pending.remove(suspended);
            if !unblocked.is_empty() {
                next = highest_priority_class(unblocked);
            } else {
                let awakened = pending.intersect(pinged);
                if !awakened.is_empty() {
                    next = highest_priority_class(awakened);
                }
            }
        }

        if next.is_empty() {
            return Lanes::NONE;
        }

        // Starved work rides along with whatever renders next.
        next |= fiber_root.expired_lanes.intersect(pending);

        // Entangled lanes must render together.
        if fiber_root.entangled_lanes.intersects(next) {
            next = fiber_root.entangled_render_lanes(next);
        }

        // Don't tear down an in-flight render unless the new selection is
        // strictly more urgent than what it is already doing.
        if !wip_lanes.is_empty() && wip_lanes != next && !wip_lanes.intersects(suspended) {
            let next_lane = next.highest_priority_lane();
            let wip_lane = wip_lanes.highest_priority_lane();
            let less_urgent = next_lane.0 >= wip_lane.0;
            let default_during_transition =
                next_lane == Lanes::DEFAULT && wip_lanes.is_transition();
            if less_urgent || default_during_transition {
                return wip_lanes;
            }
        }

        next
    }

    /// A wakeable resolved for work that suspended earlier.
    pub(crate) fn ping_suspended_root(&mut self, root: RootId, lanes: Lanes) {
        if !self.roots.contains(root.0) {
            return;
        }
        self.roots[root.0].mark_pinged(lanes);
        if self.wip_root == Some(root) && lanes.is_subset_of(self.wip_root_render_lanes) {
            self.wip_root_pinged_lanes |= lanes;
        }
        log::trace!("{root} pinged on {lanes:?}");
        self.ensure_root_is_scheduled(root);
    }
}

/// Expand the most urgent lane into its whole priority class: sync, input,
/// and default render alone; transitions and retries render as a batch.
fn highest_priority_class(lanes: Lanes) -> Lanes {
    let top = lanes.highest_priority_lane();
    if top.is_transition() {
        lanes.intersect(Lanes::TRANSITION_MASK)
    } else if top.intersects(Lanes::RETRY_MASK) {
        lanes.intersect(Lanes::RETRY_MASK)
    } else {
        top
    }
}

/// Translate a lane into the host scheduler's vocabulary.
fn scheduler_priority_for_lane(lane: Lane) -> SchedulerPriority {
    if lane.is_blocking() {
        SchedulerPriority::UserBlocking
    } else if lane.intersects(Lanes::IDLE.merge(Lanes::OFFSCREEN)) {
        SchedulerPriority::Idle
    } else {
        SchedulerPriority::Normal
    }
}
