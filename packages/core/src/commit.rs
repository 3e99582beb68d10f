//! The commit driver - applying a finished tree to the host.
//!
//! Three synchronous subphases walk the finished tree in order, each with
//! its own flag mask and each skipping any subtree whose `subtree_flags`
//! have nothing for it:
//!
//! 1. *Before mutation* - read host state while it is still untouched
//!    (snapshot lifecycle).
//! 2. *Mutation* - deletions, placements, prop patches, text updates, ref
//!    detach. After this phase the host matches the new tree, and
//!    `root.current` is swapped.
//! 3. *Layout* - ref attach, mount/update lifecycle, queued update
//!    callbacks. Runs against the committed tree.
//!
//! Whatever can wait - arena reclamation of deleted subtrees, visibility
//! bookkeeping - is deferred to a passive pass scheduled at normal priority.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::arena::FiberId;
use crate::fiber::{FiberProps, FiberTag};
use crate::flags::{ExecutionContext, FiberFlags};
use crate::host::{HostHandle, HostRef, SchedulerPriority, SchedulerTask};
use crate::lanes::Lanes;
use crate::error::ReconcileError;
use crate::reconciler::{Reconciler, SchedulerMsg};
use crate::root::RootId;

/// Where a placed or removed node physically goes.
enum HostParent {
    Instance(HostHandle),
    Container(HostHandle),
}

impl Reconciler {
    /// Apply `root`'s finished work. Only called with a completed tree.
    pub(crate) fn commit_root(&mut self, root: RootId) -> Result<(), ReconcileError> {
        let Some(finished) = self.roots[root.0].finished_work.take() else {
            return Ok(());
        };
        let lanes = std::mem::replace(&mut self.roots[root.0].finished_lanes, Lanes::NONE);
        log::debug!("{root} committing {lanes:?}");

        let prev_context = self.execution_context;
        self.execution_context.insert(ExecutionContext::COMMIT);

        // Lane bookkeeping happens before any effect runs so that lifecycle
        // code scheduling new updates sees a consistent root.
        let remaining = {
            let fiber = self.arena.get(finished);
            fiber.lanes.merge(fiber.child_lanes).merge(self.wip_root_skipped_lanes)
        };
        self.roots[root.0].mark_finished(lanes, remaining);

        // The render is over; the work-in-progress globals must not leak
        // into effects.
        self.wip_root = None;
        self.wip = None;
        self.wip_root_render_lanes = Lanes::NONE;
        self.wip_root_skipped_lanes = Lanes::NONE;
        self.wip_suspended_reason = crate::work_loop::SuspendedReason::NotSuspended;
        self.wip_thrown_value = None;
        self.render_allocated.clear();

        let (flags, subtree_flags) = {
            let fiber = self.arena.get(finished);
            (fiber.flags, fiber.subtree_flags)
        };
        let all = flags | subtree_flags;

        if all.intersects(
            FiberFlags::BEFORE_MUTATION_MASK
                | FiberFlags::MUTATION_MASK
                | FiberFlags::LAYOUT_MASK,
        ) {
            let container = self.roots[root.0].container.clone();
            self.host.prepare_for_commit(&container);

            self.commit_before_mutation_effects(finished);
            self.commit_mutation_effects(root, finished);

            self.host.reset_after_commit(&container);

            // The finished tree now matches the host: swap buffers.
            self.roots[root.0].current = finished;

            self.commit_layout_effects(root, finished);
        } else {
            self.roots[root.0].current = finished;
        }

        if all.intersects(FiberFlags::PASSIVE_MASK) || !self.pending_deletions.is_empty() {
            self.root_with_pending_passive_effects = Some(root);
            if self.pending_passive_callback.is_none() {
                let handle = self
                    .scheduler
                    .schedule_callback(SchedulerPriority::Normal, SchedulerTask::FlushPassiveEffects);
                self.pending_passive_callback = Some(handle);
            }
        }

        // Errors that a synchronous retry recovered from get reported once
        // the good commit is on screen.
        let recovered = std::mem::take(&mut self.wip_root_recoverable_errors);
        if !recovered.is_empty() {
            let hook = self.roots[root.0].options.on_recoverable_error.clone();
            for error in recovered {
                log::warn!("recovered from error: {error}");
                if let Some(hook) = &hook {
                    hook(&error);
                }
            }
        }

        self.execution_context = prev_context;
        Ok(())
    }

    // ---- phase 1: before mutation ----

    fn commit_before_mutation_effects(&mut self, fiber: FiberId) {
        if self
            .arena
            .get(fiber)
            .subtree_flags
            .intersects(FiberFlags::BEFORE_MUTATION_MASK)
        {
            let children: SmallVec<[FiberId; 8]> =
                self.arena.children(self.arena.get(fiber).child).collect();
            for child in children {
                self.commit_before_mutation_effects(child);
            }
        }

        let flags = self.arena.get(fiber).flags;
        if flags.contains(FiberFlags::SNAPSHOT) {
            if let Some(component) = self.arena.get(fiber).component().cloned() {
                if self.arena.get(fiber).alternate.is_some() {
                    component.snapshot_before_update();
                }
            }
        }
    }

    // ---- phase 2: mutation ----

    fn commit_mutation_effects(&mut self, root: RootId, fiber: FiberId) {
        // Deletions attach to the parent that lost the children; they run
        // before the parent's surviving subtree is touched.
        let deletions = std::mem::take(&mut self.arena.get_mut(fiber).deletions);
        for deleted in deletions {
            self.commit_deletion(root, fiber, deleted);
        }

        if self
            .arena
            .get(fiber)
            .subtree_flags
            .intersects(FiberFlags::MUTATION_MASK)
        {
            let children: SmallVec<[FiberId; 8]> =
                self.arena.children(self.arena.get(fiber).child).collect();
            for child in children {
                self.commit_mutation_effects(root, child);
            }
        }

        let flags = self.arena.get(fiber).flags;

        if flags.contains(FiberFlags::REF) {
            // Detach the previous ref before mutation; layout re-attaches.
            if let Some(alternate) = self.arena.get(fiber).alternate {
                self.detach_ref(alternate);
            }
        }

        if flags.contains(FiberFlags::PLACEMENT) {
            self.commit_placement(root, fiber);
            self.arena.get_mut(fiber).flags.remove(FiberFlags::PLACEMENT);
        }

        if flags.contains(FiberFlags::CONTENT_RESET) {
            if let Some(instance) = self.arena.get(fiber).host_instance().cloned() {
                self.host.reset_text_content(&instance);
            }
        }

        if flags.contains(FiberFlags::UPDATE) {
            self.commit_update(root, fiber);
        }
    }

    fn commit_update(&mut self, root: RootId, fiber: FiberId) {
        match self.arena.get(fiber).tag {
            FiberTag::HostElement => {
                let payload = self.arena.get_mut(fiber).host_update.take();
                let Some(payload) = payload else { return };
                let Some(instance) = self.arena.get(fiber).host_instance().cloned() else {
                    return;
                };
                let ty = match self.arena.get(fiber).ty.clone() {
                    Some(crate::nodes::ViewType::Host(tag)) => tag,
                    _ => return,
                };
                let new_props = self.arena.get(fiber).memoized_props.props_or_empty();
                let old_props = match self.arena.get(fiber).alternate {
                    Some(alt) => self.arena.get(alt).memoized_props.props_or_empty(),
                    None => new_props.clone(),
                };
                self.host
                    .commit_update(&instance, &payload, &ty, &old_props, &new_props);
            }
            FiberTag::HostText => {
                let Some(instance) = self.arena.get(fiber).host_instance().cloned() else {
                    return;
                };
                let new_text = match &self.arena.get(fiber).memoized_props {
                    FiberProps::Text(text) => text.clone(),
                    _ => return,
                };
                let old_text = match self.arena.get(fiber).alternate {
                    Some(alt) => match &self.arena.get(alt).memoized_props {
                        FiberProps::Text(text) => text.clone(),
                        _ => Rc::from(""),
                    },
                    None => Rc::from(""),
                };
                self.host.commit_text_update(&instance, &old_text, &new_text);
            }
            FiberTag::Portal => {
                // First mount of a portal: its children attach to the
                // portal's own container now.
                if let Some(crate::nodes::ViewType::Portal(container)) =
                    self.arena.get(fiber).ty.clone()
                {
                    self.append_subtree_to_container(fiber, &container);
                }
            }
            // Stateful UPDATE is a layout concern.
            _ => {}
        }
    }

    // ---- placement ----

    fn commit_placement(&mut self, root: RootId, fiber: FiberId) {
        let parent = self.host_parent_of(root, fiber);
        let before = self.host_sibling_of(fiber);
        self.insert_or_append_placement_node(fiber, before.as_ref(), &parent);
    }

    /// The nearest host-side parent above a fiber.
    fn host_parent_of(&self, root: RootId, fiber: FiberId) -> HostParent {
        let mut cursor = self.arena.get(fiber).parent;
        while let Some(node) = cursor {
            let parent = self.arena.get(node);
            match parent.tag {
                FiberTag::HostElement => {
                    if let Some(instance) = parent.host_instance().cloned() {
                        return HostParent::Instance(instance);
                    }
                }
                FiberTag::HostRoot => {
                    return HostParent::Container(self.roots[root.0].container.clone());
                }
                FiberTag::Portal => {
                    if let Some(crate::nodes::ViewType::Portal(container)) = parent.ty.clone() {
                        return HostParent::Container(container);
                    }
                }
                _ => {}
            }
            cursor = parent.parent;
        }
        HostParent::Container(self.roots[root.0].container.clone())
    }

    /// The host node this placement must land in front of: the next sibling
    /// (in tree order) that is a host node and is not itself being placed.
    fn host_sibling_of(&self, fiber: FiberId) -> Option<HostHandle> {
        let mut node = fiber;
        'siblings: loop {
            // Climb while there is no next sibling; stop at host parents.
            loop {
                let f = self.arena.get(node);
                if f.sibling.is_some() {
                    break;
                }
                match f.parent {
                    None => return None,
                    Some(parent) => {
                        let ptag = self.arena.get(parent).tag;
                        if matches!(
                            ptag,
                            FiberTag::HostElement | FiberTag::HostRoot | FiberTag::Portal
                        ) {
                            return None;
                        }
                        node = parent;
                    }
                }
            }
            node = self.arena.get(node).sibling.expect("checked above");

            // Dig for a host descendant that is stable (not being placed).
            loop {
                let f = self.arena.get(node);
                if matches!(f.tag, FiberTag::HostElement | FiberTag::HostText) {
                    if f.flags.contains(FiberFlags::PLACEMENT) {
                        continue 'siblings;
                    }
                    return f.host_instance().cloned();
                }
                if f.flags.contains(FiberFlags::PLACEMENT) || f.tag == FiberTag::Portal {
                    continue 'siblings;
                }
                match f.child {
                    Some(child) => node = child,
                    None => continue 'siblings,
                }
            }
        }
    }

    /// Insert `fiber`'s host node, or all its topmost host descendants if it
    /// is a virtual fiber.
    fn insert_or_append_placement_node(
        &mut self,
        fiber: FiberId,
        before: Option<&HostHandle>,
        parent: &HostParent,
    ) {
        let f = self.arena.get(fiber);
        if matches!(f.tag, FiberTag::HostElement | FiberTag::HostText) {
            let Some(instance) = f.host_instance().cloned() else { return };
            match (parent, before) {
                (HostParent::Instance(p), Some(b)) => self.host.insert_before(p, &instance, b),
                (HostParent::Instance(p), None) => self.host.append_child(p, &instance),
                (HostParent::Container(c), Some(b)) => {
                    self.host.insert_in_container_before(c, &instance, b)
                }
                (HostParent::Container(c), None) => {
                    self.host.append_child_to_container(c, &instance)
                }
            }
            return;
        }
        if f.tag == FiberTag::Portal {
            // Portal content belongs to the portal's container, not here.
            return;
        }

        let children: SmallVec<[FiberId; 8]> = self.arena.children(f.child).collect();
        for child in children {
            self.insert_or_append_placement_node(child, before, parent);
        }
    }

    fn append_subtree_to_container(&mut self, fiber: FiberId, container: &HostHandle) {
        let children: SmallVec<[FiberId; 8]> =
            self.arena.children(self.arena.get(fiber).child).collect();
        for child in children {
            let f = self.arena.get(child);
            if matches!(f.tag, FiberTag::HostElement | FiberTag::HostText) {
                if let Some(instance) = f.host_instance().cloned() {
                    self.host.append_child_to_container(container, &instance);
                }
            } else if f.tag != FiberTag::Portal {
                self.append_subtree_to_container(child, container);
            }
        }
    }

    // ---- deletion ----

    /// Remove one deleted subtree: host nodes out of the host tree, refs
    /// detached, unmount lifecycle run - children before parents free-wise,
    /// but removal itself only touches the topmost host nodes.
    fn commit_deletion(&mut self, root: RootId, parent_fiber: FiberId, deleted: FiberId) {
        let _ = parent_fiber;
        // The deleted fiber's parent link still points into the old tree,
        // whose host instances are the same ones the new tree kept.
        let parent = self.host_parent_of(root, deleted);
        self.commit_deletion_walk(deleted, &parent, false);
        self.pending_deletions.push(deleted);
    }

    fn commit_deletion_walk(&mut self, node: FiberId, parent: &HostParent, inside_removed: bool) {
        self.detach_ref(node);

        let tag = self.arena.get(node).tag;
        match tag {
            FiberTag::Stateful => {
                if let Some(component) = self.arena.get(node).component().cloned() {
                    component.will_unmount();
                }
            }
            FiberTag::HostElement | FiberTag::HostText => {
                if !inside_removed {
                    if let Some(instance) = self.arena.get(node).host_instance().cloned() {
                        match parent {
                            HostParent::Instance(p) => self.host.remove_child(p, &instance),
                            HostParent::Container(c) => {
                                self.host.remove_child_from_container(c, &instance)
                            }
                        }
                    }
                }
                let children: SmallVec<[FiberId; 8]> =
                    self.arena.children(self.arena.get(node).child).collect();
                for child in children {
                    self.commit_deletion_walk(child, parent, true);
                }
                return;
            }
            FiberTag::Portal => {
                // Everything under the portal detaches from its container.
                if let Some(crate::nodes::ViewType::Portal(container)) =
                    self.arena.get(node).ty.clone()
                {
                    let portal_parent = HostParent::Container(container);
                    let children: SmallVec<[FiberId; 8]> =
                        self.arena.children(self.arena.get(node).child).collect();
                    for child in children {
                        self.commit_deletion_walk(child, &portal_parent, false);
                    }
                }
                return;
            }
            _ => {}
        }

        let children: SmallVec<[FiberId; 8]> =
            self.arena.children(self.arena.get(node).child).collect();
        for child in children {
            self.commit_deletion_walk(child, parent, inside_removed);
        }
    }

    // ---- phase 3: layout ----

    fn commit_layout_effects(&mut self, root: RootId, fiber: FiberId) {
        if self
            .arena
            .get(fiber)
            .subtree_flags
            .intersects(FiberFlags::LAYOUT_MASK)
        {
            let children: SmallVec<[FiberId; 8]> =
                self.arena.children(self.arena.get(fiber).child).collect();
            for child in children {
                self.commit_layout_effects(root, child);
            }
        }

        let flags = self.arena.get(fiber).flags;

        if flags.contains(FiberFlags::UPDATE) && self.arena.get(fiber).tag == FiberTag::Stateful {
            if let Some(component) = self.arena.get(fiber).component().cloned() {
                match self.arena.get(fiber).alternate {
                    None => component.did_mount(),
                    Some(alternate) => {
                        let old_props = self.arena.get(alternate).memoized_props.props_or_empty();
                        component.did_update(&old_props);
                    }
                }
            }
        }

        if flags.contains(FiberFlags::CALLBACK) {
            let callbacks = self
                .arena
                .get_mut(fiber)
                .update_queue
                .as_mut()
                .map(|queue| queue.take_callbacks())
                .unwrap_or_default();
            for callback in callbacks {
                callback();
            }
        }

        if flags.contains(FiberFlags::REF) {
            self.attach_ref(fiber);
        }

        // A boundary that committed its fallback starts listening for the
        // data it was missing; resolution schedules a retry lane.
        if self.arena.get(fiber).tag == FiberTag::Suspense {
            let wakeables = std::mem::take(&mut self.arena.get_mut(fiber).wakeables);
            if !wakeables.is_empty() {
                self.last_retry_lane = self.last_retry_lane.next_retry_lane();
                let lane = self.last_retry_lane;
                for wakeable in wakeables {
                    let tx = self.tx.clone();
                    let boundary = fiber;
                    wakeable.subscribe(Box::new(move || {
                        let _ = tx.unbounded_send(SchedulerMsg::Retry { root, boundary, lane });
                    }));
                }
            }
        }
    }

    // ---- refs ----

    fn attach_ref(&mut self, fiber: FiberId) {
        let Some(reference) = self.arena.get(fiber).reference.clone() else { return };
        let Some(instance) = self.arena.get(fiber).host_instance().cloned() else { return };
        let cleanup = match &reference {
            HostRef::Cell(cell) => {
                *cell.borrow_mut() = Some(instance);
                None
            }
            HostRef::Callback(callback) => callback(Some(instance)),
        };
        self.arena.get_mut(fiber).ref_cleanup = cleanup;
    }

    fn detach_ref(&mut self, fiber: FiberId) {
        if !self.arena.contains(fiber) {
            return;
        }
        let reference = self.arena.get(fiber).reference.clone();
        let cleanup = self.arena.get_mut(fiber).ref_cleanup.take();
        match (reference, cleanup) {
            (_, Some(cleanup)) => cleanup(),
            (Some(HostRef::Cell(cell)), None) => *cell.borrow_mut() = None,
            (Some(HostRef::Callback(callback)), None) => {
                callback(None);
            }
            (None, None) => {}
        }
    }

    // ---- passive ----

    /// The deferred tail of the last commit: reclaim deleted subtrees and
    /// clear visibility bookkeeping. Scheduled at normal priority; also
    /// flushed eagerly before new sync work.
    pub(crate) fn flush_passive_effects(&mut self) {
        if self.root_with_pending_passive_effects.is_none() && self.pending_deletions.is_empty() {
            return;
        }
        self.pending_passive_callback = None;
        let root = self.root_with_pending_passive_effects.take();

        let deletions = std::mem::take(&mut self.pending_deletions);
        for deleted in deletions {
            self.arena.free_subtree(deleted);
        }

        if let Some(root) = root {
            log::trace!("{root} passive effects flushed");
        }
    }
}
