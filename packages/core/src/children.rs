//! Child reconciliation - matching a fiber's old children against the new
//! descriptor list.
//!
//! Two passes. The first walks both lists in lockstep as long as keys line
//! up, reusing fibers whose type also matches. The moment keys diverge the
//! remaining old children go into an order-preserving map and the rest of
//! the new list is matched by key (or by position for unkeyed children).
//! Anything left in the map at the end is a deletion.
//!
//! Moves are detected with the last-placed-index trick: a reused child whose
//! old index is to the left of the highest index placed so far must have
//! moved right, and gets a `PLACEMENT` flag; everything else stays put and
//! ratchets the index forward. This flags the minimal number of moves for
//! host-side `insert_before` calls.
//!
//! On first mount there is no old list and nothing to track: children mount
//! without per-fiber flags and the subtree root's single placement carries
//! the whole tree into the host.

use indexmap::IndexMap;

use crate::arena::FiberId;
use crate::fiber::{Fiber, FiberProps, FiberTag};
use crate::flags::FiberFlags;
use crate::nodes::{Key, ViewNode};
use crate::reconciler::Reconciler;

/// How a remaining old child is addressed in the second pass.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SlotKey {
    Keyed(Key),
    Index(u32),
}

impl Reconciler {
    /// Diff `children` against `wip`'s committed child list and install the
    /// new work-in-progress chain. Returns the first child to descend into.
    pub(crate) fn reconcile_children(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        children: &[ViewNode],
    ) -> Option<FiberId> {
        let old_first = current.and_then(|c| self.arena.get(c).child);
        // Mount renders don't track per-child effects; the parent's own
        // placement moves the whole subtree.
        let should_track = current.is_some();

        let first = self.reconcile_child_fibers(wip, old_first, children, should_track);
        self.arena.get_mut(wip).child = first;
        first
    }

    fn reconcile_child_fibers(
        &mut self,
        wip: FiberId,
        old_first: Option<FiberId>,
        children: &[ViewNode],
        should_track: bool,
    ) -> Option<FiberId> {
        let mut first_new: Option<FiberId> = None;
        let mut prev_new: Option<FiberId> = None;
        let mut last_placed_index: u32 = 0;
        let mut new_index: usize = 0;
        let mut old = old_first;

        // Pass 1: consume both lists while keys agree.
        while let (Some(old_id), Some(node)) = (old, children.get(new_index)) {
            if self.arena.get(old_id).key.as_ref() != node.key() {
                break;
            }
            let next_old = self.arena.get(old_id).sibling;

            let new_child = if self.matches(old_id, node) {
                self.reuse_child(old_id, node)
            } else {
                // Same slot, different type: the old child dies, a fresh one
                // takes its place.
                self.delete_child(wip, old_id, should_track);
                self.create_child(wip, node)
            };

            self.place_child(new_child, new_index as u32, &mut last_placed_index, should_track);
            self.link_child(wip, new_child, &mut first_new, &mut prev_new);

            old = next_old;
            new_index += 1;
        }

        // New list exhausted: everything left on the old side is deleted.
        if new_index == children.len() {
            let mut cursor = old;
            while let Some(old_id) = cursor {
                cursor = self.arena.get(old_id).sibling;
                self.delete_child(wip, old_id, should_track);
            }
            return first_new;
        }

        // Old list exhausted: the rest of the new list mounts fresh.
        if old.is_none() {
            for node in &children[new_index..] {
                let new_child = self.create_child(wip, node);
                self.place_child(
                    new_child,
                    new_index as u32,
                    &mut last_placed_index,
                    should_track,
                );
                self.link_child(wip, new_child, &mut first_new, &mut prev_new);
                new_index += 1;
            }
            return first_new;
        }

        // Pass 2: order diverged. Index what's left and match by identity.
        let mut existing: IndexMap<SlotKey, FiberId> = IndexMap::new();
        {
            let mut cursor = old;
            while let Some(old_id) = cursor {
                let fiber = self.arena.get(old_id);
                let slot = match &fiber.key {
                    Some(key) => SlotKey::Keyed(key.clone()),
                    None => SlotKey::Index(fiber.index),
                };
                cursor = fiber.sibling;
                existing.insert(slot, old_id);
            }
        }

        for node in &children[new_index..] {
            let slot = match node.key() {
                Some(key) => SlotKey::Keyed(key.clone()),
                None => SlotKey::Index(new_index as u32),
            };

            let matched = existing
                .get(&slot)
                .copied()
                .filter(|old_id| self.matches(*old_id, node));

            let new_child = match matched {
                Some(old_id) => {
                    existing.shift_remove(&slot);
                    self.reuse_child(old_id, node)
                }
                None => self.create_child(wip, node),
            };

            self.place_child(
                new_child,
                new_index as u32,
                &mut last_placed_index,
                should_track,
            );
            self.link_child(wip, new_child, &mut first_new, &mut prev_new);
            new_index += 1;
        }

        // Map leftovers never matched anything: deletions, in their original
        // sibling order.
        for (_, old_id) in existing {
            self.delete_child(wip, old_id, should_track);
        }

        first_new
    }

    /// Does the committed fiber still represent this descriptor? Keys have
    /// already been matched by the caller.
    fn matches(&self, old_id: FiberId, node: &ViewNode) -> bool {
        let fiber = self.arena.get(old_id);
        match node {
            ViewNode::Text(_) => fiber.tag == FiberTag::HostText,
            ViewNode::Element(el) => fiber.matches_type(&el.ty),
        }
    }

    fn reuse_child(&mut self, old_id: FiberId, node: &ViewNode) -> FiberId {
        let pending = match node {
            ViewNode::Text(text) => FiberProps::Text(text.clone()),
            ViewNode::Element(el) => FiberProps::Props(el.props.clone()),
        };
        let clone = self.arena.create_work_in_progress(old_id, pending);
        if let ViewNode::Element(el) = node {
            self.arena.get_mut(clone).reference = el.reference.clone();
        }
        self.arena.get_mut(clone).sibling = None;
        clone
    }

    fn create_child(&mut self, wip: FiberId, node: &ViewNode) -> FiberId {
        let mode = self.arena.get(wip).mode;
        let lanes = self.wip_root_render_lanes;
        let fiber = match node {
            ViewNode::Text(text) => Fiber::from_text(text.clone(), mode, lanes),
            ViewNode::Element(el) => Fiber::from_element(el, mode, lanes),
        };
        let id = self.arena.alloc(fiber);
        self.render_allocated.push(id);
        id
    }

    fn link_child(
        &mut self,
        wip: FiberId,
        child: FiberId,
        first_new: &mut Option<FiberId>,
        prev_new: &mut Option<FiberId>,
    ) {
        self.arena.get_mut(child).parent = Some(wip);
        match prev_new {
            None => *first_new = Some(child),
            Some(prev) => self.arena.get_mut(*prev).sibling = Some(child),
        }
        *prev_new = Some(child);
    }

    fn place_child(
        &mut self,
        child: FiberId,
        new_index: u32,
        last_placed_index: &mut u32,
        should_track: bool,
    ) {
        self.arena.get_mut(child).index = new_index;
        if !should_track {
            return;
        }

        match self.arena.get(child).alternate {
            None => {
                // Fresh mount into an existing list.
                self.arena.get_mut(child).flags.insert(FiberFlags::PLACEMENT);
            }
            Some(old_id) => {
                let old_index = self.arena.get(old_id).index;
                if old_index < *last_placed_index {
                    // Moved right past something that stayed put.
                    self.arena.get_mut(child).flags.insert(FiberFlags::PLACEMENT);
                } else {
                    *last_placed_index = old_index;
                }
            }
        }
    }

    fn delete_child(&mut self, wip: FiberId, old_id: FiberId, should_track: bool) {
        if !should_track {
            return;
        }
        let fiber = self.arena.get_mut(wip);
        fiber.deletions.push(old_id);
        fiber.flags.insert(FiberFlags::CHILD_DELETION);
    }
}
