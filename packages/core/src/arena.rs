//! The fiber arena.
//!
//! `alternate` pairs and parent back-references make the fiber graph cyclic,
//! so fibers never own each other. Every fiber lives in one slab owned by the
//! reconciler and all intra-tree links are [`FiberId`] indices into it. Slots
//! are returned to the slab's free list only after the commit that deletes
//! them, which also makes the "at most two versions in flight" property an
//! allocator invariant: a node is either reachable from `current`, reachable
//! from the work-in-progress root, or free.

use slab::Slab;

use crate::fiber::{Fiber, FiberProps};
use crate::flags::FiberFlags;

/// A fiber's slot in the arena. Not unique across time: slots are reused
/// after deletion commits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(pub usize);

#[derive(Default)]
pub struct FiberArena {
    fibers: Slab<Fiber>,
}

impl FiberArena {
    pub fn new() -> Self {
        Self { fibers: Slab::with_capacity(64) }
    }

    pub fn alloc(&mut self, fiber: Fiber) -> FiberId {
        FiberId(self.fibers.insert(fiber))
    }

    pub fn get(&self, id: FiberId) -> &Fiber {
        &self.fibers[id.0]
    }

    pub fn get_mut(&mut self, id: FiberId) -> &mut Fiber {
        &mut self.fibers[id.0]
    }

    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains(id.0)
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Release one slot. The caller is responsible for having unlinked the
    /// fiber and its alternate from both trees first.
    pub fn free(&mut self, id: FiberId) {
        if self.fibers.contains(id.0) {
            self.fibers.remove(id.0);
        }
    }

    /// Release a deleted subtree: `id`, everything below it, and their
    /// alternates. The top fiber's siblings are not part of the subtree.
    pub fn free_subtree(&mut self, id: FiberId) {
        if !self.fibers.contains(id.0) {
            return;
        }
        let mut stack = Vec::new();
        if let Some(child) = self.fibers[id.0].child {
            stack.push(child);
        }
        self.free_pair(id);

        while let Some(node) = stack.pop() {
            if !self.fibers.contains(node.0) {
                continue;
            }
            if let Some(child) = self.fibers[node.0].child {
                stack.push(child);
            }
            if let Some(sibling) = self.fibers[node.0].sibling {
                stack.push(sibling);
            }
            self.free_pair(node);
        }
    }

    fn free_pair(&mut self, id: FiberId) {
        if let Some(alternate) = self.fibers[id.0].alternate {
            if self.fibers.contains(alternate.0) {
                self.fibers.remove(alternate.0);
            }
        }
        self.fibers.remove(id.0);
    }

    /// Prepare `current`'s counterpart in the other buffer.
    ///
    /// First render of a node allocates the pair; re-renders reuse it, which
    /// bounds live fibers at two trees' worth. Work state is reset, identity
    /// and memoized fields are carried over, and `STATIC_MASK` flag bits
    /// survive from the current side.
    pub fn create_work_in_progress(
        &mut self,
        current_id: FiberId,
        pending_props: FiberProps,
    ) -> FiberId {
        let wip_id = match self.fibers[current_id.0].alternate {
            Some(existing) => existing,
            None => {
                let current = &self.fibers[current_id.0];
                let mut wip = Fiber::new(
                    current.tag,
                    FiberProps::None,
                    current.key.clone(),
                    current.mode,
                );
                wip.element_type = current.element_type.clone();
                wip.ty = current.ty.clone();
                wip.state_node = current.state_node.clone();
                let wip_id = self.alloc(wip);
                self.fibers[wip_id.0].alternate = Some(current_id);
                self.fibers[current_id.0].alternate = Some(wip_id);
                wip_id
            }
        };

        // Copy everything the new render starts from, in one pass over the
        // current side.
        let (
            static_flags,
            element_type,
            ty,
            state_node,
            child,
            sibling,
            index,
            memoized_props,
            memoized_state,
            update_queue,
            dependencies,
            lanes,
            child_lanes,
            reference,
            ref_cleanup,
        ) = {
            let current = &self.fibers[current_id.0];
            (
                current.flags.intersection(FiberFlags::STATIC_MASK),
                current.element_type.clone(),
                current.ty.clone(),
                current.state_node.clone(),
                current.child,
                current.sibling,
                current.index,
                current.memoized_props.clone(),
                current.memoized_state.clone(),
                current.update_queue.as_ref().map(|q| q.clone_for_wip()),
                // the render phase mutates the dependency record, so clone it
                current.dependencies.clone(),
                current.lanes,
                current.child_lanes,
                current.reference.clone(),
                current.ref_cleanup.clone(),
            )
        };

        let wip = &mut self.fibers[wip_id.0];
        wip.pending_props = pending_props;
        wip.flags = static_flags;
        wip.subtree_flags = FiberFlags::empty();
        wip.deletions.clear();
        wip.element_type = element_type;
        wip.ty = ty;
        wip.state_node = state_node;
        wip.child = child;
        wip.sibling = sibling;
        wip.index = index;
        wip.memoized_props = memoized_props;
        wip.memoized_state = memoized_state;
        wip.update_queue = update_queue;
        wip.dependencies = dependencies;
        wip.lanes = lanes;
        wip.child_lanes = child_lanes;
        wip.reference = reference;
        wip.ref_cleanup = ref_cleanup;
        wip.host_update = None;

        wip_id
    }

    /// Iterate a child chain: `first_child`, then siblings.
    pub fn children(&self, first: Option<FiberId>) -> impl Iterator<Item = FiberId> + '_ {
        let mut cursor = first;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.fibers[id.0].sibling;
            Some(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::FiberTag;
    use crate::flags::Mode;
    use crate::lanes::Lanes;

    fn blank(arena: &mut FiberArena, tag: FiberTag) -> FiberId {
        arena.alloc(Fiber::new(tag, FiberProps::None, None, Mode::CONCURRENT))
    }

    #[test]
    fn alternate_pairing_is_symmetric() {
        let mut arena = FiberArena::new();
        let current = blank(&mut arena, FiberTag::HostElement);

        let wip = arena.create_work_in_progress(current, FiberProps::None);
        assert_eq!(arena.get(current).alternate, Some(wip));
        assert_eq!(arena.get(wip).alternate, Some(current));

        // A second clone reuses the same pair instead of growing the arena.
        let again = arena.create_work_in_progress(current, FiberProps::None);
        assert_eq!(again, wip);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn static_flags_survive_the_clone() {
        let mut arena = FiberArena::new();
        let current = blank(&mut arena, FiberTag::HostElement);
        arena.get_mut(current).flags =
            FiberFlags::REF_STATIC | FiberFlags::PLACEMENT | FiberFlags::UPDATE;
        arena.get_mut(current).lanes = Lanes::DEFAULT;

        let wip = arena.create_work_in_progress(current, FiberProps::None);
        assert_eq!(arena.get(wip).flags, FiberFlags::REF_STATIC);
        assert_eq!(arena.get(wip).lanes, Lanes::DEFAULT);
        assert!(arena.get(wip).subtree_flags.is_empty());
    }

    #[test]
    fn free_subtree_releases_both_buffers() {
        let mut arena = FiberArena::new();
        let parent = blank(&mut arena, FiberTag::HostElement);
        let child = blank(&mut arena, FiberTag::HostText);
        arena.get_mut(parent).child = Some(child);
        arena.get_mut(child).parent = Some(parent);
        let wip = arena.create_work_in_progress(parent, FiberProps::None);

        assert_eq!(arena.len(), 3);
        arena.free_subtree(parent);
        assert_eq!(arena.len(), 0);
        let _ = wip;
    }
}
