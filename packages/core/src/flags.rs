//! Effect flags - the output protocol of the render phase.
//!
//! Begin/complete work stamps these onto fibers; the commit driver walks the
//! finished tree and applies every flagged effect to the host. `subtree_flags`
//! carries the union of all descendant flags so commit can skip entire
//! subtrees that have nothing to do.

use bitflags::bitflags;

bitflags! {
    /// Side effects scheduled on a single fiber.
    ///
    /// Flags are additive - one fiber can carry several effects. The commit
    /// phases each check their own mask and handle whatever is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FiberFlags: u32 {
        /// Insert this fiber's host node(s) into the host tree.
        const PLACEMENT = 1 << 1;
        /// Patch the host node's attributes or text.
        const UPDATE = 1 << 2;
        /// One or more children were removed; see `Fiber::deletions`.
        const CHILD_DELETION = 1 << 4;
        /// Wipe the host node's text content before mutating children.
        const CONTENT_RESET = 1 << 5;
        /// Run queued update-callbacks during the layout phase.
        const CALLBACK = 1 << 6;
        /// A boundary below threw and this fiber is re-rendering a fallback.
        const DID_CAPTURE = 1 << 7;
        /// Recoverable mismatch; the subtree must be re-rendered from scratch.
        const FORCE_CLIENT_RENDER = 1 << 8;
        /// Attach or re-attach the ref during layout.
        const REF = 1 << 9;
        /// Read host state before any mutation (focus, scroll).
        const SNAPSHOT = 1 << 10;
        /// Schedule work for the deferred passive pass.
        const PASSIVE = 1 << 11;
        const HYDRATING = 1 << 12;
        /// The subtree's visibility toggled this commit.
        const VISIBILITY = 1 << 13;
        const FORM_RESET = 1 << 14;
        /// The render phase threw while working on this fiber.
        const INCOMPLETE = 1 << 15;
        /// A descendant threw; this boundary must capture on the next pass.
        const SHOULD_CAPTURE = 1 << 16;

        // Static flags describe properties of the fiber itself rather than
        // work scheduled on it, so they survive `create_work_in_progress`.
        const REF_STATIC = 1 << 21;
        const LAYOUT_STATIC = 1 << 22;
        const PASSIVE_STATIC = 1 << 23;

        /// Bits preserved across work-in-progress clones.
        const STATIC_MASK = Self::REF_STATIC.bits()
            | Self::LAYOUT_STATIC.bits()
            | Self::PASSIVE_STATIC.bits();

        /// Bits a fiber may keep when its subtree failed to complete.
        const HOST_EFFECT_MASK = (1 << 17) - 1;

        const BEFORE_MUTATION_MASK = Self::SNAPSHOT.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::VISIBILITY.bits();

        const MUTATION_MASK = Self::PLACEMENT.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::CONTENT_RESET.bits()
            | Self::REF.bits()
            | Self::HYDRATING.bits()
            | Self::VISIBILITY.bits()
            | Self::FORM_RESET.bits();

        const LAYOUT_MASK = Self::UPDATE.bits()
            | Self::CALLBACK.bits()
            | Self::REF.bits()
            | Self::VISIBILITY.bits();

        const PASSIVE_MASK = Self::PASSIVE.bits()
            | Self::VISIBILITY.bits()
            | Self::CHILD_DELETION.bits();
    }
}

bitflags! {
    /// Rendering modes a fiber was created under. Inherited from the root.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mode: u8 {
        /// Renders may be time-sliced and interrupted.
        const CONCURRENT = 1 << 0;
        const STRICT = 1 << 1;
        const PROFILED = 1 << 2;
    }
}

bitflags! {
    /// Where in the pipeline the current call stack is executing.
    ///
    /// Guards re-entrancy: scheduling work is legal anywhere, but entering the
    /// work loop while a render or commit is on the stack is a caller bug.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecutionContext: u8 {
        const BATCHED = 1 << 0;
        const RENDER = 1 << 1;
        const COMMIT = 1 << 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_bits_are_not_effects() {
        assert!(!FiberFlags::MUTATION_MASK.intersects(FiberFlags::STATIC_MASK));
        assert!(!FiberFlags::LAYOUT_MASK.intersects(FiberFlags::STATIC_MASK));
        assert!(!FiberFlags::PASSIVE_MASK.intersects(FiberFlags::STATIC_MASK));
    }

    #[test]
    fn capture_bits_survive_the_host_effect_mask() {
        assert!(FiberFlags::HOST_EFFECT_MASK.contains(FiberFlags::SHOULD_CAPTURE));
        assert!(FiberFlags::HOST_EFFECT_MASK.contains(FiberFlags::DID_CAPTURE));
        assert!(FiberFlags::HOST_EFFECT_MASK.contains(FiberFlags::INCOMPLETE));
    }
}
