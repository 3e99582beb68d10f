//! Complete work - the post-order visit.
//!
//! On the way back up the tree each fiber is finalized: host fibers get
//! their platform node created (first render) or diffed (update), providers
//! pop their value frame, and every fiber folds its children's flags and
//! lanes into `subtree_flags` / `child_lanes` so the commit driver and the
//! scheduler can skip clean subtrees without walking them.
//!
//! Instances created here are detached - nothing is visible in the host
//! until the commit phase attaches the tree's root. Wiring children into
//! their (detached) parent is done here precisely because it is unobservable.

use std::rc::Rc;

use crate::arena::FiberId;
use crate::fiber::{FiberProps, FiberTag, StateNode};
use crate::flags::FiberFlags;
use crate::host::{HostContext, HostHandle};
use crate::lanes::Lanes;
use crate::nodes::ViewType;
use crate::reconciler::Reconciler;

impl Reconciler {
    pub(crate) fn complete_work(&mut self, unit: FiberId) {
        let tag = self.arena.get(unit).tag;
        match tag {
            FiberTag::HostElement => self.complete_host_element(unit),
            FiberTag::HostText => self.complete_host_text(unit),
            FiberTag::ContextProvider => {
                if let Some(ViewType::Provider(id)) = self.arena.get(unit).ty.clone() {
                    self.contexts.pop(id);
                }
            }
            FiberTag::Portal => {
                // Attaching to the portal's container is observable, so it
                // waits for the commit phase.
                if self.arena.get(unit).alternate.is_none() {
                    self.arena.get_mut(unit).flags.insert(FiberFlags::UPDATE);
                }
            }
            _ => {}
        }
        self.bubble_properties(unit);
    }

    fn complete_host_element(&mut self, unit: FiberId) {
        let ty = match self.arena.get(unit).ty.clone() {
            Some(ViewType::Host(tag)) => tag,
            _ => return,
        };
        let has_current = self.arena.get(unit).alternate.is_some();
        let existing = self.arena.get(unit).host_instance().cloned();

        match (has_current, existing) {
            (true, Some(instance)) => {
                // Update path: ask the host to diff the props records.
                let old_props = match self.arena.get(unit).alternate {
                    Some(alt) => self.arena.get(alt).memoized_props.props_or_empty(),
                    None => self.arena.get(unit).memoized_props.props_or_empty(),
                };
                let new_props = self.arena.get(unit).pending_props.props_or_empty();
                let payload = self.host.prepare_update(&instance, &ty, &old_props, &new_props);
                if let Some(payload) = payload {
                    let fiber = self.arena.get_mut(unit);
                    fiber.host_update = Some(payload);
                    fiber.flags.insert(FiberFlags::UPDATE);
                }
            }
            _ => {
                let props = self.arena.get(unit).pending_props.props_or_empty();
                let container = self.container_of_render_root();
                let context = self.host_context_for(unit);
                let instance = self.host.create_instance(&ty, &props, &container, &context);
                self.append_all_children(unit, &instance);
                self.arena.get_mut(unit).state_node = StateNode::Instance(instance.clone());
                if self.host.finalize_initial_children(&instance, &ty, &props) {
                    self.arena.get_mut(unit).flags.insert(FiberFlags::UPDATE);
                }
            }
        }
    }

    fn complete_host_text(&mut self, unit: FiberId) {
        let new_text = match &self.arena.get(unit).pending_props {
            FiberProps::Text(text) => text.clone(),
            _ => return,
        };
        let has_current = self.arena.get(unit).alternate.is_some();
        let existing = self.arena.get(unit).host_instance().cloned();

        match (has_current, existing) {
            (true, Some(_)) => {
                let old_text = match self.arena.get(unit).alternate {
                    Some(alt) => match &self.arena.get(alt).memoized_props {
                        FiberProps::Text(text) => text.clone(),
                        _ => Rc::from(""),
                    },
                    None => Rc::from(""),
                };
                if old_text != new_text {
                    self.arena.get_mut(unit).flags.insert(FiberFlags::UPDATE);
                }
            }
            _ => {
                let container = self.container_of_render_root();
                let context = self.host_context_for(unit);
                let instance = self
                    .host
                    .create_text_instance(&new_text, &container, &context);
                self.arena.get_mut(unit).state_node = StateNode::Text(instance);
            }
        }
    }

    /// Fold children's flags and lanes into this fiber.
    fn bubble_properties(&mut self, unit: FiberId) {
        let mut subtree_flags = FiberFlags::empty();
        let mut child_lanes = Lanes::NONE;

        let mut cursor = self.arena.get(unit).child;
        while let Some(child) = cursor {
            let fiber = self.arena.get(child);
            subtree_flags |= fiber.flags | fiber.subtree_flags;
            child_lanes |= fiber.lanes.merge(fiber.child_lanes);
            cursor = fiber.sibling;
        }

        let fiber = self.arena.get_mut(unit);
        fiber.subtree_flags |= subtree_flags;
        fiber.child_lanes = child_lanes;
    }

    /// Attach every already-created host node directly below `unit` to the
    /// new (still detached) instance. Walks through non-host fibers, stops
    /// at host nodes and portals.
    fn append_all_children(&mut self, unit: FiberId, parent: &HostHandle) {
        let mut node = match self.arena.get(unit).child {
            Some(child) => child,
            None => return,
        };

        loop {
            let fiber = self.arena.get(node);
            let is_host = matches!(fiber.tag, FiberTag::HostElement | FiberTag::HostText);
            let is_portal = fiber.tag == FiberTag::Portal;

            if is_host {
                if let Some(instance) = fiber.host_instance().cloned() {
                    self.host.append_initial_child(parent, &instance);
                }
            } else if !is_portal {
                if let Some(child) = fiber.child {
                    node = child;
                    continue;
                }
            }

            // Climb until a sibling offers a new branch.
            loop {
                let fiber = self.arena.get(node);
                if let Some(sibling) = fiber.sibling {
                    node = sibling;
                    break;
                }
                match fiber.parent {
                    Some(parent_id) if parent_id != unit => node = parent_id,
                    _ => return,
                }
            }
        }
    }

    /// Host context for a fiber, derived by replaying the ancestor chain of
    /// host tags from the root down.
    fn host_context_for(&mut self, unit: FiberId) -> HostContext {
        let mut tags: Vec<Rc<str>> = Vec::new();
        let mut cursor = self.arena.get(unit).parent;
        while let Some(ancestor) = cursor {
            let fiber = self.arena.get(ancestor);
            if fiber.tag == FiberTag::HostElement {
                if let Some(ViewType::Host(tag)) = &fiber.ty {
                    tags.push(tag.clone());
                }
            }
            cursor = fiber.parent;
        }

        let container = self.container_of_render_root();
        let mut context = self.host.get_root_host_context(&container);
        for tag in tags.iter().rev() {
            context = self.host.get_child_host_context(&context, tag);
        }
        context
    }

    fn container_of_render_root(&self) -> HostHandle {
        let root = self
            .wip_root
            .expect("host completion only happens inside a render");
        self.roots[root.0].container.clone()
    }
}
