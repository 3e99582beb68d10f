//! Begin work - the pre-order visit.
//!
//! `begin_work` decides, per fiber, whether anything actually changed. The
//! cheap path is the bailout: identical props, no update scheduled at a
//! visible lane, no invalidated context read, no capture pending - clone the
//! child pointers and skip the whole subtree if it is clean. The expensive
//! path dispatches on the fiber tag, runs user code where there is any, and
//! reconciles the produced children against the committed ones.
//!
//! Handlers do not throw; a component that throws returns the value and it
//! is routed back through the work loop (`Ok(Err(thrown))` below).

use crate::arena::FiberId;
use crate::error::{ReconcileError, Thrown};
use crate::fiber::{tag_for, FiberProps, FiberTag, StateNode};
use crate::flags::FiberFlags;
use crate::lanes::Lanes;
use crate::nodes::{Props, StateRecord, Value, ViewType};
use crate::reconciler::Reconciler;
use crate::root::ELEMENT_FIELD;
use crate::update_queue::process_update_queue;

/// Outer error is fatal misuse; inner error is a user-thrown value.
pub(crate) type BeginResult = Result<Result<Option<FiberId>, Thrown>, ReconcileError>;

/// Marker field on boundary state while its fallback is showing.
const FALLBACK_FIELD: &str = "showing_fallback";
/// Marker field on offscreen state while the subtree is hidden.
const HIDDEN_FIELD: &str = "hidden";

impl Reconciler {
    pub(crate) fn begin_work(&mut self, current: Option<FiberId>, wip: FiberId) -> BeginResult {
        let render_lanes = self.entangled_render_lanes;
        self.did_receive_update = false;

        if let Some(current_id) = current {
            let props_changed = {
                let wip_fiber = self.arena.get(wip);
                !wip_fiber.memoized_props.same(&wip_fiber.pending_props)
            };
            if props_changed || self.context_dependencies_changed(wip) {
                self.did_receive_update = true;
            } else {
                let wip_fiber = self.arena.get(wip);
                let has_work = wip_fiber.lanes.intersects(render_lanes)
                    || wip_fiber.flags.contains(FiberFlags::DID_CAPTURE);
                if !has_work {
                    return Ok(Ok(self.attempt_early_bailout(current_id, wip, render_lanes)));
                }
            }
        }

        self.arena.get_mut(wip).lanes = Lanes::NONE;

        let tag = self.arena.get(wip).tag;
        match tag {
            FiberTag::HostRoot => self.begin_host_root(current, wip, render_lanes),
            FiberTag::HostElement => self.begin_host_element(current, wip),
            FiberTag::HostText => Ok(Ok(None)),
            FiberTag::Function | FiberTag::ForwardRef => self.begin_function(current, wip),
            FiberTag::Stateful => self.begin_stateful(current, wip, render_lanes),
            FiberTag::Fragment | FiberTag::Profiler | FiberTag::Portal => {
                self.begin_children_passthrough(current, wip)
            }
            FiberTag::ContextProvider => self.begin_provider(current, wip, render_lanes),
            FiberTag::ContextConsumer => self.begin_consumer(current, wip),
            FiberTag::Memo | FiberTag::SimpleMemo => self.begin_memo(current, wip, render_lanes),
            FiberTag::Suspense => self.begin_suspense(current, wip),
            FiberTag::Offscreen => self.begin_offscreen(current, wip),
            FiberTag::Lazy => self.begin_lazy(current, wip, render_lanes),
            FiberTag::Throw => {
                let error = match &self.arena.get(wip).pending_props {
                    FiberProps::Error(error) => error.clone(),
                    _ => return Err(ReconcileError::UnknownFiberTag(tag)),
                };
                Ok(Err(Thrown::Error(error)))
            }
        }
    }

    // ---- bailout ----

    /// Nothing to do here. Skip the subtree entirely when nothing below has
    /// visible work either; otherwise clone the child fibers and descend.
    fn attempt_early_bailout(
        &mut self,
        current: FiberId,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Option<FiberId> {
        let _ = current;
        // A provider on the bailout path still scopes its subtree.
        if self.arena.get(wip).tag == FiberTag::ContextProvider {
            if let Some(ViewType::Provider(id)) = self.arena.get(wip).ty.clone() {
                let value = provider_value(&self.arena.get(wip).pending_props);
                self.contexts.push(id, value);
            }
        }

        if !self.arena.get(wip).child_lanes.intersects(render_lanes) {
            log::trace!("bailing out of {wip:?} and its subtree");
            return None;
        }
        self.clone_child_fibers(wip)
    }

    /// Rebuild the work-in-progress side of this fiber's children without
    /// re-running anyone's render.
    pub(crate) fn clone_child_fibers(&mut self, wip: FiberId) -> Option<FiberId> {
        let mut cursor = self.arena.get(wip).child;
        let mut first = None;
        let mut prev: Option<FiberId> = None;

        while let Some(child) = cursor {
            cursor = self.arena.get(child).sibling;
            let pending = self.arena.get(child).pending_props.clone();
            let clone = self.arena.create_work_in_progress(child, pending);
            self.arena.get_mut(clone).parent = Some(wip);
            self.arena.get_mut(clone).sibling = None;
            match prev {
                None => {
                    first = Some(clone);
                    self.arena.get_mut(wip).child = Some(clone);
                }
                Some(prev) => self.arena.get_mut(prev).sibling = Some(clone),
            }
            prev = Some(clone);
        }
        first
    }

    fn context_dependencies_changed(&self, wip: FiberId) -> bool {
        match &self.arena.get(wip).dependencies {
            Some(deps) => deps
                .contexts
                .iter()
                .any(|(id, seen)| self.contexts.current(*id) != *seen),
            None => false,
        }
    }

    // ---- handlers ----

    fn begin_host_root(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> BeginResult {
        let result = process_update_queue(
            &mut self.arena,
            wip,
            &Props::default(),
            render_lanes,
            self.wip_root_render_lanes,
        );
        self.wip_root_skipped_lanes |= result.skipped_lanes;

        let children = match self
            .arena
            .get(wip)
            .memoized_state
            .as_ref()
            .and_then(|state| state.get(ELEMENT_FIELD))
        {
            Some(Value::Node(node)) => vec![(**node).clone()],
            _ => Vec::new(),
        };

        Ok(Ok(self.reconcile_children(current, wip, &children)))
    }

    fn begin_host_element(&mut self, current: Option<FiberId>, wip: FiberId) -> BeginResult {
        let props = self.arena.get(wip).pending_props.props_or_empty();
        if self.arena.get(wip).reference.is_some() {
            self.mark_ref(current, wip);
        }
        Ok(Ok(self.reconcile_children(current, wip, &props.children.clone())))
    }

    fn begin_function(&mut self, current: Option<FiberId>, wip: FiberId) -> BeginResult {
        let props = self.arena.get(wip).pending_props.props_or_empty();
        let ty = self.arena.get(wip).ty.clone();

        let rendered = match ty {
            Some(ViewType::Function(body)) => body(&props),
            Some(ViewType::ForwardRef(body)) => {
                let reference = self.arena.get(wip).reference.clone();
                body(&props, reference.as_ref())
            }
            _ => return Err(ReconcileError::UnknownFiberTag(self.arena.get(wip).tag)),
        };

        match rendered {
            Ok(children) => Ok(Ok(self.reconcile_children(current, wip, &children))),
            Err(thrown) => Ok(Err(thrown)),
        }
    }

    fn begin_stateful(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> BeginResult {
        let props = self.arena.get(wip).pending_props.props_or_empty();

        // Mount: adopt the component object and its initial state.
        if self.arena.get(wip).component().is_none() {
            let component = match self.arena.get(wip).element_type.clone() {
                Some(ViewType::Stateful(component)) => component,
                _ => return Err(ReconcileError::UnknownFiberTag(self.arena.get(wip).tag)),
            };
            let initial = component.initial_state(&props);
            let fiber = self.arena.get_mut(wip);
            fiber.state_node = StateNode::Component(component);
            fiber.memoized_state = Some(initial.clone());
            fiber.update_queue = Some(crate::update_queue::UpdateQueue::new(initial));
            fiber.flags.insert(FiberFlags::LAYOUT_STATIC);
        }

        let result = process_update_queue(
            &mut self.arena,
            wip,
            &props,
            render_lanes,
            self.wip_root_render_lanes,
        );
        self.wip_root_skipped_lanes |= result.skipped_lanes;
        if result.has_force_update {
            self.did_receive_update = true;
        }

        {
            let fiber = self.arena.get_mut(wip);
            if current.is_none() {
                fiber.flags.insert(FiberFlags::UPDATE);
            } else {
                fiber.flags.insert(FiberFlags::UPDATE | FiberFlags::SNAPSHOT);
            }
        }

        let component = self
            .arena
            .get(wip)
            .component()
            .cloned()
            .expect("stateful fiber adopted its component above");
        let state = self
            .arena
            .get(wip)
            .memoized_state
            .clone()
            .unwrap_or_default();

        match component.render(&props, &state) {
            Ok(children) => Ok(Ok(self.reconcile_children(current, wip, &children))),
            Err(thrown) => Ok(Err(thrown)),
        }
    }

    fn begin_children_passthrough(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> BeginResult {
        let props = self.arena.get(wip).pending_props.props_or_empty();
        Ok(Ok(self.reconcile_children(current, wip, &props.children.clone())))
    }

    fn begin_provider(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> BeginResult {
        let id = match self.arena.get(wip).ty.clone() {
            Some(ViewType::Provider(id)) => id,
            _ => return Err(ReconcileError::UnknownFiberTag(self.arena.get(wip).tag)),
        };
        let new_value = provider_value(&self.arena.get(wip).pending_props);

        if current.is_some() {
            let old_value = provider_value(&self.arena.get(wip).memoized_props);
            if old_value != new_value {
                // Consumers below may have bailed-out ancestors; mark every
                // observer so it renders this pass.
                self.propagate_context_change(wip, id, render_lanes);
            }
        }

        self.contexts.push(id, new_value);
        self.begin_children_passthrough(current, wip)
    }

    fn begin_consumer(&mut self, current: Option<FiberId>, wip: FiberId) -> BeginResult {
        let (id, body) = match self.arena.get(wip).ty.clone() {
            Some(ViewType::Consumer(id, body)) => (id, body),
            _ => return Err(ReconcileError::UnknownFiberTag(self.arena.get(wip).tag)),
        };

        let value = self.contexts.current(id);
        {
            let fiber = self.arena.get_mut(wip);
            fiber.dependencies = Some(crate::context::Dependencies {
                contexts: vec![(id, value.clone())],
                lanes: Lanes::NONE,
            });
        }

        match body(&value) {
            Ok(children) => Ok(Ok(self.reconcile_children(current, wip, &children))),
            Err(thrown) => Ok(Err(thrown)),
        }
    }

    fn begin_memo(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> BeginResult {
        if let Some(current_id) = current {
            let no_own_work = !self.arena.get(wip).lanes.intersects(render_lanes);
            let _ = current_id;
            if no_own_work && !self.did_receive_update {
                // props were identical; already handled by the early bailout
            } else if no_own_work {
                let compare = match self.arena.get(wip).element_type.clone() {
                    Some(ViewType::Memo { compare, .. }) => compare,
                    _ => None,
                };
                let old = self.arena.get(wip).memoized_props.props_or_empty();
                let new = self.arena.get(wip).pending_props.props_or_empty();
                let equal = match compare {
                    Some(compare) => compare(&old, &new),
                    None => *old == *new,
                };
                if equal {
                    log::trace!("memo bailout at {wip:?}");
                    self.did_receive_update = false;
                    return Ok(Ok(
                        self.attempt_early_bailout(current_id, wip, render_lanes)
                    ));
                }
            }
        }

        // Fall through to the inner type.
        let props = self.arena.get(wip).pending_props.props_or_empty();
        let inner = self.arena.get(wip).ty.clone();
        match inner {
            Some(ViewType::Function(body)) => match body(&props) {
                Ok(children) => Ok(Ok(self.reconcile_children(current, wip, &children))),
                Err(thrown) => Ok(Err(thrown)),
            },
            _ => self.begin_children_passthrough(current, wip),
        }
    }

    fn begin_suspense(&mut self, current: Option<FiberId>, wip: FiberId) -> BeginResult {
        let props = self.arena.get(wip).pending_props.props_or_empty();
        let show_fallback = self.arena.get(wip).flags.contains(FiberFlags::DID_CAPTURE);

        let was_fallback = current
            .and_then(|c| self.arena.get(c).memoized_state.clone())
            .map(|state| state.get(FALLBACK_FIELD).is_some())
            .unwrap_or(false);

        let children = if show_fallback {
            props.fallback.clone()
        } else {
            props.children.clone()
        };

        {
            let fiber = self.arena.get_mut(wip);
            fiber.memoized_state = if show_fallback {
                Some(StateRecord::new().with(FALLBACK_FIELD, true))
            } else {
                None
            };
            if show_fallback != was_fallback {
                fiber.flags.insert(FiberFlags::VISIBILITY);
            }
        }

        Ok(Ok(self.reconcile_children(current, wip, &children)))
    }

    fn begin_offscreen(&mut self, current: Option<FiberId>, wip: FiberId) -> BeginResult {
        let props = self.arena.get(wip).pending_props.props_or_empty();
        let hidden = matches!(props.text_attr("mode"), Some("hidden"));

        let was_hidden = current
            .and_then(|c| self.arena.get(c).memoized_state.clone())
            .map(|state| state.get(HIDDEN_FIELD).is_some())
            .unwrap_or(false);

        {
            let fiber = self.arena.get_mut(wip);
            fiber.memoized_state = if hidden {
                Some(StateRecord::new().with(HIDDEN_FIELD, true))
            } else {
                None
            };
            if hidden != was_hidden {
                fiber.flags.insert(FiberFlags::VISIBILITY | FiberFlags::PASSIVE);
            }
        }

        Ok(Ok(self.reconcile_children(current, wip, &props.children.clone())))
    }

    fn begin_lazy(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> BeginResult {
        let lazy = match self.arena.get(wip).element_type.clone() {
            Some(ViewType::Lazy(lazy)) => lazy,
            _ => return Err(ReconcileError::UnknownFiberTag(self.arena.get(wip).tag)),
        };

        let resolved = match lazy.resolve() {
            Ok(ty) => ty,
            Err(thrown) => return Ok(Err(thrown)),
        };

        // Remount as the resolved type and take its begin path.
        {
            let fiber = self.arena.get_mut(wip);
            fiber.tag = tag_for(&resolved);
            fiber.ty = Some(resolved);
        }
        let _ = render_lanes;
        self.begin_work(current, wip)
    }

    fn mark_ref(&mut self, _current: Option<FiberId>, wip: FiberId) {
        let fiber = self.arena.get_mut(wip);
        fiber.flags.insert(FiberFlags::REF | FiberFlags::REF_STATIC);
    }

    /// A provider's value changed: walk its committed subtree and schedule
    /// every fiber that observed the old value.
    fn propagate_context_change(
        &mut self,
        provider_wip: FiberId,
        id: crate::context::ContextId,
        render_lanes: Lanes,
    ) {
        let mut stack: Vec<FiberId> = self.arena.get(provider_wip).child.into_iter().collect();
        let mut dirty = Vec::new();

        while let Some(node) = stack.pop() {
            let fiber = self.arena.get(node);
            if let Some(deps) = &fiber.dependencies {
                if deps.observes(id) {
                    dirty.push(node);
                }
            }
            if let Some(sibling) = fiber.sibling {
                stack.push(sibling);
            }
            if let Some(child) = fiber.child {
                stack.push(child);
            }
        }

        for node in dirty {
            crate::update_queue::mark_update_lane_from_fiber_to_root(
                &mut self.arena,
                node,
                render_lanes,
            );
        }
    }
}

fn provider_value(props: &FiberProps) -> Value {
    props
        .props()
        .and_then(|p| p.attr("value").cloned())
        .unwrap_or(Value::Null)
}
