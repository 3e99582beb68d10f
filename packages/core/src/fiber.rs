//! The fiber - one unit of UI work.
//!
//! Fibers are the reconciler's working representation of the tree. Each one
//! records what to render (`element_type`, `pending_props`), what was
//! rendered last time (`memoized_props`, `memoized_state`), what must happen
//! at commit (`flags`, `deletions`), and how urgent any pending work is
//! (`lanes`, `child_lanes`).
//!
//! Two trees coexist: the committed *current* tree and the *work-in-progress*
//! tree being built, paired node-for-node through `alternate`. All links are
//! arena indices; see [`crate::arena`].

use std::rc::Rc;

use smallvec::SmallVec;

use crate::arena::FiberId;
use crate::context::Dependencies;
use crate::error::ErrorValue;
use crate::flags::{FiberFlags, Mode};
use crate::host::{HostHandle, HostRef, HostUpdatePayload, RefCleanup};
use crate::lanes::Lanes;
use crate::nodes::{same_rc, Props, StateRecord, StatefulComponent, ViewElement, ViewType};
use crate::root::RootId;
use crate::suspense::Wakeable;
use crate::update_queue::UpdateQueue;

/// Variant discriminator for a fiber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FiberTag {
    Function,
    Stateful,
    HostRoot,
    HostElement,
    HostText,
    Fragment,
    ContextProvider,
    ContextConsumer,
    Memo,
    SimpleMemo,
    ForwardRef,
    Suspense,
    Offscreen,
    Portal,
    Profiler,
    Lazy,
    Throw,
}

/// The input a fiber renders from. Host text carries a string, the `Throw`
/// tag carries the error it rethrows, everything else carries a props record.
#[derive(Clone, Debug, Default)]
pub enum FiberProps {
    #[default]
    None,
    Props(Rc<Props>),
    Text(Rc<str>),
    Error(ErrorValue),
}

impl FiberProps {
    /// Identity comparison - the cheap bailout check. Props records compare
    /// by pointer because descriptors are immutable.
    pub fn same(&self, other: &FiberProps) -> bool {
        match (self, other) {
            (FiberProps::None, FiberProps::None) => true,
            (FiberProps::Props(a), FiberProps::Props(b)) => Rc::ptr_eq(a, b),
            (FiberProps::Text(a), FiberProps::Text(b)) => a == b,
            (FiberProps::Error(a), FiberProps::Error(b)) => a == b,
            _ => false,
        }
    }

    pub fn props(&self) -> Option<&Rc<Props>> {
        match self {
            FiberProps::Props(p) => Some(p),
            _ => None,
        }
    }

    /// The props record, or the empty record for prop-less variants.
    pub fn props_or_empty(&self) -> Rc<Props> {
        thread_local! {
            static EMPTY: Rc<Props> = Rc::new(Props::default());
        }
        match self {
            FiberProps::Props(p) => p.clone(),
            _ => EMPTY.with(|p| p.clone()),
        }
    }
}

/// Owned handle to whatever a fiber stands for outside the tree.
#[derive(Clone, Default)]
pub enum StateNode {
    #[default]
    None,
    /// Host fibers own the platform node the host adapter created.
    Instance(HostHandle),
    Text(HostHandle),
    /// The root fiber points back at its [`crate::root::FiberRoot`].
    Root(RootId),
    /// Stateful fibers own their component object.
    Component(Rc<dyn StatefulComponent>),
}

impl StateNode {
    pub fn instance(&self) -> Option<&HostHandle> {
        match self {
            StateNode::Instance(handle) | StateNode::Text(handle) => Some(handle),
            _ => None,
        }
    }
}

impl std::fmt::Debug for StateNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateNode::None => f.write_str("None"),
            StateNode::Instance(_) => f.write_str("Instance"),
            StateNode::Text(_) => f.write_str("Text"),
            StateNode::Root(id) => f.debug_tuple("Root").field(id).finish(),
            StateNode::Component(_) => f.write_str("Component"),
        }
    }
}

/// A node in the reconciler's working tree.
pub struct Fiber {
    pub tag: FiberTag,
    pub key: Option<Rc<str>>,
    /// The unresolved identity (what the descriptor said).
    pub element_type: Option<ViewType>,
    /// The resolved identity (lazy/memo unwrap to their inner type here).
    pub ty: Option<ViewType>,
    pub mode: Mode,

    pub state_node: StateNode,

    // Tree links. `parent` is a back-reference, not ownership.
    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub index: u32,

    pub pending_props: FiberProps,
    pub memoized_props: FiberProps,
    pub memoized_state: Option<StateRecord>,
    pub update_queue: Option<UpdateQueue>,
    pub dependencies: Option<Dependencies>,

    pub flags: FiberFlags,
    pub subtree_flags: FiberFlags,
    pub deletions: SmallVec<[FiberId; 4]>,

    pub lanes: Lanes,
    pub child_lanes: Lanes,

    pub alternate: Option<FiberId>,

    pub reference: Option<HostRef>,
    pub ref_cleanup: Option<RefCleanup>,

    /// Prop diff computed by the host during complete, applied at commit.
    pub host_update: Option<HostUpdatePayload>,
    /// Thenables a suspense boundary is waiting on.
    pub wakeables: Vec<Rc<dyn Wakeable>>,
}

impl Fiber {
    pub fn new(tag: FiberTag, pending_props: FiberProps, key: Option<Rc<str>>, mode: Mode) -> Self {
        Self {
            tag,
            key,
            element_type: None,
            ty: None,
            mode,
            state_node: StateNode::None,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            pending_props,
            memoized_props: FiberProps::None,
            memoized_state: None,
            update_queue: None,
            dependencies: None,
            flags: FiberFlags::empty(),
            subtree_flags: FiberFlags::empty(),
            deletions: SmallVec::new(),
            lanes: Lanes::NONE,
            child_lanes: Lanes::NONE,
            alternate: None,
            reference: None,
            ref_cleanup: None,
            host_update: None,
            wakeables: Vec::new(),
        }
    }

    /// Build a fiber for an element descriptor.
    pub fn from_element(element: &ViewElement, mode: Mode, lanes: Lanes) -> Self {
        let tag = tag_for(&element.ty);
        let mut fiber = Fiber::new(
            tag,
            FiberProps::Props(element.props.clone()),
            element.key.clone(),
            mode,
        );
        fiber.element_type = Some(element.ty.clone());
        fiber.ty = Some(resolved_type(&element.ty));
        fiber.lanes = lanes;
        fiber.reference = element.reference.clone();
        if let ViewType::Throw(error) = &element.ty {
            fiber.pending_props = FiberProps::Error(error.clone());
        }
        fiber
    }

    pub fn from_text(text: Rc<str>, mode: Mode, lanes: Lanes) -> Self {
        let mut fiber = Fiber::new(FiberTag::HostText, FiberProps::Text(text), None, mode);
        fiber.lanes = lanes;
        fiber
    }

    /// Does this fiber still represent `element`? Keys are checked by the
    /// caller; this is the positional type check.
    pub fn matches_type(&self, ty: &ViewType) -> bool {
        match &self.element_type {
            Some(own) => own == ty,
            None => false,
        }
    }

    pub fn host_instance(&self) -> Option<&HostHandle> {
        self.state_node.instance()
    }

    pub fn component(&self) -> Option<&Rc<dyn StatefulComponent>> {
        match &self.state_node {
            StateNode::Component(c) => Some(c),
            _ => None,
        }
    }

    /// Whether two stateful fibers share one component object.
    pub fn same_component(&self, other: &Fiber) -> bool {
        match (self.component(), other.component()) {
            (Some(a), Some(b)) => same_rc(a, b),
            _ => false,
        }
    }
}

/// Which fiber variant an element type mounts as.
pub fn tag_for(ty: &ViewType) -> FiberTag {
    match ty {
        ViewType::Host(_) => FiberTag::HostElement,
        ViewType::Function(_) => FiberTag::Function,
        ViewType::Stateful(_) => FiberTag::Stateful,
        ViewType::Fragment => FiberTag::Fragment,
        ViewType::Provider(_) => FiberTag::ContextProvider,
        ViewType::Consumer(..) => FiberTag::ContextConsumer,
        ViewType::Memo { .. } => FiberTag::Memo,
        ViewType::ForwardRef(_) => FiberTag::ForwardRef,
        ViewType::Suspense => FiberTag::Suspense,
        ViewType::Offscreen => FiberTag::Offscreen,
        ViewType::Portal(_) => FiberTag::Portal,
        ViewType::Lazy(_) => FiberTag::Lazy,
        ViewType::Throw(_) => FiberTag::Throw,
        ViewType::Profiler(_) => FiberTag::Profiler,
    }
}

fn resolved_type(ty: &ViewType) -> ViewType {
    match ty {
        ViewType::Memo { inner, .. } => (**inner).clone(),
        other => other.clone(),
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("tag", &self.tag)
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("lanes", &self.lanes)
            .field("child_lanes", &self.child_lanes)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
