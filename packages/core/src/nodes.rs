//! View descriptors - the immutable records user code hands to the
//! reconciler.
//!
//! A [`ViewNode`] describes what the UI should look like; it carries no work
//! state and is never mutated after construction. The reconciler diffs these
//! against the committed fiber tree to decide what the host must change.
//!
//! Descriptors are built with the small builder in this module. There is no
//! macro layer in the core crate; outer crates are expected to provide sugar.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::context::ContextId;
use crate::error::{ErrorValue, Thrown};
use crate::host::{HostHandle, HostRef};
use crate::suspense::Thenable;

/// Stable identity used to match children across renders.
pub type Key = Rc<str>;

/// What a component render produces: child descriptors, or a thrown value.
pub type Rendered = Result<Vec<ViewNode>, Thrown>;

/// A view function. Identity (the `Rc` pointer) doubles as the component's
/// type for reconciliation, so clone the same `Rc` for every use of one
/// component.
pub type Component = Rc<dyn Fn(&Props) -> Rendered>;

/// A view function that also receives the ref attached to its element.
pub type RefComponent = Rc<dyn Fn(&Props, Option<&HostRef>) -> Rendered>;

/// Render-prop body of a context consumer.
pub type ConsumerFn = Rc<dyn Fn(&Value) -> Rendered>;

/// Custom memo comparison; `true` means "props are equal, skip the render".
pub type CompareFn = Rc<dyn Fn(&Props, &Props) -> bool>;

/// A dynamic attribute or state value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Rc<str>),
    /// A descriptor stored as data - the root's element lives in its state
    /// record this way.
    Node(Rc<ViewNode>),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<ViewNode> for Value {
    fn from(v: ViewNode) -> Self {
        Value::Node(Rc::new(v))
    }
}

/// The props record of an element. Immutable once built; renders that want
/// different props build a new record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Props {
    pub attrs: FxHashMap<Rc<str>, Value>,
    pub children: Vec<ViewNode>,
    /// Only meaningful on suspense boundaries.
    pub fallback: Vec<ViewNode>,
}

impl Props {
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn text_attr(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(Value::Text(t)) => Some(t),
            _ => None,
        }
    }
}

/// A component carrying local state managed through the update queue.
///
/// The stateful analog of [`Component`]: the reconciler owns the state record
/// and feeds it back into `render` after draining pending updates. Implement
/// `state_from_error` to make the component an error boundary.
pub trait StatefulComponent {
    fn initial_state(&self, _props: &Props) -> StateRecord {
        StateRecord::default()
    }

    fn render(&self, props: &Props, state: &StateRecord) -> Rendered;

    /// Map a captured descendant error to a state partial. Returning `Some`
    /// makes this component an error boundary: it re-renders with the merged
    /// state instead of letting the error bubble.
    fn state_from_error(&self, _error: &ErrorValue) -> Option<StateRecord> {
        None
    }

    fn did_mount(&self) {}
    fn did_update(&self, _old_props: &Props) {}
    fn will_unmount(&self) {}
    fn snapshot_before_update(&self) {}
}

/// A lazily-resolved component type. First render suspends until the loader
/// thenable resolves, after which the element mounts as the resolved type.
pub struct LazyView {
    state: RefCell<LazyState>,
}

enum LazyState {
    Pending(Rc<Thenable<ViewType>>),
    Resolved(ViewType),
}

impl LazyView {
    pub fn new(loader: Rc<Thenable<ViewType>>) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(LazyState::Pending(loader)),
        })
    }

    /// The resolved type, or the thenable to suspend on.
    pub(crate) fn resolve(&self) -> Result<ViewType, Thrown> {
        let loader = match &*self.state.borrow() {
            LazyState::Resolved(ty) => return Ok(ty.clone()),
            LazyState::Pending(loader) => loader.clone(),
        };
        match loader.get() {
            Some(ty) => {
                *self.state.borrow_mut() = LazyState::Resolved(ty.clone());
                Ok(ty)
            }
            None => Err(Thrown::Suspend(loader)),
        }
    }
}

/// The component identity of an element - what kind of fiber it mounts as.
#[derive(Clone)]
pub enum ViewType {
    /// A platform element, named by its host tag.
    Host(Rc<str>),
    Function(Component),
    Stateful(Rc<dyn StatefulComponent>),
    Fragment,
    Provider(ContextId),
    Consumer(ContextId, ConsumerFn),
    Memo {
        inner: Rc<ViewType>,
        compare: Option<CompareFn>,
    },
    ForwardRef(RefComponent),
    Suspense,
    Offscreen,
    /// Children render into a different host container.
    Portal(HostHandle),
    Lazy(Rc<LazyView>),
    /// Rethrows its error every time it is rendered.
    Throw(ErrorValue),
    Profiler(Rc<str>),
}

pub(crate) fn same_rc<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

impl PartialEq for ViewType {
    fn eq(&self, other: &Self) -> bool {
        use ViewType::*;
        match (self, other) {
            (Host(a), Host(b)) => a == b,
            (Function(a), Function(b)) => same_rc(a, b),
            (Stateful(a), Stateful(b)) => same_rc(a, b),
            (Fragment, Fragment) => true,
            (Provider(a), Provider(b)) => a == b,
            (Consumer(a, _), Consumer(b, _)) => a == b,
            (Memo { inner: a, .. }, Memo { inner: b, .. }) => a == b,
            (ForwardRef(a), ForwardRef(b)) => same_rc(a, b),
            (Suspense, Suspense) => true,
            (Offscreen, Offscreen) => true,
            (Portal(a), Portal(b)) => same_rc(a, b),
            (Lazy(a), Lazy(b)) => same_rc(a, b),
            (Throw(a), Throw(b)) => a == b,
            (Profiler(a), Profiler(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Debug for ViewType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewType::Host(tag) => f.debug_tuple("Host").field(tag).finish(),
            ViewType::Function(_) => f.write_str("Function"),
            ViewType::Stateful(_) => f.write_str("Stateful"),
            ViewType::Fragment => f.write_str("Fragment"),
            ViewType::Provider(id) => f.debug_tuple("Provider").field(id).finish(),
            ViewType::Consumer(id, _) => f.debug_tuple("Consumer").field(id).finish(),
            ViewType::Memo { .. } => f.write_str("Memo"),
            ViewType::ForwardRef(_) => f.write_str("ForwardRef"),
            ViewType::Suspense => f.write_str("Suspense"),
            ViewType::Offscreen => f.write_str("Offscreen"),
            ViewType::Portal(_) => f.write_str("Portal"),
            ViewType::Lazy(_) => f.write_str("Lazy"),
            ViewType::Throw(e) => f.debug_tuple("Throw").field(e).finish(),
            ViewType::Profiler(id) => f.debug_tuple("Profiler").field(id).finish(),
        }
    }
}

/// An element descriptor: identity, optional key, and an immutable props
/// record.
#[derive(Clone, Debug)]
pub struct ViewElement {
    pub ty: ViewType,
    pub key: Option<Key>,
    pub props: Rc<Props>,
    pub reference: Option<HostRef>,
}

impl PartialEq for ViewElement {
    fn eq(&self, other: &Self) -> bool {
        // Props compare by identity: descriptors are immutable, so the same
        // record means the same props.
        self.ty == other.ty && self.key == other.key && Rc::ptr_eq(&self.props, &other.props)
    }
}

/// One entry in a children list.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewNode {
    Element(ViewElement),
    Text(Rc<str>),
}

impl ViewNode {
    pub fn key(&self) -> Option<&Key> {
        match self {
            ViewNode::Element(el) => el.key.as_ref(),
            ViewNode::Text(_) => None,
        }
    }
}

/// A shallow-mergeable record of named fields - the state model for stateful
/// components and the root.
///
/// Merging is field-wise union where the partial's fields win; there is no
/// deep merge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateRecord {
    fields: FxHashMap<Rc<str>, Value>,
}

impl StateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn merged(&self, partial: &StateRecord) -> StateRecord {
        let mut fields = self.fields.clone();
        for (name, value) in &partial.fields {
            fields.insert(name.clone(), value.clone());
        }
        StateRecord { fields }
    }
}

/// Builder for element descriptors.
pub struct ViewBuilder {
    ty: ViewType,
    key: Option<Key>,
    attrs: FxHashMap<Rc<str>, Value>,
    children: Vec<ViewNode>,
    fallback: Vec<ViewNode>,
    reference: Option<HostRef>,
}

impl ViewBuilder {
    pub fn new(ty: ViewType) -> Self {
        Self {
            ty,
            key: None,
            attrs: FxHashMap::default(),
            children: Vec::new(),
            fallback: Vec::new(),
            reference: None,
        }
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attr(mut self, name: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: ViewNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = ViewNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn fallback(mut self, fallback: impl IntoIterator<Item = ViewNode>) -> Self {
        self.fallback.extend(fallback);
        self
    }

    pub fn reference(mut self, reference: HostRef) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn build(self) -> ViewNode {
        ViewNode::Element(ViewElement {
            ty: self.ty,
            key: self.key,
            props: Rc::new(Props {
                attrs: self.attrs,
                children: self.children,
                fallback: self.fallback,
            }),
            reference: self.reference,
        })
    }
}

/// Start an element of any type.
pub fn element(ty: ViewType) -> ViewBuilder {
    ViewBuilder::new(ty)
}

/// Start a host element.
pub fn host(tag: impl Into<Rc<str>>) -> ViewBuilder {
    ViewBuilder::new(ViewType::Host(tag.into()))
}

/// A text descriptor.
pub fn text(value: impl Into<Rc<str>>) -> ViewNode {
    ViewNode::Text(value.into())
}

/// Wrap a closure as a function component. Call once per component and clone
/// the result; each call produces a distinct component identity.
pub fn component(body: impl Fn(&Props) -> Rendered + 'static) -> Component {
    Rc::new(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_identity_is_pointer_identity() {
        let a = component(|_| Ok(vec![]));
        let b = component(|_| Ok(vec![]));
        assert_eq!(ViewType::Function(a.clone()), ViewType::Function(a.clone()));
        assert_ne!(ViewType::Function(a), ViewType::Function(b));
    }

    #[test]
    fn shallow_merge_overwrites_fields() {
        let base = StateRecord::new().with("a", 1i64).with("b", "old");
        let partial = StateRecord::new().with("b", "new");
        let merged = base.merged(&partial);
        assert_eq!(merged.get("a"), Some(&Value::Int(1)));
        assert_eq!(merged.get("b"), Some(&Value::Text("new".into())));
    }
}
