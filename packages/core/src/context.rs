//! Context - values provided high in the tree and read far below without
//! threading props through every level.
//!
//! Providers push onto a value stack while their subtree renders and pop on
//! complete (or unwind - the stack must survive abandoned renders). A fiber
//! that reads a context records the observation in its `dependencies` so a
//! later provider change can invalidate it even when props are identical.

use slab::Slab;

use crate::lanes::Lanes;
use crate::nodes::Value;

/// Identity of a context created with `Reconciler::create_context`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(pub usize);

/// Per-fiber record of every context read during its last render.
#[derive(Clone, Debug, Default)]
pub struct Dependencies {
    pub contexts: Vec<(ContextId, Value)>,
    pub lanes: Lanes,
}

impl Dependencies {
    pub fn observes(&self, id: ContextId) -> bool {
        self.contexts.iter().any(|(ctx, _)| *ctx == id)
    }
}

/// Default values plus the provider stack for the in-flight render.
#[derive(Default)]
pub(crate) struct ContextRegistry {
    defaults: Slab<Value>,
    stack: Vec<(ContextId, Value)>,
}

impl ContextRegistry {
    pub fn register(&mut self, default: Value) -> ContextId {
        ContextId(self.defaults.insert(default))
    }

    /// The value a consumer sees right now: innermost provider, else default.
    pub fn current(&self, id: ContextId) -> Value {
        self.stack
            .iter()
            .rev()
            .find(|(ctx, _)| *ctx == id)
            .map(|(_, value)| value.clone())
            .or_else(|| self.defaults.get(id.0).cloned())
            .unwrap_or(Value::Null)
    }

    pub fn push(&mut self, id: ContextId, value: Value) {
        self.stack.push((id, value));
    }

    /// Pop the innermost provider frame for `id`. Complete and unwind both
    /// call this, exactly once per push.
    pub fn pop(&mut self, id: ContextId) {
        match self.stack.pop() {
            Some((popped, _)) if popped == id => {}
            other => {
                debug_assert!(false, "provider stack imbalance: popped {other:?}, wanted {id:?}");
            }
        }
    }

    /// Renders can be abandoned mid-tree; throw away whatever is left.
    pub fn reset(&mut self) {
        self.stack.clear();
    }
}
