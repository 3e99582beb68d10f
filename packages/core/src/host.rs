//! The host boundary.
//!
//! The core has no idea what a platform node is. Everything it knows about
//! the outside world goes through two traits: [`HostConfig`], the imperative
//! surface for creating and mutating platform nodes, and [`HostScheduler`],
//! the clock and cooperative task queue the work loop yields to.
//!
//! Host instances are opaque `Rc<dyn Any>` handles. The reconciler stores
//! and forwards them but never looks inside; only the adapter that created a
//! handle downcasts it.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::nodes::Props;
use crate::root::RootId;

/// An opaque handle to a host-side resource (instance, text node, container).
pub type HostHandle = Rc<dyn Any>;

/// Opaque context threaded down the tree during the render phase (e.g. an
/// XML namespace on web hosts).
pub type HostContext = Rc<dyn Any>;

/// Opaque diff payload produced by [`HostConfig::prepare_update`] and handed
/// back to [`HostConfig::commit_update`].
pub type HostUpdatePayload = Rc<dyn Any>;

/// Cleanup returned by a callback ref; runs when the ref detaches.
pub type RefCleanup = Rc<dyn Fn()>;

/// An imperative handle requested by user code, filled in during the layout
/// phase and cleared when the fiber unmounts.
#[derive(Clone)]
pub enum HostRef {
    /// A cell the reconciler writes the instance into.
    Cell(Rc<RefCell<Option<HostHandle>>>),
    /// A callback invoked with `Some(instance)` on attach. It may return a
    /// cleanup to run on detach; otherwise it is re-invoked with `None`.
    Callback(Rc<dyn Fn(Option<HostHandle>) -> Option<RefCleanup>>),
}

impl HostRef {
    pub fn cell() -> (Self, Rc<RefCell<Option<HostHandle>>>) {
        let cell = Rc::new(RefCell::new(None));
        (HostRef::Cell(cell.clone()), cell)
    }
}

impl std::fmt::Debug for HostRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostRef::Cell(_) => f.write_str("HostRef::Cell"),
            HostRef::Callback(_) => f.write_str("HostRef::Callback"),
        }
    }
}

/// The platform adapter. One implementation per renderer (web, native, test).
///
/// Methods are called in a strict discipline: `create_*` and
/// `append_initial_child` only during the render phase's complete step, the
/// `commit_*`/structural methods only during the commit phase, and never
/// reentrantly.
pub trait HostConfig {
    fn get_root_host_context(&mut self, container: &HostHandle) -> HostContext;

    fn get_child_host_context(&mut self, parent: &HostContext, ty: &str) -> HostContext;

    fn create_instance(
        &mut self,
        ty: &str,
        props: &Props,
        root_container: &HostHandle,
        host_context: &HostContext,
    ) -> HostHandle;

    fn create_text_instance(
        &mut self,
        text: &str,
        root_container: &HostHandle,
        host_context: &HostContext,
    ) -> HostHandle;

    /// Attach a child to a parent that is not in the host tree yet.
    fn append_initial_child(&mut self, parent: &HostHandle, child: &HostHandle);

    /// Final setup after all initial children are attached. Returning `true`
    /// requests an `UPDATE` effect on the fiber so the host gets a commit
    /// callback for this instance (auto-focus and friends).
    fn finalize_initial_children(&mut self, instance: &HostHandle, ty: &str, props: &Props)
        -> bool;

    /// Diff two prop records. `None` means nothing to do at commit.
    fn prepare_update(
        &mut self,
        instance: &HostHandle,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Option<HostUpdatePayload>;

    fn commit_update(
        &mut self,
        instance: &HostHandle,
        payload: &HostUpdatePayload,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
    );

    fn commit_text_update(&mut self, text_instance: &HostHandle, old: &str, new: &str);

    fn append_child(&mut self, parent: &HostHandle, child: &HostHandle);

    fn append_child_to_container(&mut self, container: &HostHandle, child: &HostHandle);

    fn insert_before(&mut self, parent: &HostHandle, child: &HostHandle, before: &HostHandle);

    fn insert_in_container_before(
        &mut self,
        container: &HostHandle,
        child: &HostHandle,
        before: &HostHandle,
    );

    fn remove_child(&mut self, parent: &HostHandle, child: &HostHandle);

    fn remove_child_from_container(&mut self, container: &HostHandle, child: &HostHandle);

    fn reset_text_content(&mut self, _instance: &HostHandle) {}

    /// Called once before the mutation phase touches the host.
    fn prepare_for_commit(&mut self, _container: &HostHandle) {}

    /// Called once after the mutation phase, before layout.
    fn reset_after_commit(&mut self, _container: &HostHandle) {}
}

/// Priority levels understood by the host's task queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchedulerPriority {
    Immediate,
    UserBlocking,
    Normal,
    Idle,
}

/// What a scheduled callback should do when it fires. The host hands the
/// task back to [`crate::Reconciler::run_task`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerTask {
    /// Drain the root-schedule list and (re)arm per-root callbacks.
    ProcessRootSchedule,
    /// Render whatever work is pending on one root.
    RenderRoot(RootId),
    /// Run effects deferred past the commit.
    FlushPassiveEffects,
}

/// Identifies a scheduled callback so it can be cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub u64);

/// The external clock and cooperative yield primitive.
///
/// The reconciler never blocks and never sleeps: it asks `should_yield` at
/// safepoints and, when work remains, schedules a callback for the host to
/// fire later. The embedder's event loop pops fired tasks and feeds them to
/// `Reconciler::run_task`.
pub trait HostScheduler {
    /// Monotonic milliseconds.
    fn now(&mut self) -> u64;

    /// `true` when the time slice is over and the work loop should yield.
    fn should_yield(&mut self) -> bool;

    fn schedule_callback(
        &mut self,
        priority: SchedulerPriority,
        task: SchedulerTask,
    ) -> CallbackHandle;

    fn cancel_callback(&mut self, handle: CallbackHandle);

    /// Whether the host has a microtask queue (runs before the next task).
    fn supports_microtasks(&self) -> bool {
        false
    }

    /// Queue a microtask. Hosts without microtasks fall back to an
    /// immediate-priority callback.
    fn schedule_microtask(&mut self, task: SchedulerTask) {
        self.schedule_callback(SchedulerPriority::Immediate, task);
    }
}
