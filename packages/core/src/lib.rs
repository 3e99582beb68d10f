#![doc = include_str!("../README.md")]

pub(crate) mod arena;
pub(crate) mod begin;
pub(crate) mod children;
pub(crate) mod commit;
pub(crate) mod complete;
pub(crate) mod context;
pub(crate) mod error;
pub(crate) mod fiber;
pub(crate) mod flags;
pub(crate) mod host;
pub(crate) mod lanes;
pub(crate) mod nodes;
pub(crate) mod reconciler;
pub(crate) mod root;
pub(crate) mod scheduler;
pub(crate) mod suspense;
pub(crate) mod update_queue;
pub(crate) mod work_loop;

pub(crate) mod innerlude {
    pub use crate::arena::{FiberArena, FiberId};
    pub use crate::context::{ContextId, Dependencies};
    pub use crate::error::{ErrorHook, ErrorValue, ReconcileError, Thrown};
    pub use crate::fiber::{Fiber, FiberProps, FiberTag, StateNode};
    pub use crate::flags::{ExecutionContext, FiberFlags, Mode};
    pub use crate::host::{
        CallbackHandle, HostConfig, HostContext, HostHandle, HostRef, HostScheduler,
        HostUpdatePayload, RefCleanup, SchedulerPriority, SchedulerTask,
    };
    pub use crate::lanes::{Lane, Lanes, Timestamp, NO_TIMESTAMP, TOTAL_LANES};
    pub use crate::nodes::{
        component, element, host, text, CompareFn, Component, ConsumerFn, Key, LazyView, Props,
        RefComponent, Rendered, StateRecord, StatefulComponent, Value, ViewBuilder, ViewElement,
        ViewNode, ViewType,
    };
    pub use crate::reconciler::Reconciler;
    pub use crate::root::{FiberRoot, RootId, RootOptions, RootTag};
    pub use crate::suspense::{Thenable, Wakeable};
    pub use crate::update_queue::{Update, UpdateCallback, UpdatePayload, UpdateQueue, UpdateTag};
    pub use crate::work_loop::{RootExitStatus, SuspendedReason};
}

pub use crate::innerlude::{
    component, element, host, text, CallbackHandle, CompareFn, Component, ConsumerFn, ContextId,
    Dependencies, ErrorHook, ErrorValue, Fiber, FiberArena, FiberFlags, FiberId, FiberProps,
    FiberRoot, FiberTag, HostConfig, HostContext, HostHandle, HostRef, HostScheduler,
    HostUpdatePayload, Key, Lane, Lanes, LazyView, Mode, Props, ReconcileError, Reconciler,
    RefCleanup, RefComponent, Rendered, RootId, RootOptions, RootTag, SchedulerPriority,
    SchedulerTask, StateNode, StateRecord, StatefulComponent, Thenable, Thrown, Update,
    UpdateCallback, UpdatePayload, UpdateTag, Value, ViewBuilder, ViewElement, ViewNode, ViewType,
    Wakeable,
};

pub mod prelude {
    pub use crate::innerlude::{
        component, element, host, text, Component, ErrorValue, HostRef, Props, Reconciler,
        Rendered, RootId, RootOptions, RootTag, StateRecord, StatefulComponent, Thenable, Thrown,
        Value, ViewNode, ViewType,
    };
}

pub mod exports {
    //! Important dependencies that are used by the rest of the library
    //! Feel free to just add the dependencies in your own Cargo.toml
    pub use futures_channel;
    pub use slab;
}
