//! Shared test fixture: a recording host adapter and a hand-cranked
//! scheduler with a virtual clock.
//!
//! Tests assert on the exact stream of host events a scenario produces, the
//! same way a renderer would consume them.

// Each test binary compiles its own copy; not all of them use every helper.
#![allow(dead_code)]

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use weft_core::{
    CallbackHandle, HostConfig, HostContext, HostHandle, HostScheduler, HostUpdatePayload, Props,
    Reconciler, RootId, RootOptions, RootTag, SchedulerPriority, SchedulerTask,
};

/// One call the reconciler made into the host, with instances flattened to
/// their labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    CreateInstance(String),
    CreateText(String),
    AppendInitialChild { parent: String, child: String },
    AppendChild { parent: String, child: String },
    AppendToContainer { child: String },
    InsertBefore { parent: String, child: String, before: String },
    InsertInContainerBefore { child: String, before: String },
    RemoveChild { parent: String, child: String },
    RemoveFromContainer { child: String },
    CommitUpdate { tag: String },
    CommitTextUpdate { old: String, new: String },
}

pub struct TestInstance {
    pub tag: String,
    pub text: RefCell<String>,
    pub is_text: bool,
}

fn label(handle: &HostHandle) -> String {
    match handle.downcast_ref::<TestInstance>() {
        Some(instance) if instance.is_text => format!("\"{}\"", instance.text.borrow()),
        Some(instance) => instance.tag.clone(),
        None => "container".to_string(),
    }
}

#[derive(Default)]
pub struct TestHost {
    pub events: Rc<RefCell<Vec<HostEvent>>>,
}

impl HostConfig for TestHost {
    fn get_root_host_context(&mut self, _container: &HostHandle) -> HostContext {
        Rc::new(())
    }

    fn get_child_host_context(&mut self, _parent: &HostContext, _ty: &str) -> HostContext {
        Rc::new(())
    }

    fn create_instance(
        &mut self,
        ty: &str,
        _props: &Props,
        _root_container: &HostHandle,
        _host_context: &HostContext,
    ) -> HostHandle {
        self.events
            .borrow_mut()
            .push(HostEvent::CreateInstance(ty.to_string()));
        Rc::new(TestInstance {
            tag: ty.to_string(),
            text: RefCell::new(String::new()),
            is_text: false,
        })
    }

    fn create_text_instance(
        &mut self,
        text: &str,
        _root_container: &HostHandle,
        _host_context: &HostContext,
    ) -> HostHandle {
        self.events
            .borrow_mut()
            .push(HostEvent::CreateText(text.to_string()));
        Rc::new(TestInstance {
            tag: String::new(),
            text: RefCell::new(text.to_string()),
            is_text: true,
        })
    }

    fn append_initial_child(&mut self, parent: &HostHandle, child: &HostHandle) {
        self.events.borrow_mut().push(HostEvent::AppendInitialChild {
            parent: label(parent),
            child: label(child),
        });
    }

    fn finalize_initial_children(
        &mut self,
        _instance: &HostHandle,
        _ty: &str,
        _props: &Props,
    ) -> bool {
        false
    }

    fn prepare_update(
        &mut self,
        _instance: &HostHandle,
        _ty: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Option<HostUpdatePayload> {
        if old_props.attrs != new_props.attrs {
            Some(Rc::new(()))
        } else {
            None
        }
    }

    fn commit_update(
        &mut self,
        _instance: &HostHandle,
        _payload: &HostUpdatePayload,
        ty: &str,
        _old_props: &Props,
        _new_props: &Props,
    ) {
        self.events
            .borrow_mut()
            .push(HostEvent::CommitUpdate { tag: ty.to_string() });
    }

    fn commit_text_update(&mut self, text_instance: &HostHandle, old: &str, new: &str) {
        if let Some(instance) = text_instance.downcast_ref::<TestInstance>() {
            *instance.text.borrow_mut() = new.to_string();
        }
        self.events.borrow_mut().push(HostEvent::CommitTextUpdate {
            old: old.to_string(),
            new: new.to_string(),
        });
    }

    fn append_child(&mut self, parent: &HostHandle, child: &HostHandle) {
        self.events.borrow_mut().push(HostEvent::AppendChild {
            parent: label(parent),
            child: label(child),
        });
    }

    fn append_child_to_container(&mut self, _container: &HostHandle, child: &HostHandle) {
        self.events
            .borrow_mut()
            .push(HostEvent::AppendToContainer { child: label(child) });
    }

    fn insert_before(&mut self, parent: &HostHandle, child: &HostHandle, before: &HostHandle) {
        self.events.borrow_mut().push(HostEvent::InsertBefore {
            parent: label(parent),
            child: label(child),
            before: label(before),
        });
    }

    fn insert_in_container_before(
        &mut self,
        _container: &HostHandle,
        child: &HostHandle,
        before: &HostHandle,
    ) {
        self.events.borrow_mut().push(HostEvent::InsertInContainerBefore {
            child: label(child),
            before: label(before),
        });
    }

    fn remove_child(&mut self, parent: &HostHandle, child: &HostHandle) {
        self.events.borrow_mut().push(HostEvent::RemoveChild {
            parent: label(parent),
            child: label(child),
        });
    }

    fn remove_child_from_container(&mut self, _container: &HostHandle, child: &HostHandle) {
        self.events
            .borrow_mut()
            .push(HostEvent::RemoveFromContainer { child: label(child) });
    }
}

#[derive(Default)]
pub struct SchedulerState {
    pub now: u64,
    pub force_yield: bool,
    next_handle: u64,
    tasks: Vec<(CallbackHandle, SchedulerPriority, SchedulerTask)>,
    microtasks: VecDeque<SchedulerTask>,
}

impl SchedulerState {
    fn pop_task(&mut self, at_most: SchedulerPriority) -> Option<SchedulerTask> {
        if let Some(task) = self.microtasks.pop_front() {
            return Some(task);
        }
        let best = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, (_, priority, _))| *priority <= at_most)
            .min_by_key(|(index, (_, priority, _))| (*priority, *index))
            .map(|(index, _)| index)?;
        Some(self.tasks.remove(best).2)
    }
}

pub struct TestScheduler(pub Rc<RefCell<SchedulerState>>);

impl HostScheduler for TestScheduler {
    fn now(&mut self) -> u64 {
        self.0.borrow().now
    }

    fn should_yield(&mut self) -> bool {
        self.0.borrow().force_yield
    }

    fn schedule_callback(
        &mut self,
        priority: SchedulerPriority,
        task: SchedulerTask,
    ) -> CallbackHandle {
        let mut state = self.0.borrow_mut();
        state.next_handle += 1;
        let handle = CallbackHandle(state.next_handle);
        state.tasks.push((handle, priority, task));
        handle
    }

    fn cancel_callback(&mut self, handle: CallbackHandle) {
        self.0.borrow_mut().tasks.retain(|(h, _, _)| *h != handle);
    }

    fn supports_microtasks(&self) -> bool {
        true
    }

    fn schedule_microtask(&mut self, task: SchedulerTask) {
        self.0.borrow_mut().microtasks.push_back(task);
    }
}

/// A reconciler wired to the recording host and manual scheduler, plus the
/// shared handles the test keeps.
pub struct Harness {
    pub reconciler: Reconciler,
    pub events: Rc<RefCell<Vec<HostEvent>>>,
    pub scheduler: Rc<RefCell<SchedulerState>>,
}

impl Harness {
    pub fn new() -> (Self, RootId) {
        Self::with_options(RootOptions::default())
    }

    pub fn with_options(options: RootOptions) -> (Self, RootId) {
        let events: Rc<RefCell<Vec<HostEvent>>> = Rc::default();
        let scheduler: Rc<RefCell<SchedulerState>> = Rc::default();

        let host = TestHost { events: events.clone() };
        let mut reconciler = Reconciler::new(
            Box::new(host),
            Box::new(TestScheduler(scheduler.clone())),
        );
        let container: HostHandle = Rc::new(());
        let root = reconciler.create_container(container, RootTag::Concurrent, options);

        (
            Harness {
                reconciler,
                events,
                scheduler,
            },
            root,
        )
    }

    /// Pump fired tasks (microtasks first, then by priority) until the
    /// scheduler queue is empty.
    pub fn flush(&mut self) {
        self.flush_at_most(SchedulerPriority::Idle);
    }

    /// Like `flush`, but leave tasks below `at_most` sitting in the queue -
    /// a host too busy to service background work.
    pub fn flush_at_most(&mut self, at_most: SchedulerPriority) {
        self.reconciler.pump();
        for _ in 0..1_000 {
            let task = self.scheduler.borrow_mut().pop_task(at_most);
            match task {
                Some(task) => self.reconciler.run_task(task).expect("task failed"),
                None => return,
            }
        }
        panic!("scheduler did not go idle after 1000 tasks");
    }

    pub fn advance(&mut self, ms: u64) {
        self.scheduler.borrow_mut().now += ms;
    }

    /// Drain and return everything the host recorded since the last call.
    pub fn take_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

/// Wrap any value as an opaque host handle (portal containers and the like).
#[allow(dead_code)]
pub fn any_handle<T: 'static>(value: T) -> Rc<dyn Any> {
    Rc::new(value)
}
