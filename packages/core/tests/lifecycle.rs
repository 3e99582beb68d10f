//! Tests for the lifecycle of stateful components, refs, and commit
//! callbacks: everything the layout phase owes user code, in order.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::Harness;
use weft_core::prelude::*;
use weft_core::RefCleanup;

struct Tracker {
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl StatefulComponent for Tracker {
    fn render(&self, props: &Props, _state: &StateRecord) -> Rendered {
        Ok(props.children.clone())
    }

    fn did_mount(&self) {
        self.log.borrow_mut().push("mount");
    }

    fn did_update(&self, _old_props: &Props) {
        self.log.borrow_mut().push("update");
    }

    fn will_unmount(&self) {
        self.log.borrow_mut().push("unmount");
    }

    fn snapshot_before_update(&self) {
        self.log.borrow_mut().push("snapshot");
    }
}

#[test]
fn mount_update_unmount_in_order() {
    let (mut h, root) = Harness::new();

    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    let tracker: Rc<dyn StatefulComponent> = Rc::new(Tracker { log: log.clone() });

    let app = |n: i64| {
        host("root")
            .child(
                element(ViewType::Stateful(tracker.clone()))
                    .attr("n", n)
                    .child(host("inner").build())
                    .build(),
            )
            .build()
    };

    h.reconciler.update_container(Some(app(1)), root, None).unwrap();
    h.flush();
    assert_eq!(log.borrow().as_slice(), ["mount"]);

    h.reconciler.update_container(Some(app(2)), root, None).unwrap();
    h.flush();
    assert_eq!(log.borrow().as_slice(), ["mount", "snapshot", "update"]);

    let empty = host("root").build();
    h.reconciler.update_container(Some(empty), root, None).unwrap();
    h.flush();
    assert_eq!(log.borrow().as_slice(), ["mount", "snapshot", "update", "unmount"]);
}

#[test]
fn ref_cell_tracks_attachment() {
    let (mut h, root) = Harness::new();

    let (reference, cell) = HostRef::cell();
    let app = host("root")
        .child(host("target").reference(reference).build())
        .build();

    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();
    assert!(cell.borrow().is_some(), "ref attaches during layout");

    let gone = host("root").build();
    h.reconciler.update_container(Some(gone), root, None).unwrap();
    h.flush();
    assert!(cell.borrow().is_none(), "ref detaches on unmount");
}

#[test]
fn callback_refs_get_a_cleanup_call() {
    let (mut h, root) = Harness::new();

    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    let attach_log = log.clone();
    let reference = HostRef::Callback(Rc::new(move |instance| {
        if instance.is_some() {
            attach_log.borrow_mut().push("attach");
            let cleanup_log = attach_log.clone();
            Some(Rc::new(move || cleanup_log.borrow_mut().push("cleanup")) as RefCleanup)
        } else {
            attach_log.borrow_mut().push("detach");
            None
        }
    }));

    let app = host("root")
        .child(host("target").reference(reference).build())
        .build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    let gone = host("root").build();
    h.reconciler.update_container(Some(gone), root, None).unwrap();
    h.flush();

    // The cleanup returned at attach time wins over a null call.
    assert_eq!(log.borrow().as_slice(), ["attach", "cleanup"]);
}

#[test]
fn update_callbacks_run_at_commit() {
    let (mut h, root) = Harness::new();

    let fired: Rc<RefCell<u32>> = Rc::default();
    let count = fired.clone();

    let app = host("root").build();
    h.reconciler
        .update_container(Some(app), root, Some(Rc::new(move || *count.borrow_mut() += 1)))
        .unwrap();
    assert_eq!(*fired.borrow(), 0, "nothing runs before the commit");

    h.flush();
    assert_eq!(*fired.borrow(), 1);
}
