mod common;

use common::{Harness, HostEvent::*};
use weft_core::prelude::*;

/// Initial mount: children are created bottom-up, wired into their parent
/// while detached, and the finished tree is attached to the container in a
/// single placement.
#[test]
fn initial_mount_creates_then_attaches() {
    let (mut h, root) = Harness::new();

    let app = host("root")
        .child(host("a").key("x").build())
        .child(host("b").key("y").build())
        .build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    assert_eq!(
        h.take_events(),
        [
            CreateInstance("a".into()),
            CreateInstance("b".into()),
            CreateInstance("root".into()),
            AppendInitialChild { parent: "root".into(), child: "a".into() },
            AppendInitialChild { parent: "root".into(), child: "b".into() },
            AppendToContainer { child: "root".into() },
        ]
    );

    // Committed and quiescent: nothing left to render.
    assert!(h.reconciler.pending_lanes(root).is_empty());
}

#[test]
fn text_children_mount_as_text_instances() {
    let (mut h, root) = Harness::new();

    let app = host("p").child(text("hello")).child(text("world")).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    assert_eq!(
        h.take_events(),
        [
            CreateText("hello".into()),
            CreateText("world".into()),
            CreateInstance("p".into()),
            AppendInitialChild { parent: "p".into(), child: "\"hello\"".into() },
            AppendInitialChild { parent: "p".into(), child: "\"world\"".into() },
            AppendToContainer { child: "p".into() },
        ]
    );
}

/// Function components and fragments are invisible to the host: only their
/// host descendants produce events.
#[test]
fn virtual_fibers_leave_no_trace() {
    let (mut h, root) = Harness::new();

    let greeting = component(|_| Ok(vec![host("span").child(text("hi")).build()]));
    let app = host("root")
        .child(
            element(ViewType::Fragment)
                .child(element(ViewType::Function(greeting)).build())
                .build(),
        )
        .build();

    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    assert_eq!(
        h.take_events(),
        [
            CreateText("hi".into()),
            CreateInstance("span".into()),
            AppendInitialChild { parent: "span".into(), child: "\"hi\"".into() },
            CreateInstance("root".into()),
            AppendInitialChild { parent: "root".into(), child: "span".into() },
            AppendToContainer { child: "root".into() },
        ]
    );
}

/// Rendering `None` unmounts everything.
#[test]
fn clearing_the_root_removes_the_tree() {
    let (mut h, root) = Harness::new();

    let app = host("root").child(text("content")).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();
    h.take_events();

    h.reconciler.update_container(None, root, None).unwrap();
    h.flush();

    assert_eq!(h.take_events(), [RemoveFromContainer { child: "root".into() }]);
}
