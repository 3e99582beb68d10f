mod common;

use common::{Harness, HostEvent::*};
use weft_core::prelude::*;

fn pair(first: &str, second: &str) -> ViewNode {
    host("root")
        .child(host(first).key(first).build())
        .child(host(second).key(second).build())
        .build()
}

/// Swapping two keyed siblings reuses both instances and performs exactly
/// one host move.
#[test]
fn keyed_reorder_moves_one_node() {
    let (mut h, root) = Harness::new();

    h.reconciler.update_container(Some(pair("a", "b")), root, None).unwrap();
    h.flush();
    h.take_events();

    h.reconciler.update_container(Some(pair("b", "a")), root, None).unwrap();
    h.flush();

    // No creates: both fibers matched by key. One move: `b` kept its slot
    // ratchet, `a` fell behind it and got re-appended.
    assert_eq!(
        h.take_events(),
        [AppendChild { parent: "root".into(), child: "a".into() }]
    );

    // The committed sibling chain reflects the new order with reassigned
    // indices.
    let fibers = h.reconciler.fibers();
    let root_element = fibers.get(h.reconciler.current_fiber(root)).child.unwrap();
    let first = fibers.get(root_element).child.unwrap();
    let second = fibers.get(first).sibling.unwrap();
    assert_eq!(fibers.get(first).key.as_deref(), Some("b"));
    assert_eq!(fibers.get(second).key.as_deref(), Some("a"));
    assert_eq!((fibers.get(first).index, fibers.get(second).index), (0, 1));
    assert!(fibers.get(second).sibling.is_none());
}

#[test]
fn removing_a_keyed_child() {
    let (mut h, root) = Harness::new();

    h.reconciler.update_container(Some(pair("a", "b")), root, None).unwrap();
    h.flush();
    h.take_events();

    let app = host("root").child(host("a").key("a").build()).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    assert_eq!(
        h.take_events(),
        [RemoveChild { parent: "root".into(), child: "b".into() }]
    );
}

/// Inserting into the middle of a keyed list lands in front of the stable
/// successor rather than re-appending the tail.
#[test]
fn keyed_insertion_uses_insert_before() {
    let (mut h, root) = Harness::new();

    h.reconciler.update_container(Some(pair("a", "c")), root, None).unwrap();
    h.flush();
    h.take_events();

    let app = host("root")
        .child(host("a").key("a").build())
        .child(host("b").key("b").build())
        .child(host("c").key("c").build())
        .build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    assert_eq!(
        h.take_events(),
        [
            CreateInstance("b".into()),
            InsertBefore { parent: "root".into(), child: "b".into(), before: "c".into() },
        ]
    );
}

/// An unkeyed positional type change replaces the node in place.
#[test]
fn positional_type_change_replaces() {
    let (mut h, root) = Harness::new();

    let app = host("root").child(host("span").build()).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();
    h.take_events();

    let app = host("root").child(host("div").build()).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    assert_eq!(
        h.take_events(),
        [
            CreateInstance("div".into()),
            RemoveChild { parent: "root".into(), child: "span".into() },
            AppendChild { parent: "root".into(), child: "div".into() },
        ]
    );
}

/// Attribute-only changes patch the instance without touching structure.
#[test]
fn attribute_change_commits_an_update() {
    let (mut h, root) = Harness::new();

    let app = host("root").child(host("a").attr("title", "one").build()).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();
    h.take_events();

    let app = host("root").child(host("a").attr("title", "two").build()).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    assert_eq!(h.take_events(), [CommitUpdate { tag: "a".into() }]);
}

#[test]
fn text_update_patches_in_place() {
    let (mut h, root) = Harness::new();

    let app = host("p").child(text("before")).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();
    h.take_events();

    let app = host("p").child(text("after")).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    assert_eq!(
        h.take_events(),
        [CommitTextUpdate { old: "before".into(), new: "after".into() }]
    );
}
