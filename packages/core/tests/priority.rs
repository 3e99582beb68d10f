mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::{Harness, HostEvent};
use weft_core::prelude::*;

/// A sync update scheduled *after* a pending transition preempts it; the
/// transition then re-renders on its own lane with the sync update's state
/// still applied (the rebase discipline).
#[test]
fn sync_update_preempts_pending_transition() {
    let (mut h, root) = Harness::new();

    let renders = Rc::new(Cell::new(0u32));
    let counter = renders.clone();
    let probe = component(move |props| {
        counter.set(counter.get() + 1);
        let label = props.text_attr("label").unwrap_or_default().to_string();
        Ok(vec![text(label)])
    });

    let app = |label: &str| {
        host("root")
            .child(
                element(ViewType::Function(probe.clone()))
                    .attr("label", label)
                    .build(),
            )
            .build()
    };

    h.reconciler.update_container(Some(app("init")), root, None).unwrap();
    h.flush();
    h.take_events();
    assert_eq!(renders.get(), 1);

    // LOW: a transition-lane update, not yet rendered.
    h.reconciler.start_transition(|r| {
        r.update_container(Some(app("low")), root, None).unwrap();
    });

    // HIGH: a sync update scheduled afterwards; flush_sync commits it before
    // the transition gets a chance.
    h.reconciler
        .flush_sync(|r| {
            r.update_container(Some(app("high")), root, None).unwrap();
        })
        .unwrap();

    let events = h.take_events();
    assert!(
        events.contains(&HostEvent::CommitTextUpdate { old: "init".into(), new: "high".into() }),
        "sync render must commit first, got {events:?}"
    );
    // "low" never hit the host: its lane was skipped, not rendered stale.
    assert!(!events
        .iter()
        .any(|e| matches!(e, HostEvent::CommitTextUpdate { new, .. } if new == "low")));

    // The skipped transition lane is still pending and re-renders later.
    assert!(!h.reconciler.pending_lanes(root).is_empty());
    h.flush();
    assert!(h.reconciler.pending_lanes(root).is_empty());

    // The rebase replayed [low, high] in order, so the final element is the
    // sync one again - identical props, so the probe bailed out entirely.
    assert_eq!(renders.get(), 2);
    assert!(h.take_events().is_empty());
}

/// Two updates inside one transition scope share a lane and commit together.
#[test]
fn transition_updates_batch_onto_one_lane() {
    let (mut h, root) = Harness::new();

    let app = |label: &str| host("root").attr("label", label).build();

    h.reconciler.update_container(Some(app("a")), root, None).unwrap();
    h.flush();
    h.take_events();

    h.reconciler.start_transition(|r| {
        r.update_container(Some(app("b")), root, None).unwrap();
        r.update_container(Some(app("c")), root, None).unwrap();
    });
    h.flush();

    // One render, one commit: the intermediate "b" was never observable.
    assert_eq!(h.take_events(), [HostEvent::CommitUpdate { tag: "root".into() }]);
}
