mod common;

use std::rc::Rc;

use common::{Harness, HostEvent};
use weft_core::prelude::*;
use weft_core::SchedulerPriority;

/// Renders one text node from two state fields, so a skipped lane's effect
/// is visible the moment it finally lands.
struct Panel;

impl StatefulComponent for Panel {
    fn render(&self, _props: &Props, state: &StateRecord) -> Rendered {
        let t = match state.get("t") {
            Some(Value::Text(t)) => t.to_string(),
            _ => "none".to_string(),
        };
        let s = match state.get("s") {
            Some(Value::Int(s)) => *s,
            _ => -1,
        };
        Ok(vec![text(format!("t={t} s={s}"))])
    }
}

/// A transition starved by a steady stream of sync updates still commits
/// once its expiration budget (~5s) elapses: the starved lane is marked
/// expired and rendered synchronously alongside the urgent work.
#[test]
fn starved_transition_expires_and_commits() {
    let (mut h, root) = Harness::new();

    let app = element(ViewType::Stateful(Rc::new(Panel))).build();
    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();
    h.take_events();

    let panel = h
        .reconciler
        .fibers()
        .get(h.reconciler.current_fiber(root))
        .child
        .expect("panel fiber is mounted");

    // The low-priority update that will starve.
    h.reconciler.start_transition(|r| {
        r.set_state(panel, StateRecord::new().with("t", "low")).unwrap();
    });

    let mut committed_at = None;
    for tick in 0..70u64 {
        h.advance(100);

        // Urgent work keeps arriving every 100ms, and the host is too busy
        // to ever service the transition's normal-priority callback.
        h.reconciler
            .flush_sync(|r| {
                r.set_state(panel, StateRecord::new().with("s", tick as i64)).unwrap();
            })
            .unwrap();
        h.flush_at_most(SchedulerPriority::UserBlocking);

        let saw_low = h.take_events().iter().any(|e| {
            matches!(e, HostEvent::CommitTextUpdate { new, .. } if new.contains("t=low"))
        });
        if saw_low {
            committed_at = Some((tick + 1) * 100);
            break;
        }
    }

    let committed_at = committed_at.expect("the transition never committed");
    assert!(
        committed_at >= 5_000,
        "transition committed before its budget expired (at {committed_at}ms)"
    );
    assert!(
        committed_at <= 6_000,
        "expiration should force the commit promptly (at {committed_at}ms)"
    );

    // And the rebase held: the urgent field kept its latest value.
    assert!(h.reconciler.pending_lanes(root).is_empty());
}
