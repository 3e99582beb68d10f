mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{Harness, HostEvent::*};
use weft_core::prelude::*;

/// Shows its children until a descendant error is captured into state.
struct Boundary;

impl StatefulComponent for Boundary {
    fn render(&self, props: &Props, state: &StateRecord) -> Rendered {
        match state.get("error") {
            Some(Value::Text(msg)) => Ok(vec![text(format!("caught: {msg}"))]),
            _ => Ok(props.children.clone()),
        }
    }

    fn state_from_error(&self, error: &ErrorValue) -> Option<StateRecord> {
        Some(StateRecord::new().with("error", error.message()))
    }
}

#[test]
fn boundary_captures_and_renders_fallback() {
    let caught: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = caught.clone();
    let options = RootOptions {
        on_caught_error: Some(Rc::new(move |e| sink.borrow_mut().push(e.message().into()))),
        ..RootOptions::default()
    };
    let (mut h, root) = Harness::with_options(options);

    // A probe *after* the throwing child: it must not render in the failed
    // pass, and the fallback pass doesn't include it at all.
    let probe_renders = Rc::new(Cell::new(0u32));
    let counter = probe_renders.clone();
    let probe = component(move |_| {
        counter.set(counter.get() + 1);
        Ok(vec![])
    });

    let app = host("root")
        .child(
            element(ViewType::Stateful(Rc::new(Boundary)))
                .child(element(ViewType::Throw(ErrorValue::new("boom"))).build())
                .child(element(ViewType::Function(probe)).build())
                .build(),
        )
        .build();

    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    assert_eq!(
        h.take_events(),
        [
            CreateText("caught: boom".into()),
            CreateInstance("root".into()),
            AppendInitialChild { parent: "root".into(), child: "\"caught: boom\"".into() },
            AppendToContainer { child: "root".into() },
        ]
    );
    assert_eq!(caught.borrow().as_slice(), ["boom"]);
    assert_eq!(probe_renders.get(), 0);
}

/// Without a boundary the root captures: the tree is torn down and the
/// error reported as uncaught.
#[test]
fn uncaught_error_clears_the_root() {
    let uncaught: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = uncaught.clone();
    let options = RootOptions {
        on_uncaught_error: Some(Rc::new(move |e| sink.borrow_mut().push(e.message().into()))),
        ..RootOptions::default()
    };
    let (mut h, root) = Harness::with_options(options);

    let good = host("root").child(text("fine")).build();
    h.reconciler.update_container(Some(good), root, None).unwrap();
    h.flush();
    h.take_events();

    let bad = host("root")
        .child(element(ViewType::Throw(ErrorValue::new("broken"))).build())
        .build();
    h.reconciler.update_container(Some(bad), root, None).unwrap();
    h.flush();

    assert_eq!(h.take_events(), [RemoveFromContainer { child: "root".into() }]);
    assert_eq!(uncaught.borrow().as_slice(), ["broken"]);
}

/// A boundary recovers per incident: after capturing once it renders its
/// fallback on every subsequent update until remounted.
#[test]
fn captured_boundary_stays_on_fallback() {
    let (mut h, root) = Harness::new();

    // One component identity across renders, as a real app would have.
    let boundary: Rc<dyn StatefulComponent> = Rc::new(Boundary);
    let app = move |label: &str| {
        host("root")
            .child(
                element(ViewType::Stateful(boundary.clone()))
                    .key("b")
                    .child(element(ViewType::Throw(ErrorValue::new("boom"))).build())
                    .build(),
            )
            .attr("label", label)
            .build()
    };

    h.reconciler.update_container(Some(app("one")), root, None).unwrap();
    h.flush();
    let events = h.take_events();
    assert!(events.contains(&CreateText("caught: boom".into())));

    // Another update: the captured state persists, the fallback stays, no
    // second capture pass runs.
    h.reconciler.update_container(Some(app("two")), root, None).unwrap();
    h.flush();
    let events = h.take_events();
    assert!(
        !events.iter().any(|e| matches!(e, CreateText(_))),
        "fallback must be stable, got {events:?}"
    );
}
