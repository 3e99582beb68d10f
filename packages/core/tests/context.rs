mod common;

use std::rc::Rc;

use common::{Harness, HostEvent::*};
use weft_core::prelude::*;
use weft_core::ConsumerFn;

/// A provider value change must reach its consumers even when everything
/// between them is memoized: the observation recorded in the consumer's
/// dependencies defeats the bailout.
#[test]
fn provider_change_pierces_a_memo_bailout() {
    let (mut h, root) = Harness::new();

    let theme = h.reconciler.create_context(Value::Text("light".into()));

    let consumer_body: ConsumerFn = Rc::new(|value| {
        let label = match value {
            Value::Text(t) => t.to_string(),
            _ => "?".to_string(),
        };
        Ok(vec![text(label)])
    });

    let body = consumer_body.clone();
    let pure = component(move |_| {
        Ok(vec![element(ViewType::Consumer(theme, body.clone())).build()])
    });
    let memoized = ViewType::Memo {
        inner: Rc::new(ViewType::Function(pure)),
        compare: None,
    };

    let app = |value: &str| {
        host("root")
            .child(
                element(ViewType::Provider(theme))
                    .attr("value", value)
                    .child(element(memoized.clone()).build())
                    .build(),
            )
            .build()
    };

    h.reconciler.update_container(Some(app("light")), root, None).unwrap();
    h.flush();
    let events = h.take_events();
    assert!(events.contains(&CreateText("light".into())), "got {events:?}");

    h.reconciler.update_container(Some(app("dark")), root, None).unwrap();
    h.flush();

    assert_eq!(
        h.take_events(),
        [CommitTextUpdate { old: "light".into(), new: "dark".into() }]
    );
}

/// Without a provider the consumer sees the context's default value.
#[test]
fn consumer_falls_back_to_the_default() {
    let (mut h, root) = Harness::new();

    let theme = h.reconciler.create_context(Value::Text("default-theme".into()));
    let consumer_body: ConsumerFn = Rc::new(|value| {
        let label = match value {
            Value::Text(t) => t.to_string(),
            _ => "?".to_string(),
        };
        Ok(vec![text(label)])
    });

    let app = host("root")
        .child(element(ViewType::Consumer(theme, consumer_body)).build())
        .build();

    h.reconciler.update_container(Some(app), root, None).unwrap();
    h.flush();

    let events = h.take_events();
    assert!(events.contains(&CreateText("default-theme".into())), "got {events:?}");
}
