use std::{cell::RefCell, rc::Rc};

use serde_json::json;
use shared::{
    error::{ErrorCode, ErrorKind},
    event::handler,
};

use super::*;

fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Listener) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let make = move |label: &str| {
        let sink = sink.clone();
        let label = label.to_string();
        listener(move |args| {
            sink.borrow_mut().push(format!("{label}:{}", Value::Array(args.to_vec())));
            Ok(())
        })
    };
    (log, make)
}

#[test]
fn subscribers_run_in_subscription_order() {
    let bus = MessageBus::new();
    let (log, make) = recorder();
    bus.subscribe_listener("/news", make("a")).expect("a");
    bus.subscribe_listener("/news", make("b")).expect("b");
    bus.subscribe_listener("/other", make("c")).expect("c");

    bus.publish("/news", json!("hello")).expect("publish");
    assert_eq!(*log.borrow(), vec![r#"a:["hello"]"#, r#"b:["hello"]"#]);
}

#[test]
fn array_payloads_spread_into_arguments() {
    let bus = MessageBus::new();
    let (log, make) = recorder();
    bus.subscribe_listener("/pair", make("s")).expect("subscribe");

    bus.publish("/pair", json!([1, "two"])).expect("publish");
    assert_eq!(*log.borrow(), vec![r#"s:[1,"two"]"#]);
}

#[test]
fn unsubscribe_is_idempotent() {
    let bus = MessageBus::new();
    let (log, make) = recorder();
    let handle = bus.subscribe_listener("/news", make("a")).expect("subscribe");

    bus.unsubscribe(&handle);
    bus.unsubscribe(&handle);
    bus.publish("/news", json!(1)).expect("publish");
    assert!(log.borrow().is_empty());
    assert_eq!(bus.subscriber_count("/news"), 0);
}

#[test]
fn subscriber_added_during_dispatch_waits_for_next_publish() {
    let bus = MessageBus::new();
    let (log, make) = recorder();
    let late = make("late");
    let inner = bus.clone();
    bus.subscribe("/grow", move |_| {
        inner.subscribe_listener("/grow", late.clone())?;
        Ok(())
    })
    .expect("subscribe");

    bus.publish("/grow", json!(1)).expect("first");
    assert!(log.borrow().is_empty());

    bus.publish("/grow", json!(2)).expect("second");
    assert_eq!(*log.borrow(), vec!["late:[2]"]);
}

#[test]
fn topic_records_message_only_while_publishing() {
    let bus = MessageBus::new();
    let topic = bus.topic("/status").expect("topic");
    let observed = Rc::new(RefCell::new(None));
    {
        let topic = topic.clone();
        let observed = observed.clone();
        bus.subscribe("/status", move |_| {
            *observed.borrow_mut() = topic.message();
            Ok(())
        })
        .expect("subscribe");
    }

    bus.publish("/status", json!({"ok": true})).expect("publish");
    assert_eq!(*observed.borrow(), Some(json!({"ok": true})));
    assert_eq!(topic.message(), None);
}

#[test]
fn on_publish_fires_before_subscribers() {
    let bus = MessageBus::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    {
        let order = order.clone();
        bus.subscribe("/t", move |_| {
            order.borrow_mut().push("subscriber");
            Ok(())
        })
        .expect("subscribe");
    }
    {
        let order = order.clone();
        bus.topic("/t")
            .expect("topic")
            .connect(
                "onPublish",
                handler(move |_| {
                    order.borrow_mut().push("onPublish");
                    Ok(())
                }),
            )
            .expect("connect");
    }

    bus.publish("/t", json!(null)).expect("publish");
    assert_eq!(*order.borrow(), vec!["onPublish", "subscriber"]);
}

#[test]
fn empty_topic_is_a_configuration_error() {
    let bus = MessageBus::new();
    let err = bus.publish("", json!(1)).expect_err("empty topic");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.code(), ErrorCode::MissingArgument);
    assert!(bus.subscribe("", |_| Ok(())).is_err());
}

#[test]
fn runaway_republish_hits_depth_limit() {
    let bus = MessageBus::with_max_depth(4);
    let inner = bus.clone();
    bus.subscribe("/loop", move |args| inner.publish("/loop", args[0].clone()))
        .expect("subscribe");

    let err = bus.publish("/loop", json!(0)).expect_err("limit");
    assert_eq!(err.code(), ErrorCode::RecursionLimit);

    bus.publish("/fresh", json!(0)).expect("depth counter is released");
}
