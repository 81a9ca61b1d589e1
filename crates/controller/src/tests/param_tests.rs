use serde_json::json;
use shared::{
    error::{ErrorCode, ErrorKind},
    event::handler,
};

use super::*;

fn specs() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("title").kind(ParamType::String).default(json!("untitled")),
        ParamSpec::new("count").kind(ParamType::Number).default(json!(0)),
        ParamSpec::new("owner").required(),
    ]
}

#[test]
fn later_declarations_override_earlier_ones() {
    let mut declared = specs();
    declared.push(ParamSpec::new("count").kind(ParamType::Number).default(json!(10)));
    declared.push(ParamSpec::new("tags").kind(ParamType::Array));

    let set = ParamSet::build("Widget#1", declared, None).expect("build");
    assert_eq!(set.names(), vec!["title", "count", "owner", "tags"]);
    assert_eq!(set.value("count").expect("count"), json!(10));
    assert_eq!(set.value("tags").expect("tags"), Value::Null);
}

#[test]
fn overrides_apply_over_defaults() {
    let overrides = json!({"owner": "ops", "count": 3});
    let set = ParamSet::build("Widget#1", specs(), overrides.as_object()).expect("build");
    assert_eq!(set.value("owner").expect("owner"), json!("ops"));
    assert_eq!(set.value("count").expect("count"), json!(3));
    assert_eq!(set.value("title").expect("title"), json!("untitled"));
}

#[test]
fn missing_required_value_is_rejected() {
    let overrides = json!({"count": 1});
    let err = ParamSet::build("Widget#1", specs(), overrides.as_object()).expect_err("owner missing");
    assert_eq!(err.code(), ErrorCode::MissingRequired);
    assert_eq!(err.kind(), ErrorKind::Validation);

    let set = ParamSet::build("Widget#1", specs(), None).expect("no overrides");
    let owner = set.get("owner").expect("owner");
    for empty in [None, Some(Value::Null), Some(json!(""))] {
        let err = owner.set_value(empty).expect_err("required");
        assert_eq!(err.code(), ErrorCode::MissingRequired);
    }
}

#[test]
fn wrong_type_is_rejected_without_mutation() {
    let set = ParamSet::build("Widget#1", specs(), None).expect("build");
    let err = set.set_value("count", Some(json!("many"))).expect_err("type");
    assert_eq!(err.code(), ErrorCode::InvalidType);
    assert_eq!(set.value("count").expect("count"), json!(0));

    let err = ParamSet::build(
        "Widget#1",
        vec![ParamSpec::new("flag").kind(ParamType::Boolean).default(json!("yes"))],
        None,
    )
    .expect_err("bad default");
    assert_eq!(err.code(), ErrorCode::InvalidType);
}

#[test]
fn change_fires_only_on_transitions_and_bubbles_to_the_set() {
    let set = ParamSet::build("Widget#1", specs(), None).expect("build");
    let seen = Rc::new(RefCell::new(Vec::new()));

    let param_log = seen.clone();
    let _param = set
        .get("title")
        .expect("title")
        .connect(
            "onChange",
            handler(move |event| {
                param_log.borrow_mut().push(format!("param:{}", event.detail));
                Ok(())
            }),
        )
        .expect("param hook");
    let set_log = seen.clone();
    let _set = set
        .connect(
            "onChange",
            handler(move |event| {
                set_log.borrow_mut().push(format!("set:{}", event.detail));
                Ok(())
            }),
        )
        .expect("set hook");

    set.set_value("title", Some(json!("untitled"))).expect("same value");
    set.set_value("title", None).expect("no-op");
    assert!(seen.borrow().is_empty());

    set.set_value("title", Some(json!("Report"))).expect("change");
    assert_eq!(
        *seen.borrow(),
        vec![
            r#"param:"Report""#.to_string(),
            r#"set:{"param":"title","value":"Report"}"#.to_string(),
        ]
    );
}

#[test]
fn unknown_parameter_names_are_reported() {
    let set = ParamSet::build("Widget#1", specs(), None).expect("build");
    assert_eq!(set.value("colour").expect_err("unknown").code(), ErrorCode::UnknownParam);
    assert!(ParamSet::empty("Bare#2").is_empty());
}
