use std::{cell::RefCell, collections::VecDeque};

use messaging::MessageBus;
use serde_json::json;

use super::*;

#[derive(Default)]
struct ScriptedTransport {
    outcomes: RefCell<VecDeque<TransportOutcome>>,
    requests: RefCell<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    fn with(outcomes: Vec<TransportOutcome>) -> Rc<Self> {
        Rc::new(Self {
            outcomes: RefCell::new(outcomes.into()),
            requests: RefCell::new(Vec::new()),
        })
    }

    fn sent(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &TransportRequest) -> TransportOutcome {
        self.requests.borrow_mut().push(request.clone());
        self.outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or(TransportOutcome::Failure {
                status: 500,
                body: json!("exhausted"),
            })
    }
}

#[derive(Default)]
struct RecordingCaller {
    responses: RefCell<Vec<Value>>,
    errors: RefCell<Vec<Vec<Value>>>,
}

impl ServiceCaller for RecordingCaller {
    fn on_response(&self, data: &Value, _params: &Map<String, Value>) -> FrameworkResult<()> {
        self.responses.borrow_mut().push(data.clone());
        Ok(())
    }

    fn on_error(&self, errors: &[Value]) -> FrameworkResult<()> {
        self.errors.borrow_mut().push(errors.to_vec());
        Ok(())
    }
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn service(
    transport: Rc<ScriptedTransport>,
    name: &str,
    uri: &str,
    options: Option<ServiceOptions>,
) -> (AppModel, Service) {
    let model = AppModel::new(MessageBus::new());
    let service = Service::new(model.clone(), transport, name, uri, options).expect("service");
    (model, service)
}

#[test]
fn method_and_defaults_follow_the_name() {
    let transport = ScriptedTransport::with(vec![]);
    let (_, get) = service(transport.clone(), "getProfile", "/profile", None);
    assert_eq!(get.config().method, Method::Get);
    assert!(get.config().cache);
    assert_eq!(get.config().retry, 1);

    let (_, add) = service(transport.clone(), "addComment", "/comments", None);
    assert_eq!(add.config().method, Method::Post);
    assert!(!add.config().cache);
    assert_eq!(add.config().retry, 0);

    let (_, explicit) = service(
        transport,
        "fetchThing",
        "/thing",
        Some(ServiceOptions::default().method("delete").cache(true)),
    );
    assert_eq!(explicit.config().method, Method::Delete);
    assert!(explicit.config().cache);
    assert_eq!(explicit.config().retry, 0);
}

#[test]
fn invalid_options_are_rejected() {
    let model = AppModel::new(MessageBus::new());
    let transport = ScriptedTransport::with(vec![]);
    let err = Service::new(
        model.clone(),
        transport.clone(),
        "getX",
        "/x",
        Some(ServiceOptions::default().method("PATCH")),
    )
    .expect_err("bad method");
    assert_eq!(err.code(), ErrorCode::WrongArgumentType);

    let err = Service::new(model, transport, "", "/x", None).expect_err("empty name");
    assert_eq!(err.code(), ErrorCode::MissingArgument);
}

#[test]
fn uri_placeholders_and_cache_key_come_from_params() {
    let transport = ScriptedTransport::with(vec![]);
    let (_, svc) = service(transport, "getFeed", "/feeds/${id}/items/${page}", None);
    let p = params(json!({"id": "cnn", "page": 2}));
    assert_eq!(svc.expand_uri(&p), "/feeds/cnn/items/2");
    assert_eq!(svc.cache_key(&p), "getFeed_id_cnn_page_2");
    assert_eq!(svc.expand_uri(&Map::new()), "/feeds//items/");
}

#[test]
fn cached_get_is_answered_without_transport() {
    let transport = ScriptedTransport::with(vec![TransportOutcome::Success(json!({"items": [1]}))]);
    let (model, svc) = service(transport.clone(), "getFeed", "/feed", None);
    let caller = RecordingCaller::default();

    svc.invoke(&Map::new(), &caller).expect("first");
    svc.invoke(&Map::new(), &caller).expect("second");

    assert_eq!(transport.sent(), 1);
    assert_eq!(caller.responses.borrow().len(), 2);
    assert_eq!(model.get("getFeed")["data"], json!({"items": [1]}));
    assert_eq!(model.get("getFeed")["expiryTime"], json!(0));
}

#[test]
fn expired_cache_entry_is_refetched() {
    let transport = ScriptedTransport::with(vec![TransportOutcome::Success(json!({"v": 2}))]);
    let (model, svc) = service(transport.clone(), "getValue", "/v", None);
    model
        .set("getValue", &json!({"data": {"v": 1}, "expiryTime": 1}))
        .expect("seed");
    let caller = RecordingCaller::default();

    svc.invoke(&Map::new(), &caller).expect("invoke");
    assert_eq!(transport.sent(), 1);
    assert_eq!(*caller.responses.borrow(), vec![json!({"v": 2})]);
}

#[test]
fn very_long_cache_lifetimes_do_not_wrap() {
    let transport = ScriptedTransport::with(vec![TransportOutcome::Success(json!({"v": 1}))]);
    let (model, svc) = service(
        transport.clone(),
        "getForever",
        "/forever",
        Some(ServiceOptions::default().cache_expiry(u64::MAX)),
    );
    let caller = RecordingCaller::default();

    svc.invoke(&Map::new(), &caller).expect("first");
    svc.invoke(&Map::new(), &caller).expect("second");

    assert_eq!(transport.sent(), 1);
    assert_eq!(model.get("getForever")["expiryTime"], json!(i64::MAX));

    let (model, svc) = service(
        transport,
        "getLong",
        "/long",
        Some(ServiceOptions::default().cache_expiry(u64::MAX / 1000)),
    );
    svc.invoke(&Map::new(), &caller).expect("saturating");
    assert!(model.get("getLong")["expiryTime"].as_i64().is_some_and(|expiry| expiry > 0));
}

#[test]
fn http_failures_retry_then_report() {
    let transport = ScriptedTransport::with(vec![
        TransportOutcome::Failure {
            status: 503,
            body: json!("busy"),
        },
        TransportOutcome::Failure {
            status: 503,
            body: json!("still busy"),
        },
    ]);
    let (_, svc) = service(transport.clone(), "getStatus", "/status", None);
    let caller = RecordingCaller::default();

    svc.invoke(&Map::new(), &caller).expect("invoke");
    assert_eq!(transport.sent(), 2);
    let errors = caller.errors.borrow();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0][0]["code"], json!(503));
    assert_eq!(errors[0][0]["message"], json!("still busy"));
}

#[test]
fn error_payloads_are_routed_to_on_error() {
    let transport = ScriptedTransport::with(vec![TransportOutcome::Success(
        json!({"errors": [{"field": "email"}, {"field": "name"}]}),
    )]);
    let (model, svc) = service(transport, "getForm", "/form", None);
    let caller = RecordingCaller::default();

    svc.invoke(&Map::new(), &caller).expect("invoke");
    assert!(caller.responses.borrow().is_empty());
    assert_eq!(caller.errors.borrow()[0].len(), 2);
    assert!(!model.contains("getForm"));
}

#[test]
fn mutating_services_do_not_cache_or_retry() {
    let transport = ScriptedTransport::with(vec![
        TransportOutcome::Success(json!({"ok": true})),
        TransportOutcome::Failure {
            status: 500,
            body: json!({"error": "boom"}),
        },
    ]);
    let (model, svc) = service(transport.clone(), "updateProfile", "/profile/${id}", None);
    let caller = RecordingCaller::default();
    let p = params(json!({"id": 7}));

    svc.invoke(&p, &caller).expect("first");
    svc.invoke(&p, &caller).expect("second");
    assert_eq!(transport.sent(), 2);
    assert_eq!(transport.requests.borrow()[0].method, Method::Put);
    assert_eq!(transport.requests.borrow()[0].url, "/profile/7");
    assert!(!model.contains("updateProfile_id_7"));
    assert_eq!(caller.errors.borrow()[0].last(), Some(&json!("boom")));
}

#[test]
fn locator_rejects_duplicates() {
    let model = AppModel::new(MessageBus::new());
    let locator = ServiceLocator::new(model, ScriptedTransport::with(vec![]));
    locator.define("getRss", "/rss", None).expect("first");
    let err = locator.define("getRss", "/rss2", None).expect_err("duplicate");
    assert_eq!(err.code(), ErrorCode::DuplicateName);
    assert_eq!(locator.service("getRss").expect("lookup").uri(), "/rss");
    assert_eq!(
        locator.service("missing").expect_err("missing").code(),
        ErrorCode::UnknownService
    );
}
