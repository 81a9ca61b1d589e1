use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use controller::{
    AppContext, Catalog, Command, Controller, ControllerInstance, ControllerRegistry, MapContext,
    ParamSpec, ParamType, ParamsSource, RequestContext, Rule, Settings, SiteMapEntry,
};
use messaging::AppModel;
use page::{Document, Element};
use serde_json::{json, Value};
use shared::{
    error::{ErrorCode, ErrorKind, FrameworkResult},
    protocol::ControllerBinding,
};

type Journal = Rc<RefCell<Vec<String>>>;

struct SaveCmd {
    journal: Journal,
}

impl Command for SaveCmd {
    fn execute(&self, request: &RequestContext) -> anyhow::Result<()> {
        self.journal
            .borrow_mut()
            .push(format!("{}:{}", request.command_name(), request.controller_name()));
        Ok(())
    }
}

struct Labelled {
    label: &'static str,
    journal: Journal,
}

impl Command for Labelled {
    fn execute(&self, _request: &RequestContext) -> anyhow::Result<()> {
        self.journal.borrow_mut().push(self.label.to_string());
        Ok(())
    }
}

struct Deny {
    checks: Rc<Cell<usize>>,
}

impl Rule for Deny {
    fn condition(&self, _request: &RequestContext) -> anyhow::Result<bool> {
        self.checks.set(self.checks.get() + 1);
        Ok(false)
    }
}

/// Form controller wired entirely through catalog names.
struct FormController;

impl Controller for FormController {
    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("form").kind(ParamType::String).required()]
    }

    fn add_commands(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        controller.add_command("Save", "app.SaveCmd")?;
        Ok(())
    }

    fn add_observers(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        controller.add_observer("#btn", "onclick", "Save", ParamsSource::None)
    }
}

struct Harness {
    doc: Document,
    root: NodeIds,
    ctx: AppContext,
    registry: Rc<ControllerRegistry>,
    journal: Journal,
    checks: Rc<Cell<usize>>,
}

struct NodeIds {
    scope: shared::domain::NodeId,
    button: shared::domain::NodeId,
}

fn harness() -> Harness {
    let doc = Document::new();
    let body = doc.append(doc.root(), Element::new("body")).expect("body");
    let scope = doc
        .append(body, Element::new("form").with_id("root"))
        .expect("root");
    let button = doc
        .append(scope, Element::new("button").with_id("btn"))
        .expect("button");

    let journal: Journal = Rc::new(RefCell::new(Vec::new()));
    let checks = Rc::new(Cell::new(0));
    let catalog = Catalog::new();
    {
        let journal = journal.clone();
        catalog
            .register_command("app.SaveCmd", move || SaveCmd {
                journal: journal.clone(),
            })
            .expect("save");
    }
    for label in ["A", "B1", "B2"] {
        let journal = journal.clone();
        catalog
            .register_command(label, move || Labelled {
                label,
                journal: journal.clone(),
            })
            .expect("labelled");
    }
    {
        let checks = checks.clone();
        catalog
            .register_rule("app.Deny", move || Deny {
                checks: checks.clone(),
            })
            .expect("deny");
    }
    catalog
        .register_controller("app.FormController", || FormController)
        .expect("form");

    let ctx = AppContext::new(Settings::default(), Rc::new(doc.clone()), catalog);
    let registry = ControllerRegistry::new(&ctx).expect("registry");
    Harness {
        doc,
        root: NodeIds { scope, button },
        ctx,
        registry,
        journal,
        checks,
    }
}

fn form_site_map(h: &Harness) {
    h.registry
        .set_site_map(vec![SiteMapEntry::selector(
            "#root",
            vec![ControllerBinding::new("app.FormController")
                .with_params(json!({"form": "signup"}).as_object().cloned().unwrap_or_default())],
        )])
        .expect("site map");
}

#[test]
fn clicking_the_button_dispatches_save_once() {
    let h = harness();
    form_site_map(&h);
    h.registry.map_controllers(MapContext::Page).expect("map");

    h.doc.fire(h.root.button, "onclick", Value::Null).expect("click");
    assert_eq!(*h.journal.borrow(), vec!["Save:app.FormController"]);
}

#[test]
fn site_map_instantiates_one_controller_per_scope() {
    let h = harness();
    form_site_map(&h);
    for _ in 0..3 {
        h.registry.map_controllers(MapContext::Page).expect("map");
    }

    assert_eq!(h.registry.len(), 1);
    let form = h
        .registry
        .controller("app.FormController", Some(h.root.scope))
        .expect("attached");
    assert_eq!(form.value("form").expect("form"), json!("signup"));

    h.doc.fire(h.root.button, "onclick", Value::Null).expect("click");
    assert_eq!(h.journal.borrow().len(), 1);
}

#[test]
fn observer_passes_are_idempotent() {
    let h = harness();
    form_site_map(&h);
    h.registry.map_controllers(MapContext::Page).expect("map");

    for _ in 0..10 {
        ControllerInstance::update_observers(h.ctx.bus(), None).expect("refresh");
    }
    assert_eq!(h.doc.listener_count(h.root.scope, "onclick"), 1);
    h.doc.fire(h.root.button, "onclick", Value::Null).expect("click");
    assert_eq!(h.journal.borrow().len(), 1);
}

#[test]
fn required_params_are_enforced_at_attachment() {
    let h = harness();
    let err = h
        .registry
        .map_controller("app.FormController", Some(h.root.scope), Some(&serde_json::Map::new()))
        .expect_err("form param missing");
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.code(), ErrorCode::MissingRequired);
    assert!(h.registry.is_empty());
}

/// Controller with three plain commands and a denying rule, used to check
/// advice ordering.
struct AdvisedController;

impl Controller for AdvisedController {
    fn add_commands(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        for name in ["A", "B1", "B2"] {
            controller.add_command(name, name)?;
        }
        controller.add_command("Deny", "app.Deny")?;
        Ok(())
    }
}

fn advised(h: &Harness) -> Rc<ControllerInstance> {
    ControllerInstance::create(&h.ctx, "Advised", Rc::new(AdvisedController), Some(h.root.scope), None)
        .expect("advised")
}

fn dispatch(controller: &Rc<ControllerInstance>, trigger: shared::domain::NodeId, name: &str) {
    let request = RequestContext::new(ParamsSource::None, trigger.into(), None, name, controller, None)
        .expect("request");
    controller.fire_command_chain(name, &request).expect("dispatch");
}

#[test]
fn before_advice_nests_most_recent_first() {
    let h = harness();
    let controller = advised(&h);
    controller.add_intercept("before", "A", "B1", ParamsSource::None).expect("B1");
    controller.add_intercept("before", "A", "B2", ParamsSource::None).expect("B2");

    dispatch(&controller, h.root.button, "A");
    assert_eq!(*h.journal.borrow(), vec!["B2", "B1", "A"]);
}

#[test]
fn false_around_rule_skips_the_original() {
    let h = harness();
    let controller = advised(&h);
    controller.add_intercept("around", "A", "Deny", ParamsSource::None).expect("around");

    dispatch(&controller, h.root.button, "A");
    assert!(h.journal.borrow().is_empty());
    assert_eq!(h.checks.get(), 1);
}

#[test]
fn model_values_round_trip_and_accumulate() {
    let h = harness();
    let model: &AppModel = h.ctx.model();
    let original = json!({"name": "Ada", "tags": ["x"]});
    model.set("profile", &original).expect("set");
    assert_eq!(model.get("profile"), original);

    model.add("recent", &json!({"id": 1})).expect("first");
    model.add("recent", &json!({"id": 2})).expect("second");
    assert_eq!(model.get("recent"), json!([{"id": 1}, {"id": 2}]));
}
