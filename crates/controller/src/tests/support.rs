use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use page::{Document, Element};
use serde_json::Value;
use shared::{domain::NodeId, error::FrameworkResult};

use crate::{
    AppContext, Behavior, Catalog, Command, Controller, ControllerInstance, ParamSpec, ParamsSource,
    RequestContext, Rule, Settings, Trigger,
};

pub(crate) type Log = Rc<RefCell<Vec<String>>>;

pub(crate) fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

pub(crate) fn context(doc: &Document, catalog: Catalog, debug: bool) -> AppContext {
    let settings = Settings {
        debug,
        ..Settings::default()
    };
    AppContext::new(settings, Rc::new(doc.clone()), catalog)
}

/// `<body><div id="panel"><button id="save">..</button><span class="label"/></div></body>`
pub(crate) struct Page {
    pub(crate) doc: Document,
    pub(crate) body: NodeId,
    pub(crate) panel: NodeId,
    pub(crate) save: NodeId,
    pub(crate) label: NodeId,
}

pub(crate) fn page() -> Page {
    let doc = Document::new();
    let body = doc.append(doc.root(), Element::new("body")).expect("body");
    let panel = doc
        .append(body, Element::new("div").with_id("panel").with_class("panel"))
        .expect("panel");
    let save = doc
        .append(panel, Element::new("button").with_id("save").with_text("Save"))
        .expect("save");
    let label = doc
        .append(panel, Element::new("span").with_class("label"))
        .expect("label");
    Page {
        doc,
        body,
        panel,
        save,
        label,
    }
}

/// Appends `label` plus the request's params (when any) to the log.
pub(crate) struct Record {
    pub(crate) label: String,
    pub(crate) log: Log,
}

impl Record {
    pub(crate) fn new(label: &str, log: &Log) -> Self {
        Self {
            label: label.to_string(),
            log: log.clone(),
        }
    }
}

impl Command for Record {
    fn execute(&self, request: &RequestContext) -> anyhow::Result<()> {
        let params = request.params();
        let entry = if params.is_empty() {
            self.label.clone()
        } else {
            format!("{}{}", self.label, Value::Object(params))
        };
        self.log.borrow_mut().push(entry);
        Ok(())
    }
}

impl Behavior for Record {
    fn execute(&self, request: &RequestContext) -> anyhow::Result<()> {
        Command::execute(self, request)
    }
}

pub(crate) struct Fail;

impl Command for Fail {
    fn execute(&self, _request: &RequestContext) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }
}

/// Rule with a fixed outcome that counts its condition checks.
pub(crate) struct Gate {
    pub(crate) open: bool,
    pub(crate) checks: Rc<Cell<usize>>,
}

impl Rule for Gate {
    fn condition(&self, _request: &RequestContext) -> anyhow::Result<bool> {
        self.checks.set(self.checks.get() + 1);
        Ok(self.open)
    }
}

type Step = Rc<dyn Fn(&Rc<ControllerInstance>) -> FrameworkResult<()>>;

/// Controller definition assembled from closures.
#[derive(Clone, Default)]
pub(crate) struct Scripted {
    specs: Vec<ParamSpec>,
    commands: Option<Step>,
    observers: Option<Step>,
    intercepts: Option<Step>,
}

impl Scripted {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_params(mut self, specs: Vec<ParamSpec>) -> Self {
        self.specs = specs;
        self
    }

    pub(crate) fn on_commands(
        mut self,
        step: impl Fn(&Rc<ControllerInstance>) -> FrameworkResult<()> + 'static,
    ) -> Self {
        self.commands = Some(Rc::new(step));
        self
    }

    pub(crate) fn on_observers(
        mut self,
        step: impl Fn(&Rc<ControllerInstance>) -> FrameworkResult<()> + 'static,
    ) -> Self {
        self.observers = Some(Rc::new(step));
        self
    }

    pub(crate) fn on_intercepts(
        mut self,
        step: impl Fn(&Rc<ControllerInstance>) -> FrameworkResult<()> + 'static,
    ) -> Self {
        self.intercepts = Some(Rc::new(step));
        self
    }

    pub(crate) fn create(
        self,
        ctx: &AppContext,
        scope: Option<NodeId>,
    ) -> FrameworkResult<Rc<ControllerInstance>> {
        ControllerInstance::create(ctx, "Scripted", Rc::new(self), scope, None)
    }
}

fn run(step: &Option<Step>, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
    match step {
        Some(step) => step(controller),
        None => Ok(()),
    }
}

impl Controller for Scripted {
    fn params(&self) -> Vec<ParamSpec> {
        self.specs.clone()
    }

    fn add_commands(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        run(&self.commands, controller)
    }

    fn add_observers(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        run(&self.observers, controller)
    }

    fn add_intercepts(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        run(&self.intercepts, controller)
    }
}

/// Dispatches `command` on `controller` as if triggered by `node`.
pub(crate) fn dispatch(
    controller: &Rc<ControllerInstance>,
    node: NodeId,
    command: &str,
    params: ParamsSource,
) -> FrameworkResult<()> {
    let request = RequestContext::new(params, Trigger::Element(node), None, command, controller, None)?;
    controller.fire_command_chain(command, &request)
}
