//! Sample page, controllers and commands wired together by the demo.

use std::rc::Rc;

use anyhow::Context;
use controller::{
    AppContext, Behavior, Command, Controller, ControllerInstance, ParamSpec, ParamType, Params,
    ParamsSource, RequestContext, Rule,
};
use messaging::{AppModel, History};
use page::{Document, Element};
use serde_json::{json, Map, Value};
use service::{ServiceLocator, ServiceOptions, Transport, TransportOutcome, TransportRequest};
use shared::error::FrameworkResult;
use tracing::info;

pub const SITE_MAP: &str = r##"
[[site]]
pattern = "#hello"
controllers = [{ controller = "helloworld.HelloController", params = { greeting = "Hello" } }]

[[site]]
pattern = { location = "index" }
controllers = [{ controller = "helloworld.PageController" }]
"##;

pub const MODEL_KEYS: &[&str] = &["greeting", "clicks", "page", "motd"];

pub fn build_page() -> FrameworkResult<Document> {
    let doc = Document::new();
    let body = doc.append(doc.root(), Element::new("body"))?;

    let menu = doc.append(body, Element::new("nav").with_id("menu"))?;
    for page in ["home", "about"] {
        doc.append(
            menu,
            Element::new("a")
                .with_class("nav")
                .with_attr("data-page", page)
                .with_text(page),
        )?;
    }

    let hello = doc.append(body, Element::new("div").with_id("hello").with_class("panel"))?;
    doc.append(hello, Element::new("input").with_id("name").with_attr("value", "World"))?;
    doc.append(hello, Element::new("button").with_id("say").with_text("Say hello"))?;
    doc.append(hello, Element::new("button").with_id("motd").with_text("Message of the day"))?;
    doc.append(hello, Element::new("span").with_id("output"))?;
    Ok(doc)
}

/// Registers every controller and command of the sample under its site-map
/// name.
pub fn register(ctx: &AppContext, doc: &Document) -> FrameworkResult<()> {
    let catalog = ctx.catalog();
    catalog.register_controller("helloworld.HelloController", || HelloController)?;
    catalog.register_controller("helloworld.PageController", || PageController)?;

    {
        let (doc, model) = (doc.clone(), ctx.model().clone());
        catalog.register_command("helloworld.SayHello", move || SayHello {
            doc: doc.clone(),
            model: model.clone(),
        })?;
    }
    {
        let doc = doc.clone();
        catalog.register_rule("helloworld.HasName", move || HasName { doc: doc.clone() })?;
    }
    {
        let model = ctx.model().clone();
        catalog.register_behavior("helloworld.CountClicks", move || CountClicks {
            model: model.clone(),
        })?;
    }
    {
        let model = ctx.model().clone();
        catalog.register_command("helloworld.LoadMotd", move || LoadMotd {
            model: model.clone(),
        })?;
    }
    {
        let (doc, history) = (doc.clone(), ctx.history().clone());
        catalog.register_command("helloworld.Navigate", move || Navigate {
            doc: doc.clone(),
            history: history.clone(),
        })?;
    }
    {
        let model = ctx.model().clone();
        catalog.register_command("helloworld.ShowPage", move || ShowPage {
            model: model.clone(),
        })?;
    }
    Ok(())
}

pub fn services(ctx: &AppContext) -> FrameworkResult<ServiceLocator> {
    let locator = ServiceLocator::new(ctx.model().clone(), Rc::new(CannedTransport));
    locator.define(
        "getMotd",
        "/motd/${lang}",
        Some(ServiceOptions::default().cache(true).cache_expiry(300)),
    )?;
    Ok(locator)
}

/// Answers requests from memory instead of a network.
struct CannedTransport;

impl Transport for CannedTransport {
    fn send(&self, request: &TransportRequest) -> TransportOutcome {
        match request.url.strip_prefix("/motd/") {
            Some("fr") => TransportOutcome::Success(json!({"motd": "Bonne journée"})),
            Some(_) => TransportOutcome::Success(json!({"motd": "Have a good day"})),
            None => TransportOutcome::Failure {
                status: 404,
                body: json!({"error": format!("no route for {}", request.url)}),
            },
        }
    }
}

struct HelloController;

impl Controller for HelloController {
    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("greeting")
            .kind(ParamType::String)
            .default(json!("Hi"))]
    }

    fn add_commands(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        controller.add_command("SayHello", "helloworld.SayHello")?;
        controller.add_command("HasName", "helloworld.HasName")?;
        controller.add_command("CountClicks", "helloworld.CountClicks")?;
        controller.add_command("LoadMotd", "helloworld.LoadMotd")?;
        Ok(())
    }

    fn add_observers(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        controller.add_observer(
            "#say",
            "onclick",
            "SayHello",
            ParamsSource::from_fn(|_, _, controller| {
                let mut params = Params::new();
                if let Ok(greeting) = controller.value("greeting") {
                    params.insert("greeting".into(), greeting);
                }
                params
            }),
        )?;
        controller.add_observer("#motd", "onclick", "LoadMotd", json!({"lang": "en"}))
    }

    fn add_intercepts(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        controller.add_intercept("around", "SayHello", "HasName", ParamsSource::None)?;
        controller.add_intercept("after", "SayHello", "CountClicks", ParamsSource::None)
    }
}

struct PageController;

impl Controller for PageController {
    fn add_commands(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        controller.add_command("Navigate", "helloworld.Navigate")?;
        controller.add_command("ShowPage", "helloworld.ShowPage")?;
        Ok(())
    }

    fn add_observers(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        controller.add_observer("a.nav", "onclick", "Navigate", ParamsSource::None)?;
        let history = controller.context().history().clone();
        controller.add_observer(history, "onChange", "ShowPage", ParamsSource::None)
    }

    fn on_init(&self, controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        info!(controller = controller.name(), "page controller ready");
        Ok(())
    }
}

fn input_value(doc: &Document, selector: &str) -> anyhow::Result<String> {
    let node = doc
        .query_first(selector, None)?
        .with_context(|| format!("no element matches '{selector}'"))?;
    Ok(doc.attr(node, "value").unwrap_or_default())
}

struct SayHello {
    doc: Document,
    model: AppModel,
}

impl Command for SayHello {
    fn execute(&self, request: &RequestContext) -> anyhow::Result<()> {
        let name = input_value(&self.doc, "#name")?;
        let greeting = request
            .param("greeting")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "Hello".into());
        let message = format!("{greeting}, {name}!");

        if let Some(output) = self.doc.query_first("#output", None)? {
            self.doc.set_text(output, &message)?;
        }
        self.model.set("greeting", &message)?;
        Ok(())
    }
}

/// Lets the greeting through only when a name has been entered.
struct HasName {
    doc: Document,
}

impl Rule for HasName {
    fn condition(&self, _request: &RequestContext) -> anyhow::Result<bool> {
        Ok(!input_value(&self.doc, "#name")?.trim().is_empty())
    }
}

struct CountClicks {
    model: AppModel,
}

impl Behavior for CountClicks {
    fn execute(&self, _request: &RequestContext) -> anyhow::Result<()> {
        let clicks = self.model.get_as::<u64>("clicks").unwrap_or(0);
        self.model.set("clicks", &(clicks + 1))?;
        Ok(())
    }
}

struct LoadMotd {
    model: AppModel,
}

impl Command for LoadMotd {
    fn execute(&self, request: &RequestContext) -> anyhow::Result<()> {
        let controller = request.controller().context("controller was torn down")?;
        let services = controller.context().services()?;
        let slot = controller.command(request.command_name())?;
        services.service("getMotd")?.invoke(&request.params(), &*slot)?;
        Ok(())
    }

    fn on_response(&self, data: &Value, _params: &Map<String, Value>) -> anyhow::Result<()> {
        self.model.set("motd", &data["motd"])?;
        Ok(())
    }

    fn on_error(&self, errors: &[Value]) -> anyhow::Result<()> {
        self.model.set("motd", &Value::Null)?;
        anyhow::bail!("message of the day unavailable: {}", Value::Array(errors.to_vec()))
    }
}

/// Moves the history to the page named by the clicked link.
struct Navigate {
    doc: Document,
    history: Rc<History>,
}

impl Command for Navigate {
    fn execute(&self, request: &RequestContext) -> anyhow::Result<()> {
        let link = request.trigger().element().context("navigation needs a link")?;
        let page = self.doc.attr(link, "data-page").unwrap_or_else(|| "home".into());
        let mut params = Map::new();
        params.insert("page".into(), Value::String(page));
        self.history.navigate(&params)?;
        Ok(())
    }
}

struct ShowPage {
    model: AppModel,
}

impl Command for ShowPage {
    fn execute(&self, request: &RequestContext) -> anyhow::Result<()> {
        let history = request
            .trigger()
            .downcast::<History>()
            .context("expected a history trigger")?;
        let page = history.params().get("page").cloned().unwrap_or(Value::Null);
        self.model.set("page", &page)?;
        Ok(())
    }
}
