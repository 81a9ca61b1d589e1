//! Maps site-map entries onto the page and keeps the attached controllers.

use std::{
    any::Any,
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use messaging::{MessageBus, SubscriptionHandle};
use regex::Regex;
use serde_json::{json, Map, Value};
use shared::{
    domain::NodeId,
    error::{ErrorCode, FrameworkError, FrameworkResult},
    event::{Connection, EventHandler, EventSource, Hooks, SourceKey},
    protocol::{parse_site_map, ControllerBinding, PatternConfig, SiteMapDocument, MAP_CONTROLLERS_TOPIC},
};
use tracing::{debug, error, info};

use crate::{context::AppContext, controller::ControllerInstance};

pub type LocationMatcher = Rc<dyn Fn(&str) -> bool>;

#[derive(Clone)]
pub enum Pattern {
    /// Selector resolved against the page or a scope element.
    Selector(String),
    /// Predicate over a location string, for page-level controllers.
    Matcher(LocationMatcher),
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selector(selector) => f.debug_tuple("Selector").field(selector).finish(),
            Self::Matcher(_) => f.write_str("Matcher(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SiteMapEntry {
    pub pattern: Pattern,
    pub controllers: Vec<ControllerBinding>,
}

fn invalid_site_map(message: impl Into<String>) -> FrameworkError {
    FrameworkError::structural(ErrorCode::InvalidSiteMap, message)
}

impl SiteMapEntry {
    pub fn selector(selector: &str, controllers: Vec<ControllerBinding>) -> Self {
        Self {
            pattern: Pattern::Selector(selector.to_string()),
            controllers,
        }
    }

    pub fn matcher<F>(matcher: F, controllers: Vec<ControllerBinding>) -> Self
    where
        F: Fn(&str) -> bool + 'static,
    {
        Self {
            pattern: Pattern::Matcher(Rc::new(matcher)),
            controllers,
        }
    }

    /// Matcher that tests the location against a regular expression.
    pub fn location(pattern: &str, controllers: Vec<ControllerBinding>) -> FrameworkResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|err| invalid_site_map(format!("bad location pattern '{pattern}': {err}")))?;
        Ok(Self::matcher(move |location| regex.is_match(location), controllers))
    }

    fn validate(&self, index: usize) -> FrameworkResult<()> {
        if let Pattern::Selector(selector) = &self.pattern {
            if selector.trim().is_empty() {
                return Err(invalid_site_map(format!("entry {index} has an empty pattern")));
            }
        }
        if let Some(position) = self
            .controllers
            .iter()
            .position(|binding| binding.controller.is_empty())
        {
            return Err(invalid_site_map(format!(
                "entry {index}: controller {position} has no name"
            )));
        }
        Ok(())
    }
}

/// Where a mapping pass looks for matches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MapContext {
    #[default]
    Page,
    /// Only elements under this node.
    Scope(NodeId),
    /// A location string tested by matcher patterns. Selector patterns
    /// still resolve against the whole page.
    Location(String),
}

impl MapContext {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Page => Value::Null,
            Self::Scope(node) => json!(node.0),
            Self::Location(location) => Value::String(location.clone()),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(number) => number
                .as_u64()
                .map(|id| Self::Scope(NodeId(id)))
                .unwrap_or_default(),
            Value::String(location) => Self::Location(location.clone()),
            _ => Self::Page,
        }
    }
}

type InstanceKey = (Option<NodeId>, String);

pub struct ControllerRegistry {
    me: Weak<ControllerRegistry>,
    ctx: AppContext,
    site_map: RefCell<Option<Rc<Vec<SiteMapEntry>>>>,
    instances: RefCell<Vec<(InstanceKey, Rc<ControllerInstance>)>>,
    subscription: RefCell<Option<SubscriptionHandle>>,
    hooks: Hooks,
}

impl ControllerRegistry {
    /// Creates the registry and subscribes it to re-map requests on the bus.
    pub fn new(ctx: &AppContext) -> FrameworkResult<Rc<Self>> {
        let registry = Rc::new_cyclic(|me| Self {
            me: me.clone(),
            ctx: ctx.clone(),
            site_map: RefCell::new(None),
            instances: RefCell::new(Vec::new()),
            subscription: RefCell::new(None),
            hooks: Hooks::new("controller registry", &["onComplete"]),
        });

        let weak = registry.me.clone();
        let handle = ctx.bus().subscribe(MAP_CONTROLLERS_TOPIC, move |args| {
            let Some(registry) = weak.upgrade() else {
                return Ok(());
            };
            let context = args.first().map(MapContext::from_value).unwrap_or_default();
            registry.map_controllers(context)
        })?;
        *registry.subscription.borrow_mut() = Some(handle);
        Ok(registry)
    }

    pub fn set_site_map(&self, entries: Vec<SiteMapEntry>) -> FrameworkResult<()> {
        for (index, entry) in entries.iter().enumerate() {
            entry.validate(index)?;
        }
        info!(entries = entries.len(), "site map set");
        *self.site_map.borrow_mut() = Some(Rc::new(entries));
        Ok(())
    }

    pub fn set_site_map_document(&self, document: SiteMapDocument) -> FrameworkResult<()> {
        let entries = document
            .into_iter()
            .map(|entry| match entry.pattern {
                PatternConfig::Selector(selector) => Ok(SiteMapEntry::selector(&selector, entry.controllers)),
                PatternConfig::Location { location } => SiteMapEntry::location(&location, entry.controllers),
            })
            .collect::<FrameworkResult<Vec<_>>>()?;
        self.set_site_map(entries)
    }

    /// Parses a JSON or TOML site map and installs it.
    pub fn load_site_map(&self, raw: &str) -> FrameworkResult<()> {
        let document = parse_site_map(raw).map_err(invalid_site_map)?;
        self.set_site_map_document(document)
    }

    pub fn site_map(&self) -> FrameworkResult<Rc<Vec<SiteMapEntry>>> {
        self.site_map.borrow().clone().ok_or_else(|| {
            FrameworkError::structural(ErrorCode::SiteMapNotSet, "no site map has been set")
        })
    }

    /// Attaches the site map's controllers for `context`, then fires
    /// `onComplete`.
    pub fn map_controllers(&self, context: MapContext) -> FrameworkResult<()> {
        let site_map = self.site_map()?;
        debug!(?context, "mapping controllers");

        for entry in site_map.iter() {
            match &entry.pattern {
                Pattern::Selector(selector) => {
                    let root = match &context {
                        MapContext::Scope(node) => Some(*node),
                        MapContext::Page | MapContext::Location(_) => None,
                    };
                    for node in self.ctx.tree().query(selector, root)? {
                        self.map_bindings(&entry.controllers, Some(node))?;
                    }
                }
                Pattern::Matcher(matcher) => {
                    if let MapContext::Location(location) = &context {
                        if matcher(location) {
                            self.map_bindings(&entry.controllers, None)?;
                        }
                    }
                }
            }
        }

        self.hooks.emit("onComplete", context.to_value())
    }

    fn map_bindings(&self, bindings: &[ControllerBinding], scope: Option<NodeId>) -> FrameworkResult<()> {
        for binding in bindings {
            let result = self.map_controller(&binding.controller, scope, binding.params.as_ref());
            match result {
                Ok(_) => {}
                Err(err) if self.ctx.debug() => {
                    error!(controller = %binding.controller, ?scope, error = %err, "mapping controller failed");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Returns the controller attached under `name` for `scope`, creating it
    /// on first use.
    pub fn map_controller(
        &self,
        name: &str,
        scope: Option<NodeId>,
        params: Option<&Map<String, Value>>,
    ) -> FrameworkResult<Rc<ControllerInstance>> {
        if name.is_empty() {
            return Err(FrameworkError::missing_argument(
                "ControllerRegistry::map_controller",
                "controller name",
            ));
        }
        if let Some(existing) = self.controller(name, scope) {
            return Ok(existing);
        }

        let definition = self.ctx.catalog().resolve_controller(name)?;
        let instance = ControllerInstance::create(&self.ctx, name, definition, scope, params)?;
        self.ctx.attach(scope, name, &instance);
        self.instances
            .borrow_mut()
            .push(((scope, name.to_string()), instance.clone()));
        Ok(instance)
    }

    pub fn controller(&self, name: &str, scope: Option<NodeId>) -> Option<Rc<ControllerInstance>> {
        self.instances
            .borrow()
            .iter()
            .find(|((s, n), _)| *s == scope && n == name)
            .map(|(_, instance)| instance.clone())
    }

    /// Every attached controller in attachment order.
    pub fn controllers(&self) -> Vec<Rc<ControllerInstance>> {
        self.instances
            .borrow()
            .iter()
            .map(|(_, instance)| instance.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.borrow().is_empty()
    }

    /// Tears down every controller and drops the registry's references.
    pub fn teardown(&self) {
        let instances = std::mem::take(&mut *self.instances.borrow_mut());
        for (_, instance) in &instances {
            instance.teardown();
        }
        self.ctx.clear_attachments();
        if let Some(handle) = self.subscription.borrow_mut().take() {
            self.ctx.bus().unsubscribe(&handle);
        }
        if !instances.is_empty() {
            info!(controllers = instances.len(), "registry torn down");
        }
    }

    /// Asks the registry listening on `bus` to run a mapping pass.
    pub fn request_remap(bus: &MessageBus, context: MapContext) -> FrameworkResult<()> {
        bus.publish(MAP_CONTROLLERS_TOPIC, json!([context.to_value()]))
    }
}

impl EventSource for ControllerRegistry {
    fn source_key(&self) -> SourceKey {
        SourceKey("registry".into())
    }

    fn connect(&self, event: &str, handler: EventHandler) -> FrameworkResult<Connection> {
        self.hooks.connect(event, handler)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
