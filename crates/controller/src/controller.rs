//! Controller definitions and their live instances.
//!
//! A [`Controller`] is the user-written definition: parameter declarations
//! and the hooks that register commands, observers and intercepts. A
//! [`ControllerInstance`] is one attachment of a definition to a scope. It
//! owns the command chains, the observer tag table and every listener
//! connection made on its behalf.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    fmt,
    rc::{Rc, Weak},
};

use messaging::{MessageBus, SubscriptionHandle};
use serde_json::{Map, Value};
use shared::{
    domain::{ControllerId, InterceptKind, NodeId},
    error::{ErrorCode, FrameworkError, FrameworkResult},
    event::{bubbles, handler, Connection, Event, EventHandler, EventSource, Hooks, SourceKey},
    protocol::{controller_observers_topic, ADD_OBSERVERS_TOPIC},
};
use tracing::{debug, info, trace};

use crate::{
    command::{Advice, CommandSlot, Invokable},
    context::AppContext,
    param::{ParamSet, ParamSpec},
    request::{ParamsSource, RequestContext, Trigger},
};

/// User-written controller definition.
///
/// Construction hooks run for every definition along the `base` chain, root
/// first; `on_init` runs for this definition only.
pub trait Controller: 'static {
    /// Definition this one extends.
    fn base(&self) -> Option<&dyn Controller> {
        None
    }

    fn params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn add_commands(&self, _controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        Ok(())
    }

    /// Called on every observer pass; registration is idempotent.
    fn add_observers(&self, _controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        Ok(())
    }

    fn add_intercepts(&self, _controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        Ok(())
    }

    fn on_init(&self, _controller: &Rc<ControllerInstance>) -> FrameworkResult<()> {
        Ok(())
    }
}

fn levels(definition: &dyn Controller) -> Vec<&dyn Controller> {
    let mut chain = vec![definition];
    let mut cursor = definition.base();
    while let Some(level) = cursor {
        chain.push(level);
        cursor = level.base();
    }
    chain.reverse();
    chain
}

/// What an observer listens to: elements matched by selectors within the
/// controller scope, or explicit targets.
#[derive(Clone, Debug)]
pub enum ObserverSource {
    Selectors(Vec<String>),
    Targets(Vec<Trigger>),
}

impl From<&str> for ObserverSource {
    fn from(value: &str) -> Self {
        Self::Selectors(vec![value.to_string()])
    }
}

impl From<String> for ObserverSource {
    fn from(value: String) -> Self {
        Self::Selectors(vec![value])
    }
}

impl From<Vec<&str>> for ObserverSource {
    fn from(value: Vec<&str>) -> Self {
        Self::Selectors(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for ObserverSource {
    fn from(value: Vec<String>) -> Self {
        Self::Selectors(value)
    }
}

impl<const N: usize> From<[&str; N]> for ObserverSource {
    fn from(value: [&str; N]) -> Self {
        Self::Selectors(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<NodeId> for ObserverSource {
    fn from(value: NodeId) -> Self {
        Self::Targets(vec![Trigger::Element(value)])
    }
}

impl From<Vec<NodeId>> for ObserverSource {
    fn from(value: Vec<NodeId>) -> Self {
        Self::Targets(value.into_iter().map(Trigger::Element).collect())
    }
}

impl From<Trigger> for ObserverSource {
    fn from(value: Trigger) -> Self {
        Self::Targets(vec![value])
    }
}

impl<T: EventSource> From<Rc<T>> for ObserverSource {
    fn from(value: Rc<T>) -> Self {
        Self::Targets(vec![Trigger::from(value)])
    }
}

impl From<Rc<dyn EventSource>> for ObserverSource {
    fn from(value: Rc<dyn EventSource>) -> Self {
        Self::Targets(vec![Trigger::from(value)])
    }
}

#[derive(Clone)]
struct ObserverEntry {
    command: String,
    delegate: Option<String>,
    params: ParamsSource,
    fingerprint: String,
}

impl ObserverEntry {
    fn new(event: &str, delegate: Option<&str>, command: &str, params: ParamsSource) -> Self {
        let mut fingerprint = format!("{event}{}_{command}", delegate.unwrap_or_default());
        if let Some(params) = params.fingerprint() {
            fingerprint.push('_');
            fingerprint.push_str(&params);
        }
        Self {
            command: command.to_string(),
            delegate: delegate.map(str::to_string),
            params,
            fingerprint,
        }
    }
}

type EventGroups = Vec<(String, Vec<ObserverEntry>)>;

/// Observers collected during one `add_observers` pass, grouped per
/// selector then per event so each element gets one listener per event.
#[derive(Default)]
struct ObserverPass {
    queries: Vec<(String, Vec<NodeId>)>,
    groups: Vec<(String, EventGroups)>,
}

impl ObserverPass {
    fn has_query(&self, selector: &str) -> bool {
        self.queries.iter().any(|(cached, _)| cached == selector)
    }

    fn push(&mut self, selector: &str, event: &str, entry: ObserverEntry) {
        let index = match self.groups.iter().position(|(s, _)| s == selector) {
            Some(index) => index,
            None => {
                self.groups.push((selector.to_string(), Vec::new()));
                self.groups.len() - 1
            }
        };
        let events = &mut self.groups[index].1;
        match events.iter_mut().find(|(name, _)| name == event) {
            Some((_, entries)) => entries.push(entry),
            None => events.push((event.to_string(), vec![entry])),
        }
    }

    fn nodes(&self, selector: &str) -> &[NodeId] {
        self.queries
            .iter()
            .find(|(cached, _)| cached == selector)
            .map(|(_, nodes)| nodes.as_slice())
            .unwrap_or_default()
    }
}

/// Listener target held weakly so a source never keeps itself alive
/// through its own listeners.
#[derive(Clone)]
enum BoundTarget {
    Element(NodeId),
    Source(Weak<dyn EventSource>),
}

impl BoundTarget {
    fn upgrade(&self) -> Option<Trigger> {
        match self {
            Self::Element(node) => Some(Trigger::Element(*node)),
            Self::Source(source) => source.upgrade().map(Trigger::Source),
        }
    }
}

pub struct ControllerInstance {
    me: Weak<ControllerInstance>,
    id: ControllerId,
    name: String,
    definition: Rc<dyn Controller>,
    scope: Cell<Option<NodeId>>,
    ctx: AppContext,
    params: Rc<ParamSet>,
    commands: RefCell<HashMap<String, Vec<Rc<CommandSlot>>>>,
    tags: RefCell<HashMap<SourceKey, HashSet<String>>>,
    connections: RefCell<Vec<Connection>>,
    subscriptions: RefCell<Vec<SubscriptionHandle>>,
    pass: RefCell<Option<ObserverPass>>,
    hooks: Hooks,
}

impl fmt::Debug for ControllerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope", &self.scope.get())
            .field("params", &self.params)
            .finish()
    }
}

impl ControllerInstance {
    /// Builds the instance, applies `params` over the declared defaults and
    /// runs the initialization sequence.
    pub fn create(
        ctx: &AppContext,
        name: &str,
        definition: Rc<dyn Controller>,
        scope: Option<NodeId>,
        params: Option<&Map<String, Value>>,
    ) -> FrameworkResult<Rc<Self>> {
        if name.is_empty() {
            return Err(FrameworkError::missing_argument(
                "ControllerInstance::create",
                "controller name",
            ));
        }
        let id = ctx.next_controller_id();
        let specs = levels(&*definition)
            .into_iter()
            .flat_map(|level| level.params())
            .collect();
        let params = ParamSet::build(&format!("{name}#{}", id.0), specs, params)?;

        let instance = Rc::new_cyclic(|me| Self {
            me: me.clone(),
            id,
            name: name.to_string(),
            definition,
            scope: Cell::new(scope),
            ctx: ctx.clone(),
            params,
            commands: RefCell::new(HashMap::new()),
            tags: RefCell::new(HashMap::new()),
            connections: RefCell::new(Vec::new()),
            subscriptions: RefCell::new(Vec::new()),
            pass: RefCell::new(None),
            hooks: Hooks::new(format!("controller '{name}'"), &["onInit"]),
        });
        if let Err(err) = instance.init() {
            instance.remove_observers();
            return Err(err);
        }
        Ok(instance)
    }

    fn init(self: &Rc<Self>) -> FrameworkResult<()> {
        let definition = self.definition.clone();
        let chain = levels(&*definition);

        for level in &chain {
            level.add_commands(self)?;
        }
        self.attach_observers()?;
        for level in &chain {
            level.add_intercepts(self)?;
        }
        definition.on_init(self)?;
        self.hooks.emit("onInit", Value::Null)?;

        for param in self.params.iter() {
            if !param.value().is_null() {
                param.notify_change()?;
            }
        }

        let bus = self.ctx.bus().clone();
        for topic in [controller_observers_topic(&self.name), ADD_OBSERVERS_TOPIC.to_string()] {
            let weak = self.me.clone();
            let handle = bus.subscribe(&topic, move |_| match weak.upgrade() {
                Some(controller) => controller.attach_observers(),
                None => Ok(()),
            })?;
            self.subscriptions.borrow_mut().push(handle);
        }

        info!(controller = %self.name, id = self.id.0, scope = ?self.scope.get(), "controller initialized");
        Ok(())
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root element of the controller; `None` for page-level controllers
    /// and after teardown.
    pub fn scope(&self) -> Option<NodeId> {
        self.scope.get()
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn definition(&self) -> &Rc<dyn Controller> {
        &self.definition
    }

    pub fn params(&self) -> &Rc<ParamSet> {
        &self.params
    }

    pub fn value(&self, param: &str) -> FrameworkResult<Value> {
        self.params.value(param)
    }

    pub fn set_value(&self, param: &str, value: Value) -> FrameworkResult<()> {
        self.params.set_value(param, Some(value))
    }

    /// Resolves `path` in the catalog and appends it to the chain for `name`.
    pub fn add_command(&self, name: &str, path: &str) -> FrameworkResult<Rc<CommandSlot>> {
        if path.is_empty() {
            return Err(FrameworkError::missing_argument(
                "Controller::add_command",
                "command path",
            ));
        }
        let invokable = self.ctx.catalog().resolve_invokable(path)?;
        self.add_invokable(name, invokable)
    }

    /// Appends an already built invokable to the chain for `name`.
    pub fn add_invokable(&self, name: &str, invokable: Invokable) -> FrameworkResult<Rc<CommandSlot>> {
        if name.is_empty() {
            return Err(FrameworkError::missing_argument(
                "Controller::add_command",
                "command name",
            ));
        }
        let mut commands = self.commands.borrow_mut();
        let chain = commands.entry(name.to_string()).or_default();
        let key = format!("command:{}:{name}:{}", self.id.0, chain.len());
        let slot = CommandSlot::new(key, name, &self.name, invokable, self.ctx.debug());
        chain.push(slot.clone());
        trace!(controller = %self.name, command = name, position = chain.len(), "command added");
        Ok(slot)
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.borrow().contains_key(name)
    }

    /// First entry of the chain registered under `name`.
    pub fn command(&self, name: &str) -> FrameworkResult<Rc<CommandSlot>> {
        self.commands
            .borrow()
            .get(name)
            .and_then(|chain| chain.first().cloned())
            .ok_or_else(|| FrameworkError::unknown_command("Controller::command", name))
    }

    pub fn command_chain(&self, name: &str) -> FrameworkResult<Vec<Rc<CommandSlot>>> {
        self.commands
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| FrameworkError::unknown_command("Controller::command_chain", name))
    }

    /// Executes every entry of the chain in registration order with the
    /// same request. In production mode the first failure stops the chain.
    pub fn fire_command_chain(&self, name: &str, request: &RequestContext) -> FrameworkResult<()> {
        for slot in self.command_chain(name)? {
            slot.execute(request.clone())?;
        }
        Ok(())
    }

    pub fn add_observer(
        &self,
        source: impl Into<ObserverSource>,
        event: &str,
        command: &str,
        params: impl Into<ParamsSource>,
    ) -> FrameworkResult<()> {
        const OPERATION: &str = "Controller::add_observer";
        if event.is_empty() {
            return Err(FrameworkError::missing_argument(OPERATION, "event name"));
        }
        if command.is_empty() {
            return Err(FrameworkError::missing_argument(OPERATION, "command name"));
        }
        if !self.has_command(command) {
            return Err(FrameworkError::unknown_command(OPERATION, command));
        }

        let params = params.into();
        match source.into() {
            ObserverSource::Selectors(selectors) => {
                for selector in selectors.iter().filter(|selector| !selector.is_empty()) {
                    self.observe_selector(selector, event, command, &params)?;
                }
            }
            ObserverSource::Targets(targets) => {
                for target in targets {
                    let entry = ObserverEntry::new(event, None, command, params.clone());
                    self.bind(&target, event, vec![entry])?;
                }
            }
        }
        Ok(())
    }

    fn observe_selector(
        &self,
        selector: &str,
        event: &str,
        command: &str,
        params: &ParamsSource,
    ) -> FrameworkResult<()> {
        let scope = self.scope();
        if let Some(scope) = scope.filter(|_| bubbles(event)) {
            let entry = ObserverEntry::new(event, Some(selector), command, params.clone());
            return self.bind(&Trigger::Element(scope), event, vec![entry]);
        }

        let entry = ObserverEntry::new(event, None, command, params.clone());
        let in_pass = self.pass.borrow().is_some();
        if !in_pass {
            for node in self.ctx.tree().query(selector, scope)? {
                self.bind(&Trigger::Element(node), event, vec![entry.clone()])?;
            }
            return Ok(());
        }

        let cached = self
            .pass
            .borrow()
            .as_ref()
            .is_some_and(|pass| pass.has_query(selector));
        let nodes = if cached {
            None
        } else {
            Some(self.ctx.tree().query(selector, scope)?)
        };
        if let Some(pass) = self.pass.borrow_mut().as_mut() {
            if let Some(nodes) = nodes {
                pass.queries.push((selector.to_string(), nodes));
            }
            pass.push(selector, event, entry);
        }
        Ok(())
    }

    /// Runs every `add_observers` hook and binds what they registered.
    /// Entries already bound for a target are skipped, so passes can repeat
    /// freely. A pass requested while one is running is ignored.
    pub fn attach_observers(self: &Rc<Self>) -> FrameworkResult<()> {
        if self.pass.borrow().is_some() {
            return Ok(());
        }
        if let Some(scope) = self.scope() {
            if !self.ctx.tree().is_connected(scope) {
                debug!(controller = %self.name, %scope, "scope is detached, skipping observer pass");
                return Ok(());
            }
        }
        *self.pass.borrow_mut() = Some(ObserverPass::default());

        let definition = self.definition.clone();
        let result = levels(&*definition)
            .into_iter()
            .try_for_each(|level| level.add_observers(self));
        let pass = self.pass.borrow_mut().take().unwrap_or_default();
        result?;

        for (selector, events) in &pass.groups {
            for node in pass.nodes(selector) {
                for (event, entries) in events {
                    self.bind(&Trigger::Element(*node), event, entries.clone())?;
                }
            }
        }
        Ok(())
    }

    fn bind(&self, target: &Trigger, event: &str, entries: Vec<ObserverEntry>) -> FrameworkResult<()> {
        let key = target.source_key();
        let fresh: Vec<ObserverEntry> = {
            let tags = self.tags.borrow();
            let bound = tags.get(&key);
            let mut seen = HashSet::new();
            entries
                .into_iter()
                .filter(|entry| !bound.is_some_and(|set| set.contains(&entry.fingerprint)))
                .filter(|entry| seen.insert(entry.fingerprint.clone()))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }

        let bound_target = match target {
            Trigger::Element(node) => BoundTarget::Element(*node),
            Trigger::Source(source) => BoundTarget::Source(Rc::downgrade(source)),
        };
        let fingerprints: Vec<String> = fresh.iter().map(|entry| entry.fingerprint.clone()).collect();
        let weak = self.me.clone();
        let entries = Rc::new(fresh);
        let on_event = handler(move |event| {
            let (Some(controller), Some(trigger)) = (weak.upgrade(), bound_target.upgrade()) else {
                return Ok(());
            };
            controller.dispatch_observed(&trigger, event, &entries)
        });

        let connection = match target {
            Trigger::Element(node) => self.ctx.tree().listen(*node, event, on_event)?,
            Trigger::Source(source) => source.connect(event, on_event)?,
        };
        debug!(
            controller = %self.name,
            target = %key,
            event,
            observers = fingerprints.len(),
            "observers bound"
        );
        self.tags.borrow_mut().entry(key).or_default().extend(fingerprints);
        self.connections.borrow_mut().push(connection);
        Ok(())
    }

    fn dispatch_observed(
        &self,
        target: &Trigger,
        event: &Event,
        entries: &[ObserverEntry],
    ) -> FrameworkResult<()> {
        let scope = self.scope();
        if let Some(scope) = scope {
            if !self.ctx.tree().is_connected(scope) {
                debug!(controller = %self.name, %scope, "scope left the tree, removing observers");
                self.remove_observers();
                return Ok(());
            }
        }
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };

        for entry in entries {
            let trigger = match &entry.delegate {
                Some(selector) => {
                    let Some(origin) = event.target else {
                        continue;
                    };
                    match self.ctx.tree().query_match(origin, selector, scope, true)? {
                        Some(node) => Trigger::Element(node),
                        None => continue,
                    }
                }
                None => target.clone(),
            };
            let request = RequestContext::new(
                entry.params.clone(),
                trigger,
                Some(event.clone()),
                &entry.command,
                &me,
                None,
            )?;
            self.fire_command_chain(&entry.command, &request)?;
        }
        Ok(())
    }

    /// Wraps the first entry of `intercepted` with advice that runs the
    /// `advisor` chain before, after, or around it.
    pub fn add_intercept(
        &self,
        kind: &str,
        intercepted: &str,
        advisor: &str,
        params: impl Into<ParamsSource>,
    ) -> FrameworkResult<()> {
        const OPERATION: &str = "Controller::add_intercept";
        let kind: InterceptKind = kind.parse()?;
        if intercepted.is_empty() {
            return Err(FrameworkError::missing_argument(OPERATION, "intercepted command"));
        }
        if advisor.is_empty() {
            return Err(FrameworkError::missing_argument(OPERATION, "advisor command"));
        }
        if intercepted == advisor {
            return Err(FrameworkError::configuration(
                ErrorCode::SelfInterception,
                OPERATION,
                format!("'{advisor}' cannot intercept itself"),
            ));
        }

        let slot = self.command(intercepted).map_err(|_| FrameworkError::unknown_command(OPERATION, intercepted))?;
        if !self.has_command(advisor) {
            return Err(FrameworkError::unknown_command(OPERATION, advisor));
        }
        slot.push_advice(Advice {
            kind,
            advisor: advisor.to_string(),
            params: params.into(),
            controller: self.me.clone(),
        });
        debug!(controller = %self.name, kind = kind.as_str(), intercepted, advisor, "intercept installed");
        Ok(())
    }

    /// Disconnects every observer listener. Bound tags are kept, so later
    /// passes never bind the same observers again.
    pub fn remove_observers(&self) {
        let connections = std::mem::take(&mut *self.connections.borrow_mut());
        for connection in &connections {
            connection.disconnect();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .borrow()
            .iter()
            .filter(|connection| connection.is_connected())
            .count()
    }

    /// Detaches everything the instance registered and clears its scope.
    pub fn teardown(&self) {
        self.remove_observers();
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        for handle in &subscriptions {
            self.ctx.bus().unsubscribe(handle);
        }
        let commands = std::mem::take(&mut *self.commands.borrow_mut());
        for slot in commands.values().flatten() {
            slot.reset();
        }
        self.scope.set(None);
        debug!(controller = %self.name, id = self.id.0, "controller torn down");
    }

    /// Another controller attached to the same scope.
    pub fn context_controller(&self, name: &str) -> Option<Rc<ControllerInstance>> {
        let scope = self.scope()?;
        self.ctx.attachment(Some(scope), name)
    }

    /// Asks controllers to run an observer pass: the one named `name`, or
    /// every controller.
    pub fn update_observers(bus: &MessageBus, name: Option<&str>) -> FrameworkResult<()> {
        match name {
            Some(name) => bus.publish(&controller_observers_topic(name), Value::Null),
            None => bus.publish(ADD_OBSERVERS_TOPIC, Value::Null),
        }
    }

    /// Runs an observer pass once the next model notification completes.
    pub fn refresh_after_model_update(&self) {
        let weak = self.me.clone();
        self.ctx.model().defer(Box::new(move || match weak.upgrade() {
            Some(controller) => controller.attach_observers(),
            None => Ok(()),
        }));
    }
}

impl EventSource for ControllerInstance {
    fn source_key(&self) -> SourceKey {
        SourceKey(format!("controller:{}", self.id.0))
    }

    fn connect(&self, event: &str, handler: EventHandler) -> FrameworkResult<Connection> {
        self.hooks.connect(event, handler)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
