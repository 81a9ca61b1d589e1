use std::{
    any::{type_name, Any, TypeId},
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use serde_json::{Map, Value};
use shared::{
    domain::NodeId,
    error::{FrameworkError, FrameworkResult},
    event::{Event, EventSource, SourceKey},
};

use crate::{command::Invocation, controller::ControllerInstance};

pub type Params = Map<String, Value>;

type ProduceFn = dyn Fn(Option<NodeId>, &Trigger, &Rc<ControllerInstance>) -> Params;

/// Object that caused a dispatch: a UI element or any other observable.
#[derive(Clone)]
pub enum Trigger {
    Element(NodeId),
    Source(Rc<dyn EventSource>),
}

impl Trigger {
    pub fn element(&self) -> Option<NodeId> {
        match self {
            Self::Element(node) => Some(*node),
            Self::Source(_) => None,
        }
    }

    pub fn source(&self) -> Option<&Rc<dyn EventSource>> {
        match self {
            Self::Element(_) => None,
            Self::Source(source) => Some(source),
        }
    }

    /// Concrete observable behind the trigger, e.g. the `MessageTopic` that
    /// fired.
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.source()
            .and_then(|source| source.as_any().downcast_ref::<T>())
    }

    pub fn source_key(&self) -> SourceKey {
        match self {
            Self::Element(node) => SourceKey::from(*node),
            Self::Source(source) => source.source_key(),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Trigger({})", self.source_key())
    }
}

impl From<NodeId> for Trigger {
    fn from(value: NodeId) -> Self {
        Self::Element(value)
    }
}

impl<T: EventSource> From<Rc<T>> for Trigger {
    fn from(value: Rc<T>) -> Self {
        Self::Source(value)
    }
}

impl From<Rc<dyn EventSource>> for Trigger {
    fn from(value: Rc<dyn EventSource>) -> Self {
        Self::Source(value)
    }
}

/// Deferred parameter computation, evaluated on every `update`.
#[derive(Clone)]
pub struct ParamsProducer {
    label: String,
    identity: TypeId,
    produce: Rc<ProduceFn>,
}

impl ParamsProducer {
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Parameters attached to an observer or intercept.
#[derive(Clone, Default)]
pub enum ParamsSource {
    #[default]
    None,
    Static(Params),
    /// Dispatches carrying suppressed params skip `execute`.
    Suppressed,
    Producer(ParamsProducer),
}

impl ParamsSource {
    pub fn from_fn<F>(produce: F) -> Self
    where
        F: Fn(Option<NodeId>, &Trigger, &Rc<ControllerInstance>) -> Params + 'static,
    {
        Self::Producer(ParamsProducer {
            label: type_name::<F>().to_string(),
            identity: TypeId::of::<F>(),
            produce: Rc::new(produce),
        })
    }

    /// Identity used when tagging observers: the producer's type, or the
    /// `key:value,` pairs of truthy static values. `None` when there are no
    /// params to fingerprint.
    pub fn fingerprint(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Suppressed => Some("false".to_string()),
            Self::Static(params) => {
                let mut out = String::new();
                for (key, value) in params {
                    if messaging::model::is_truthy(value) {
                        out.push_str(key);
                        out.push(':');
                        match value {
                            Value::String(text) => out.push_str(text),
                            other => out.push_str(&other.to_string()),
                        }
                        out.push(',');
                    }
                }
                Some(out)
            }
            Self::Producer(producer) => Some(format!("{}@{:?}", producer.label, producer.identity)),
        }
    }
}

impl From<Params> for ParamsSource {
    fn from(value: Params) -> Self {
        Self::Static(value)
    }
}

impl From<Value> for ParamsSource {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Static(map),
            Value::Bool(false) => Self::Suppressed,
            _ => Self::None,
        }
    }
}

impl From<Option<Params>> for ParamsSource {
    fn from(value: Option<Params>) -> Self {
        value.map_or(Self::None, Self::Static)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ParamBag {
    Absent,
    Suppressed,
    Values(Params),
}

struct RequestInner {
    bag: RefCell<ParamBag>,
    producer: Option<ParamsProducer>,
    trigger: Trigger,
    event: Option<Event>,
    command_name: String,
    controller: Weak<ControllerInstance>,
    controller_name: String,
    invocation: Option<Invocation>,
}

/// Everything a command needs to know about one dispatch.
#[derive(Clone)]
pub struct RequestContext {
    inner: Rc<RequestInner>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("command", &self.inner.command_name)
            .field("controller", &self.inner.controller_name)
            .field("trigger", &self.inner.trigger)
            .field("params", &self.inner.bag.borrow())
            .finish()
    }
}

impl RequestContext {
    pub fn new(
        params: ParamsSource,
        trigger: Trigger,
        event: Option<Event>,
        command_name: &str,
        controller: &Rc<ControllerInstance>,
        invocation: Option<Invocation>,
    ) -> FrameworkResult<Self> {
        if command_name.is_empty() {
            return Err(FrameworkError::missing_argument(
                "RequestContext::new",
                "command name",
            ));
        }

        let (bag, producer) = match params {
            ParamsSource::None => (ParamBag::Absent, None),
            ParamsSource::Static(map) => (ParamBag::Values(map), None),
            ParamsSource::Suppressed => (ParamBag::Suppressed, None),
            ParamsSource::Producer(producer) => (ParamBag::Values(Params::new()), Some(producer)),
        };

        Ok(Self {
            inner: Rc::new(RequestInner {
                bag: RefCell::new(bag),
                producer,
                trigger,
                event,
                command_name: command_name.to_string(),
                controller: Rc::downgrade(controller),
                controller_name: controller.name().to_string(),
                invocation,
            }),
        })
    }

    /// Re-runs the producer, if any, and merges its output by key.
    pub fn update(&self) {
        let Some(producer) = &self.inner.producer else {
            return;
        };
        let Some(controller) = self.controller() else {
            return;
        };
        let latest = (producer.produce)(controller.scope(), &self.inner.trigger, &controller);

        let mut bag = self.inner.bag.borrow_mut();
        match &mut *bag {
            ParamBag::Values(values) => values.extend(latest),
            other => *other = ParamBag::Values(latest),
        }
    }

    /// Current parameters. An absent bag is computed once on first access;
    /// suppressed params read as empty.
    pub fn params(&self) -> Params {
        if *self.inner.bag.borrow() == ParamBag::Absent {
            self.update();
        }
        match &*self.inner.bag.borrow() {
            ParamBag::Values(values) => values.clone(),
            ParamBag::Absent | ParamBag::Suppressed => Params::new(),
        }
    }

    pub fn param(&self, key: &str) -> Option<Value> {
        self.params().get(key).cloned()
    }

    pub fn is_suppressed(&self) -> bool {
        *self.inner.bag.borrow() == ParamBag::Suppressed
    }

    pub fn trigger(&self) -> &Trigger {
        &self.inner.trigger
    }

    pub fn event(&self) -> Option<&Event> {
        self.inner.event.as_ref()
    }

    pub fn command_name(&self) -> &str {
        &self.inner.command_name
    }

    pub fn controller(&self) -> Option<Rc<ControllerInstance>> {
        self.inner.controller.upgrade()
    }

    pub fn controller_name(&self) -> &str {
        &self.inner.controller_name
    }

    /// Scope element of the controller that issued the request.
    pub fn context_element(&self) -> Option<NodeId> {
        self.controller().and_then(|controller| controller.scope())
    }

    pub fn invocation(&self) -> Option<&Invocation> {
        self.inner.invocation.as_ref()
    }
}
