//! Topic-keyed publish/subscribe bus plus the application model and hash
//! history that feed it.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use serde_json::Value;
use shared::{
    domain::SubscriptionId,
    error::{ErrorCode, FrameworkError, FrameworkResult},
    event::{Connection, EventHandler, EventSource, Hooks, SourceKey},
};
use tracing::{debug, warn};

pub mod history;
pub mod model;

pub use history::History;
pub use model::{AppModel, ModelReference};

pub type Listener = Rc<dyn Fn(&[Value]) -> FrameworkResult<()>>;

pub const DEFAULT_MAX_PUBLISH_DEPTH: usize = 64;

/// Named channel on the bus. Observable through its `onPublish` event, which
/// fires before plain subscribers are notified.
pub struct MessageTopic {
    name: String,
    message: RefCell<Option<Value>>,
    hooks: Hooks,
}

impl MessageTopic {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            message: RefCell::new(None),
            hooks: Hooks::new(format!("topic '{name}'"), &["onPublish"]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload of the publish currently in flight, if any.
    pub fn message(&self) -> Option<Value> {
        self.message.borrow().clone()
    }

    fn replace_message(&self, message: Option<Value>) -> Option<Value> {
        self.message.replace(message)
    }

    fn on_publish(&self, payload: &Value) -> FrameworkResult<()> {
        self.hooks.emit("onPublish", payload.clone())
    }
}

impl EventSource for MessageTopic {
    fn source_key(&self) -> SourceKey {
        SourceKey(format!("topic:{}", self.name))
    }

    fn connect(&self, event: &str, handler: EventHandler) -> FrameworkResult<Connection> {
        self.hooks.connect(event, handler)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: String,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, Rc<MessageTopic>>,
    subscribers: HashMap<String, Vec<(SubscriptionId, Listener)>>,
    next_id: u64,
}

#[derive(Clone)]
pub struct MessageBus {
    state: Rc<RefCell<BusState>>,
    depth: Rc<Cell<usize>>,
    max_depth: usize,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&[Value]) -> FrameworkResult<()> + 'static,
{
    Rc::new(f)
}

/// Wraps a non-array payload as a single-element sequence.
pub fn normalize_payload(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn require_topic(operation: &str, topic: &str) -> FrameworkResult<()> {
    if topic.is_empty() {
        return Err(FrameworkError::configuration(
            ErrorCode::MissingArgument,
            operation,
            "topic must be a non-empty string",
        ));
    }
    Ok(())
}

struct DepthGuard {
    depth: Rc<Cell<usize>>,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_PUBLISH_DEPTH)
    }

    /// `max_depth` bounds nested publishes (a subscriber publishing while it
    /// is being notified). Zero disables the bound.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(BusState::default())),
            depth: Rc::new(Cell::new(0)),
            max_depth,
        }
    }

    pub fn topic(&self, name: &str) -> FrameworkResult<Rc<MessageTopic>> {
        require_topic("MessageBus::topic", name)?;
        let mut state = self.state.borrow_mut();
        let topic = state
            .topics
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(MessageTopic::new(name)));
        Ok(topic.clone())
    }

    pub fn publish(&self, topic: &str, payload: Value) -> FrameworkResult<()> {
        require_topic("MessageBus::publish", topic)?;
        let _guard = self.enter(topic)?;

        let topic_obj = self.topic(topic)?;
        let previous = topic_obj.replace_message(Some(payload.clone()));
        let result = self.dispatch(&topic_obj, payload);
        topic_obj.replace_message(previous);
        result
    }

    fn enter(&self, topic: &str) -> FrameworkResult<DepthGuard> {
        let depth = self.depth.get() + 1;
        if self.max_depth > 0 && depth > self.max_depth {
            warn!(topic, depth, "publish re-entrancy limit reached");
            return Err(FrameworkError::dispatch(
                ErrorCode::RecursionLimit,
                topic,
                "MessageBus",
                format!("nested publish depth exceeded {}", self.max_depth),
            ));
        }
        self.depth.set(depth);
        Ok(DepthGuard {
            depth: self.depth.clone(),
        })
    }

    fn dispatch(&self, topic: &MessageTopic, payload: Value) -> FrameworkResult<()> {
        topic.on_publish(&payload)?;

        let args = normalize_payload(payload);
        let listeners: Vec<Listener> = self
            .state
            .borrow()
            .subscribers
            .get(topic.name())
            .map(|subs| subs.iter().map(|(_, listener)| listener.clone()).collect())
            .unwrap_or_default();
        debug!(topic = topic.name(), listeners = listeners.len(), "publishing");
        for listener in listeners {
            listener(&args)?;
        }
        Ok(())
    }

    pub fn subscribe<F>(&self, topic: &str, f: F) -> FrameworkResult<SubscriptionHandle>
    where
        F: Fn(&[Value]) -> FrameworkResult<()> + 'static,
    {
        self.subscribe_listener(topic, listener(f))
    }

    pub fn subscribe_listener(
        &self,
        topic: &str,
        listener: Listener,
    ) -> FrameworkResult<SubscriptionHandle> {
        require_topic("MessageBus::subscribe", topic)?;
        self.topic(topic)?;

        let mut state = self.state.borrow_mut();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push((id, listener));
        Ok(SubscriptionHandle {
            topic: topic.to_string(),
            id,
        })
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut state = self.state.borrow_mut();
        if let Some(subs) = state.subscribers.get_mut(&handle.topic) {
            subs.retain(|(id, _)| *id != handle.id);
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .borrow()
            .subscribers
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
