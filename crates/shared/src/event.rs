//! Observable events shared by every layer: UI tree listeners, message topics,
//! model references, parameters and command slots all expose named events
//! through [`EventSource`] so controllers can observe them uniformly.

use std::{
    any::Any,
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use serde_json::Value;

use crate::{
    domain::NodeId,
    error::{ErrorCode, FrameworkError, FrameworkResult},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub target: Option<NodeId>,
    pub detail: Value,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            detail: Value::Null,
        }
    }

    pub fn with_target(mut self, target: NodeId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

pub type EventHandler = Rc<dyn Fn(&Event) -> FrameworkResult<()>>;

pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&Event) -> FrameworkResult<()> + 'static,
{
    Rc::new(f)
}

/// Events in the click/mouse/key/move family bubble through ancestors and
/// are therefore eligible for delegation at a scope root.
pub fn bubbles(event_name: &str) -> bool {
    event_name.starts_with("onclick")
        || event_name.contains("onmouse")
        || event_name.contains("onkey")
        || event_name.contains("onmove")
}

/// Stable identity of an observable object, used for observer tagging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey(pub String);

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<NodeId> for SourceKey {
    fn from(value: NodeId) -> Self {
        Self(format!("node:{}", value.0))
    }
}

pub trait EventSource: Any {
    fn source_key(&self) -> SourceKey;

    fn connect(&self, event: &str, handler: EventHandler) -> FrameworkResult<Connection>;

    fn as_any(&self) -> &dyn Any;
}

/// Handle to an attached listener. Disconnecting is idempotent and clones
/// share the same underlying registration.
#[derive(Clone)]
pub struct Connection {
    detach: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl Connection {
    pub fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Rc::new(RefCell::new(Some(Box::new(detach)))),
        }
    }

    pub fn disconnect(&self) {
        let detach = self.detach.borrow_mut().take();
        if let Some(detach) = detach {
            detach();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.detach.borrow().is_some()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[derive(Default)]
struct HookState {
    next_id: u64,
    listeners: Vec<(u64, EventHandler)>,
}

/// Ordered listener list for one named event.
#[derive(Clone, Default)]
pub struct Hook {
    state: Rc<RefCell<HookState>>,
}

impl Hook {
    pub fn connect(&self, handler: EventHandler) -> Connection {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, handler));
            id
        };

        let state: Weak<RefCell<HookState>> = Rc::downgrade(&self.state);
        Connection::new(move || {
            if let Some(state) = state.upgrade() {
                state
                    .borrow_mut()
                    .listeners
                    .retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    /// Calls every listener registered at the time of the call, in
    /// registration order. Listeners may connect or disconnect re-entrantly.
    pub fn emit(&self, event: &Event) -> FrameworkResult<()> {
        let snapshot: Vec<EventHandler> = self
            .state
            .borrow()
            .listeners
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in snapshot {
            handler(event)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fixed set of named hooks owned by one observable object.
#[derive(Clone)]
pub struct Hooks {
    owner: String,
    hooks: Rc<Vec<(&'static str, Hook)>>,
}

impl Hooks {
    pub fn new(owner: impl Into<String>, names: &[&'static str]) -> Self {
        Self {
            owner: owner.into(),
            hooks: Rc::new(names.iter().map(|name| (*name, Hook::default())).collect()),
        }
    }

    pub fn get(&self, event: &str) -> Option<&Hook> {
        self.hooks
            .iter()
            .find(|(name, _)| *name == event)
            .map(|(_, hook)| hook)
    }

    pub fn connect(&self, event: &str, handler: EventHandler) -> FrameworkResult<Connection> {
        let hook = self.get(event).ok_or_else(|| {
            FrameworkError::configuration(
                ErrorCode::UnknownEvent,
                "EventSource::connect",
                format!("{} has no '{event}' event", self.owner),
            )
        })?;
        Ok(hook.connect(handler))
    }

    pub fn emit(&self, event: &str, detail: Value) -> FrameworkResult<()> {
        match self.get(event) {
            Some(hook) => hook.emit(&Event::new(event).with_detail(detail)),
            None => Ok(()),
        }
    }
}
