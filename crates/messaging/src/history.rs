use std::{any::Any, cell::RefCell};

use serde_json::{Map, Value};
use shared::{
    error::{FrameworkError, FrameworkResult},
    event::{Connection, EventHandler, EventSource, Hooks, SourceKey},
};
use tracing::debug;
use url::form_urlencoded;

use crate::MessageBus;

#[derive(Default)]
struct HistoryState {
    location_hash: String,
    saved_hash: Option<String>,
    default_hash: Option<String>,
}

/// Tracks the location hash as a key/value state. A change fires `onChange`
/// and publishes the parsed state on the topic named by its `topic` key.
pub struct History {
    bus: MessageBus,
    state: RefCell<HistoryState>,
    hooks: Hooks,
}

/// Parses `a=1&b=x%20y` into a map. Segments without exactly one `=` are
/// ignored.
pub fn parse_hash(hash: &str) -> Map<String, Value> {
    let mut params = Map::new();
    for segment in hash.trim_start_matches('#').split('&') {
        if segment.split('=').count() != 2 {
            continue;
        }
        if let Some((key, value)) = form_urlencoded::parse(segment.as_bytes()).next() {
            params.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }
    params
}

pub fn serialize_hash(params: &Map<String, Value>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        match value {
            Value::String(text) => serializer.append_pair(key, text),
            other => serializer.append_pair(key, &other.to_string()),
        };
    }
    serializer.finish()
}

fn normalize(raw: &str) -> String {
    let hash = raw.trim_start_matches('#');
    match hash {
        "null" | "undefined" => String::new(),
        other => other.to_string(),
    }
}

impl History {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            state: RefCell::new(HistoryState::default()),
            hooks: Hooks::new("history", &["onChange"]),
        }
    }

    /// Hash used whenever the location carries none.
    pub fn set_default_hash(&self, hash: &str) {
        let hash = normalize(hash);
        self.state.borrow_mut().default_hash = (!hash.is_empty()).then_some(hash);
    }

    pub fn set_default_params(&self, params: &Map<String, Value>) {
        self.set_default_hash(&serialize_hash(params));
    }

    /// Current effective hash, falling back to the default.
    pub fn hash(&self) -> String {
        let state = self.state.borrow();
        let current = normalize(&state.location_hash);
        match (&state.default_hash, current.is_empty()) {
            (Some(default), true) => default.clone(),
            _ => current,
        }
    }

    pub fn params(&self) -> Map<String, Value> {
        parse_hash(&self.hash())
    }

    pub fn topic(&self) -> Option<String> {
        self.params()
            .get("topic")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Records a new location hash, as reported by the host, and reacts to it.
    pub fn apply_hash(&self, raw: &str) -> FrameworkResult<()> {
        self.state.borrow_mut().location_hash = raw.to_string();
        self.check()
    }

    pub fn navigate(&self, params: &Map<String, Value>) -> FrameworkResult<()> {
        if params.is_empty() {
            return Err(FrameworkError::missing_argument("History::navigate", "params"));
        }
        self.apply_hash(&serialize_hash(params))
    }

    /// Compares the effective hash with the last one handled and dispatches
    /// on change.
    pub fn check(&self) -> FrameworkResult<()> {
        let current = self.hash();
        {
            let mut state = self.state.borrow_mut();
            if state.saved_hash.as_deref() == Some(current.as_str()) {
                return Ok(());
            }
            state.saved_hash = Some(current.clone());
        }

        let params = parse_hash(&current);
        debug!(hash = %current, "history changed");
        self.hooks.emit("onChange", Value::Object(params.clone()))?;
        if let Some(topic) = params.get("topic").and_then(Value::as_str) {
            let topic = topic.to_string();
            self.bus.publish(&topic, Value::Object(params))?;
        }
        Ok(())
    }
}

impl EventSource for History {
    fn source_key(&self) -> SourceKey {
        SourceKey("history".to_string())
    }

    fn connect(&self, event: &str, handler: EventHandler) -> FrameworkResult<Connection> {
        self.hooks.connect(event, handler)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
