use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    mem,
    rc::{Rc, Weak},
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use shared::{
    error::{ErrorCode, FrameworkError, FrameworkResult},
    event::{Connection, EventHandler, EventSource, Hooks, SourceKey},
    protocol::model_topic,
};
use tracing::debug;

use crate::{MessageBus, SubscriptionHandle};

/// Deferred work queued during a model notification, run once after the
/// change has been published.
pub type PendingRefresh = Box<dyn FnOnce() -> FrameworkResult<()>>;

#[derive(Default)]
struct ModelState {
    entries: HashMap<String, Value>,
    references: HashMap<String, Rc<ModelReference>>,
    pending: Vec<PendingRefresh>,
}

/// Process-wide key/value store. Every mutation publishes the new value on
/// `/model/<key>`.
#[derive(Clone)]
pub struct AppModel {
    state: Rc<RefCell<ModelState>>,
    bus: MessageBus,
}

fn require_key(operation: &str, key: &str) -> FrameworkResult<()> {
    if key.is_empty() {
        return Err(FrameworkError::missing_argument(operation, "key"));
    }
    Ok(())
}

fn to_model_value<T: Serialize + ?Sized>(operation: &str, value: &T) -> FrameworkResult<Value> {
    serde_json::to_value(value).map_err(|err| {
        FrameworkError::configuration(
            ErrorCode::WrongArgumentType,
            operation,
            format!("value is not representable in the model: {err}"),
        )
    })
}

/// Loose truthiness: null, false, zero, and empty strings are treated as
/// absent.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl AppModel {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            state: Rc::new(RefCell::new(ModelState::default())),
            bus,
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Stores a deep copy of `value` and notifies observers of `key`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> FrameworkResult<()> {
        require_key("AppModel::set", key)?;
        let value = to_model_value("AppModel::set", value)?;
        self.state
            .borrow_mut()
            .entries
            .insert(key.to_string(), value);
        self.notify(key)
    }

    /// Appends to the entry under `key`, promoting a scalar entry to a list.
    /// Array values are flattened into the existing list.
    pub fn add<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> FrameworkResult<()> {
        require_key("AppModel::add", key)?;
        let value = to_model_value("AppModel::add", value)?;
        if value.is_null() || value.as_str() == Some("") {
            return Err(FrameworkError::missing_argument("AppModel::add", "value"));
        }
        if !self.contains(key) {
            return self.set(key, &value);
        }

        {
            let mut state = self.state.borrow_mut();
            let entry = state.entries.entry(key.to_string()).or_insert(Value::Null);
            let mut items = match mem::take(entry) {
                Value::Array(items) => items,
                other => vec![other],
            };
            match value {
                Value::Array(more) => items.extend(more),
                other => items.push(other),
            }
            *entry = Value::Array(items);
        }
        self.notify(key)
    }

    /// Returns a deep copy of the entry, or `Value::Null` when nothing is stored.
    pub fn get(&self, key: &str) -> Value {
        match self.state.borrow().entries.get(key) {
            Some(value) => value.clone(),
            None => {
                debug!(key, "no model entry");
                Value::Null
            }
        }
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        serde_json::from_value(self.get(key)).ok()
    }

    /// Resets the entry to null and notifies observers.
    pub fn remove(&self, key: &str) -> FrameworkResult<()> {
        require_key("AppModel::remove", key)?;
        self.state
            .borrow_mut()
            .entries
            .insert(key.to_string(), Value::Null);
        self.notify(key)
    }

    /// True when the stored value is truthy; a stored `0` or `""` counts as
    /// absent.
    pub fn contains(&self, key: &str) -> bool {
        self.state
            .borrow()
            .entries
            .get(key)
            .map(is_truthy)
            .unwrap_or(false)
    }

    pub fn notify(&self, key: &str) -> FrameworkResult<()> {
        require_key("AppModel::notify", key)?;

        let reference = self.state.borrow().references.get(key).cloned();
        if let Some(reference) = reference {
            reference.notify()?;
        }

        self.bus.publish(&model_topic(key), json!([self.get(key)]))?;

        let pending = mem::take(&mut self.state.borrow_mut().pending);
        for refresh in pending {
            refresh()?;
        }
        Ok(())
    }

    /// Queues work to run after the next notification completes.
    pub fn defer(&self, refresh: PendingRefresh) {
        self.state.borrow_mut().pending.push(refresh);
    }

    pub fn add_observer<F>(&self, key: &str, f: F) -> FrameworkResult<SubscriptionHandle>
    where
        F: Fn(&[Value]) -> FrameworkResult<()> + 'static,
    {
        require_key("AppModel::add_observer", key)?;
        self.bus.subscribe(&model_topic(key), f)
    }

    pub fn remove_observer(&self, handle: &SubscriptionHandle) {
        self.bus.unsubscribe(handle);
    }

    /// Returns the shared reference object for `key`, creating it on first use.
    pub fn reference(&self, key: &str) -> FrameworkResult<Rc<ModelReference>> {
        require_key("AppModel::reference", key)?;
        let mut state = self.state.borrow_mut();
        let reference = state
            .references
            .entry(key.to_string())
            .or_insert_with(|| {
                Rc::new(ModelReference {
                    key: key.to_string(),
                    model: WeakModel {
                        state: Rc::downgrade(&self.state),
                        bus: self.bus.clone(),
                    },
                    hooks: Hooks::new(format!("model reference '{key}'"), &["onNotify"]),
                })
            });
        Ok(reference.clone())
    }
}

struct WeakModel {
    state: Weak<RefCell<ModelState>>,
    bus: MessageBus,
}

impl WeakModel {
    fn upgrade(&self) -> Option<AppModel> {
        self.state.upgrade().map(|state| AppModel {
            state,
            bus: self.bus.clone(),
        })
    }
}

/// Observable view over a single model key.
pub struct ModelReference {
    key: String,
    model: WeakModel,
    hooks: Hooks,
}

impl ModelReference {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Value {
        self.model
            .upgrade()
            .map(|model| model.get(&self.key))
            .unwrap_or(Value::Null)
    }

    pub fn set_value<T: Serialize + ?Sized>(&self, value: &T) -> FrameworkResult<()> {
        match self.model.upgrade() {
            Some(model) => model.set(&self.key, value),
            None => Ok(()),
        }
    }

    fn notify(&self) -> FrameworkResult<()> {
        self.hooks.emit("onNotify", self.value())
    }
}

impl EventSource for ModelReference {
    fn source_key(&self) -> SourceKey {
        SourceKey(format!("model:{}", self.key))
    }

    fn connect(&self, event: &str, handler: EventHandler) -> FrameworkResult<Connection> {
        self.hooks.connect(event, handler)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;
    use shared::event::handler;

    use super::*;

    fn model() -> AppModel {
        AppModel::new(MessageBus::new())
    }

    #[test]
    fn set_stores_a_detached_copy() {
        let model = model();
        let mut profile = json!({"name": "ada", "tags": ["x"]});
        model.set("profile", &profile).expect("set");

        profile["name"] = json!("grace");
        assert_eq!(model.get("profile")["name"], json!("ada"));

        let mut read = model.get("profile");
        read["tags"] = json!([]);
        assert_eq!(model.get("profile")["tags"], json!(["x"]));
    }

    #[test]
    fn add_promotes_and_flattens() {
        let model = model();
        model.add("items", &json!(1)).expect("first");
        model.add("items", &json!(2)).expect("second");
        model.add("items", &json!([3, 4])).expect("third");
        assert_eq!(model.get("items"), json!([1, 2, 3, 4]));
    }

    #[test]
    fn add_rejects_empty_values() {
        let model = model();
        let err = model.add("items", &Value::Null).expect_err("null");
        assert_eq!(err.code(), ErrorCode::MissingArgument);
        assert!(model.add("items", "").is_err());
    }

    #[test]
    fn falsy_entries_are_not_contained() {
        let model = model();
        model.set("count", &0).expect("set");
        assert!(!model.contains("count"));

        model.add("count", &5).expect("add");
        assert_eq!(model.get("count"), json!(5));
    }

    #[test]
    fn remove_nulls_and_notifies() {
        let model = model();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        model
            .add_observer("token", move |args| {
                sink.borrow_mut().push(args.to_vec());
                Ok(())
            })
            .expect("observe");

        model.set("token", "abc").expect("set");
        model.remove("token").expect("remove");
        assert_eq!(model.get("token"), Value::Null);
        assert_eq!(
            *seen.borrow(),
            vec![vec![json!("abc")], vec![Value::Null]]
        );
    }

    #[test]
    fn list_entries_reach_observers_as_one_argument() {
        let model = model();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        model
            .add_observer("items", move |args| {
                sink.borrow_mut().push(args.to_vec());
                Ok(())
            })
            .expect("observe");

        model.set("items", &json!([])).expect("empty");
        model.add("items", &json!([1, 2])).expect("add");
        assert_eq!(
            *seen.borrow(),
            vec![vec![json!([])], vec![json!([1, 2])]]
        );
    }

    #[test]
    fn reference_notifies_before_topic_subscribers() {
        let model = model();
        let order = Rc::new(RefCell::new(Vec::new()));
        let reference = model.reference("cart").expect("reference");
        {
            let order = order.clone();
            reference
                .connect(
                    "onNotify",
                    handler(move |event| {
                        order.borrow_mut().push(format!("ref:{}", event.detail));
                        Ok(())
                    }),
                )
                .expect("connect");
        }
        {
            let order = order.clone();
            model
                .add_observer("cart", move |args| {
                    order.borrow_mut().push(format!("topic:{}", args[0]));
                    Ok(())
                })
                .expect("observe");
        }

        reference.set_value(&json!(3)).expect("set through reference");
        assert_eq!(*order.borrow(), vec!["ref:3", "topic:3"]);
        assert_eq!(reference.value(), json!(3));
        assert!(Rc::ptr_eq(
            &reference,
            &model.reference("cart").expect("same reference")
        ));
    }

    #[test]
    fn deferred_work_runs_once_after_notification() {
        let model = model();
        let runs = Rc::new(Cell::new(0));
        {
            let runs = runs.clone();
            model.defer(Box::new(move || {
                runs.set(runs.get() + 1);
                Ok(())
            }));
        }

        model.set("a", &1).expect("first");
        model.set("a", &2).expect("second");
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn empty_key_is_rejected() {
        let model = model();
        assert_eq!(
            model.set("", &1).expect_err("empty key").code(),
            ErrorCode::MissingArgument
        );
    }
}
