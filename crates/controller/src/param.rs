//! Controller parameters: named, optionally typed and required cells whose
//! changes are observable on the parameter and on its owning set.

use std::{
    any::Any,
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use serde_json::{json, Map, Value};
use shared::{
    error::{ErrorCode, FrameworkError, FrameworkResult},
    event::{Connection, EventHandler, EventSource, Hooks, SourceKey},
};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a parameter on a controller definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub default: Value,
    pub required: bool,
    pub kind: Option<ParamType>,
}

impl ParamSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: Value::Null,
            required: false,
            kind: None,
        }
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = value;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn kind(mut self, kind: ParamType) -> Self {
        self.kind = Some(kind);
        self
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

pub struct Param {
    name: String,
    value: RefCell<Value>,
    default: Value,
    required: bool,
    kind: Option<ParamType>,
    owner: Weak<ParamSet>,
    key: String,
    hooks: Hooks,
}

impl Param {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn kind(&self) -> Option<ParamType> {
        self.kind
    }

    fn check_type(&self, value: &Value) -> FrameworkResult<()> {
        match self.kind {
            Some(kind) if !kind.accepts(value) => Err(FrameworkError::validation(
                ErrorCode::InvalidType,
                &self.name,
                format!("expected a {kind} value, got {value}"),
            )),
            _ => Ok(()),
        }
    }

    /// Validates then stores `value`. `None` leaves the parameter unchanged
    /// unless it is required.
    pub fn set_value(&self, value: Option<Value>) -> FrameworkResult<()> {
        if self.required && value.as_ref().map_or(true, is_missing) {
            return Err(FrameworkError::validation(
                ErrorCode::MissingRequired,
                &self.name,
                "a value is required",
            ));
        }
        let Some(value) = value else {
            return Ok(());
        };
        self.check_type(&value)?;

        if *self.value.borrow() == value {
            return Ok(());
        }
        *self.value.borrow_mut() = value;
        trace!(param = %self.name, "value changed");
        self.notify_change()
    }

    /// Fires `onChange` here and on the owning set with the current value.
    pub fn notify_change(&self) -> FrameworkResult<()> {
        let value = self.value();
        self.hooks.emit("onChange", value.clone())?;
        if let Some(owner) = self.owner.upgrade() {
            owner
                .hooks
                .emit("onChange", json!({ "param": self.name, "value": value }))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("value", &self.value.borrow())
            .field("required", &self.required)
            .field("kind", &self.kind)
            .finish()
    }
}

impl EventSource for Param {
    fn source_key(&self) -> SourceKey {
        SourceKey(self.key.clone())
    }

    fn connect(&self, event: &str, handler: EventHandler) -> FrameworkResult<Connection> {
        self.hooks.connect(event, handler)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parameter set of one controller instance.
pub struct ParamSet {
    owner: String,
    params: Vec<Rc<Param>>,
    hooks: Hooks,
}

impl ParamSet {
    /// Builds a set from declarations ordered root definition first; later
    /// declarations of the same name replace earlier ones. `overrides` are
    /// applied over the defaults and are checked for required values.
    pub fn build(
        owner: &str,
        specs: Vec<ParamSpec>,
        overrides: Option<&Map<String, Value>>,
    ) -> FrameworkResult<Rc<Self>> {
        let mut merged: Vec<ParamSpec> = Vec::new();
        for spec in specs {
            if spec.name.is_empty() {
                return Err(FrameworkError::missing_argument("ParamSet::build", "param name"));
            }
            match merged.iter_mut().find(|existing| existing.name == spec.name) {
                Some(existing) => *existing = spec,
                None => merged.push(spec),
            }
        }

        for spec in &merged {
            if let Some(kind) = spec.kind {
                if !spec.default.is_null() && !kind.accepts(&spec.default) {
                    return Err(FrameworkError::validation(
                        ErrorCode::InvalidType,
                        &spec.name,
                        format!("default {} is not a {kind} value", spec.default),
                    ));
                }
            }
        }

        let set = Rc::new_cyclic(|me: &Weak<ParamSet>| Self {
            owner: owner.to_string(),
            params: merged
                .into_iter()
                .map(|spec| {
                    Rc::new(Param {
                        key: format!("param:{owner}:{}", spec.name),
                        hooks: Hooks::new(format!("param '{}'", spec.name), &["onChange"]),
                        value: RefCell::new(spec.default.clone()),
                        name: spec.name,
                        default: spec.default,
                        required: spec.required,
                        kind: spec.kind,
                        owner: me.clone(),
                    })
                })
                .collect(),
            hooks: Hooks::new(format!("params of '{owner}'"), &["onChange"]),
        });

        if let Some(overrides) = overrides {
            for param in &set.params {
                match overrides.get(&param.name) {
                    Some(value) => param.set_value(Some(value.clone()))?,
                    None if param.required && is_missing(&param.value()) => {
                        return Err(FrameworkError::validation(
                            ErrorCode::MissingRequired,
                            &param.name,
                            "a value is required",
                        ));
                    }
                    None => {}
                }
            }
        }
        Ok(set)
    }

    pub fn empty(owner: &str) -> Rc<Self> {
        Rc::new(Self {
            owner: owner.to_string(),
            params: Vec::new(),
            hooks: Hooks::new(format!("params of '{owner}'"), &["onChange"]),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Param>> {
        self.params.iter().find(|param| param.name == name)
    }

    fn require(&self, name: &str) -> FrameworkResult<&Rc<Param>> {
        self.get(name).ok_or_else(|| {
            FrameworkError::validation(
                ErrorCode::UnknownParam,
                name,
                format!("'{}' declares no such parameter", self.owner),
            )
        })
    }

    pub fn value(&self, name: &str) -> FrameworkResult<Value> {
        Ok(self.require(name)?.value())
    }

    pub fn set_value(&self, name: &str, value: Option<Value>) -> FrameworkResult<()> {
        self.require(name)?.set_value(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Param>> {
        self.params.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|param| param.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Current values keyed by name.
    pub fn to_map(&self) -> Map<String, Value> {
        self.params
            .iter()
            .map(|param| (param.name.clone(), param.value()))
            .collect()
    }
}

impl fmt::Debug for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSet")
            .field("owner", &self.owner)
            .field("params", &self.params)
            .finish()
    }
}

impl EventSource for ParamSet {
    fn source_key(&self) -> SourceKey {
        SourceKey(format!("params:{}", self.owner))
    }

    fn connect(&self, event: &str, handler: EventHandler) -> FrameworkResult<Connection> {
        self.hooks.connect(event, handler)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
#[path = "tests/param_tests.rs"]
mod tests;
