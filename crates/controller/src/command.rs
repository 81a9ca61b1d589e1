//! Invokables and the command slot that runs them: guarded execution,
//! interception advice, and service callbacks.

use std::{
    any::Any,
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use serde_json::{Map, Value};
use service::ServiceCaller;
use shared::{
    domain::{InterceptKind, InvokableKind},
    error::{ErrorCode, FrameworkError, FrameworkResult},
    event::{Connection, EventHandler, EventSource, Hooks, SourceKey},
};
use tracing::{debug, error};

use crate::{
    controller::ControllerInstance,
    request::{ParamsSource, RequestContext},
};

fn not_implemented(method: &str) -> anyhow::Error {
    FrameworkError::configuration(
        ErrorCode::NotImplemented,
        method,
        format!("{method}() is not implemented"),
    )
    .into()
}

pub trait Command {
    fn execute(&self, request: &RequestContext) -> anyhow::Result<()>;

    fn on_response(&self, _data: &Value, _params: &Map<String, Value>) -> anyhow::Result<()> {
        Err(not_implemented("Command::on_response"))
    }

    fn on_error(&self, _errors: &[Value]) -> anyhow::Result<()> {
        Err(not_implemented("Command::on_error"))
    }
}

pub trait Behavior {
    fn execute(&self, request: &RequestContext) -> anyhow::Result<()>;
}

/// Conditional advice. The default `execute` proceeds to the intercepted
/// command only when `condition` holds.
pub trait Rule {
    fn condition(&self, request: &RequestContext) -> anyhow::Result<bool>;

    fn execute(&self, request: &RequestContext) -> anyhow::Result<()> {
        if self.condition(request)? {
            if let Some(invocation) = request.invocation() {
                invocation.proceed()?;
            }
        }
        Ok(())
    }
}

pub enum Invokable {
    Command(Box<dyn Command>),
    Behavior(Box<dyn Behavior>),
    Rule(Box<dyn Rule>),
}

impl Invokable {
    pub fn command(command: impl Command + 'static) -> Self {
        Self::Command(Box::new(command))
    }

    pub fn behavior(behavior: impl Behavior + 'static) -> Self {
        Self::Behavior(Box::new(behavior))
    }

    pub fn rule(rule: impl Rule + 'static) -> Self {
        Self::Rule(Box::new(rule))
    }

    pub fn kind(&self) -> InvokableKind {
        match self {
            Self::Command(_) => InvokableKind::Command,
            Self::Behavior(_) => InvokableKind::Behavior,
            Self::Rule(_) => InvokableKind::Rule,
        }
    }

    fn execute(&self, request: &RequestContext) -> anyhow::Result<()> {
        match self {
            Self::Command(command) => command.execute(request),
            Self::Behavior(behavior) => behavior.execute(request),
            Self::Rule(rule) => rule.execute(request),
        }
    }
}

type Proceed = Rc<dyn Fn() -> FrameworkResult<()>>;

/// Captured call of an intercepted command, handed to its advisors.
#[derive(Clone)]
pub struct Invocation {
    request: RequestContext,
    callee: Weak<CommandSlot>,
    proceed: Option<Proceed>,
}

impl Invocation {
    /// Request the intercepted command was called with.
    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn callee(&self) -> Option<Rc<CommandSlot>> {
        self.callee.upgrade()
    }

    /// Only around advice can proceed.
    pub fn can_proceed(&self) -> bool {
        self.proceed.is_some()
    }

    /// Runs the intercepted command with its original request.
    pub fn proceed(&self) -> FrameworkResult<()> {
        match &self.proceed {
            Some(proceed) => proceed(),
            None => {
                debug!(command = self.request.command_name(), "proceed outside around advice ignored");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.request.command_name())
            .field("can_proceed", &self.can_proceed())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct Advice {
    pub(crate) kind: InterceptKind,
    pub(crate) advisor: String,
    pub(crate) params: ParamsSource,
    pub(crate) controller: Weak<ControllerInstance>,
}

/// One entry of a command chain. Wraps the invokable with the most recent
/// request, any interception advice, and observable service callbacks.
pub struct CommandSlot {
    me: Weak<CommandSlot>,
    key: String,
    command_name: String,
    controller_name: String,
    invokable: Invokable,
    request: RefCell<Option<RequestContext>>,
    advice: RefCell<Vec<Advice>>,
    hooks: Hooks,
    debug: bool,
}

impl CommandSlot {
    pub(crate) fn new(
        key: String,
        command_name: &str,
        controller_name: &str,
        invokable: Invokable,
        debug: bool,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            hooks: Hooks::new(key.clone(), &["onResponse", "onError"]),
            key,
            command_name: command_name.to_string(),
            controller_name: controller_name.to_string(),
            invokable,
            request: RefCell::new(None),
            advice: RefCell::new(Vec::new()),
            debug,
        })
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn kind(&self) -> InvokableKind {
        self.invokable.kind()
    }

    pub fn invokable(&self) -> &Invokable {
        &self.invokable
    }

    /// Request from the most recent execution.
    pub fn request(&self) -> FrameworkResult<RequestContext> {
        self.request.borrow().clone().ok_or_else(|| {
            FrameworkError::dispatch(
                ErrorCode::RequestNotSet,
                &self.command_name,
                &self.controller_name,
                "no request has been dispatched to this command yet",
            )
        })
    }

    pub fn advice_count(&self) -> usize {
        self.advice.borrow().len()
    }

    pub(crate) fn push_advice(&self, advice: Advice) {
        self.advice.borrow_mut().push(advice);
    }

    pub(crate) fn reset(&self) {
        self.request.borrow_mut().take();
        self.advice.borrow_mut().clear();
    }

    /// Runs the slot through its advice layers, most recently installed
    /// first, down to the guarded execution of the invokable itself.
    pub fn execute(&self, request: RequestContext) -> FrameworkResult<()> {
        let depth = self.advice.borrow().len();
        self.run_layer(depth, request)
    }

    fn run_layer(&self, depth: usize, request: RequestContext) -> FrameworkResult<()> {
        if depth == 0 {
            return self.guarded_execute(request);
        }
        let Some(advice) = self.advice.borrow().get(depth - 1).cloned() else {
            return self.guarded_execute(request);
        };

        match advice.kind {
            InterceptKind::Before => {
                self.fire_advisor(&advice, &request, None)?;
                self.run_layer(depth - 1, request)
            }
            InterceptKind::After => {
                self.run_layer(depth - 1, request.clone())?;
                self.fire_advisor(&advice, &request, None)
            }
            InterceptKind::Around => {
                let slot = self.me.clone();
                let captured = request.clone();
                let proceed: Proceed = Rc::new(move || match slot.upgrade() {
                    Some(slot) => slot.run_layer(depth - 1, captured.clone()),
                    None => Ok(()),
                });
                self.fire_advisor(&advice, &request, Some(proceed))
            }
        }
    }

    fn fire_advisor(
        &self,
        advice: &Advice,
        original: &RequestContext,
        proceed: Option<Proceed>,
    ) -> FrameworkResult<()> {
        let Some(controller) = advice.controller.upgrade() else {
            return Ok(());
        };
        debug!(
            command = %self.command_name,
            advisor = %advice.advisor,
            kind = advice.kind.as_str(),
            "running advice"
        );
        let invocation = Invocation {
            request: original.clone(),
            callee: self.me.clone(),
            proceed,
        };
        let request = RequestContext::new(
            advice.params.clone(),
            original.trigger().clone(),
            original.event().cloned(),
            &advice.advisor,
            &controller,
            Some(invocation),
        )?;
        controller.fire_command_chain(&advice.advisor, &request)
    }

    fn guarded_execute(&self, request: RequestContext) -> FrameworkResult<()> {
        *self.request.borrow_mut() = Some(request.clone());
        request.update();

        if matches!(self.invokable, Invokable::Rule(_)) && request.invocation().is_none() {
            return Err(FrameworkError::dispatch(
                ErrorCode::MissingInvocation,
                &self.command_name,
                &self.controller_name,
                "rules only run as interception advice",
            ));
        }
        if request.is_suppressed() {
            debug!(command = %self.command_name, "params suppressed, skipping");
            return Ok(());
        }

        debug!(
            command = %self.command_name,
            controller = %self.controller_name,
            kind = %self.invokable.kind(),
            "executing"
        );
        let result = self.invokable.execute(&request);
        self.settle(result)
    }

    /// Converts a body failure into a dispatch error; in debug mode the
    /// error is logged and swallowed.
    fn settle(&self, result: anyhow::Result<()>) -> FrameworkResult<()> {
        let Err(err) = result else {
            return Ok(());
        };
        let err = match err.downcast::<FrameworkError>() {
            Ok(framework) => framework,
            Err(other) => FrameworkError::dispatch(
                ErrorCode::ExecutionFailed,
                &self.command_name,
                &self.controller_name,
                other.to_string(),
            )
            .with_source(other),
        };

        if self.debug {
            error!(
                command = %self.command_name,
                controller = %self.controller_name,
                error = %err,
                "command failed"
            );
            return Ok(());
        }
        Err(err)
    }
}

impl fmt::Debug for CommandSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSlot")
            .field("key", &self.key)
            .field("kind", &self.invokable.kind())
            .field("advice", &self.advice.borrow().len())
            .finish()
    }
}

impl ServiceCaller for CommandSlot {
    fn on_response(&self, data: &Value, params: &Map<String, Value>) -> FrameworkResult<()> {
        let result = match &self.invokable {
            Invokable::Command(command) => command.on_response(data, params),
            _ => Err(not_implemented("Command::on_response")),
        };
        self.settle(result)?;
        self.hooks.emit("onResponse", data.clone())
    }

    fn on_error(&self, errors: &[Value]) -> FrameworkResult<()> {
        let result = match &self.invokable {
            Invokable::Command(command) => command.on_error(errors),
            _ => Err(not_implemented("Command::on_error")),
        };
        self.settle(result)?;
        self.hooks.emit("onError", Value::Array(errors.to_vec()))
    }
}

impl EventSource for CommandSlot {
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

#[cfg(test)]
#[path = "tests/command_tests.rs"]
mod tests;
