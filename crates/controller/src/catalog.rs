//! Explicit name-to-factory registry used to resolve the controller and
//! command names found in site maps and `add_command` calls.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use shared::error::{ErrorCode, FrameworkError, FrameworkResult};

use crate::{
    command::{Behavior, Command, Invokable, Rule},
    controller::Controller,
};

pub type CommandFactory = Rc<dyn Fn() -> Invokable>;
pub type ControllerFactory = Rc<dyn Fn() -> Rc<dyn Controller>>;

#[derive(Clone)]
enum Factory {
    Command(CommandFactory),
    Controller(ControllerFactory),
}

#[derive(Clone, Default)]
pub struct Catalog {
    entries: Rc<RefCell<HashMap<String, Factory>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: &str, factory: Factory) -> FrameworkResult<()> {
        if name.is_empty() {
            return Err(FrameworkError::missing_argument("Catalog::register", "name"));
        }
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(name) {
            return Err(FrameworkError::configuration(
                ErrorCode::DuplicateName,
                "Catalog::register",
                format!("'{name}' is already registered"),
            ));
        }
        entries.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn register_invokable<F>(&self, name: &str, factory: F) -> FrameworkResult<()>
    where
        F: Fn() -> Invokable + 'static,
    {
        self.insert(name, Factory::Command(Rc::new(factory)))
    }

    pub fn register_command<C, F>(&self, name: &str, factory: F) -> FrameworkResult<()>
    where
        C: Command + 'static,
        F: Fn() -> C + 'static,
    {
        self.register_invokable(name, move || Invokable::command(factory()))
    }

    pub fn register_behavior<B, F>(&self, name: &str, factory: F) -> FrameworkResult<()>
    where
        B: Behavior + 'static,
        F: Fn() -> B + 'static,
    {
        self.register_invokable(name, move || Invokable::behavior(factory()))
    }

    pub fn register_rule<R, F>(&self, name: &str, factory: F) -> FrameworkResult<()>
    where
        R: Rule + 'static,
        F: Fn() -> R + 'static,
    {
        self.register_invokable(name, move || Invokable::rule(factory()))
    }

    pub fn register_controller<C, F>(&self, name: &str, factory: F) -> FrameworkResult<()>
    where
        C: Controller,
        F: Fn() -> C + 'static,
    {
        self.insert(
            name,
            Factory::Controller(Rc::new(move || Rc::new(factory()) as Rc<dyn Controller>)),
        )
    }

    fn lookup(&self, operation: &str, name: &str) -> FrameworkResult<Factory> {
        if name.is_empty() {
            return Err(FrameworkError::missing_argument(operation, "name"));
        }
        self.entries.borrow().get(name).cloned().ok_or_else(|| {
            FrameworkError::configuration(
                ErrorCode::UnknownFactory,
                operation,
                format!("nothing is registered under '{name}'"),
            )
        })
    }

    pub fn resolve_invokable(&self, name: &str) -> FrameworkResult<Invokable> {
        match self.lookup("Catalog::resolve_invokable", name)? {
            Factory::Command(factory) => Ok(factory()),
            Factory::Controller(_) => Err(FrameworkError::configuration(
                ErrorCode::NotACommand,
                "Catalog::resolve_invokable",
                format!("'{name}' is a controller, not a command, behavior, or rule"),
            )),
        }
    }

    pub fn resolve_controller(&self, name: &str) -> FrameworkResult<Rc<dyn Controller>> {
        match self.lookup("Catalog::resolve_controller", name)? {
            Factory::Controller(factory) => Ok(factory()),
            Factory::Command(_) => Err(FrameworkError::configuration(
                ErrorCode::NotAController,
                "Catalog::resolve_controller",
                format!("'{name}' must resolve to a controller"),
            )),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }
}
