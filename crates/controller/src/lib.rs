//! Controller layer: command chains, observers, interception and the
//! registry that attaches controllers to the page.

pub mod catalog;
pub mod command;
pub mod config;
pub mod context;
pub mod controller;
pub mod param;
pub mod registry;
pub mod request;

pub use catalog::Catalog;
pub use command::{Behavior, Command, CommandSlot, Invocation, Invokable, Rule};
pub use config::{load_settings, Settings};
pub use context::AppContext;
pub use controller::{Controller, ControllerInstance, ObserverSource};
pub use param::{Param, ParamSet, ParamSpec, ParamType};
pub use registry::{ControllerRegistry, MapContext, Pattern, SiteMapEntry};
pub use request::{Params, ParamsSource, RequestContext, Trigger};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
