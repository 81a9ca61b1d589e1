use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
};

use messaging::{AppModel, History, MessageBus};
use page::UiTree;
use service::ServiceLocator;
use shared::{
    domain::{ControllerId, NodeId},
    error::{FrameworkError, FrameworkResult},
};

use crate::{catalog::Catalog, config::Settings, controller::ControllerInstance};

type AttachmentKey = (Option<NodeId>, String);

struct ContextInner {
    settings: Settings,
    bus: MessageBus,
    model: AppModel,
    history: Rc<History>,
    tree: Rc<dyn UiTree>,
    catalog: Catalog,
    services: RefCell<Option<Rc<ServiceLocator>>>,
    attachments: RefCell<HashMap<AttachmentKey, Weak<ControllerInstance>>>,
    next_controller_id: Cell<u64>,
}

/// Process-wide collaborators shared by every controller: bus, model,
/// history, UI tree and factory catalog.
#[derive(Clone)]
pub struct AppContext {
    inner: Rc<ContextInner>,
}

impl AppContext {
    pub fn new(settings: Settings, tree: Rc<dyn UiTree>, catalog: Catalog) -> Self {
        let bus = MessageBus::with_max_depth(settings.max_publish_depth);
        let model = AppModel::new(bus.clone());
        let history = Rc::new(History::new(bus.clone()));
        if let Some(hash) = &settings.default_hash {
            history.set_default_hash(hash);
        }

        Self {
            inner: Rc::new(ContextInner {
                settings,
                bus,
                model,
                history,
                tree,
                catalog,
                services: RefCell::new(None),
                attachments: RefCell::new(HashMap::new()),
                next_controller_id: Cell::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn debug(&self) -> bool {
        self.inner.settings.debug
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn model(&self) -> &AppModel {
        &self.inner.model
    }

    pub fn history(&self) -> &Rc<History> {
        &self.inner.history
    }

    pub fn tree(&self) -> &Rc<dyn UiTree> {
        &self.inner.tree
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn install_services(&self, locator: Rc<ServiceLocator>) {
        *self.inner.services.borrow_mut() = Some(locator);
    }

    pub fn services(&self) -> FrameworkResult<Rc<ServiceLocator>> {
        self.inner
            .services
            .borrow()
            .clone()
            .ok_or_else(|| FrameworkError::missing_argument("AppContext::services", "service locator"))
    }

    pub(crate) fn next_controller_id(&self) -> ControllerId {
        let id = self.inner.next_controller_id.get();
        self.inner.next_controller_id.set(id + 1);
        ControllerId(id)
    }

    pub(crate) fn attach(&self, scope: Option<NodeId>, name: &str, controller: &Rc<ControllerInstance>) {
        self.inner
            .attachments
            .borrow_mut()
            .insert((scope, name.to_string()), Rc::downgrade(controller));
    }

    /// Controller registered under `name` for `scope`, if it is still alive.
    pub fn attachment(&self, scope: Option<NodeId>, name: &str) -> Option<Rc<ControllerInstance>> {
        self.inner
            .attachments
            .borrow()
            .get(&(scope, name.to_string()))
            .and_then(Weak::upgrade)
    }

    pub(crate) fn clear_attachments(&self) {
        self.inner.attachments.borrow_mut().clear();
    }
}
