use std::{cell::RefCell, collections::HashMap, rc::Rc};

use messaging::AppModel;
use shared::error::{ErrorCode, FrameworkError, FrameworkResult};
use tracing::debug;

use crate::{Service, ServiceOptions, Transport};

/// Name-keyed registry of services sharing one transport and model.
pub struct ServiceLocator {
    model: AppModel,
    transport: Rc<dyn Transport>,
    services: RefCell<HashMap<String, Rc<Service>>>,
}

impl ServiceLocator {
    pub fn new(model: AppModel, transport: Rc<dyn Transport>) -> Self {
        Self {
            model,
            transport,
            services: RefCell::new(HashMap::new()),
        }
    }

    /// Builds a service on the shared transport and registers it.
    pub fn define(
        &self,
        name: &str,
        uri: &str,
        options: Option<ServiceOptions>,
    ) -> FrameworkResult<Rc<Service>> {
        let service = Service::new(
            self.model.clone(),
            self.transport.clone(),
            name,
            uri,
            options,
        )?;
        self.add_service(service)
    }

    pub fn add_service(&self, service: Service) -> FrameworkResult<Rc<Service>> {
        let mut services = self.services.borrow_mut();
        if services.contains_key(service.name()) {
            return Err(FrameworkError::configuration(
                ErrorCode::DuplicateName,
                "ServiceLocator::add_service",
                format!("a service named '{}' is already registered", service.name()),
            ));
        }
        debug!(service = service.name(), uri = service.uri(), "service registered");
        let service = Rc::new(service);
        services.insert(service.name().to_string(), service.clone());
        Ok(service)
    }

    pub fn service(&self, name: &str) -> FrameworkResult<Rc<Service>> {
        if name.is_empty() {
            return Err(FrameworkError::missing_argument("ServiceLocator::service", "name"));
        }
        self.services.borrow().get(name).cloned().ok_or_else(|| {
            FrameworkError::configuration(
                ErrorCode::UnknownService,
                "ServiceLocator::service",
                format!("no service named '{name}'"),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.services.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
