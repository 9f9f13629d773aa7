use thiserror::Error;
use shared::types::{Service, ServiceKey};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("service {0} already exists")]
    Duplicate(ServiceKey),

    #[error("service {0} not found")]
    NotFound(ServiceKey),

    #[error("position {index} out of range for {len} services")]
    OutOfRange { index: usize, len: usize },
}

/// Ordered list of services probed on every machine.
///
/// Order is the column order of the dashboard; identity is `(protocol, port)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCatalog {
    services: Vec<Service>,
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self {
            services: Service::defaults(),
        }
    }
}

impl ServiceCatalog {
    /// Build from a configured list, dropping repeated identities
    pub fn new(services: Vec<Service>) -> Self {
        let mut catalog = Self { services: Vec::with_capacity(services.len()) };
        for service in services {
            if let Err(e) = catalog.add(service) {
                tracing::warn!("Ignoring configured service: {}", e);
            }
        }
        catalog
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn get(&self, key: &ServiceKey) -> Option<&Service> {
        self.services.iter().find(|s| &s.key() == key)
    }

    fn position(&self, key: &ServiceKey) -> Result<usize, CatalogError> {
        self.services
            .iter()
            .position(|s| &s.key() == key)
            .ok_or_else(|| CatalogError::NotFound(key.clone()))
    }

    pub fn add(&mut self, service: Service) -> Result<(), CatalogError> {
        let key = service.key();
        if self.get(&key).is_some() {
            return Err(CatalogError::Duplicate(key));
        }
        self.services.push(service);
        Ok(())
    }

    /// Replace the service stored under `key`, keeping its position
    pub fn update(&mut self, key: &ServiceKey, service: Service) -> Result<(), CatalogError> {
        let index = self.position(key)?;
        let new_key = service.key();
        if &new_key != key && self.get(&new_key).is_some() {
            return Err(CatalogError::Duplicate(new_key));
        }
        self.services[index] = service;
        Ok(())
    }

    pub fn remove(&mut self, key: &ServiceKey) -> Result<Service, CatalogError> {
        let index = self.position(key)?;
        Ok(self.services.remove(index))
    }

    /// Move the service under `key` to `to`, shifting the others
    pub fn reorder(&mut self, key: &ServiceKey, to: usize) -> Result<(), CatalogError> {
        let len = self.services.len();
        if to >= len {
            return Err(CatalogError::OutOfRange { index: to, len });
        }
        let from = self.position(key)?;
        let service = self.services.remove(from);
        self.services.insert(to, service);
        Ok(())
    }
}
