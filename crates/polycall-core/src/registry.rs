//! Service Registry / IoC (C8, spec §4.8): name→service-pointer map used
//! by every other component to locate collaborators.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, PolyResult};

/// Registration replaces any prior entry for the same name; lookup fails
/// `not-found` when absent. No lifecycle management — callers own the
/// service objects (spec §4.8).
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, service: Arc<T>) {
        self.services.write().insert(name.into(), service);
    }

    pub fn lookup<T: Any + Send + Sync>(&self, name: &str) -> PolyResult<Arc<T>> {
        let services = self.services.read();
        let service = services
            .get(name)
            .ok_or_else(|| CoreError::not_found(format!("service '{name}' is not registered")))?;
        service
            .clone()
            .downcast::<T>()
            .map_err(|_| CoreError::not_found(format!("service '{name}' is not of the requested type")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.services.write().remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_round_trips() {
        let registry = ServiceRegistry::new();
        registry.register("greeting", Arc::new(String::from("hi")));
        let value: Arc<String> = registry.lookup("greeting").unwrap();
        assert_eq!(*value, "hi");
    }

    #[test]
    fn lookup_of_missing_service_is_not_found() {
        let registry = ServiceRegistry::new();
        assert!(registry.lookup::<String>("missing").is_err());
    }

    #[test]
    fn re_registering_replaces_prior_entry() {
        let registry = ServiceRegistry::new();
        registry.register("greeting", Arc::new(String::from("hi")));
        registry.register("greeting", Arc::new(String::from("bye")));
        let value: Arc<String> = registry.lookup("greeting").unwrap();
        assert_eq!(*value, "bye");
    }

    #[test]
    fn lookup_with_wrong_type_is_rejected() {
        let registry = ServiceRegistry::new();
        registry.register("count", Arc::new(42u32));
        assert!(registry.lookup::<String>("count").is_err());
    }
}
