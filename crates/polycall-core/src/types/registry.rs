use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, ErrorKind, PolyResult};
use crate::types::TypeDescriptor;

/// Optional custom (de)serializer pair registered alongside a user type,
/// keyed by `user-tag` (spec §4.1).
#[derive(Clone)]
pub struct TypeCodec {
    pub serialize: Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
    pub deserialize: Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
}

impl std::fmt::Debug for TypeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCodec").finish_non_exhaustive()
    }
}

struct Entry {
    descriptor: Arc<TypeDescriptor>,
    codec: Option<TypeCodec>,
}

/// Central table of user-defined types, keyed by name. Registration is
/// idempotent when the descriptor is identical (by fingerprint) to the
/// one already on file, and a conflict otherwise (spec §4.1).
#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<std::collections::HashMap<String, Entry>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        descriptor: Arc<TypeDescriptor>,
        codec: Option<TypeCodec>,
    ) -> PolyResult<()> {
        if !descriptor.is_well_formed() {
            return Err(CoreError::with_code(
                ErrorKind::InvalidParameter,
                "types.invalid_kind",
                "descriptor kind does not agree with its detail",
            ));
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&descriptor.name) {
            if existing.descriptor.fingerprint() == descriptor.fingerprint() {
                return Ok(());
            }
            return Err(CoreError::with_code(
                ErrorKind::AlreadyExists,
                "types.conflict",
                format!("type '{}' already registered with a different shape", descriptor.name),
            ));
        }
        entries.insert(
            descriptor.name.clone(),
            Entry { descriptor, codec },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.entries.read().get(name).map(|e| e.descriptor.clone())
    }

    pub fn lookup_codec(&self, name: &str) -> Option<TypeCodec> {
        self.entries.read().get(name).and_then(|e| e.codec.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueKind;

    #[test]
    fn identical_redefinition_is_idempotent() {
        let reg = TypeRegistry::new();
        let a = Arc::new(TypeDescriptor::scalar(ValueKind::U32, "Count").unwrap());
        let b = Arc::new(TypeDescriptor::scalar(ValueKind::U32, "Count").unwrap());
        reg.register(a, None).unwrap();
        reg.register(b, None).unwrap();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn conflicting_redefinition_is_rejected() {
        let reg = TypeRegistry::new();
        let a = Arc::new(TypeDescriptor::scalar(ValueKind::U32, "Count").unwrap());
        let b = Arc::new(TypeDescriptor::scalar(ValueKind::I32, "Count").unwrap());
        reg.register(a, None).unwrap();
        assert!(reg.register(b, None).is_err());
    }
}
