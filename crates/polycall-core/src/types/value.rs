use std::sync::Arc;

use crate::error::{CoreError, ErrorKind, PolyResult};
use crate::types::{TypeDescriptor, ValueKind};

/// A canonical FFI value: a kind tag, a pointer to its [`TypeDescriptor`],
/// and owned payload bytes (spec §3/§4.1).
///
/// Integer payloads are stored zero-/sign-extended to the declared width;
/// float payloads preserve the IEEE-754 bit pattern; string length is
/// measured in bytes, not code points (spec §4.1 "Numeric semantics").
#[derive(Debug, Clone)]
pub struct Value {
    kind: ValueKind,
    descriptor: Arc<TypeDescriptor>,
    data: Vec<u8>,
}

impl Value {
    /// Create a value of `kind`, allocating descriptor-sized storage.
    /// `string`/`array`/`object` payloads start empty and are owned by the
    /// value until it is dropped.
    pub fn create(kind: ValueKind, descriptor: Arc<TypeDescriptor>) -> PolyResult<Self> {
        if let ValueKind::User(tag) = kind {
            if !matches!(descriptor.kind, ValueKind::User(t) if t == tag) {
                return Err(CoreError::with_code(
                    ErrorKind::InvalidParameter,
                    "types.invalid_kind",
                    "descriptor does not describe the requested user tag",
                ));
            }
        }
        let initial_size = match kind {
            ValueKind::String | ValueKind::Array | ValueKind::Object | ValueKind::Callback => 0,
            _ => descriptor.size,
        };
        Ok(Self {
            kind,
            descriptor,
            data: vec![0u8; initial_size],
        })
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    /// Copy `bytes` into the value's payload. For scalar kinds the length
    /// must match the descriptor's declared size exactly.
    pub fn set_data(&mut self, bytes: &[u8]) -> PolyResult<()> {
        if self.kind.scalar_size().is_some() && bytes.len() != self.descriptor.size {
            return Err(CoreError::with_code(
                ErrorKind::InvalidParameter,
                "types.invalid_size",
                format!(
                    "expected {} bytes for kind {:?}, got {}",
                    self.descriptor.size,
                    self.kind,
                    bytes.len()
                ),
            ));
        }
        self.data = bytes.to_vec();
        if self.kind == ValueKind::String {
            self.ensure_nul_terminated();
        }
        Ok(())
    }

    /// Read the payload back out. For [`ValueKind::String`] the returned
    /// slice is guaranteed NUL-terminated.
    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_u32(&mut self, value: u32) {
        self.data = value.to_le_bytes().to_vec();
    }

    pub fn as_u32(&self) -> PolyResult<u32> {
        let bytes: [u8; 4] = self
            .data
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::with_code(ErrorKind::InvalidParameter, "types.invalid_size", "not a u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn set_i32(&mut self, value: i32) {
        self.data = value.to_le_bytes().to_vec();
    }

    pub fn as_i32(&self) -> PolyResult<i32> {
        let bytes: [u8; 4] = self
            .data
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::with_code(ErrorKind::InvalidParameter, "types.invalid_size", "not an i32"))?;
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn set_string(&mut self, value: &str) {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.data = bytes;
    }

    /// Byte length of a string value, excluding the trailing NUL (spec
    /// §4.1: "string length is measured in bytes, not code points").
    pub fn string_len(&self) -> PolyResult<usize> {
        if self.kind != ValueKind::String {
            return Err(CoreError::invalid_parameter("value is not a string"));
        }
        Ok(self.data.len().saturating_sub(1))
    }

    fn ensure_nul_terminated(&mut self) {
        if self.data.last() != Some(&0) {
            self.data.push(0);
        }
    }
}
