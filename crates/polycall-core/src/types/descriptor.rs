use std::sync::Arc;

use crate::error::{CoreError, ErrorKind, PolyResult};
use crate::types::ValueKind;

/// Kind-specific detail carried alongside the common name/size/alignment
/// fields of a [`TypeDescriptor`] (spec §3).
#[derive(Debug, Clone)]
pub enum TypeDetail {
    Scalar,
    Struct { fields: Vec<FieldDescriptor> },
    Array { element: Arc<TypeDescriptor>, count: usize },
    Callback { return_type: Arc<TypeDescriptor>, params: Vec<Arc<TypeDescriptor>> },
    User { tag: u32 },
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: Arc<TypeDescriptor>,
    pub offset: usize,
}

/// Describes the shape of a value: name, size, alignment, and kind-specific
/// detail (struct fields, array element/count, callback signature, user
/// tag). Invariant: `detail`'s kind must agree with the descriptor's
/// `kind`, and struct field offsets must be monotonically non-decreasing
/// (spec §3).
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub size: usize,
    pub alignment: usize,
    pub detail: TypeDetail,
}

impl TypeDescriptor {
    /// A descriptor for one of the fixed-size scalar kinds.
    pub fn scalar(kind: ValueKind, name: impl Into<String>) -> PolyResult<Self> {
        let size = kind
            .scalar_size()
            .ok_or_else(|| CoreError::with_code(ErrorKind::InvalidParameter, "types.invalid_kind", "kind is not a scalar"))?;
        Ok(Self {
            name: name.into(),
            kind,
            size,
            alignment: size.max(1),
            detail: TypeDetail::Scalar,
        })
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ValueKind::String,
            size: 0,
            alignment: 1,
            detail: TypeDetail::Scalar,
        }
    }

    /// Build a struct descriptor, validating that field offsets are
    /// monotonically non-decreasing (spec §3 invariant).
    pub fn structure(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> PolyResult<Self> {
        let mut last_offset = 0usize;
        for (i, field) in fields.iter().enumerate() {
            if i > 0 && field.offset < last_offset {
                return Err(CoreError::with_code(
                    ErrorKind::InvalidParameter,
                    "types.offsets_not_monotonic",
                    format!("field '{}' offset {} precedes previous field", field.name, field.offset),
                ));
            }
            last_offset = field.offset;
        }
        let size = fields
            .last()
            .map(|f| f.offset + f.ty.size)
            .unwrap_or(0);
        let alignment = fields.iter().map(|f| f.ty.alignment).max().unwrap_or(1);
        Ok(Self {
            name: name.into(),
            kind: ValueKind::Struct,
            size,
            alignment,
            detail: TypeDetail::Struct { fields },
        })
    }

    pub fn array(name: impl Into<String>, element: Arc<TypeDescriptor>, count: usize) -> Self {
        let size = element.size * count;
        let alignment = element.alignment;
        Self {
            name: name.into(),
            kind: ValueKind::Array,
            size,
            alignment,
            detail: TypeDetail::Array { element, count },
        }
    }

    pub fn callback(
        name: impl Into<String>,
        return_type: Arc<TypeDescriptor>,
        params: Vec<Arc<TypeDescriptor>>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ValueKind::Callback,
            size: std::mem::size_of::<usize>(),
            alignment: std::mem::align_of::<usize>(),
            detail: TypeDetail::Callback { return_type, params },
        }
    }

    pub fn user(name: impl Into<String>, tag: u32, size: usize, alignment: usize) -> Self {
        Self {
            name: name.into(),
            kind: ValueKind::User(tag),
            size,
            alignment,
            detail: TypeDetail::User { tag },
        }
    }

    /// Whether `detail`'s shape agrees with `kind` (invariant check used at
    /// construction and by the registry's duplicate-detection).
    pub fn is_well_formed(&self) -> bool {
        matches!(
            (&self.kind, &self.detail),
            (ValueKind::Struct, TypeDetail::Struct { .. })
                | (ValueKind::Array, TypeDetail::Array { .. })
                | (ValueKind::Callback, TypeDetail::Callback { .. })
                | (ValueKind::User(_), TypeDetail::User { .. })
                | (_, TypeDetail::Scalar)
        )
    }

    /// A stable fingerprint for cache keys (C10) and duplicate-registration
    /// comparisons (C1), not a cryptographic digest (Design Notes §9).
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name.hash(&mut hasher);
        self.size.hash(&mut hasher);
        self.alignment.hash(&mut hasher);
        match &self.detail {
            TypeDetail::Scalar => 0u8.hash(&mut hasher),
            TypeDetail::Struct { fields } => {
                1u8.hash(&mut hasher);
                for f in fields {
                    f.name.hash(&mut hasher);
                    f.offset.hash(&mut hasher);
                    f.ty.fingerprint().hash(&mut hasher);
                }
            }
            TypeDetail::Array { element, count } => {
                2u8.hash(&mut hasher);
                element.fingerprint().hash(&mut hasher);
                count.hash(&mut hasher);
            }
            TypeDetail::Callback { return_type, params } => {
                3u8.hash(&mut hasher);
                return_type.fingerprint().hash(&mut hasher);
                for p in params {
                    p.fingerprint().hash(&mut hasher);
                }
            }
            TypeDetail::User { tag } => {
                4u8.hash(&mut hasher);
                tag.hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}
