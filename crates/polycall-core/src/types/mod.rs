//! Typed Value & Signature Model (C1, spec §4.1).
//!
//! A canonical, closed taxonomy of FFI values plus the descriptors that
//! describe their shape, grounded on the teacher's codec/type-descriptor
//! split (`spark-core/src/codec`, `spark-core/src/kernel/types.rs`):
//! values always carry a pointer to a separately-owned [`TypeDescriptor`],
//! never embed layout information inline.

mod descriptor;
mod registry;
mod signature;
mod value;

pub use descriptor::{FieldDescriptor, TypeDescriptor, TypeDetail};
pub use registry::{TypeCodec, TypeRegistry};
pub use signature::{FunctionSignature, ParamDescriptor};
pub use value::Value;

use std::sync::Arc;

/// The closed tag set of canonical FFI values (spec §3 "Canonical value").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ValueKind {
    Void,
    Bool,
    Char,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Pointer,
    Struct,
    Array,
    Callback,
    Object,
    /// User-defined kind, tagged by the value registered in [`TypeRegistry`].
    User(u32),
}

impl ValueKind {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueKind::U8
                | ValueKind::U16
                | ValueKind::U32
                | ValueKind::U64
                | ValueKind::I8
                | ValueKind::I16
                | ValueKind::I32
                | ValueKind::I64
                | ValueKind::F32
                | ValueKind::F64
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ValueKind::U8
                | ValueKind::U16
                | ValueKind::U32
                | ValueKind::U64
                | ValueKind::I8
                | ValueKind::I16
                | ValueKind::I32
                | ValueKind::I64
        )
    }

    fn integer_width(self) -> Option<u8> {
        match self {
            ValueKind::U8 | ValueKind::I8 => Some(8),
            ValueKind::U16 | ValueKind::I16 => Some(16),
            ValueKind::U32 | ValueKind::I32 => Some(32),
            ValueKind::U64 | ValueKind::I64 => Some(64),
            _ => None,
        }
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            ValueKind::I8 | ValueKind::I16 | ValueKind::I32 | ValueKind::I64
        )
    }

    /// Exact match, or (when `strict` is false) a widening integer
    /// conversion of the same signedness to a kind of equal or greater
    /// width (used by C3 step 2 and gated by `strict_types`, spec §8.8).
    pub fn is_assignment_compatible(self, required: ValueKind, strict: bool) -> bool {
        if self == required {
            return true;
        }
        if strict {
            return false;
        }
        match (self.integer_width(), required.integer_width()) {
            (Some(have), Some(need)) => self.is_signed() == required.is_signed() && have <= need,
            _ => false,
        }
    }

    /// The byte size of scalar kinds; `None` for compound kinds whose size
    /// is carried by a [`TypeDescriptor`] instead.
    pub fn scalar_size(self) -> Option<usize> {
        match self {
            ValueKind::Void => Some(0),
            ValueKind::Bool | ValueKind::U8 | ValueKind::I8 | ValueKind::Char => Some(1),
            ValueKind::U16 | ValueKind::I16 => Some(2),
            ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => Some(4),
            ValueKind::U64 | ValueKind::I64 | ValueKind::F64 | ValueKind::Pointer => Some(8),
            _ => None,
        }
    }
}

/// A reference-counted handle to a [`TypeDescriptor`], the way compound
/// values reference field/element/parameter types without owning them.
pub type DescriptorRef = Arc<TypeDescriptor>;
