use std::sync::Arc;

use crate::error::{CoreError, ErrorKind, PolyResult};
use crate::types::{TypeDescriptor, ValueKind};

/// One parameter of a [`FunctionSignature`] (spec §3 "Function signature").
#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub descriptor: Arc<TypeDescriptor>,
    pub optional: bool,
}

/// Return type + ordered parameters + variadic flag. Owned exclusively by
/// the FFI registry once registered; bridges only ever hold a borrowed
/// reference (spec §3).
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub return_kind: ValueKind,
    pub return_descriptor: Arc<TypeDescriptor>,
    pub params: Vec<ParamDescriptor>,
    pub variadic: bool,
}

impl FunctionSignature {
    /// Build a signature from a return descriptor and ordered parameter
    /// descriptors. `variadic=true` is only legal when at least one fixed
    /// parameter is present (spec §4.1).
    pub fn new(
        return_descriptor: Arc<TypeDescriptor>,
        params: Vec<ParamDescriptor>,
        variadic: bool,
    ) -> PolyResult<Self> {
        if variadic && params.is_empty() {
            return Err(CoreError::with_code(
                ErrorKind::InvalidParameter,
                "types.variadic_requires_params",
                "a variadic signature must declare at least one parameter",
            ));
        }
        Ok(Self {
            return_kind: return_descriptor.kind,
            return_descriptor,
            params,
            variadic,
        })
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Checks `args` against this signature's parameter kinds, honoring
    /// `strict_types` (spec §4.3 step 2, §8.8). Optional trailing
    /// parameters may be omitted; variadic signatures allow any number of
    /// additional trailing arguments without a declared kind check.
    pub fn check_args(&self, args: &[ValueKind], strict_types: bool) -> PolyResult<()> {
        let fixed = &self.params;
        let provided_fixed = args.len().min(fixed.len());
        for (i, param) in fixed.iter().enumerate().take(provided_fixed) {
            if !args[i].is_assignment_compatible(param.kind, strict_types) {
                return Err(CoreError::with_code(
                    ErrorKind::InvalidParameter,
                    "ffi.arg_kind_mismatch",
                    format!(
                        "parameter '{}' expects {:?}, got {:?}",
                        param.name, param.kind, args[i]
                    ),
                ));
            }
        }
        if args.len() < fixed.len() {
            for missing in &fixed[args.len()..] {
                if !missing.optional {
                    return Err(CoreError::with_code(
                        ErrorKind::InvalidParameter,
                        "ffi.missing_argument",
                        format!("missing required parameter '{}'", missing.name),
                    ));
                }
            }
        } else if args.len() > fixed.len() && !self.variadic {
            return Err(CoreError::with_code(
                ErrorKind::InvalidParameter,
                "ffi.too_many_arguments",
                "non-variadic signature received extra arguments",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;

    fn u32_param(name: &str, optional: bool) -> ParamDescriptor {
        ParamDescriptor {
            name: name.into(),
            kind: ValueKind::U32,
            descriptor: Arc::new(TypeDescriptor::scalar(ValueKind::U32, "u32").unwrap()),
            optional,
        }
    }

    #[test]
    fn variadic_without_params_is_rejected() {
        let ret = Arc::new(TypeDescriptor::scalar(ValueKind::Void, "void").unwrap());
        assert!(FunctionSignature::new(ret, vec![], true).is_err());
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let ret = Arc::new(TypeDescriptor::scalar(ValueKind::I32, "i32").unwrap());
        let sig = FunctionSignature::new(ret, vec![u32_param("a", false), u32_param("b", false)], false).unwrap();
        assert!(sig.check_args(&[ValueKind::U32], false).is_err());
    }

    #[test]
    fn optional_trailing_param_may_be_omitted() {
        let ret = Arc::new(TypeDescriptor::scalar(ValueKind::I32, "i32").unwrap());
        let sig = FunctionSignature::new(ret, vec![u32_param("a", false), u32_param("b", true)], false).unwrap();
        assert!(sig.check_args(&[ValueKind::U32], false).is_ok());
    }

    #[test]
    fn strict_types_rejects_widening() {
        let ret = Arc::new(TypeDescriptor::scalar(ValueKind::I32, "i32").unwrap());
        let sig = FunctionSignature::new(ret, vec![u32_param("a", false)], false).unwrap();
        assert!(sig.check_args(&[ValueKind::U8], false).is_ok());
        assert!(sig.check_args(&[ValueKind::U8], true).is_err());
    }
}
