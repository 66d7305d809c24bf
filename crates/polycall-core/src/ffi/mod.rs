//! FFI Registry & Dispatcher (C3, spec §4.3): language-bridge registry,
//! exposed-function registry, call marshalling and the per-call security
//! gate.
//!
//! Bridges are modeled as a capability-set trait rather than a struct of
//! function pointers, per Design Notes §9. Both a blocking and an async
//! suspension point are exposed (`call_function` / `call_function_async`),
//! grounded on the teacher's dual sync/async transport methods
//! (`spark-core/src/contract.rs`) and using `async-trait` from the
//! teacher's dependency table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitflags::bitflags;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{CoreError, ErrorKind, PolyResult};
use crate::types::{FunctionSignature, Value, ValueKind};

bitflags! {
    /// Optional capabilities a bridge declares beyond the mandatory
    /// method set, consulted by the concurrency model (spec §5: "each
    /// bridge serializes its entries unless it declares thread-safety").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BridgeCapabilities: u8 {
        const THREAD_SAFE    = 0b01;
        const SUPPORTS_ASYNC = 0b10;
    }
}

bitflags! {
    /// Flags on an exposed function record (spec §3 "Exposed function
    /// record").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FunctionFlags: u8 {
        const PURE        = 0b01;
        const MAY_SUSPEND = 0b10;
    }
}

/// The mandatory per-language capability set (spec §3 "Language bridge
/// descriptor"). Concrete bridge bodies for any specific runtime live
/// outside this crate (spec §1 Non-goals); only the contract is modeled.
pub trait LanguageBridge: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn capabilities(&self) -> BridgeCapabilities;

    fn initialize(&self) -> PolyResult<()>;
    fn cleanup(&self) -> PolyResult<()>;

    fn convert_to_native(&self, value: &Value) -> PolyResult<Value>;
    fn convert_from_native(&self, value: &Value) -> PolyResult<Value>;

    /// Invoke `fn_ptr` (an opaque, bridge-interpreted handle) with
    /// already-converted native arguments.
    fn call_function(&self, fn_ptr: usize, args: &[Value]) -> PolyResult<Value>;

    /// Translate a bridge-reported exception into a human message
    /// (spec §4.3 step 7).
    fn handle_exception(&self, detail: &str) -> String;
}

/// Async suspension point for bridges that declare `SUPPORTS_ASYNC`
/// (Design Notes §9). Kept as a separate trait so synchronous bridges
/// never have to implement it.
#[async_trait]
pub trait AsyncLanguageBridge: LanguageBridge {
    async fn call_function_async(&self, fn_ptr: usize, args: &[Value]) -> PolyResult<Value>;
}

/// Consulted at call_function step 4 in place of a hard dependency on
/// the session module: the session context (C6), when present, is the
/// concrete implementer.
pub trait PermissionGate: Send + Sync {
    fn allows(&self, source_lang: &str, function_name: &str) -> bool;
}

/// Consulted at call_function step 3 in place of a hard dependency on
/// the performance manager (C10): `CallCache`, when present, is the
/// concrete implementer.
pub trait CallCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: &str, value: Value);
}

/// Name (unique), opaque pointer, owning language, signature and flags
/// (spec §3 "Exposed function record").
pub struct ExposedFunction {
    pub name: String,
    pub fn_ptr: usize,
    pub source_lang: String,
    pub signature: Arc<FunctionSignature>,
    pub flags: FunctionFlags,
    call_count: AtomicU64,
}

impl ExposedFunction {
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }
}

/// Holds language bridges and exposed functions; the read-heavy lock
/// noted in spec §5 ("many lookups, rare registrations").
pub struct FfiRegistry {
    bridges: RwLock<HashMap<String, Arc<dyn LanguageBridge>>>,
    functions: RwLock<HashMap<String, ExposedFunction>>,
}

impl Default for FfiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FfiRegistry {
    pub fn new() -> Self {
        Self {
            bridges: RwLock::new(HashMap::new()),
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a language bridge. Names are unique; `bridge.initialize`
    /// is called before the bridge is retained, and retains no state on
    /// failure (spec §4.3).
    #[tracing::instrument(skip(self, bridge))]
    pub fn register_language(&self, bridge: Arc<dyn LanguageBridge>) -> PolyResult<()> {
        let name = bridge.name().to_string();
        {
            let bridges = self.bridges.read();
            if let Some(existing) = bridges.get(&name) {
                if Arc::ptr_eq(existing, &bridge) {
                    return Ok(());
                }
                return Err(CoreError::with_code(
                    ErrorKind::AlreadyExists,
                    "ffi.bridge_conflict",
                    format!("language '{name}' already has a different bridge registered"),
                ));
            }
        }
        bridge.initialize()?;
        self.bridges.write().insert(name, bridge);
        Ok(())
    }

    pub fn bridge(&self, lang: &str) -> Option<Arc<dyn LanguageBridge>> {
        self.bridges.read().get(lang).cloned()
    }

    /// Expose a function under `name`. Rejects duplicate names and
    /// signatures whose descriptors are malformed (spec §4.3 "signature
    /// is validated against bridge capability").
    pub fn expose_function(
        &self,
        name: &str,
        fn_ptr: usize,
        signature: Arc<FunctionSignature>,
        source_lang: &str,
        flags: FunctionFlags,
    ) -> PolyResult<()> {
        if !self.bridges.read().contains_key(source_lang) {
            return Err(CoreError::not_found(format!(
                "source language '{source_lang}' has no registered bridge"
            )));
        }
        if !signature.return_descriptor.is_well_formed()
            || signature.params.iter().any(|p| !p.descriptor.is_well_formed())
        {
            return Err(CoreError::with_code(
                ErrorKind::InvalidParameter,
                "ffi.signature_invalid",
                "signature descriptor does not agree with its declared kind",
            ));
        }
        let mut functions = self.functions.write();
        if functions.contains_key(name) {
            return Err(CoreError::with_code(
                ErrorKind::AlreadyExists,
                "ffi.function_conflict",
                format!("function '{name}' is already exposed"),
            ));
        }
        functions.insert(
            name.to_string(),
            ExposedFunction {
                name: name.to_string(),
                fn_ptr,
                source_lang: source_lang.to_string(),
                signature,
                flags,
                call_count: AtomicU64::new(0),
            },
        );
        Ok(())
    }

    pub fn unregister_function(&self, name: &str) -> PolyResult<()> {
        self.functions
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("function '{name}' is not exposed")))
    }

    /// The 7-step call algorithm of spec §4.3.
    #[tracing::instrument(skip(self, args, gate, cache))]
    #[allow(clippy::too_many_arguments)]
    pub fn call_function(
        &self,
        name: &str,
        args: &[Value],
        target_lang: &str,
        strict_types: bool,
        gate: Option<&dyn PermissionGate>,
        cache: Option<&dyn CallCache>,
    ) -> PolyResult<Value> {
        // Step 1.
        let (source_lang, flags, cache_key) = {
            let functions = self.functions.read();
            let record = functions
                .get(name)
                .ok_or_else(|| CoreError::not_found(format!("function '{name}' is not registered")))?;

            // Step 2.
            let arg_kinds: Vec<ValueKind> = args.iter().map(|v| v.kind()).collect();
            record.signature.check_args(&arg_kinds, strict_types)?;

            let cache_key = format!("{name}#{:x}#{:x}", record.signature.return_descriptor.fingerprint(), args_fingerprint(args));
            (record.source_lang.clone(), record.flags, cache_key)
        };

        // Step 3.
        if flags.contains(FunctionFlags::PURE) {
            if let Some(cache) = cache {
                if let Some(cached) = cache.get(&cache_key) {
                    debug!(name, "call cache hit");
                    return Ok(cached);
                }
            }
        }

        // Step 4.
        if let Some(gate) = gate {
            if !gate.allows(&source_lang, name) {
                return Err(CoreError::permission_denied(format!(
                    "session lacks permission to call '{name}' from '{source_lang}'"
                )));
            }
        }

        // Step 5.
        let target_bridge = self
            .bridges
            .read()
            .get(target_lang)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("target language '{target_lang}' has no registered bridge")))?;

        let fn_ptr = {
            let functions = self.functions.read();
            functions.get(name).map(|r| r.fn_ptr).unwrap_or_default()
        };

        let native_args: Vec<Value> = if source_lang != target_lang {
            let mut converted = Vec::with_capacity(args.len());
            for arg in args {
                converted.push(target_bridge.convert_from_native(arg)?);
            }
            converted
        } else {
            args.to_vec()
        };

        let result = match target_bridge.call_function(fn_ptr, &native_args) {
            Ok(value) => value,
            Err(err) => {
                // Step 7.
                let message = target_bridge.handle_exception(err.message());
                warn!(name, %message, "bridge reported an exception");
                return Err(CoreError::with_code(ErrorKind::ForeignException, "ffi.foreign_exception", message));
            }
        };

        // Step 6.
        let marshalled = target_bridge.convert_to_native(&result)?;

        if flags.contains(FunctionFlags::PURE) {
            if let Some(cache) = cache {
                cache.put(&cache_key, marshalled.clone());
            }
        }

        if let Some(record) = self.functions.read().get(name) {
            record.call_count.fetch_add(1, Ordering::Relaxed);
        }

        Ok(marshalled)
    }

    pub fn function_call_count(&self, name: &str) -> Option<u64> {
        self.functions.read().get(name).map(|r| r.call_count())
    }
}

/// Folds argument kinds and payload bytes into a cache-key component so
/// two calls to the same `pure` function with different arguments never
/// collide on the same cache entry (spec §4.10: cache is keyed by
/// `hash(function_name, arg_bytes)`).
fn args_fingerprint(args: &[Value]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for arg in args {
        arg.kind().hash(&mut hasher);
        arg.get_data().hash(&mut hasher);
    }
    hasher.finish()
}
