//! End-to-end scenarios from spec §8, exercised across module
//! boundaries rather than within a single module's unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use polycall_core::{
    BridgeCapabilities, Cancellation, CoreError, ErrorKind, FfiRegistry, FunctionFlags,
    FunctionSignature, InheritancePolicy, LanguageBridge, MemoryBridge, ParamDescriptor,
    PerfCallCache, Permission, PolyResult, Relationship, ShareFlags, StateMachineBuilder,
    TypeDescriptor, Value, ValueKind,
};

struct CountingBridge {
    lang: &'static str,
    calls: AtomicU32,
}

impl LanguageBridge for CountingBridge {
    fn name(&self) -> &str {
        self.lang
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn capabilities(&self) -> BridgeCapabilities {
        BridgeCapabilities::THREAD_SAFE
    }
    fn initialize(&self) -> PolyResult<()> {
        Ok(())
    }
    fn cleanup(&self) -> PolyResult<()> {
        Ok(())
    }
    fn convert_to_native(&self, value: &Value) -> PolyResult<Value> {
        Ok(value.clone())
    }
    fn convert_from_native(&self, value: &Value) -> PolyResult<Value> {
        Ok(value.clone())
    }
    fn call_function(&self, _fn_ptr: usize, args: &[Value]) -> PolyResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let a = args[0].as_i32().unwrap();
        let b = args[1].as_i32().unwrap();
        let desc = Arc::new(TypeDescriptor::scalar(ValueKind::I32, "i32").unwrap());
        let mut out = Value::create(ValueKind::I32, desc).unwrap();
        out.set_i32(a + b);
        Ok(out)
    }
    fn handle_exception(&self, detail: &str) -> String {
        detail.to_string()
    }
}

fn i32_value(n: i32) -> Value {
    let desc = Arc::new(TypeDescriptor::scalar(ValueKind::I32, "i32").unwrap());
    let mut v = Value::create(ValueKind::I32, desc).unwrap();
    v.set_i32(n);
    v
}

/// S3: pure call caching — second call within TTL must not invoke the
/// bridge and must return 5.
#[test]
fn scenario_s3_pure_call_is_cached_across_ffi_and_perf() {
    let registry = FfiRegistry::new();
    let bridge = Arc::new(CountingBridge { lang: "native", calls: AtomicU32::new(0) });
    registry.register_language(bridge.clone()).unwrap();

    let ret = Arc::new(TypeDescriptor::scalar(ValueKind::I32, "i32").unwrap());
    let params = vec![
        ParamDescriptor { name: "a".into(), kind: ValueKind::I32, descriptor: ret.clone(), optional: false },
        ParamDescriptor { name: "b".into(), kind: ValueKind::I32, descriptor: ret.clone(), optional: false },
    ];
    let sig = Arc::new(FunctionSignature::new(ret, params, false).unwrap());
    registry
        .expose_function("add", 0, sig, "native", FunctionFlags::PURE)
        .unwrap();

    let cache = PerfCallCache::new(Duration::from_secs(60));
    let args = [i32_value(2), i32_value(3)];

    let first = registry
        .call_function("add", &args, "native", false, None, Some(&cache))
        .unwrap();
    let second = registry
        .call_function("add", &args, "native", false, None, Some(&cache))
        .unwrap();

    assert_eq!(first.as_i32().unwrap(), 5);
    assert_eq!(second.as_i32().unwrap(), 5);
    assert_eq!(bridge.calls.load(Ordering::SeqCst), 1, "bridge must only be invoked once");
}

/// S5: hierarchical permissions — `payment.authorize` (additive, own
/// `{sign}`) under `payment` (`{read, write}`) resolves to
/// `{sign, read, write}`.
#[test]
fn scenario_s5_hierarchical_permissions_resolve_additively() {
    let mut payment_perms = HashSet::new();
    payment_perms.insert("read");
    payment_perms.insert("write");
    let mut authorize_perms = HashSet::new();
    authorize_perms.insert("sign");

    let machine = StateMachineBuilder::new("payment")
        .with_permissions("payment", payment_perms)
        .unwrap()
        .add_state(
            "payment.authorize",
            false,
            authorize_perms,
            InheritancePolicy::Additive,
            Some("payment"),
            Some(Relationship::Parent),
        )
        .unwrap()
        .start();

    let effective = machine.effective_permissions("payment.authorize").unwrap();
    assert!(effective.contains("sign"));
    assert!(effective.contains("read"));
    assert!(effective.contains("write"));
    assert_eq!(effective.len(), 3);
}

/// S6: share with `transfer` from "js" to "py"; subsequent
/// `acquire(P, "js", read)` fails `permission-denied`.
#[test]
fn scenario_s6_memory_transfer_revokes_sender_access() {
    let bridge = MemoryBridge::new(4096);
    let region = bridge
        .alloc_shared(128, "js", Permission::READ | Permission::WRITE, ShareFlags::empty(), true)
        .unwrap();
    bridge
        .share(region.ptr, 128, "js", "py", Permission::READ, ShareFlags::TRANSFER)
        .unwrap();

    let err = bridge.acquire(region.ptr, "js", Permission::READ).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(bridge.acquire(region.ptr, "py", Permission::READ).is_ok());
}

/// Property 1: for all sequences of alloc/free, `sum(region.size) ==
/// pool.used` and `pool.used <= pool.capacity`.
#[test]
fn property_1_pool_usage_tracks_live_regions() {
    let bridge = MemoryBridge::new(1024);
    let a = bridge.alloc_shared(100, "js", Permission::READ, ShareFlags::empty(), true).unwrap();
    let b = bridge.alloc_shared(200, "js", Permission::READ, ShareFlags::empty(), true).unwrap();
    assert_eq!(bridge.pool_used(), 300);
    assert!(bridge.pool_used() <= bridge.pool_capacity());
    bridge.free_shared(a.ptr, "js").unwrap();
    assert_eq!(bridge.pool_used(), 200);
    bridge.free_shared(b.ptr, "js").unwrap();
    assert_eq!(bridge.pool_used(), 0);
}

/// Cancellation is cooperative: a cancel flag on the session causes the
/// next suspension to return `cancelled` (spec §5).
#[test]
fn cancellation_token_is_observed_cooperatively() {
    let token = Cancellation::new();
    assert!(!token.is_cancelled());
    let clone = token.clone();
    clone.cancel();
    assert!(token.is_cancelled());
}

/// CoreError severities match the propagation policy relied on by C6
/// (fatal errors force a session into ERROR).
#[test]
fn fatal_errors_are_flagged_unrecoverable() {
    let err = CoreError::out_of_memory("pool exhausted");
    assert!(!err.is_recoverable());
    let err = CoreError::not_found("missing");
    assert!(err.is_recoverable());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    /// Property 1, generalized: for any sequence of allocate/free
    /// operations the pool's used-bytes count always equals the sum of
    /// the sizes of currently-live regions, and never exceeds capacity.
    proptest! {
        #[test]
        fn pool_used_matches_live_region_sizes(sizes in prop::collection::vec(1usize..=64, 1..16)) {
            let capacity = sizes.iter().sum::<usize>() + sizes.len() * 16 + 256;
            let bridge = MemoryBridge::new(capacity);
            let mut allocated = Vec::new();
            let mut expected_used = 0usize;

            for size in &sizes {
                let region = bridge
                    .alloc_shared(*size, "js", Permission::READ, ShareFlags::empty(), true)
                    .unwrap();
                expected_used += size;
                prop_assert_eq!(bridge.pool_used(), expected_used);
                prop_assert!(bridge.pool_used() <= bridge.pool_capacity());
                allocated.push((region.ptr, *size));
            }

            for (ptr, size) in allocated {
                bridge.free_shared(ptr, "js").unwrap();
                expected_used -= size;
                prop_assert_eq!(bridge.pool_used(), expected_used);
            }
            prop_assert_eq!(bridge.pool_used(), 0);
        }
    }

    /// Property 3: on a successful transition the machine's current state
    /// equals the transition's declared target; on a guard-denied
    /// transition the current state is left unchanged.
    proptest! {
        #[test]
        fn transition_target_matches_on_success_and_is_unchanged_on_denial(allow in any::<bool>()) {
            let mut machine = StateMachineBuilder::new("idle")
                .add_state("running", false, HashSet::new(), InheritancePolicy::None, None, None)
                .unwrap()
                .add_transition(
                    "start",
                    "idle",
                    "running",
                    polycall_core::TransitionKind::Local,
                    Some(Box::new(move |_| allow)),
                )
                .unwrap()
                .start();

            let result = machine.execute("start", None);
            if allow {
                prop_assert!(result.is_ok());
                prop_assert_eq!(machine.current_state(), "running");
            } else {
                prop_assert!(result.is_err());
                prop_assert_eq!(machine.current_state(), "idle");
            }
        }
    }
}
