//! Performance Manager (C10, spec §4.10): call cache with lazy TTL
//! eviction, type-conversion cache, and a fixed-capacity trace ring.
//! All caches here are advisory — correctness never depends on them
//! (spec §4.10 closing line).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::error::PolyResult;
use crate::ffi::CallCache as CallCacheTrait;
use crate::types::{Value, ValueKind};

struct CachedResult {
    value: Value,
    expires_at: Instant,
}

/// Call cache keyed by function name + argument fingerprint, entries
/// carrying a TTL. Eviction is lazy: a hit past TTL is treated as a miss
/// and displaced (spec §4.10).
pub struct PerfCallCache {
    entries: RwLock<HashMap<String, CachedResult>>,
    ttl: Duration,
}

impl PerfCallCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CallCacheTrait for PerfCallCache {
    fn get(&self, key: &str) -> Option<Value> {
        let hit = {
            let entries = self.entries.read();
            entries.get(key).map(|e| (e.value.clone(), e.expires_at))
        };
        match hit {
            Some((value, expires_at)) if expires_at > Instant::now() => Some(value),
            Some(_) => {
                self.entries.write().remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: &str, value: Value) {
        self.entries.write().insert(
            key.to_string(),
            CachedResult { value, expires_at: Instant::now() + self.ttl },
        );
    }
}

type ConversionFn = Arc<dyn Fn(&Value) -> PolyResult<Value> + Send + Sync>;

/// Type-conversion cache keyed by `(src_kind, dst_kind)`, storing a
/// function pointer (spec §4.10).
#[derive(Default)]
pub struct ConversionCache {
    entries: RwLock<HashMap<(ValueKind, ValueKind), ConversionFn>>,
}

impl ConversionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, src: ValueKind, dst: ValueKind, convert: ConversionFn) {
        self.entries.write().insert((src, dst), convert);
    }

    pub fn get(&self, src: ValueKind, dst: ValueKind) -> Option<ConversionFn> {
        self.entries.read().get(&(src, dst)).cloned()
    }
}

/// A fixed-capacity ring buffer; pushing past capacity overwrites the
/// oldest entry (spec §4.10 "Trace ring").
pub struct TraceRing<T> {
    capacity: usize,
    buffer: Mutex<std::collections::VecDeque<T>>,
}

impl<T> TraceRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), buffer: Mutex::new(std::collections::VecDeque::with_capacity(capacity)) }
    }

    pub fn push(&self, item: T) {
        let mut buffer = self.buffer.lock();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> TraceRing<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.buffer.lock().iter().cloned().collect()
    }
}

#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub function_name: String,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;
    use std::sync::Arc;
    use std::thread::sleep;

    fn u32_value(n: u32) -> Value {
        let desc = Arc::new(TypeDescriptor::scalar(ValueKind::U32, "u32").unwrap());
        let mut v = Value::create(ValueKind::U32, desc).unwrap();
        v.set_u32(n);
        v
    }

    #[test]
    fn cache_hit_within_ttl_returns_value_scenario_s3() {
        let cache = PerfCallCache::new(Duration::from_secs(60));
        cache.put("add#2,3", u32_value(5));
        let hit = cache.get("add#2,3").unwrap();
        assert_eq!(hit.as_u32().unwrap(), 5);
    }

    #[test]
    fn cache_hit_past_ttl_is_treated_as_miss_and_displaced() {
        let cache = PerfCallCache::new(Duration::from_millis(5));
        cache.put("add#2,3", u32_value(5));
        sleep(Duration::from_millis(20));
        assert!(cache.get("add#2,3").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn conversion_cache_round_trips_by_kind_pair() {
        let cache = ConversionCache::new();
        cache.register(ValueKind::U8, ValueKind::U32, Arc::new(|v: &Value| Ok(v.clone())));
        assert!(cache.get(ValueKind::U8, ValueKind::U32).is_some());
        assert!(cache.get(ValueKind::U32, ValueKind::U8).is_none());
    }

    #[test]
    fn trace_ring_overwrites_oldest_on_overflow() {
        let ring = TraceRing::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        assert_eq!(ring.snapshot(), vec![2, 3]);
    }
}
