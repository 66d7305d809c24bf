//! Core Context & Error Plane (C9, spec §4.9): an explicitly-constructed,
//! process-wide context owning the memory allocator and service registry,
//! plus the thread-local error plane (Design Notes §9: "reimplement as
//! an explicitly-constructed context passed into every operation").

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, ErrorRecord};
use crate::memory::MemoryBridge;
use crate::registry::ServiceRegistry;

type ErrorSink = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

thread_local! {
    static LAST_ERROR: RefCell<Option<ErrorRecord>> = const { RefCell::new(None) };
}

/// Owns the memory bridge and service registry for one runtime instance.
/// Never a singleton: tests (and multiple embedders in one process)
/// construct independent contexts (Design Notes §9).
pub struct CoreContext {
    pub memory: MemoryBridge,
    pub services: ServiceRegistry,
    error_sink: RwLock<Option<ErrorSink>>,
}

impl CoreContext {
    pub fn new(memory_pool_size: usize) -> Self {
        Self {
            memory: MemoryBridge::new(memory_pool_size),
            services: ServiceRegistry::new(),
            error_sink: RwLock::new(None),
        }
    }

    pub fn register_error_sink(&self, sink: impl Fn(&ErrorRecord) + Send + Sync + 'static) {
        *self.error_sink.write() = Some(Arc::new(sink));
    }

    /// Sets the calling thread's last-error slot and forwards a copy to
    /// the registered sink, if any (spec §4.9). Error records are
    /// immutable once set; callers read by reference via
    /// [`CoreContext::with_last_error`].
    pub fn record_error(&self, component: &'static str, err: &CoreError) {
        let record = ErrorRecord::from_core_error(component, err);
        if let Some(sink) = self.error_sink.read().as_ref() {
            sink(&record);
        }
        LAST_ERROR.with(|slot| {
            *slot.borrow_mut() = Some(record);
        });
    }

    /// Read access to the calling thread's last error record, if any.
    pub fn with_last_error<R>(&self, f: impl FnOnce(Option<&ErrorRecord>) -> R) -> R {
        LAST_ERROR.with(|slot| f(slot.borrow().as_ref()))
    }

    pub fn clear_last_error(&self) {
        LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn record_error_populates_thread_local_slot() {
        let ctx = CoreContext::new(1024);
        ctx.record_error("ffi", &CoreError::not_found("function missing"));
        ctx.with_last_error(|record| {
            let record = record.expect("error recorded");
            assert_eq!(record.source, "ffi");
            assert_eq!(record.code, "not-found");
        });
    }

    #[test]
    fn sink_is_forwarded_a_copy_on_every_error() {
        let ctx = CoreContext::new(1024);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        ctx.register_error_sink(move |_record| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        ctx.record_error("wire", &CoreError::checksum_mismatch("bad checksum"));
        ctx.record_error("wire", &CoreError::too_large("frame too large"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_removes_the_last_error() {
        let ctx = CoreContext::new(1024);
        ctx.record_error("fsm", &CoreError::new(ErrorKind::GuardDenied, "denied"));
        ctx.clear_last_error();
        ctx.with_last_error(|record| assert!(record.is_none()));
    }
}
