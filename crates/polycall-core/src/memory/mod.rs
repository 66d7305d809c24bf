//! Memory Bridge (C2, spec §4.2): shared memory pool, ownership registry,
//! reference counting, GC-notification fan-out and snapshot/restore.
//!
//! Grounded on the teacher's buffer-pool module
//! (`spark-core/src/buffer/mod.rs`) for the pool-allocator shape, and on
//! its `DashMap`-backed registries elsewhere in the workspace dependency
//! set for the sharded ownership table (spec §5: "implementers may shard
//! by pointer hash").

mod pool;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{CoreError, ErrorKind, PolyResult};
use pool::Pool;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permission: u8 {
        const READ    = 0b001;
        const WRITE   = 0b010;
        const EXECUTE = 0b100;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShareFlags: u16 {
        const READ_ONLY  = 1 << 0;
        const COPY       = 1 << 1;
        const TRANSFER   = 1 << 2;
        const REFERENCE  = 1 << 3;
        const TEMPORARY  = 1 << 4;
        const PERSISTENT = 1 << 5;
        const ISOLATED   = 1 << 6;
        const AUTO_FREE  = 1 << 7;
        const IN_GC      = 1 << 8;
        const MARKED     = 1 << 9;
    }
}

/// A tracked memory span: owner, permissions, share flags and refcount
/// (spec §3 "Memory region descriptor").
#[derive(Debug, Clone)]
pub struct RegionDescriptor {
    pub ptr: usize,
    pub size: usize,
    pub owner: String,
    pub refcount: u32,
    pub permissions: Permission,
    pub share_flags: ShareFlags,
    pub shared_with: Vec<String>,
    /// `true` if this region's bytes live in the pool allocator (and so
    /// must be freed through it); `false` for regions registered via
    /// `share` over externally-owned memory the bridge never allocated.
    pool_backed: bool,
}

impl RegionDescriptor {
    fn assert_invariants(&self) {
        debug_assert!(
            !self.share_flags.contains(ShareFlags::MARKED) || self.share_flags.contains(ShareFlags::IN_GC),
            "marked implies in_gc"
        );
    }
}

type GcCallback = Arc<dyn Fn(&str, &RegionDescriptor) + Send + Sync>;

struct Snapshot {
    regions: Vec<RegionDescriptor>,
    checksum: u64,
}

/// The memory bridge: a sharded ownership registry over a single pool
/// allocator (spec §4.2, §5).
pub struct MemoryBridge {
    pool: Mutex<Pool>,
    regions: DashMap<usize, RegionDescriptor>,
    gc_callbacks: Mutex<std::collections::HashMap<String, Vec<GcCallback>>>,
    snapshots: Mutex<std::collections::HashMap<u64, Snapshot>>,
    next_snapshot_id: AtomicU64,
}

impl MemoryBridge {
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            pool: Mutex::new(Pool::new(pool_capacity)),
            regions: DashMap::new(),
            gc_callbacks: Mutex::new(std::collections::HashMap::new()),
            snapshots: Mutex::new(std::collections::HashMap::new()),
            next_snapshot_id: AtomicU64::new(1),
        }
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool.lock().capacity()
    }

    pub fn pool_used(&self) -> usize {
        self.pool.lock().used()
    }

    /// Allocate `size` bytes from the pool and register an owned, exclusive
    /// region (spec §4.2 "alloc_shared").
    #[tracing::instrument(skip(self))]
    pub fn alloc_shared(
        &self,
        size: usize,
        owner: &str,
        permissions: Permission,
        share_flags: ShareFlags,
        zero_init: bool,
    ) -> PolyResult<RegionDescriptor> {
        let ptr = self.pool.lock().alloc(size, zero_init)?;
        let region = RegionDescriptor {
            ptr,
            size,
            owner: owner.to_string(),
            refcount: 1,
            permissions,
            share_flags,
            shared_with: Vec::new(),
            pool_backed: true,
        };
        region.assert_invariants();
        self.regions.insert(ptr, region.clone());
        debug!(ptr, size, owner, "allocated shared region");
        Ok(region)
    }

    /// Release a pool-backed region outright, regardless of refcount,
    /// provided `lang` is the current owner (spec §4.2 "free_shared").
    pub fn free_shared(&self, ptr: usize, lang: &str) -> PolyResult<()> {
        let region = self
            .regions
            .get(&ptr)
            .ok_or_else(|| CoreError::not_found("unknown region"))?
            .clone();
        if region.owner != lang {
            return Err(CoreError::permission_denied(
                "only the owning language may free_shared a region",
            ));
        }
        if region.pool_backed {
            self.pool.lock().free(ptr)?;
        }
        self.regions.remove(&ptr);
        Ok(())
    }

    /// Share a pointer from one language to another under `flags`
    /// (spec §4.2 "share").
    #[tracing::instrument(skip(self))]
    pub fn share(
        &self,
        ptr: usize,
        size: usize,
        from: &str,
        to: &str,
        permissions: Permission,
        flags: ShareFlags,
    ) -> PolyResult<RegionDescriptor> {
        if let Some(existing) = self.regions.get(&ptr) {
            if existing.share_flags.contains(ShareFlags::ISOLATED) {
                return Err(CoreError::permission_denied("region is isolated and cannot be shared"));
            }
            if existing.share_flags != flags {
                return Err(CoreError::with_code(
                    ErrorKind::InvalidState,
                    "memory.already_shared_incompatible",
                    "region already shared under incompatible flags",
                ));
            }
        }

        if flags.contains(ShareFlags::COPY) {
            let token = self.pool.lock().alloc(size, true)?;
            if let Some(existing) = self.regions.get(&ptr) {
                if existing.pool_backed {
                    let bytes = self.pool.lock().read(ptr)?.to_vec();
                    self.pool.lock().write(token, &bytes)?;
                }
            }
            let region = RegionDescriptor {
                ptr: token,
                size,
                owner: to.to_string(),
                refcount: 1,
                permissions,
                share_flags: flags,
                shared_with: vec![from.to_string()],
                pool_backed: true,
            };
            self.regions.insert(token, region.clone());
            return Ok(region);
        }

        let mut entry = self
            .regions
            .entry(ptr)
            .or_insert_with(|| RegionDescriptor {
                ptr,
                size,
                owner: from.to_string(),
                refcount: 0,
                permissions,
                share_flags: flags,
                shared_with: Vec::new(),
                pool_backed: false,
            });

        if flags.contains(ShareFlags::TRANSFER) {
            if entry.owner != from || entry.refcount > 1 {
                return Err(CoreError::permission_denied(
                    "transfer requires the sender to be the sole owner",
                ));
            }
            entry.owner = to.to_string();
        } else if flags.contains(ShareFlags::REFERENCE) {
            entry.refcount += 1;
            if !entry.shared_with.contains(&to.to_string()) {
                entry.shared_with.push(to.to_string());
            }
        }
        entry.share_flags = flags;
        entry.permissions = permissions;
        entry.assert_invariants();
        Ok(entry.clone())
    }

    /// Acquire a region for `lang` with `perms`, incrementing its refcount
    /// (spec §4.2 "acquire").
    pub fn acquire(&self, ptr: usize, lang: &str, perms: Permission) -> PolyResult<RegionDescriptor> {
        let mut entry = self
            .regions
            .get_mut(&ptr)
            .ok_or_else(|| CoreError::not_found("unknown region"))?;
        if entry.share_flags.contains(ShareFlags::READ_ONLY) && perms.contains(Permission::WRITE) {
            return Err(CoreError::permission_denied("region is read-only while shared"));
        }
        if !entry.permissions.contains(perms) {
            return Err(CoreError::permission_denied(format!(
                "{lang} requested permissions not granted on region"
            )));
        }
        entry.refcount += 1;
        Ok(entry.clone())
    }

    /// Release a previously-acquired region for `lang`. When the refcount
    /// drops to zero the region is freed unless marked `PERSISTENT`; if
    /// `AUTO_FREE` is set, GC callbacks for the owner fire first
    /// (spec §4.2 "release").
    #[tracing::instrument(skip(self))]
    pub fn release(&self, ptr: usize, lang: &str) -> PolyResult<()> {
        let should_free = {
            let mut entry = self
                .regions
                .get_mut(&ptr)
                .ok_or_else(|| CoreError::not_found("unknown region"))?;
            entry.refcount = entry.refcount.saturating_sub(1);
            entry.refcount == 0 && !entry.share_flags.contains(ShareFlags::PERSISTENT)
        };

        if should_free {
            let region = self.regions.get(&ptr).map(|r| r.clone());
            if let Some(region) = region {
                if region.share_flags.contains(ShareFlags::AUTO_FREE) {
                    self.notify_gc(&region.owner, &region);
                }
                if region.pool_backed {
                    self.pool.lock().free(ptr)?;
                }
            }
            self.regions.remove(&ptr);
            debug!(ptr, lang, "region freed after refcount reached zero");
        }
        Ok(())
    }

    /// Register a GC notification callback for `language`. Multiple
    /// callbacks are allowed and fire in registration order
    /// (spec §4.2 "register_gc_callback").
    pub fn register_gc_callback(
        &self,
        language: &str,
        callback: impl Fn(&str, &RegionDescriptor) + Send + Sync + 'static,
    ) {
        self.gc_callbacks
            .lock()
            .entry(language.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    fn notify_gc(&self, owner: &str, region: &RegionDescriptor) {
        let callbacks = self.gc_callbacks.lock();
        if let Some(list) = callbacks.get(owner) {
            for cb in list {
                cb(owner, region);
            }
        }
    }

    pub fn region(&self, ptr: usize) -> Option<RegionDescriptor> {
        self.regions.get(&ptr).map(|r| r.clone())
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Capture the current descriptor table under an opaque, checksum-
    /// guarded snapshot id (spec §4.2 "snapshot").
    pub fn snapshot(&self) -> u64 {
        let regions: Vec<RegionDescriptor> = self.regions.iter().map(|e| e.value().clone()).collect();
        let checksum = checksum_regions(&regions);
        let id = self.next_snapshot_id.fetch_add(1, Ordering::SeqCst);
        self.snapshots.lock().insert(id, Snapshot { regions, checksum });
        id
    }

    /// Restore a snapshot, rejected if the current structural state's
    /// checksum no longer matches the one captured at snapshot time
    /// (spec §4.2 "restore", §8 property 6).
    pub fn restore(&self, id: u64) -> PolyResult<()> {
        let snapshots = self.snapshots.lock();
        let snapshot = snapshots
            .get(&id)
            .ok_or_else(|| CoreError::not_found("unknown snapshot id"))?;
        let current: Vec<RegionDescriptor> = self.regions.iter().map(|e| e.value().clone()).collect();
        let current_checksum = checksum_regions(&current);
        if current_checksum != snapshot.checksum {
            return Err(CoreError::integrity_check_failed(
                "region table changed since snapshot was taken",
            ));
        }
        warn!(id, "restoring memory bridge snapshot");
        self.regions.clear();
        for region in &snapshot.regions {
            self.regions.insert(region.ptr, region.clone());
        }
        Ok(())
    }
}

fn checksum_regions(regions: &[RegionDescriptor]) -> u64 {
    let mut ptrs: Vec<usize> = regions.iter().map(|r| r.ptr).collect();
    ptrs.sort_unstable();
    let mut hasher = DefaultHasher::new();
    for ptr in ptrs {
        let region = regions.iter().find(|r| r.ptr == ptr).unwrap();
        region.ptr.hash(&mut hasher);
        region.size.hash(&mut hasher);
        region.owner.hash(&mut hasher);
        region.refcount.hash(&mut hasher);
        region.permissions.bits().hash(&mut hasher);
        region.share_flags.bits().hash(&mut hasher);
    }
    hasher.finish()
}
