// CUDA Memory Pool: caching allocator for weight slots
//
// Every inference call allocates two device weight slots of one record each
// and drops them when it returns. Dropped slots are not freed to the driver;
// they go back to a free list keyed by byte length, so repeated calls on the
// same engine reuse the same two buffers.
//
// Usage (through CudaDevice helpers):
//
//   let slot = device.pool_alloc_zeros(geometry.record_bytes())?;  // from pool
//   drop(slot);                                                    // return
//   let stats = device.pool_stats();                               // query
//   device.empty_cache();                                          // release

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cudarc::driver::{CudaSlice, DevicePtr, DeviceSlice, DriverError};

/// Snapshot of the pool's allocation statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total bytes currently held in the cache (not handed out).
    pub cached_bytes: usize,
    /// Number of individual buffers currently in the cache.
    pub cached_buffers: usize,
    /// Cumulative cache hits (allocations served from the cache).
    pub hits: u64,
    /// Cumulative cache misses (allocations that fell through to cuMemAlloc).
    pub misses: u64,
}

/// A CUDA memory caching allocator for byte buffers.
pub struct CudaMemPool {
    buckets: Mutex<HashMap<usize, Vec<CudaSlice<u8>>>>,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl CudaMemPool {
    pub fn new() -> Self {
        CudaMemPool {
            buckets: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<usize, Vec<CudaSlice<u8>>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate `bytes` zeroed bytes, reusing a cached buffer if available.
    pub fn alloc_zeros(
        self: &Arc<Self>,
        dev: &Arc<cudarc::driver::CudaDevice>,
        bytes: usize,
    ) -> Result<PooledSlice, DriverError> {
        let cached = self.buckets().get_mut(&bytes).and_then(Vec::pop);
        let slice = match cached {
            Some(mut slice) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                dev.memset_zeros(&mut slice)?;
                slice
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                dev.alloc_zeros::<u8>(bytes)?
            }
        };
        Ok(PooledSlice {
            slice: Some(slice),
            pool: Arc::clone(self),
        })
    }

    fn reclaim(&self, slice: CudaSlice<u8>) {
        self.buckets().entry(slice.len()).or_default().push(slice);
    }

    /// Drop every cached buffer, freeing it to the driver.
    pub fn empty_cache(&self) {
        let freed: usize = self.buckets().drain().map(|(_, stack)| stack.len()).sum();
        tracing::debug!(freed, "emptied CUDA memory pool");
    }

    pub fn stats(&self) -> PoolStats {
        let map = self.buckets();
        let mut cached_buffers = 0;
        let mut cached_bytes = 0;
        for (bytes, stack) in map.iter() {
            cached_buffers += stack.len();
            cached_bytes += bytes * stack.len();
        }
        PoolStats {
            cached_bytes,
            cached_buffers,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for CudaMemPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CudaMemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stats();
        write!(
            f,
            "CudaMemPool(cached={}B in {} bufs, hits={}, misses={})",
            s.cached_bytes, s.cached_buffers, s.hits, s.misses
        )
    }
}

/// A device byte buffer that returns to its pool when dropped.
pub struct PooledSlice {
    slice: Option<CudaSlice<u8>>,
    pool: Arc<CudaMemPool>,
}

impl PooledSlice {
    pub fn len(&self) -> usize {
        self.slice.as_ref().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw device address of the first byte.
    pub fn device_ptr(&self) -> u64 {
        self.slice.as_ref().map_or(0, |s| *s.device_ptr())
    }
}

impl Drop for PooledSlice {
    fn drop(&mut self) {
        if let Some(slice) = self.slice.take() {
            self.pool.reclaim(slice);
        }
    }
}

impl fmt::Debug for PooledSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PooledSlice(len={})", self.len())
    }
}

// Safety: the slice is only touched through driver calls, which are thread-safe
unsafe impl Send for PooledSlice {}
unsafe impl Sync for PooledSlice {}
