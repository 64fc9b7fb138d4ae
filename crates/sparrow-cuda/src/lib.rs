// CUDA Backend: runs the layer pipeline on an NVIDIA GPU using cudarc
//
// ARCHITECTURE:
// - CudaDevice wraps cudarc's device handle, the byte pool for weight slots
//   and the device's shared memory per block
// - Pinned buffers are page-locked host allocations (cuMemHostAlloc), so
//   uploads from the weight store can run asynchronously
// - Managed buffers are unified-memory allocations (cuMemAllocManaged); the
//   host compacts rows straight from kernel output after a stream sync
// - Device buffers are pooled raw byte slices holding one packed record
// - Streams are forked from the device's default stream
// - Kernels are compiled once at device creation via NVRTC
//
// USAGE:
//   let device = CudaDevice::new(0)?;  // GPU ordinal 0
//   let engine = Engine::<CudaBackend, f32>::new(device, "weights.spwt", config)?;

mod kernels;
pub mod pool;

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use cudarc::driver::sys::{CUdevice_attribute_enum, CUmemAttach_flags_enum};
use cudarc::driver::{result, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::{compile_ptx_with_opts, CompileOptions};
use pool::{CudaMemPool, PoolStats, PooledSlice};

use sparrow_core::{
    Backend, BackendDevice, Element, Error, PropagateArgs, Result, Scalar,
};

/// Threads per propagate block, as (x, y).
const PROPAGATE_BLOCK: (u32, u32) = (2, 512);

// CudaDevice: a cudarc device plus the weight-slot pool

/// A CUDA device handle. Clonable (uses Arc internally).
#[derive(Clone)]
pub struct CudaDevice {
    dev: Arc<cudarc::driver::CudaDevice>,
    pool: Arc<CudaMemPool>,
    ordinal: usize,
    shared_mem_per_block: usize,
}

impl CudaDevice {
    /// Create a new CUDA device for the given GPU ordinal (0, 1, ...).
    /// Compiles the sparrow kernels for the device's architecture.
    pub fn new(ordinal: usize) -> Result<Self> {
        let dev = cudarc::driver::CudaDevice::new(ordinal)
            .map_err(|e| Error::device("device creation", e))?;

        let shared_mem_per_block = dev
            .attribute(CUdevice_attribute_enum::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK)
            .map_err(|e| Error::device("device query", e))? as usize;

        // Target the device's own SASS so toolkit and driver PTX versions
        // cannot disagree.
        let major = dev
            .attribute(CUdevice_attribute_enum::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .unwrap_or(8);
        let minor = dev
            .attribute(CUdevice_attribute_enum::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .unwrap_or(0);
        let arch: &'static str = Box::leak(format!("sm_{major}{minor}").into_boxed_str());
        let opts = CompileOptions {
            arch: Some(arch),
            ..Default::default()
        };
        let ptx = compile_ptx_with_opts(kernels::KERNEL_SOURCE, opts)
            .map_err(|e| Error::device("kernel compilation", e))?;
        dev.load_ptx(ptx, kernels::MODULE_NAME, kernels::KERNEL_NAMES)
            .map_err(|e| Error::device("kernel load", e))?;

        tracing::debug!(ordinal, arch, shared_mem_per_block, "initialized CUDA device");
        Ok(CudaDevice {
            dev,
            pool: Arc::new(CudaMemPool::new()),
            ordinal,
            shared_mem_per_block,
        })
    }

    /// Get the underlying cudarc device handle.
    pub fn device(&self) -> &Arc<cudarc::driver::CudaDevice> {
        &self.dev
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Make this device's context current on the calling thread.
    fn bind(&self, op: &'static str) -> Result<()> {
        self.dev.bind_to_thread().map_err(|e| Error::device(op, e))
    }

    fn get_func(&self, name: &str) -> Result<cudarc::driver::CudaFunction> {
        self.dev
            .get_func(kernels::MODULE_NAME, name)
            .ok_or_else(|| Error::device("kernel lookup", format!("'{name}' not found")))
    }

    // ── Memory pool helpers ──────────────────────────────────────────────

    /// Allocate `bytes` zeroed device bytes from the pool.
    pub fn pool_alloc_zeros(&self, bytes: usize) -> Result<PooledSlice> {
        self.pool
            .alloc_zeros(&self.dev, bytes)
            .map_err(|e| Error::device("device allocation", e))
    }

    /// Release all cached weight slots back to the CUDA driver.
    pub fn empty_cache(&self) {
        self.pool.empty_cache();
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CudaDevice(cuda:{})", self.ordinal)
    }
}

// Safety: cudarc's device is thread-safe (the driver API is thread-safe)
unsafe impl Send for CudaDevice {}
unsafe impl Sync for CudaDevice {}

impl BackendDevice for CudaDevice {
    fn name(&self) -> String {
        format!("cuda:{}", self.ordinal)
    }

    fn shared_mem_per_block(&self) -> usize {
        self.shared_mem_per_block
    }
}

// Host-visible allocations

/// Page-locked host memory.
pub struct PinnedBuffer<T> {
    ptr: NonNull<T>,
    len: usize,
    allocated: bool,
}

impl<T: Scalar> PinnedBuffer<T> {
    fn zeroed(device: &CudaDevice, len: usize) -> Result<Self> {
        let bytes = len * std::mem::size_of::<T>();
        if bytes == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len,
                allocated: false,
            });
        }
        device.bind("pinned allocation")?;
        let raw = unsafe { result::malloc_host(bytes, 0) }
            .map_err(|e| Error::device("pinned allocation", e))?;
        let ptr = NonNull::new(raw as *mut T)
            .ok_or_else(|| Error::device("pinned allocation", "driver returned null"))?;
        // Safety: freshly allocated region of `bytes` bytes
        unsafe { std::ptr::write_bytes(ptr.as_ptr() as *mut u8, 0, bytes) };
        Ok(Self {
            ptr,
            len,
            allocated: true,
        })
    }
}

impl<T> Deref for PinnedBuffer<T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> DerefMut for PinnedBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> Drop for PinnedBuffer<T> {
    fn drop(&mut self) {
        if self.allocated {
            if let Err(e) = unsafe { result::free_host(self.ptr.as_ptr() as *mut c_void) } {
                tracing::warn!("failed to free pinned memory: {e}");
            }
        }
    }
}

impl<T> fmt::Debug for PinnedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinnedBuffer(len={})", self.len)
    }
}

// Safety: the buffer exclusively owns its allocation
unsafe impl<T: Send> Send for PinnedBuffer<T> {}
unsafe impl<T: Sync> Sync for PinnedBuffer<T> {}

/// Unified memory visible from host and device.
pub struct ManagedBuffer<E> {
    dev: Arc<cudarc::driver::CudaDevice>,
    dptr: u64,
    len: usize,
    _marker: PhantomData<E>,
}

impl<E: Scalar> ManagedBuffer<E> {
    fn zeroed(device: &CudaDevice, len: usize) -> Result<Self> {
        let bytes = len * std::mem::size_of::<E>();
        let mut dptr = 0;
        if bytes > 0 {
            device.bind("managed allocation")?;
            dptr = unsafe {
                result::malloc_managed(bytes, CUmemAttach_flags_enum::CU_MEM_ATTACH_GLOBAL)
            }
            .map_err(|e| Error::device("managed allocation", e))?;
        }
        let mut buf = Self {
            dev: Arc::clone(&device.dev),
            dptr,
            len,
            _marker: PhantomData,
        };
        buf.zero()?;
        Ok(buf)
    }

    fn size_in_bytes(&self) -> usize {
        self.len * std::mem::size_of::<E>()
    }

    fn zero(&mut self) -> Result<()> {
        if self.dptr != 0 {
            self.dev
                .bind_to_thread()
                .map_err(|e| Error::device("managed memset", e))?;
            unsafe { result::memset_d8_sync(self.dptr, 0, self.size_in_bytes()) }
                .map_err(|e| Error::device("managed memset", e))?;
        }
        Ok(())
    }

    fn data_ptr(&self) -> *mut E {
        if self.dptr == 0 {
            NonNull::dangling().as_ptr()
        } else {
            self.dptr as *mut E
        }
    }
}

impl<E> ManagedBuffer<E> {
    /// Raw device address, passed to kernels.
    fn device_ptr(&self) -> u64 {
        self.dptr
    }
}

impl<E: Scalar> Deref for ManagedBuffer<E> {
    type Target = [E];
    fn deref(&self) -> &[E] {
        unsafe { std::slice::from_raw_parts(self.data_ptr(), self.len) }
    }
}

impl<E: Scalar> DerefMut for ManagedBuffer<E> {
    fn deref_mut(&mut self) -> &mut [E] {
        unsafe { std::slice::from_raw_parts_mut(self.data_ptr(), self.len) }
    }
}

impl<E> Drop for ManagedBuffer<E> {
    fn drop(&mut self) {
        if self.dptr == 0 {
            return;
        }
        let freed = self
            .dev
            .bind_to_thread()
            .and_then(|_| unsafe { result::free_sync(self.dptr) });
        if let Err(e) = freed {
            tracing::warn!("failed to free managed memory: {e}");
        }
    }
}

impl<E> fmt::Debug for ManagedBuffer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagedBuffer(len={})", self.len)
    }
}

// Safety: the buffer exclusively owns its allocation
unsafe impl<E: Send> Send for ManagedBuffer<E> {}
unsafe impl<E: Sync> Sync for ManagedBuffer<E> {}

/// An in-order CUDA stream forked from the device's default stream.
pub struct CudaStream {
    inner: cudarc::driver::CudaStream,
}

impl CudaStream {
    fn raw(&self) -> cudarc::driver::sys::CUstream {
        self.inner.stream
    }
}

impl fmt::Debug for CudaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CudaStream({:p})", self.inner.stream)
    }
}

// Safety: CUDA streams may be used from any thread once the context is bound
unsafe impl Send for CudaStream {}
unsafe impl Sync for CudaStream {}

// Helpers

/// Standard CUDA launch configuration for N elements.
fn launch_cfg(n: usize) -> LaunchConfig {
    const BLOCK: u32 = 256;
    let grid = (n as u32).div_ceil(BLOCK);
    LaunchConfig {
        block_dim: (BLOCK, 1, 1),
        grid_dim: (grid.max(1), 1, 1),
        shared_mem_bytes: 0,
    }
}

fn to_u32(what: &'static str, v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::device("kernel launch", format!("{what} {v} exceeds u32")))
}

fn check_upload<T>(src: &[T], dst: &PooledSlice) -> Result<()> {
    let bytes = std::mem::size_of_val(src);
    if bytes > dst.len() {
        return Err(Error::device(
            "host-to-device copy",
            format!("{bytes} bytes do not fit a {}-byte buffer", dst.len()),
        ));
    }
    Ok(())
}

// CudaBackend

/// The CUDA backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct CudaBackend;

impl Backend for CudaBackend {
    type Device = CudaDevice;
    type Pinned<T: Element> = PinnedBuffer<T>;
    type Managed<E: Scalar> = ManagedBuffer<E>;
    type DeviceBuffer = PooledSlice;
    type Stream = CudaStream;

    fn alloc_pinned<T: Element>(device: &CudaDevice, len: usize) -> Result<PinnedBuffer<T>> {
        PinnedBuffer::zeroed(device, len)
    }

    fn alloc_managed<E: Scalar>(device: &CudaDevice, len: usize) -> Result<ManagedBuffer<E>> {
        ManagedBuffer::zeroed(device, len)
    }

    fn alloc_device(device: &CudaDevice, bytes: usize) -> Result<PooledSlice> {
        device.bind("device allocation")?;
        device.pool_alloc_zeros(bytes)
    }

    fn create_stream(device: &CudaDevice) -> Result<CudaStream> {
        let inner = device
            .dev
            .fork_default_stream()
            .map_err(|e| Error::device("stream creation", e))?;
        Ok(CudaStream { inner })
    }

    fn copy_to_device<T: Element>(
        device: &CudaDevice,
        src: &[T],
        dst: &mut PooledSlice,
    ) -> Result<()> {
        check_upload(src, dst)?;
        if src.is_empty() {
            return Ok(());
        }
        device.bind("host-to-device copy")?;
        unsafe { result::memcpy_htod_sync(dst.device_ptr(), src) }
            .map_err(|e| Error::device("host-to-device copy", e))
    }

    fn copy_to_device_async<T: Element>(
        device: &CudaDevice,
        stream: &CudaStream,
        src: &[T],
        dst: &mut PooledSlice,
    ) -> Result<()> {
        check_upload(src, dst)?;
        if src.is_empty() {
            return Ok(());
        }
        // Issued from the pipeline's transfer thread, which has no current
        // context yet.
        device.bind("host-to-device copy")?;
        unsafe { result::memcpy_htod_async(dst.device_ptr(), src, stream.raw()) }
            .map_err(|e| Error::device("host-to-device copy", e))
    }

    fn zero_managed<E: Scalar>(_device: &CudaDevice, buf: &mut ManagedBuffer<E>) -> Result<()> {
        buf.zero()
    }

    fn propagate<T: Element>(
        device: &CudaDevice,
        stream: &CudaStream,
        args: PropagateArgs<'_, Self, T>,
    ) -> Result<()> {
        let PropagateArgs {
            geometry,
            weights,
            y_in,
            rows_in,
            active,
            bias,
            ymax,
            y_out,
            rlen_out,
        } = args;
        // A zero-sized grid is not a valid launch.
        if active == 0 {
            return Ok(());
        }
        if active > rows_in.len() {
            return Err(Error::GeometryMismatch {
                what: "active rows",
                expected: rows_in.len(),
                got: active,
            });
        }

        let col_blk = geometry.col_blk();
        let cfg = LaunchConfig {
            block_dim: (PROPAGATE_BLOCK.0, PROPAGATE_BLOCK.1, 1),
            grid_dim: (to_u32("active rows", active)?, 1, 1),
            shared_mem_bytes: to_u32("shared memory", col_blk * std::mem::size_of::<T>())?,
        };
        let params = (
            y_in.device_ptr(),
            rows_in.device_ptr(),
            weights.device_ptr(),
            to_u32("col_blk", col_blk)?,
            to_u32("n_slab", geometry.n_slab())?,
            to_u32("neurons", geometry.neurons())?,
            to_u32("value offset", geometry.value_offset_elems())?,
            bias.to_f64(),
            ymax.to_f64(),
            y_out.device_ptr(),
            rlen_out.device_ptr(),
        );

        device.bind("propagate launch")?;
        let func = device.get_func(&format!("propagate_{}", T::DTYPE))?;
        unsafe { func.launch_on_stream(&stream.inner, cfg, params) }
            .map_err(|e| Error::device("propagate launch", e))
    }

    fn identify<T: Element>(
        device: &CudaDevice,
        stream: &CudaStream,
        y: &ManagedBuffer<T>,
        neurons: usize,
        results: &mut ManagedBuffer<i32>,
    ) -> Result<()> {
        let num_rows = results.len();
        if num_rows == 0 {
            return Ok(());
        }
        if y.len() < num_rows * neurons {
            return Err(Error::GeometryMismatch {
                what: "activation buffer length",
                expected: num_rows * neurons,
                got: y.len(),
            });
        }
        let params = (
            y.device_ptr(),
            to_u32("neurons", neurons)?,
            to_u32("rows", num_rows)?,
            results.device_ptr(),
        );

        device.bind("identify launch")?;
        let func = device.get_func(&format!("identify_{}", T::DTYPE))?;
        unsafe { func.launch_on_stream(&stream.inner, launch_cfg(num_rows), params) }
            .map_err(|e| Error::device("identify launch", e))
    }

    fn synchronize(device: &CudaDevice, stream: &CudaStream) -> Result<()> {
        device.bind("stream synchronize")?;
        unsafe { result::stream::synchronize(stream.raw()) }
            .map_err(|e| Error::device("stream synchronize", e))
    }
}
