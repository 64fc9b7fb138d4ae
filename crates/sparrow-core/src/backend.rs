use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::dtype::{Element, Scalar};
use crate::error::Result;
use crate::geometry::LayerGeometry;

// Backend: Abstraction over the accelerator running the layer pipeline
//
// A backend provides three memory-residency classes and two primitive
// kernels:
//
//   Pinned   - page-locked host memory; the weight store lives here so that
//              asynchronous uploads can be issued from it.
//   Device   - accelerator-only memory; holds one packed weight record.
//   Managed  - memory visible from host and device; activations, active-row
//              lists and row lengths live here so the host can compact rows
//              from kernel output without an explicit copy.
//
//   propagate - one sparse layer step over the active rows.
//   identify  - per-row class selection over the final activations.
//
// Work is issued on streams. An operation issued on a stream may still be in
// flight when the call returns; `synchronize` blocks until every operation
// issued on that stream has finished. Host access to managed memory is only
// valid once the streams writing it have been synchronized.
//
// Every allocation is zero-initialized and is released when its handle is
// dropped, so error paths free device resources too.

/// Identifies a compute device (e.g., "cpu", "cuda:0").
pub trait BackendDevice: Clone + fmt::Debug + Send + Sync + 'static {
    /// A human-readable name for this device.
    fn name(&self) -> String;

    /// Fast on-chip memory available to one compute block, in bytes.
    fn shared_mem_per_block(&self) -> usize;
}

/// Memory the host can read and write as a slice.
pub trait HostBuffer<E>: Deref<Target = [E]> + DerefMut + Send + Sync {}

impl<E, B> HostBuffer<E> for B where B: Deref<Target = [E]> + DerefMut + Send + Sync {}

/// Arguments of one sparse propagation step.
///
/// Reads the `active` rows listed at the front of `rows_in` from `y_in`,
/// multiplies them by the packed record in `weights`, applies bias and the
/// clamped ReLU, and writes the full output row into `y_out` together with
/// its nonzero count in `rlen_out`. Rows not listed are left untouched, so
/// `y_out` and `rlen_out` must be zero on entry.
pub struct PropagateArgs<'a, B: Backend, T: Element> {
    pub geometry: &'a LayerGeometry,
    pub weights: &'a B::DeviceBuffer,
    pub y_in: &'a B::Managed<T>,
    pub rows_in: &'a B::Managed<u32>,
    pub active: usize,
    pub bias: T,
    pub ymax: T,
    pub y_out: &'a mut B::Managed<T>,
    pub rlen_out: &'a mut B::Managed<u32>,
}

/// The backend trait: memory classes, streams and kernels of one accelerator.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// The device type for this backend.
    type Device: BackendDevice;
    /// Page-locked host memory.
    type Pinned<T: Element>: HostBuffer<T>;
    /// Host- and device-visible memory.
    type Managed<E: Scalar>: HostBuffer<E>;
    /// Device-only memory holding one packed record, stored as raw bytes.
    type DeviceBuffer: Send + Sync;
    /// An in-order queue of device work.
    type Stream: Send + Sync;

    /// Allocate `len` zeroed elements of pinned host memory.
    fn alloc_pinned<T: Element>(device: &Self::Device, len: usize) -> Result<Self::Pinned<T>>;

    /// Allocate `len` zeroed elements of managed memory.
    fn alloc_managed<E: Scalar>(device: &Self::Device, len: usize) -> Result<Self::Managed<E>>;

    /// Allocate `bytes` zeroed bytes of device memory.
    fn alloc_device(device: &Self::Device, bytes: usize) -> Result<Self::DeviceBuffer>;

    fn create_stream(device: &Self::Device) -> Result<Self::Stream>;

    /// Copy `src` to the front of `dst` and wait for completion.
    fn copy_to_device<T: Element>(
        device: &Self::Device,
        src: &[T],
        dst: &mut Self::DeviceBuffer,
    ) -> Result<()>;

    /// Issue a copy of `src` to the front of `dst` on `stream`.
    ///
    /// `src` and `dst` must stay untouched until `stream` is synchronized.
    fn copy_to_device_async<T: Element>(
        device: &Self::Device,
        stream: &Self::Stream,
        src: &[T],
        dst: &mut Self::DeviceBuffer,
    ) -> Result<()>;

    /// Zero-fill a managed buffer. Returns once the memory is zero.
    fn zero_managed<E: Scalar>(device: &Self::Device, buf: &mut Self::Managed<E>) -> Result<()>;

    /// Issue one sparse layer step on `stream`.
    fn propagate<T: Element>(
        device: &Self::Device,
        stream: &Self::Stream,
        args: PropagateArgs<'_, Self, T>,
    ) -> Result<()>;

    /// Issue class selection for every row of `y` (rows of `neurons` values) on `stream`.
    fn identify<T: Element>(
        device: &Self::Device,
        stream: &Self::Stream,
        y: &Self::Managed<T>,
        neurons: usize,
        results: &mut Self::Managed<i32>,
    ) -> Result<()>;

    /// Block until all work issued on `stream` has completed.
    fn synchronize(device: &Self::Device, stream: &Self::Stream) -> Result<()>;
}
