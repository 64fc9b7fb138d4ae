// CPU Backend: runs the layer pipeline on host threads
//
// Every memory class is ordinary host memory:
//
//   - Pinned and managed buffers are plain `Vec`s
//   - Device buffers are `Vec<u64>` words so any element view over their
//     bytes is aligned
//   - Kernels are rayon bulk-parallel passes that complete before returning,
//     so a CPU stream has nothing left to wait for at synchronize time
//
// The engine still drives the transfer stream from its own host thread, so
// the upload of layer l+1 overlaps with layer l's propagation here as well.
//
// USAGE:
//   let device = CpuDevice::new().with_shared_mem_per_block(48 * 1024);
//   let engine = Engine::<CpuBackend, f32>::new(device, "weights.spwt", config)?;

mod kernels;

use std::ops::{Deref, DerefMut};

use sparrow_core::{
    Backend, BackendDevice, Element, Error, PackedRecord, PropagateArgs, Result, Scalar,
};

/// Fast memory per block assumed when none is configured (bytes).
pub const DEFAULT_SHARED_MEM_PER_BLOCK: usize = 48 * 1024;

/// The CPU device. Its only property is the fast-memory budget used to size
/// column slabs, which defaults to a typical GPU's 48 KiB so that both
/// backends pack records identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDevice {
    shared_mem_per_block: usize,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self {
            shared_mem_per_block: DEFAULT_SHARED_MEM_PER_BLOCK,
        }
    }

    /// Override the fast-memory budget (bytes) used for slab sizing.
    pub fn with_shared_mem_per_block(mut self, bytes: usize) -> Self {
        self.shared_mem_per_block = bytes;
        self
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendDevice for CpuDevice {
    fn name(&self) -> String {
        "cpu".to_string()
    }

    fn shared_mem_per_block(&self) -> usize {
        self.shared_mem_per_block
    }
}

/// Host memory standing in for pinned and managed buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuBuffer<E> {
    data: Vec<E>,
}

/// `len` zeroed values, or a resource error when the host is out of memory.
fn zeroed_vec<E: Scalar>(len: usize) -> Result<Vec<E>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| Error::device("host allocation", e))?;
    data.resize(len, E::zeroed());
    Ok(data)
}

impl<E: Scalar> CpuBuffer<E> {
    fn zeroed(len: usize) -> Result<Self> {
        Ok(Self {
            data: zeroed_vec(len)?,
        })
    }
}

impl<E> Deref for CpuBuffer<E> {
    type Target = [E];

    fn deref(&self) -> &[E] {
        &self.data
    }
}

impl<E> DerefMut for CpuBuffer<E> {
    fn deref_mut(&mut self) -> &mut [E] {
        &mut self.data
    }
}

/// Raw "device" bytes backed by 8-byte words.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuDeviceBuffer {
    words: Vec<u64>,
    len: usize,
}

impl CpuDeviceBuffer {
    fn zeroed(len: usize) -> Result<Self> {
        Ok(Self {
            words: zeroed_vec(len.div_ceil(8))?,
            len,
        })
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }

    /// The first `len` elements of type `T`.
    fn elems<T: Element>(&self, len: usize) -> Result<&[T]> {
        let bytes = len * std::mem::size_of::<T>();
        if bytes > self.len {
            return Err(Error::GeometryMismatch {
                what: "device buffer bytes",
                expected: bytes,
                got: self.len,
            });
        }
        bytemuck::try_cast_slice(&self.bytes()[..bytes])
            .map_err(|e| Error::device("device buffer view", e))
    }
}

/// A CPU stream. Work issued on it has completed by the time the issuing
/// call returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuStream;

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

fn copy_bytes<T: Element>(src: &[T], dst: &mut CpuDeviceBuffer) -> Result<()> {
    let bytes: &[u8] = bytemuck::cast_slice(src);
    if bytes.len() > dst.len() {
        return Err(Error::device(
            "host-to-device copy",
            format!("{} bytes into a {}-byte buffer", bytes.len(), dst.len()),
        ));
    }
    dst.bytes_mut()[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

impl Backend for CpuBackend {
    type Device = CpuDevice;
    type Pinned<T: Element> = CpuBuffer<T>;
    type Managed<E: Scalar> = CpuBuffer<E>;
    type DeviceBuffer = CpuDeviceBuffer;
    type Stream = CpuStream;

    fn alloc_pinned<T: Element>(_device: &CpuDevice, len: usize) -> Result<CpuBuffer<T>> {
        CpuBuffer::zeroed(len)
    }

    fn alloc_managed<E: Scalar>(_device: &CpuDevice, len: usize) -> Result<CpuBuffer<E>> {
        CpuBuffer::zeroed(len)
    }

    fn alloc_device(_device: &CpuDevice, bytes: usize) -> Result<CpuDeviceBuffer> {
        CpuDeviceBuffer::zeroed(bytes)
    }

    fn create_stream(_device: &CpuDevice) -> Result<CpuStream> {
        Ok(CpuStream)
    }

    fn copy_to_device<T: Element>(
        _device: &CpuDevice,
        src: &[T],
        dst: &mut CpuDeviceBuffer,
    ) -> Result<()> {
        copy_bytes(src, dst)
    }

    fn copy_to_device_async<T: Element>(
        _device: &CpuDevice,
        _stream: &CpuStream,
        src: &[T],
        dst: &mut CpuDeviceBuffer,
    ) -> Result<()> {
        copy_bytes(src, dst)
    }

    fn zero_managed<E: Scalar>(_device: &CpuDevice, buf: &mut CpuBuffer<E>) -> Result<()> {
        buf.fill(E::zeroed());
        Ok(())
    }

    fn propagate<T: Element>(
        _device: &CpuDevice,
        _stream: &CpuStream,
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
        let elems = weights.elems::<T>(geometry.record_elems())?;
        let record = PackedRecord::new(geometry, elems)?;
        kernels::propagate(
            geometry,
            &record,
            y_in,
            &rows_in[..active],
            bias,
            ymax,
            y_out,
            rlen_out,
        )
    }

    fn identify<T: Element>(
        _device: &CpuDevice,
        _stream: &CpuStream,
        y: &CpuBuffer<T>,
        neurons: usize,
        results: &mut CpuBuffer<i32>,
    ) -> Result<()> {
        kernels::identify(y, neurons, results);
        Ok(())
    }

    fn synchronize(_device: &CpuDevice, _stream: &CpuStream) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparrow_core::{ErrorKind, LayerGeometry, PackedRecordMut};

    #[test]
    fn test_allocations_are_zeroed() {
        let dev = CpuDevice::new();
        let p = CpuBackend::alloc_pinned::<f64>(&dev, 5).unwrap();
        assert_eq!(&p[..], &[0.0; 5]);
        let m = CpuBackend::alloc_managed::<u32>(&dev, 3).unwrap();
        assert_eq!(&m[..], &[0; 3]);
        let d = CpuBackend::alloc_device(&dev, 13).unwrap();
        assert_eq!(d.len(), 13);
        assert!(d.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocation_failure_is_a_resource_error() {
        let dev = CpuDevice::new();
        let err = CpuBackend::alloc_managed::<f64>(&dev, usize::MAX / 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        let err = CpuBackend::alloc_pinned::<f32>(&dev, usize::MAX / 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        let err = CpuBackend::alloc_device(&dev, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_copy_to_device_checks_capacity() {
        let dev = CpuDevice::new();
        let mut d = CpuBackend::alloc_device(&dev, 8).unwrap();
        CpuBackend::copy_to_device(&dev, &[1.5f32, 2.5], &mut d).unwrap();
        assert_eq!(d.elems::<f32>(2).unwrap(), &[1.5, 2.5]);
        assert!(CpuBackend::copy_to_device(&dev, &[1.0f64, 2.0], &mut d).is_err());
    }

    #[test]
    fn test_propagate_through_backend() {
        let dev = CpuDevice::new();
        let g = LayerGeometry::for_element::<f64>(4, 4, dev.shared_mem_per_block()).unwrap();
        let mut host = vec![0f64; g.record_elems()];
        let diag: Vec<(u32, u32, f64)> = (0..4).map(|i| (i, i, 1.0)).collect();
        PackedRecordMut::new(&g, &mut host).unwrap().pack(&diag).unwrap();

        let mut weights = CpuBackend::alloc_device(&dev, g.record_bytes()).unwrap();
        CpuBackend::copy_to_device(&dev, &host, &mut weights).unwrap();

        let mut y_in = CpuBackend::alloc_managed::<f64>(&dev, 4).unwrap();
        y_in[2] = 5.0;
        let mut rows_in = CpuBackend::alloc_managed::<u32>(&dev, 1).unwrap();
        rows_in[0] = 0;
        let mut y_out = CpuBackend::alloc_managed::<f64>(&dev, 4).unwrap();
        let mut rlen_out = CpuBackend::alloc_managed::<u32>(&dev, 1).unwrap();

        let stream = CpuBackend::create_stream(&dev).unwrap();
        CpuBackend::propagate(
            &dev,
            &stream,
            PropagateArgs {
                geometry: &g,
                weights: &weights,
                y_in: &y_in,
                rows_in: &rows_in,
                active: 1,
                bias: 0.0,
                ymax: 32.0,
                y_out: &mut y_out,
                rlen_out: &mut rlen_out,
            },
        )
        .unwrap();
        CpuBackend::synchronize(&dev, &stream).unwrap();
        assert_eq!(&y_out[..], &[0.0, 0.0, 5.0, 0.0]);
        assert_eq!(rlen_out[0], 1);

        let mut results = CpuBackend::alloc_managed::<i32>(&dev, 1).unwrap();
        CpuBackend::identify(&dev, &stream, &y_out, 4, &mut results).unwrap();
        assert_eq!(results[0], 2);
    }
}
