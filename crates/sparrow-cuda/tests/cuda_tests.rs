// CUDA Backend Tests: GPU kernels checked against the CPU backend
//
// Run with: `cargo test -p sparrow-cuda --features cuda-tests`
//
// All tests create CudaDevice(0).

#![cfg(feature = "cuda-tests")]

use sparrow_core::{
    Backend, BackendDevice, LayerGeometry, PackedRecordMut, PropagateArgs, NO_MATCH,
};
use sparrow_cpu::{CpuBackend, CpuDevice};
use sparrow_cuda::{CudaBackend, CudaDevice};

fn gpu() -> CudaDevice {
    CudaDevice::new(0).expect("CUDA device 0 not available")
}

fn packed(g: &LayerGeometry, entries: &[(u32, u32, f32)]) -> Vec<f32> {
    let mut buf = vec![0f32; g.record_elems()];
    PackedRecordMut::new(g, &mut buf)
        .unwrap()
        .pack(entries)
        .unwrap();
    buf
}

/// One propagate step on `B`, returning (y_out, rlen_out).
fn step<B: Backend>(
    dev: &B::Device,
    g: &LayerGeometry,
    record: &[f32],
    y: &[f32],
    rows: &[u32],
    bias: f32,
) -> (Vec<f32>, Vec<u32>) {
    let n = g.neurons();
    let num_inputs = y.len() / n;
    let stream = B::create_stream(dev).unwrap();
    let mut w = B::alloc_device(dev, g.record_bytes()).unwrap();
    B::copy_to_device(dev, record, &mut w).unwrap();

    let mut y_in = B::alloc_managed::<f32>(dev, y.len()).unwrap();
    y_in.copy_from_slice(y);
    let mut rows_in = B::alloc_managed::<u32>(dev, num_inputs).unwrap();
    rows_in[..rows.len()].copy_from_slice(rows);
    let mut y_out = B::alloc_managed::<f32>(dev, y.len()).unwrap();
    let mut rlen_out = B::alloc_managed::<u32>(dev, num_inputs).unwrap();

    B::propagate(
        dev,
        &stream,
        PropagateArgs {
            geometry: g,
            weights: &w,
            y_in: &y_in,
            rows_in: &rows_in,
            active: rows.len(),
            bias,
            ymax: 32.0,
            y_out: &mut y_out,
            rlen_out: &mut rlen_out,
        },
    )
    .unwrap();
    B::synchronize(dev, &stream).unwrap();
    (y_out.to_vec(), rlen_out.to_vec())
}

#[test]
fn test_device_properties() {
    let dev = gpu();
    assert_eq!(dev.name(), "cuda:0");
    assert!(dev.shared_mem_per_block() >= 16 * 1024);
}

#[test]
fn test_allocations_are_zeroed() {
    let dev = gpu();
    let pinned = CudaBackend::alloc_pinned::<f64>(&dev, 17).unwrap();
    assert!(pinned.iter().all(|&v| v == 0.0));
    let managed = CudaBackend::alloc_managed::<u32>(&dev, 33).unwrap();
    assert!(managed.iter().all(|&v| v == 0));
    let empty = CudaBackend::alloc_managed::<f32>(&dev, 0).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_zero_managed() {
    let dev = gpu();
    let mut buf = CudaBackend::alloc_managed::<f32>(&dev, 8).unwrap();
    buf.fill(3.5);
    CudaBackend::zero_managed(&dev, &mut buf).unwrap();
    assert_eq!(&buf[..], &[0.0; 8]);
}

#[test]
fn test_upload_larger_than_slot_fails() {
    let dev = gpu();
    let mut w = CudaBackend::alloc_device(&dev, 8).unwrap();
    assert!(CudaBackend::copy_to_device(&dev, &[1.0f32; 3], &mut w).is_err());
    CudaBackend::copy_to_device(&dev, &[1.0f32; 2], &mut w).unwrap();
}

#[test]
fn test_propagate_matches_cpu_across_slabs() {
    // 8 neurons in four slabs of two columns
    let g = LayerGeometry::new(8, 16, 4, 2).unwrap();
    let mut entries = Vec::new();
    for r in 0..8u32 {
        entries.push((r, (r + 1) % 8, 0.5));
        entries.push((r, (r + 3) % 8, 1.5));
    }
    let record = packed(&g, &entries);
    let y: Vec<f32> = (0..24).map(|i| if i % 3 == 0 { 1.0 } else { 0.0 }).collect();
    let rows = [0u32, 2];

    let (gpu_y, gpu_len) = step::<CudaBackend>(&gpu(), &g, &record, &y, &rows, -0.25);
    let (cpu_y, cpu_len) = step::<CpuBackend>(&CpuDevice::new(), &g, &record, &y, &rows, -0.25);

    assert_eq!(gpu_len, cpu_len);
    for (i, (a, b)) in gpu_y.iter().zip(&cpu_y).enumerate() {
        assert!((a - b).abs() < 1e-5, "index {i}: {a} != {b}");
    }
    // row 1 was not active and stays untouched
    assert_eq!(&gpu_y[8..16], &[0.0; 8]);
}

#[test]
fn test_propagate_with_no_active_rows() {
    let g = LayerGeometry::new(4, 4, 4, 1024).unwrap();
    let record = packed(&g, &[(0, 0, 1.0)]);
    let (y, len) = step::<CudaBackend>(&gpu(), &g, &record, &[1.0, 0.0, 0.0, 0.0], &[], 0.0);
    assert_eq!(y, vec![0.0; 4]);
    assert_eq!(len, vec![0]);
}

#[test]
fn test_identify() {
    let dev = gpu();
    let stream = CudaBackend::create_stream(&dev).unwrap();
    let mut y = CudaBackend::alloc_managed::<f64>(&dev, 9).unwrap();
    y.copy_from_slice(&[0.0, 2.0, 2.0, 0.0, 0.0, 0.0, 1.0, 0.5, 3.0]);
    let mut results = CudaBackend::alloc_managed::<i32>(&dev, 3).unwrap();
    CudaBackend::identify(&dev, &stream, &y, 3, &mut results).unwrap();
    CudaBackend::synchronize(&dev, &stream).unwrap();
    assert_eq!(&results[..], &[1, NO_MATCH, 2]);
}

#[test]
fn test_weight_slots_are_pooled() {
    let dev = gpu();
    let before = dev.pool_stats();
    let slot = CudaBackend::alloc_device(&dev, 4096).unwrap();
    drop(slot);
    let mut again = CudaBackend::alloc_device(&dev, 4096).unwrap();
    let after = dev.pool_stats();
    assert_eq!(after.hits, before.hits + 1);
    // a reused slot comes back zeroed and usable
    CudaBackend::copy_to_device(&dev, &[7.0f32; 4], &mut again).unwrap();
    drop(again);
    dev.empty_cache();
    assert_eq!(dev.pool_stats().cached_buffers, 0);
}
