// Tests for the sparrow engine: end-to-end inference on the CPU backend

use std::path::{Path, PathBuf};

use proptest::prelude::*;
use sparrow::data::{encode_inputs, encode_weights, SyntheticConfig};
use sparrow::prelude::*;
use sparrow::{argmax_class, BackendDevice, Element, ErrorKind};

type Layer<T> = Vec<(u32, u32, T)>;

struct Fixture {
    _dir: tempfile::TempDir,
    weights: PathBuf,
    inputs: PathBuf,
}

fn fixture<T: Element>(
    neurons: u32,
    net: &[Layer<T>],
    num_inputs: u32,
    inputs: &[(u32, u32, T)],
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("net.spwt");
    let input_path = dir.path().join("batch.spin");
    std::fs::write(&weights, encode_weights(neurons, net)).unwrap();
    std::fs::write(&input_path, encode_inputs(num_inputs, neurons, inputs)).unwrap();
    Fixture {
        _dir: dir,
        weights,
        inputs: input_path,
    }
}

fn engine<T: Element>(
    device: CpuDevice,
    weights: &Path,
    neurons: usize,
    layers: usize,
    bias: f64,
) -> Engine<CpuBackend, T> {
    let config = EngineConfig::default()
        .with_neurons(neurons)
        .with_layers(layers)
        .with_bias(bias);
    Engine::new(device, weights, config).unwrap()
}

fn diagonal<T: Element>(neurons: u32) -> Layer<T> {
    (0..neurons).map(|i| (i, i, T::one())).collect()
}

/// Dense evaluation of the same network; dead rows stay dead.
fn dense_reference(
    net: &[Layer<f64>],
    inputs: &[(u32, u32, f64)],
    num_inputs: usize,
    n: usize,
    bias: f64,
    ymax: f64,
) -> Vec<f64> {
    let mut y = vec![0.0; num_inputs * n];
    for &(r, c, v) in inputs {
        y[r as usize * n + c as usize] = v;
    }
    for layer in net {
        let mut out = vec![0.0; num_inputs * n];
        for i in 0..num_inputs {
            let row = &y[i * n..(i + 1) * n];
            if row.iter().all(|&v| v == 0.0) {
                continue;
            }
            let mut acc = vec![0.0; n];
            for &(r, c, w) in layer {
                acc[c as usize] += row[r as usize] * w;
            }
            for (j, a) in acc.iter().enumerate() {
                out[i * n + j] = (a + bias).max(0.0).min(ymax);
            }
        }
        y = out;
    }
    y
}

// End-to-end scenarios

#[test]
fn test_identity_network_keeps_activation() {
    let net = vec![diagonal::<f32>(4), diagonal::<f32>(4)];
    let fx = fixture(4, &net, 1, &[(0, 2, 5.0f32)]);
    let engine = engine::<f32>(CpuDevice::new(), &fx.weights, 4, 2, 0.0);

    let out = engine.infer_detailed(&fx.inputs, 1).unwrap();
    assert_eq!(out.classes, vec![2]);
    assert_eq!(out.activations, vec![0.0, 0.0, 5.0, 0.0]);
    assert_eq!(out.active_rows_per_layer, vec![1, 1, 1]);
    assert_eq!(engine.infer(&fx.inputs, 1).unwrap(), vec![2]);
}

#[test]
fn test_identity_network_f64() {
    let net = vec![diagonal::<f64>(4), diagonal::<f64>(4)];
    let fx = fixture(4, &net, 1, &[(0, 2, 5.0f64)]);
    let engine = engine::<f64>(CpuDevice::new(), &fx.weights, 4, 2, 0.0);
    let out = engine.infer_detailed(&fx.inputs, 1).unwrap();
    assert_eq!(out.classes, vec![2]);
    assert_eq!(out.activations[2], 5.0);
}

#[test]
fn test_odd_layer_count_reads_last_written_slot() {
    // 2 -> 0 -> 3 -> 1, each layer a single different edge
    let net: Vec<Layer<f32>> = vec![vec![(2, 0, 1.0)], vec![(0, 3, 1.0)], vec![(3, 1, 1.0)]];
    let fx = fixture(4, &net, 1, &[(0, 2, 5.0f32)]);
    let engine = engine::<f32>(CpuDevice::new(), &fx.weights, 4, 3, 0.0);
    let out = engine.infer_detailed(&fx.inputs, 1).unwrap();
    assert_eq!(out.classes, vec![1]);
    assert_eq!(out.activations, vec![0.0, 5.0, 0.0, 0.0]);
}

#[test]
fn test_all_zero_network_reports_no_match() {
    let net: Vec<Layer<f32>> = vec![vec![], vec![], vec![]];
    let inputs = [(0u32, 1u32, 1.0f32), (2, 3, 2.0)];
    let fx = fixture(4, &net, 3, &inputs);
    let engine = engine::<f32>(CpuDevice::new(), &fx.weights, 4, 3, -0.3);
    assert_eq!(engine.geometry().max_nnz(), 0);

    let out = engine.infer_detailed(&fx.inputs, 3).unwrap();
    assert_eq!(out.classes, vec![NO_MATCH; 3]);
    assert_eq!(out.active_rows_per_layer, vec![2, 0, 0, 0]);
    assert!(out.activations.iter().all(|&v| v == 0.0));
}

#[test]
fn test_dead_rows_stay_dead() {
    // row 1 is killed by the bias in layer 0; row 2 never had an input
    let net: Vec<Layer<f32>> = vec![diagonal(4), diagonal(4)];
    let inputs = [(0u32, 3u32, 4.0f32), (1, 0, 0.2)];
    let fx = fixture(4, &net, 3, &inputs);
    let engine = engine::<f32>(CpuDevice::new(), &fx.weights, 4, 2, -0.3);

    let out = engine.infer_detailed(&fx.inputs, 3).unwrap();
    assert_eq!(out.active_rows_per_layer, vec![2, 1, 1]);
    assert_eq!(out.classes, vec![3, NO_MATCH, NO_MATCH]);
    assert!(out.activations[4..].iter().all(|&v| v == 0.0));
    assert!((out.activations[3] - 3.4).abs() < 1e-5);
}

#[test]
fn test_positive_bias_does_not_revive_dead_rows() {
    let net = vec![diagonal::<f32>(4), diagonal::<f32>(4)];
    let fx = fixture(4, &net, 2, &[(0, 1, 1.0f32)]);
    let engine = engine::<f32>(CpuDevice::new(), &fx.weights, 4, 2, 0.5);

    let out = engine.infer_detailed(&fx.inputs, 2).unwrap();
    assert_eq!(out.active_rows_per_layer, vec![1, 1, 1]);
    assert_eq!(out.classes, vec![1, NO_MATCH]);
    assert_eq!(&out.activations[..4], &[1.0, 2.0, 1.0, 1.0]);
    assert_eq!(&out.activations[4..], &[0.0; 4]);
}

#[test]
fn test_activation_is_clamped() {
    let net: Vec<Layer<f32>> = vec![vec![(0, 0, 100.0), (0, 1, 1.0)]];
    let fx = fixture(2, &net, 1, &[(0, 0, 1.0f32)]);
    let config = EngineConfig::default()
        .with_neurons(2)
        .with_layers(1)
        .with_bias(0.0)
        .with_clamp_max(32.0);
    let engine = Engine::<CpuBackend, f32>::new(CpuDevice::new(), &fx.weights, config).unwrap();
    let out = engine.infer_detailed(&fx.inputs, 1).unwrap();
    assert_eq!(out.activations, vec![32.0, 1.0]);
    assert_eq!(out.classes, vec![0]);
}

#[test]
fn test_inference_is_idempotent() {
    let cfg = SyntheticConfig::new(32, 5)
        .fan_in(6)
        .weight_range(-0.2, 0.6)
        .num_inputs(20)
        .input_density(0.3)
        .seed(11);
    let net = cfg.network::<f32>();
    let fx = fixture(32, &net, 20, &cfg.inputs::<f32>());
    let engine = engine::<f32>(CpuDevice::new(), &fx.weights, 32, 5, -0.3);

    let a = engine.infer_detailed(&fx.inputs, 20).unwrap();
    let b = engine.infer_detailed(&fx.inputs, 20).unwrap();
    assert_eq!(a.classes, b.classes);
    assert_eq!(a.activations, b.activations);
    assert_eq!(a.active_rows_per_layer, b.active_rows_per_layer);
}

#[test]
fn test_matches_dense_reference_across_slabs() {
    let (n, layers, inputs) = (16usize, 6usize, 24usize);
    let cfg = SyntheticConfig::new(n, layers)
        .fan_in(4)
        .weight_range(-0.3, 0.5)
        .num_inputs(inputs)
        .input_density(0.5)
        .seed(5);
    let net = cfg.network::<f64>();
    let batch = cfg.inputs::<f64>();
    let fx = fixture(n as u32, &net, inputs as u32, &batch);

    // 32 bytes hold four f64 values: four slabs of four columns
    let device = CpuDevice::new().with_shared_mem_per_block(32);
    let engine = engine::<f64>(device, &fx.weights, n, layers, -0.3);
    assert_eq!(engine.geometry().n_slab(), 4);

    let out = engine.infer_detailed(&fx.inputs, inputs).unwrap();
    let expected = dense_reference(&net, &batch, inputs, n, -0.3, 32.0);
    for (got, want) in out.activations.iter().zip(&expected) {
        assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
    }
    let expected_classes: Vec<i32> = expected.chunks(n).map(argmax_class).collect();
    assert_eq!(out.classes, expected_classes);
}

#[test]
fn test_single_and_multi_slab_agree() {
    let cfg = SyntheticConfig::new(12, 4)
        .fan_in(5)
        .weight_range(-0.2, 0.7)
        .num_inputs(10)
        .input_density(0.4)
        .seed(9);
    let fx = fixture(12, &cfg.network::<f32>(), 10, &cfg.inputs::<f32>());

    let wide = engine::<f32>(CpuDevice::new(), &fx.weights, 12, 4, -0.3);
    // 12 bytes hold three f32 values: four slabs of three columns
    let narrow = engine::<f32>(
        CpuDevice::new().with_shared_mem_per_block(12),
        &fx.weights,
        12,
        4,
        -0.3,
    );
    assert_eq!(wide.geometry().n_slab(), 1);
    assert_eq!(narrow.geometry().n_slab(), 4);

    let a = wide.infer_detailed(&fx.inputs, 10).unwrap();
    let b = narrow.infer_detailed(&fx.inputs, 10).unwrap();
    assert_eq!(a.active_rows_per_layer, b.active_rows_per_layer);
    for (x, y) in a.activations.iter().zip(&b.activations) {
        assert!((x - y).abs() < 1e-4);
    }
}

#[test]
fn test_profile_and_introspection() {
    let net = vec![diagonal::<f32>(4); 3];
    let fx = fixture(4, &net, 2, &[(1, 0, 1.0f32)]);
    let engine = engine::<f32>(CpuDevice::new(), &fx.weights, 4, 3, 0.0);
    assert_eq!(engine.num_neurons_per_layer(), 4);
    assert_eq!(engine.num_layers(), 3);
    assert_eq!(engine.device().name(), "cpu");
    assert!(engine.load_profile().entries.iter().any(|e| e.name == "load"));

    let out = engine.infer_detailed(&fx.inputs, 2).unwrap();
    let layer = out.profile.entries.iter().find(|e| e.name == "layer").unwrap();
    assert_eq!(layer.count, 3);
    for stage in ["preprocess", "identify"] {
        assert!(out.profile.entries.iter().any(|e| e.name == stage));
    }
}

// Error handling

#[test]
fn test_configuration_errors() {
    let net = vec![diagonal::<f32>(4)];
    let fx = fixture(4, &net, 1, &[(0, 0, 1.0f32)]);

    let bad_layers = EngineConfig::default().with_neurons(4).with_layers(0);
    let err = Engine::<CpuBackend, f32>::new(CpuDevice::new(), &fx.weights, bad_layers)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let wrong_neurons = EngineConfig::default().with_neurons(8).with_layers(1);
    let err = Engine::<CpuBackend, f32>::new(CpuDevice::new(), &fx.weights, wrong_neurons)
        .err()
        .unwrap();
    assert!(matches!(err, Error::GeometryMismatch { .. }));

    // a budget below one element cannot hold any column block
    let tiny = CpuDevice::new().with_shared_mem_per_block(2);
    let config = EngineConfig::default().with_neurons(4).with_layers(1);
    let err = Engine::<CpuBackend, f32>::new(tiny, &fx.weights, config)
        .err()
        .unwrap();
    assert!(matches!(err, Error::NoColumnBlock { .. }));
}

#[test]
fn test_input_errors() {
    let net = vec![diagonal::<f32>(4)];
    let fx = fixture(4, &net, 2, &[(0, 0, 1.0f32)]);
    let engine = engine::<f32>(CpuDevice::new(), &fx.weights, 4, 1, 0.0);

    let err = engine.infer(&fx.inputs, 3).unwrap_err();
    assert!(matches!(err, Error::GeometryMismatch { .. }));
    assert!(engine.infer(&fx.inputs, 0).is_err());

    // right row count, wrong width
    let wide = fx._dir.path().join("wide.spin");
    std::fs::write(&wide, encode_inputs::<f32>(2, 8, &[(0, 7, 1.0)])).unwrap();
    let err = engine.infer(&wide, 2).unwrap_err();
    assert!(matches!(
        err,
        Error::GeometryMismatch { what: "input file neurons", expected: 4, got: 8 }
    ));

    let err = engine.infer(fx.weights.with_extension("missing"), 2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);

    let missing = EngineConfig::default().with_neurons(4).with_layers(1);
    let err = Engine::<CpuBackend, f32>::new(CpuDevice::new(), "/nonexistent/net.spwt", missing)
        .err()
        .unwrap();
    assert!(matches!(err, Error::Io { .. }));
}

// Invariants

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_active_rows_never_increase(seed in 0u64..1000, fan_in in 1usize..6) {
        let cfg = SyntheticConfig::new(8, 4)
            .fan_in(fan_in)
            .weight_range(-0.5, 0.5)
            .num_inputs(12)
            .input_density(0.3)
            .seed(seed);
        let fx = fixture(8, &cfg.network::<f32>(), 12, &cfg.inputs::<f32>());
        let engine = engine::<f32>(CpuDevice::new(), &fx.weights, 8, 4, -0.3);
        let out = engine.infer_detailed(&fx.inputs, 12).unwrap();

        prop_assert!(out.active_rows_per_layer.windows(2).all(|w| w[1] <= w[0]));
        let live = out.classes.iter().filter(|&&c| c != NO_MATCH).count();
        prop_assert_eq!(live, *out.active_rows_per_layer.last().unwrap());
    }
}
