// Tests for sparrow-data: on-disk weight/input files, TSV conversion, golden files

use std::fs;

use sparrow_core::{DType, LayerGeometry, PackedRecord};
use sparrow_data::golden::{categories_file_name, encode_categories};
use sparrow_data::tsv::{convert_inputs, convert_weights, input_file_name, layer_file_name};
use sparrow_data::{
    encode_inputs, encode_weights, find_max_nnz, matches_categories, read_categories,
    read_input_header, read_inputs_into, read_weight_header, read_weights_into, SyntheticConfig,
};

#[test]
fn test_weight_file_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.spwt");
    let net = SyntheticConfig::new(16, 3).fan_in(2).network::<f32>();
    fs::write(&path, encode_weights(16, &net)).unwrap();

    let bytes = fs::read(&path).unwrap();
    let max_nnz = find_max_nnz(&bytes, 3, 16).unwrap();
    assert_eq!(max_nnz, 32);

    // budget of 8 elements forces two slabs
    let g = LayerGeometry::new(16, max_nnz, 4, 8).unwrap();
    assert_eq!(g.n_slab(), 2);
    let mut store = vec![0f32; 3 * g.record_elems()];
    read_weights_into(&bytes, &g, 3, &mut store).unwrap();

    for (layer, record) in store.chunks_exact(g.record_elems()).enumerate() {
        let view = PackedRecord::new(&g, record).unwrap();
        view.validate(&g).unwrap();
        assert_eq!(view.nnz(), net[layer].len());
        let mut stored: Vec<f32> = view.values().to_vec();
        let mut written: Vec<f32> = net[layer].iter().map(|e| e.2).collect();
        stored.sort_by(f32::total_cmp);
        written.sort_by(f32::total_cmp);
        assert_eq!(stored, written);
    }
}

#[test]
fn test_input_file_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inputs.spin");
    let cfg = SyntheticConfig::new(8, 1).num_inputs(6).input_density(0.5).seed(3);
    let entries = cfg.inputs::<f64>();
    fs::write(&path, encode_inputs(6, 8, &entries)).unwrap();

    let bytes = fs::read(&path).unwrap();
    let header = read_input_header(&bytes).unwrap();
    assert_eq!((header.inputs, header.neurons, header.dtype), (6, 8, DType::F64));

    let mut values = vec![0f64; 48];
    let mut rlen = vec![0u32; 6];
    let mut rows = vec![0u32; 6];
    let nnz = read_inputs_into(&bytes, 6, 8, &mut values, &mut rlen, &mut rows).unwrap();

    assert_eq!(rlen.iter().map(|&l| l as usize).sum::<usize>(), entries.len());
    assert_eq!(values.iter().filter(|&&v| v == 1.0).count(), entries.len());
    let expected: Vec<u32> = (0..6).filter(|&i| rlen[i as usize] > 0).collect();
    assert_eq!(&rows[..nnz], expected.as_slice());
}

#[test]
fn test_tsv_conversion() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(layer_file_name(4, 1)), "1\t1\t1.0\n2\t2\t1.0\n").unwrap();
    fs::write(dir.path().join(layer_file_name(4, 2)), "3\t4\t0.5\n").unwrap();
    fs::write(dir.path().join(input_file_name(4)), "2\t3\t1\n").unwrap();

    let weights = convert_weights(dir.path(), 4, 2, DType::F64).unwrap();
    let header = read_weight_header(&weights).unwrap();
    assert_eq!((header.neurons, header.layers, header.dtype), (4, 2, DType::F64));
    assert_eq!(find_max_nnz(&weights, 2, 4).unwrap(), 2);

    let inputs = convert_inputs(dir.path().join(input_file_name(4)), 2, 4, DType::F32).unwrap();
    let mut values = vec![0f32; 8];
    let mut rlen = vec![0u32; 2];
    let mut rows = vec![0u32; 2];
    let nnz = read_inputs_into(&inputs, 2, 4, &mut values, &mut rlen, &mut rows).unwrap();
    assert_eq!(nnz, 1);
    assert_eq!(rows[0], 1);
    assert_eq!(values[6], 1.0);
}

#[test]
fn test_tsv_conversion_missing_layer() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(layer_file_name(4, 1)), "1\t1\t1.0\n").unwrap();
    let err = convert_weights(dir.path(), 4, 2, DType::F32).unwrap_err();
    assert_eq!(err.kind(), sparrow_core::ErrorKind::Input);
}

#[test]
fn test_tsv_conversion_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(layer_file_name(4, 1)), "5\t1\t1.0\n").unwrap();
    assert!(convert_weights(dir.path(), 4, 1, DType::F32).is_err());
}

#[test]
fn test_golden_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(categories_file_name(4, 2));
    fs::write(&path, encode_categories(&[0, 2])).unwrap();
    let categories = read_categories(&path).unwrap();
    assert_eq!(categories, vec![0, 2]);
    assert!(matches_categories(&[1, -1, 3], &categories));
    assert!(!matches_categories(&[1, 0, 3], &categories));
}
