// GraphChallenge TSV conversion
//
// The sparse DNN GraphChallenge publishes networks and inputs as text:
//
//   n{N}-l{L}.tsv          layer L (1-based) of an N-neuron network
//   sparse-images-{N}.tsv  the input images for N-neuron networks
//
// Every line is a 1-based `row<TAB>col<TAB>value` triplet. Conversion shifts
// indices to 0-based and re-encodes the data in the binary formats.

use std::path::Path;

use sparrow_core::{DType, Element, Error, Result};

use crate::inputs::encode_inputs;
use crate::weights::encode_weights;

type Triplet = (u32, u32, f64);

/// File name of layer `layer` (1-based) of an `neurons`-wide network.
pub fn layer_file_name(neurons: usize, layer: usize) -> String {
    format!("n{neurons}-l{layer}.tsv")
}

/// File name of the input images for `neurons`-wide networks.
pub fn input_file_name(neurons: usize) -> String {
    format!("sparse-images-{neurons}.tsv")
}

fn parse_index(field: &str, line: usize, file: &'static str) -> Result<u32> {
    match field.parse::<u32>() {
        Ok(v) if v >= 1 => Ok(v - 1),
        _ => Err(Error::format(
            file,
            format!("line {line}: '{field}' is not a 1-based index"),
        )),
    }
}

/// Parse 1-based TSV triplets into 0-based `(row, col, value)` entries.
pub fn parse_triplets(text: &str, file: &'static str) -> Result<Vec<Triplet>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let mut fields = line.split_whitespace();
        let (Some(r), Some(c), Some(v)) = (fields.next(), fields.next(), fields.next()) else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(Error::format(
                file,
                format!("line {line_no}: expected row, col and value"),
            ));
        };
        let value = v.parse::<f64>().map_err(|e| {
            Error::format(file, format!("line {line_no}: value '{v}': {e}"))
        })?;
        out.push((
            parse_index(r, line_no, file)?,
            parse_index(c, line_no, file)?,
            value,
        ));
    }
    Ok(out)
}

fn read_triplets(path: &Path, file: &'static str) -> Result<Vec<Triplet>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_triplets(&text, file)
}

fn check_bounds(
    entries: &[Triplet],
    rows: usize,
    cols: usize,
    file: &'static str,
) -> Result<()> {
    match entries
        .iter()
        .find(|&&(r, c, _)| r as usize >= rows || c as usize >= cols)
    {
        Some(&(r, c, _)) => Err(Error::format(
            file,
            format!("entry ({}, {}) outside {rows}x{cols}", r + 1, c + 1),
        )),
        None => Ok(()),
    }
}

fn typed<T: Element>(entries: &[Triplet]) -> Vec<(u32, u32, T)> {
    entries
        .iter()
        .map(|&(r, c, v)| (r, c, T::from_f64(v)))
        .collect()
}

/// Convert the layer files `n{N}-l1.tsv ..= n{N}-l{layers}.tsv` in `dir`
/// into weight-file bytes with `dtype` values.
pub fn convert_weights(
    dir: impl AsRef<Path>,
    neurons: usize,
    layers: usize,
    dtype: DType,
) -> Result<Vec<u8>> {
    let dir = dir.as_ref();
    let mut network = Vec::with_capacity(layers);
    for layer in 1..=layers {
        let entries = read_triplets(&dir.join(layer_file_name(neurons, layer)), "weight")?;
        check_bounds(&entries, neurons, neurons, "weight")?;
        network.push(entries);
    }
    tracing::info!(
        neurons,
        layers,
        nnz = network.iter().map(Vec::len).sum::<usize>(),
        "converted TSV network"
    );

    let neurons = neurons as u32;
    Ok(match dtype {
        DType::F32 => {
            let layers: Vec<_> = network.iter().map(|l| typed::<f32>(l)).collect();
            encode_weights(neurons, &layers)
        }
        DType::F64 => {
            let layers: Vec<_> = network.iter().map(|l| typed::<f64>(l)).collect();
            encode_weights(neurons, &layers)
        }
    })
}

/// Convert a TSV input file into input-file bytes with `dtype` values.
pub fn convert_inputs(
    path: impl AsRef<Path>,
    num_inputs: usize,
    neurons: usize,
    dtype: DType,
) -> Result<Vec<u8>> {
    let entries = read_triplets(path.as_ref(), "input")?;
    check_bounds(&entries, num_inputs, neurons, "input")?;
    tracing::info!(num_inputs, neurons, nnz = entries.len(), "converted TSV inputs");

    let (inputs, neurons) = (num_inputs as u32, neurons as u32);
    Ok(match dtype {
        DType::F32 => encode_inputs(inputs, neurons, &typed::<f32>(&entries)),
        DType::F64 => encode_inputs(inputs, neurons, &typed::<f64>(&entries)),
    })
}
