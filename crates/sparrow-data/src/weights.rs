// Weight file reader
//
// Loading a network takes two passes over the file bytes. `find_max_nnz`
// walks only the per-layer counts to size the packed records; then
// `read_weights_into` decodes each layer's entries and packs them into its
// fixed-size slot of the caller's (pinned) buffer.

use sparrow_core::{Element, Error, LayerGeometry, PackedRecordMut, Result};

use crate::format::{
    entry_len, expect_eq, put_entry, put_header, put_u64, ByteReader, WeightHeader, WEIGHT_MAGIC,
};

const FILE: &str = "weight";

/// Parse just the header of a weight file.
pub fn read_weight_header(bytes: &[u8]) -> Result<WeightHeader> {
    ByteReader::new(FILE, bytes).weight_header()
}

/// Largest per-layer nonzero count of a weight file.
///
/// Only headers and counts are read; entry payloads are skipped. Header
/// geometry that disagrees with `num_layers`/`num_neurons` is a mismatch.
pub fn find_max_nnz(bytes: &[u8], num_layers: usize, num_neurons: usize) -> Result<usize> {
    let mut r = ByteReader::new(FILE, bytes);
    let header = r.weight_header()?;
    expect_eq("weight file neurons", num_neurons, header.neurons)?;
    expect_eq("weight file layers", num_layers, header.layers)?;

    let stride = entry_len(header.dtype);
    let mut max_nnz = 0u64;
    for layer in 0..num_layers {
        let nnz = r.u64()?;
        let payload = nnz.checked_mul(stride).ok_or_else(|| {
            Error::format(FILE, format!("layer {layer} claims {nnz} entries"))
        })?;
        r.skip(payload)?;
        max_nnz = max_nnz.max(nnz);
    }

    usize::try_from(max_nnz)
        .map_err(|_| Error::format(FILE, format!("{max_nnz} entries in one layer")))
}

/// Decode every layer and pack it into `dst`.
///
/// Layer `l` lands in `dst[l * record_elems..(l + 1) * record_elems]`;
/// `dst` must hold exactly `num_layers` records. Every record slot is fully
/// overwritten.
pub fn read_weights_into<T: Element>(
    bytes: &[u8],
    geometry: &LayerGeometry,
    num_layers: usize,
    dst: &mut [T],
) -> Result<()> {
    let mut r = ByteReader::new(FILE, bytes);
    let header = r.weight_header()?;
    expect_eq("weight file neurons", geometry.neurons(), header.neurons)?;
    expect_eq("weight file layers", num_layers, header.layers)?;

    let record_elems = geometry.record_elems();
    if dst.len() != num_layers * record_elems {
        return Err(Error::GeometryMismatch {
            what: "weight store elements",
            expected: num_layers * record_elems,
            got: dst.len(),
        });
    }

    let mut entries = Vec::with_capacity(geometry.max_nnz());
    for (layer, record) in dst.chunks_exact_mut(record_elems).enumerate() {
        let nnz = r.u64()?;
        if nnz > geometry.max_nnz() as u64 {
            return Err(Error::GeometryMismatch {
                what: "nonzeros in layer",
                expected: geometry.max_nnz(),
                got: nnz as usize,
            });
        }
        entries.clear();
        for _ in 0..nnz {
            entries.push(r.entry::<T>(header.dtype)?);
        }
        PackedRecordMut::new(geometry, record)?
            .pack(&entries)
            .map_err(|e| match e {
                Error::Format { file, reason } => Error::Format {
                    file,
                    reason: format!("layer {layer}: {reason}"),
                },
                other => other,
            })?;
    }

    if r.position() != bytes.len() {
        return Err(Error::format(
            FILE,
            format!("{} trailing bytes after the last layer", bytes.len() - r.position()),
        ));
    }
    tracing::debug!(layers = num_layers, max_nnz = geometry.max_nnz(), "packed weight records");
    Ok(())
}

/// Encode a network as weight-file bytes.
///
/// `layers[l]` holds layer `l`'s `(row, col, value)` entries, where `row` is
/// the input neuron and `col` the output neuron.
pub fn encode_weights<T: Element>(num_neurons: u32, layers: &[Vec<(u32, u32, T)>]) -> Vec<u8> {
    let nnz: usize = layers.iter().map(Vec::len).sum();
    let mut buf =
        Vec::with_capacity(crate::format::WEIGHT_HEADER_LEN + layers.len() * 8 + nnz * 16);
    put_header(&mut buf, WEIGHT_MAGIC, [num_neurons, layers.len() as u32], T::DTYPE);
    for layer in layers {
        put_u64(&mut buf, layer.len() as u64);
        for &entry in layer {
            put_entry(&mut buf, entry);
        }
    }
    buf
}
