// Input file reader
//
// An input file holds a sparse `num_inputs x num_neurons` activation matrix.
// Reading it produces the initial activation batch of the pipeline: dense
// values, a nonzero count per row and the ascending list of active rows.

use sparrow_core::{compact_rows, Element, Error, Result};

use crate::format::{
    expect_eq, put_entry, put_header, put_u64, ByteReader, InputHeader, INPUT_MAGIC,
};

const FILE: &str = "input";

/// Parse just the header of an input file.
pub fn read_input_header(bytes: &[u8]) -> Result<InputHeader> {
    ByteReader::new(FILE, bytes).input_header()
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::GeometryMismatch {
            what,
            expected,
            got,
        });
    }
    Ok(())
}

/// Decode an input file into an activation batch.
///
/// `values` (`num_inputs * num_neurons`) and `rlen` (`num_inputs`) are
/// overwritten; the active rows are written to the front of `rows` and their
/// count is returned. Zero-valued entries are skipped; a repeated
/// `(row, col)` pair is a format error.
pub fn read_inputs_into<T: Element>(
    bytes: &[u8],
    num_inputs: usize,
    num_neurons: usize,
    values: &mut [T],
    rlen: &mut [u32],
    rows: &mut [u32],
) -> Result<usize> {
    let mut r = ByteReader::new(FILE, bytes);
    let header = r.input_header()?;
    expect_eq("input file rows", num_inputs, header.inputs)?;
    expect_eq("input file neurons", num_neurons, header.neurons)?;
    check_len("activation buffer elements", num_inputs * num_neurons, values.len())?;
    check_len("row length entries", num_inputs, rlen.len())?;
    check_len("active row entries", num_inputs, rows.len())?;

    values.fill(T::zero());
    rlen.fill(0);

    for k in 0..header.nnz {
        let (row, col, v) = r.entry::<T>(header.dtype)?;
        let (row, col) = (row as usize, col as usize);
        if row >= num_inputs || col >= num_neurons {
            return Err(Error::format(
                FILE,
                format!("entry {k} at ({row}, {col}) outside {num_inputs}x{num_neurons}"),
            ));
        }
        if v == T::zero() {
            continue;
        }
        let slot = &mut values[row * num_neurons + col];
        if *slot != T::zero() {
            return Err(Error::format(
                FILE,
                format!("entry {k} repeats ({row}, {col})"),
            ));
        }
        *slot = v;
        rlen[row] += 1;
    }

    if r.position() != bytes.len() {
        return Err(Error::format(
            FILE,
            format!("{} trailing bytes after the last entry", bytes.len() - r.position()),
        ));
    }
    Ok(compact_rows(rlen, rows))
}

/// Encode a sparse activation matrix as input-file bytes.
pub fn encode_inputs<T: Element>(
    num_inputs: u32,
    num_neurons: u32,
    entries: &[(u32, u32, T)],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(crate::format::INPUT_HEADER_LEN + entries.len() * 16);
    put_header(&mut buf, INPUT_MAGIC, [num_inputs, num_neurons], T::DTYPE);
    put_u64(&mut buf, entries.len() as u64);
    for &entry in entries {
        put_entry(&mut buf, entry);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Batch {
        values: Vec<f32>,
        rlen: Vec<u32>,
        rows: Vec<u32>,
    }

    fn read(bytes: &[u8], inputs: usize, neurons: usize) -> Result<(Batch, usize)> {
        let mut b = Batch {
            values: vec![0.0; inputs * neurons],
            rlen: vec![0; inputs],
            rows: vec![0; inputs],
        };
        let nnz = read_inputs_into(bytes, inputs, neurons, &mut b.values, &mut b.rlen, &mut b.rows)?;
        Ok((b, nnz))
    }

    #[test]
    fn test_read_inputs() {
        let bytes = encode_inputs(3, 4, &[(2u32, 1u32, 1.0f32), (0, 3, 2.0), (2, 0, 0.5)]);
        let (b, nnz) = read(&bytes, 3, 4).unwrap();
        assert_eq!(nnz, 2);
        assert_eq!(&b.rows[..nnz], &[0, 2]);
        assert_eq!(b.rlen, vec![1, 0, 2]);
        assert_eq!(&b.values[..4], &[0.0, 0.0, 0.0, 2.0]);
        assert_eq!(&b.values[8..], &[0.5, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_zero_entries_are_skipped() {
        let bytes = encode_inputs(2, 2, &[(1u32, 1u32, 0.0f32), (1, 1, 3.0)]);
        let (b, nnz) = read(&bytes, 2, 2).unwrap();
        assert_eq!(nnz, 1);
        assert_eq!(b.rlen, vec![0, 1]);
    }

    #[test]
    fn test_duplicates_and_range_are_format_errors() {
        let bytes = encode_inputs(2, 2, &[(0u32, 1u32, 1.0f32), (0, 1, 1.0)]);
        assert!(matches!(read(&bytes, 2, 2), Err(Error::Format { .. })));
        let bytes = encode_inputs(2, 2, &[(2u32, 0u32, 1.0f32)]);
        assert!(matches!(read(&bytes, 2, 2), Err(Error::Format { .. })));
    }

    #[test]
    fn test_header_mismatch() {
        let bytes = encode_inputs(3, 4, &[(0u32, 0u32, 1.0f64)]);
        assert!(matches!(
            read(&bytes, 2, 4),
            Err(Error::GeometryMismatch { .. })
        ));
        assert_eq!(read_input_header(&bytes).unwrap().nnz, 1);
    }
}
