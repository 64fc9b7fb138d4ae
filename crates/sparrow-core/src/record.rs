// Packed layer records
//
// A record is `LayerGeometry::record_elems()` elements of the value type.
// The leading `padded_index_len()` index words are reinterpreted as u32 (row
// pointers then column indices); the value segment follows. Records are
// backed by element-typed storage so the value segment is always aligned,
// and the index prefix is a plain byte reinterpretation of it.
//
// Row pointers are indexed by `slab * neurons + row`, where `row` is the
// input neuron whose activation multiplies the weight. The entries of one
// (slab, row) range carry output columns inside that slab.

use std::ops::Range;

use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::geometry::LayerGeometry;

fn split_record<'a, T: Element>(
    geometry: &LayerGeometry,
    elems: &'a [T],
) -> Result<(&'a [u32], &'a [T])> {
    check_len(geometry, elems.len())?;
    let (index, values) = elems.split_at(geometry.value_offset_elems());
    let index: &'a [u32] = bytemuck::try_cast_slice(index)
        .map_err(|e| Error::msg(format!("record index segment: {e}")))?;
    Ok((index, values))
}

fn split_record_mut<'a, T: Element>(
    geometry: &LayerGeometry,
    elems: &'a mut [T],
) -> Result<(&'a mut [u32], &'a mut [T])> {
    check_len(geometry, elems.len())?;
    let (index, values) = elems.split_at_mut(geometry.value_offset_elems());
    let index: &'a mut [u32] = bytemuck::try_cast_slice_mut(index)
        .map_err(|e| Error::msg(format!("record index segment: {e}")))?;
    Ok((index, values))
}

fn check_len(geometry: &LayerGeometry, len: usize) -> Result<()> {
    if len != geometry.record_elems() {
        return Err(Error::GeometryMismatch {
            what: "packed record length",
            expected: geometry.record_elems(),
            got: len,
        });
    }
    Ok(())
}

/// Read-only view of one packed layer record.
#[derive(Debug, Clone, Copy)]
pub struct PackedRecord<'a, T> {
    neurons: usize,
    row_ptr: &'a [u32],
    col_idx: &'a [u32],
    values: &'a [T],
}

impl<'a, T: Element> PackedRecord<'a, T> {
    pub fn new(geometry: &LayerGeometry, elems: &'a [T]) -> Result<Self> {
        let (index, values) = split_record(geometry, elems)?;
        let (row_ptr, rest) = index.split_at(geometry.row_ptr_len());
        Ok(Self {
            neurons: geometry.neurons(),
            row_ptr,
            col_idx: &rest[..geometry.max_nnz()],
            values,
        })
    }

    pub fn row_ptr(&self) -> &'a [u32] {
        self.row_ptr
    }

    pub fn col_idx(&self) -> &'a [u32] {
        self.col_idx
    }

    pub fn values(&self) -> &'a [T] {
        self.values
    }

    /// Number of nonzeros actually stored in this layer.
    pub fn nnz(&self) -> usize {
        self.row_ptr.last().copied().unwrap_or(0) as usize
    }

    /// Entry range of input neuron `row` within column slab `slab`.
    #[inline]
    pub fn slab_range(&self, slab: usize, row: usize) -> Range<usize> {
        let at = slab * self.neurons + row;
        self.row_ptr[at] as usize..self.row_ptr[at + 1] as usize
    }

    /// Check the structural invariants of the record.
    ///
    /// Row pointers start at zero, never decrease and stay within
    /// `max_nnz`; every column index is a valid neuron inside the slab its
    /// range belongs to.
    pub fn validate(&self, geometry: &LayerGeometry) -> Result<()> {
        if self.row_ptr.first().copied().unwrap_or(0) != 0 {
            return Err(Error::format("weight", "row pointer segment does not start at 0"));
        }
        if let Some(at) = self.row_ptr.windows(2).position(|w| w[1] < w[0]) {
            return Err(Error::format(
                "weight",
                format!("row pointer segment decreases at position {at}"),
            ));
        }
        if self.nnz() > geometry.max_nnz() {
            return Err(Error::GeometryMismatch {
                what: "nonzeros in layer",
                expected: geometry.max_nnz(),
                got: self.nnz(),
            });
        }

        let col_blk = geometry.col_blk();
        for slab in 0..geometry.n_slab() {
            let slab_cols = (slab * col_blk) as u32..((slab + 1) * col_blk) as u32;
            for row in 0..self.neurons {
                for k in self.slab_range(slab, row) {
                    let col = self.col_idx[k];
                    if !slab_cols.contains(&col) {
                        return Err(Error::format(
                            "weight",
                            format!(
                                "column index {col} at entry {k} is outside slab {slab} \
                                 ({}..{} of {} neurons)",
                                slab_cols.start, slab_cols.end, self.neurons
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Writable view of one packed layer record, used by the weight readers.
#[derive(Debug)]
pub struct PackedRecordMut<'a, T> {
    geometry: LayerGeometry,
    index: &'a mut [u32],
    values: &'a mut [T],
}

impl<'a, T: Element> PackedRecordMut<'a, T> {
    pub fn new(geometry: &LayerGeometry, elems: &'a mut [T]) -> Result<Self> {
        let (index, values) = split_record_mut(geometry, elems)?;
        Ok(Self {
            geometry: *geometry,
            index,
            values,
        })
    }

    /// Pack `(row, col, value)` triplets into the record.
    ///
    /// Entries are bucketed by `(col / col_blk, row)` with a counting sort;
    /// entries of one bucket keep their input order. The record is fully
    /// overwritten, including unused tail entries and padding.
    pub fn pack(&mut self, entries: &[(u32, u32, T)]) -> Result<()> {
        let g = &self.geometry;
        let neurons = g.neurons();
        if entries.len() > g.max_nnz() {
            return Err(Error::GeometryMismatch {
                what: "nonzeros in layer",
                expected: g.max_nnz(),
                got: entries.len(),
            });
        }

        let bucket = |row: u32, col: u32| -> Result<usize> {
            let (row, col) = (row as usize, col as usize);
            if row >= neurons || col >= neurons {
                return Err(Error::format(
                    "weight",
                    format!("entry ({row}, {col}) out of range for {neurons} neurons"),
                ));
            }
            Ok((col / g.col_blk()) * neurons + row)
        };

        let (row_ptr, rest) = self.index.split_at_mut(g.row_ptr_len());
        let (col_idx, pad) = rest.split_at_mut(g.max_nnz());
        row_ptr.fill(0);
        col_idx.fill(0);
        pad.fill(0);
        self.values.fill(T::zero());

        for &(row, col, _) in entries {
            row_ptr[bucket(row, col)? + 1] += 1;
        }
        for i in 1..row_ptr.len() {
            row_ptr[i] += row_ptr[i - 1];
        }

        let mut cursor: Vec<u32> = row_ptr[..row_ptr.len() - 1].to_vec();
        for &(row, col, val) in entries {
            let b = bucket(row, col)?;
            let k = cursor[b] as usize;
            cursor[b] += 1;
            col_idx[k] = col;
            self.values[k] = val;
        }
        Ok(())
    }

    pub fn as_record(&self) -> PackedRecord<'_, T> {
        let (row_ptr, rest) = self.index.split_at(self.geometry.row_ptr_len());
        PackedRecord {
            neurons: self.geometry.neurons(),
            row_ptr,
            col_idx: &rest[..self.geometry.max_nnz()],
            values: self.values,
        }
    }
}
