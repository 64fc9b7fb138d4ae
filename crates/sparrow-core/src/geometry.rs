// LayerGeometry: fixed sizing shared by every packed layer record
//
// A layer's weight matrix is split into N_SLAB column slabs of COL_BLK output
// columns each, so that one slab's accumulator fits the fast on-chip memory
// of a compute block. Every layer is stored as a record of identical size,
// computed from the largest nonzero count over all layers:
//
//   [ row pointers : neurons * N_SLAB + 1 ][ column indices : max_nnz ][ pad ][ values : max_nnz ]
//   '-------------------------- index words (u32) -------------------------'  '-- elements --'
//
// The pad is the number of index words needed to align the value segment to
// the element size: always 0 for f32, 0 or 1 for f64.

use crate::dtype::Element;
use crate::error::{Error, Result};

/// Size in bytes of one index word (row pointer, column index, row id, row length).
pub const INDEX_SIZE: usize = std::mem::size_of::<u32>();

/// Pick the column block width for a layer of `neurons` outputs.
///
/// The whole layer is one slab when it fits `budget` elements. Otherwise the
/// smallest divisor `d >= 2` of `neurons` with `neurons / d <= budget` wins.
/// `d = neurons` always divides, so the search is bounded by `neurons` and
/// only fails when the budget cannot hold a single element.
pub fn select_col_blk(neurons: usize, budget: usize) -> Result<usize> {
    if neurons == 0 {
        return Err(Error::config("num_neurons_per_layer must be positive"));
    }
    if neurons <= budget {
        return Ok(neurons);
    }
    (2..=neurons)
        .find(|d| neurons % d == 0 && neurons / d <= budget)
        .map(|d| neurons / d)
        .ok_or(Error::NoColumnBlock { neurons, budget })
}

/// Geometry of the packed weight records of one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerGeometry {
    neurons: usize,
    col_blk: usize,
    n_slab: usize,
    max_nnz: usize,
    elem_size: usize,
    p_w_index_len: usize,
    pad: usize,
    pp_w_index_len: usize,
    pp_wlen: usize,
    pp_wsize: usize,
}

impl LayerGeometry {
    /// Derive the geometry for `neurons` outputs per layer, `max_nnz` nonzeros
    /// in the densest layer, `elem_size`-byte values, and a fast-memory budget
    /// of `budget` elements per compute block.
    pub fn new(neurons: usize, max_nnz: usize, elem_size: usize, budget: usize) -> Result<Self> {
        // The value segment is aligned by padding whole index words, which
        // only works when an element spans one or two of them.
        let words_per_elem = elem_size / INDEX_SIZE;
        if elem_size % INDEX_SIZE != 0 || !(1..=2).contains(&words_per_elem) {
            return Err(Error::config(format!(
                "element size {elem_size} is not 1x or 2x the index size {INDEX_SIZE}"
            )));
        }

        let col_blk = select_col_blk(neurons, budget)?;
        let n_slab = neurons / col_blk;

        let p_w_index_len = neurons
            .checked_mul(n_slab)
            .and_then(|n| n.checked_add(max_nnz))
            .and_then(|n| n.checked_add(1))
            .filter(|&n| u32::try_from(n).is_ok())
            .ok_or_else(|| {
                Error::config(format!(
                    "a layer record of {neurons} x {n_slab} row pointers and {max_nnz} \
                     nonzeros does not fit 32-bit offsets"
                ))
            })?;
        let pad = (words_per_elem - p_w_index_len % words_per_elem) % words_per_elem;
        let pp_w_index_len = p_w_index_len + pad;
        let pp_wlen = pp_w_index_len + words_per_elem * max_nnz;
        let pp_wsize = INDEX_SIZE * pp_w_index_len + elem_size * max_nnz;

        Ok(Self {
            neurons,
            col_blk,
            n_slab,
            max_nnz,
            elem_size,
            p_w_index_len,
            pad,
            pp_w_index_len,
            pp_wlen,
            pp_wsize,
        })
    }

    /// Geometry for element type `T` given the device's fast memory per block in bytes.
    pub fn for_element<T: Element>(
        neurons: usize,
        max_nnz: usize,
        shared_mem_bytes: usize,
    ) -> Result<Self> {
        let elem_size = std::mem::size_of::<T>();
        Self::new(neurons, max_nnz, elem_size, shared_mem_bytes / elem_size)
    }

    pub fn neurons(&self) -> usize {
        self.neurons
    }

    /// Output columns per slab.
    pub fn col_blk(&self) -> usize {
        self.col_blk
    }

    /// Number of column slabs.
    pub fn n_slab(&self) -> usize {
        self.n_slab
    }

    pub fn max_nnz(&self) -> usize {
        self.max_nnz
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// Index words before padding (row pointers + column indices).
    pub fn index_len(&self) -> usize {
        self.p_w_index_len
    }

    /// Padding words between column indices and values.
    pub fn pad(&self) -> usize {
        self.pad
    }

    /// Index words including padding; the value segment starts here.
    pub fn padded_index_len(&self) -> usize {
        self.pp_w_index_len
    }

    /// Length of the row-pointer segment.
    pub fn row_ptr_len(&self) -> usize {
        self.neurons * self.n_slab + 1
    }

    /// Record length in index words.
    pub fn record_words(&self) -> usize {
        self.pp_wlen
    }

    /// Record length in bytes.
    pub fn record_bytes(&self) -> usize {
        self.pp_wsize
    }

    /// Record length in elements of the value type.
    pub fn record_elems(&self) -> usize {
        self.pp_wsize / self.elem_size
    }

    /// Offset of the value segment, in elements of the value type.
    pub fn value_offset_elems(&self) -> usize {
        self.pp_w_index_len * INDEX_SIZE / self.elem_size
    }
}
