// CPU kernels: rayon counterparts of the accelerator kernels
//
// `propagate` runs one task per active row, the way the device kernel runs
// one thread block per active row. Each task owns a COL_BLK accumulator that
// plays the role of the block's shared memory and is reused across slabs.

use rayon::prelude::*;

use sparrow_core::{argmax_class, bail, Element, LayerGeometry, PackedRecord, Result};

/// Output row and row-length slots of the active rows, in list order.
///
/// `rows` must be ascending; walking the chunk iterator once hands out
/// disjoint `&mut` rows that the parallel tasks can own.
#[allow(clippy::type_complexity)]
fn select_rows<'a, T>(
    y_out: &'a mut [T],
    rlen_out: &'a mut [u32],
    neurons: usize,
    rows: &[u32],
) -> Result<Vec<(usize, &'a mut [T], &'a mut u32)>> {
    let mut slots = y_out.chunks_mut(neurons).zip(rlen_out.iter_mut()).enumerate();
    let mut selected = Vec::with_capacity(rows.len());
    for &row in rows {
        let row = row as usize;
        match slots.find(|(i, _)| *i == row) {
            Some((i, (y, len))) => selected.push((i, y, len)),
            None => bail!("active row {row} is out of range or out of order"),
        }
    }
    Ok(selected)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn propagate<T: Element>(
    geometry: &LayerGeometry,
    record: &PackedRecord<'_, T>,
    y_in: &[T],
    rows: &[u32],
    bias: T,
    ymax: T,
    y_out: &mut [T],
    rlen_out: &mut [u32],
) -> Result<()> {
    let n = geometry.neurons();
    let targets = select_rows(y_out, rlen_out, n, rows)?;

    targets.into_par_iter().for_each_init(
        || vec![T::zero(); geometry.col_blk()],
        |acc, (row, out, len)| {
            let y = &y_in[row * n..(row + 1) * n];
            *len = propagate_row(geometry, record, y, acc, bias, ymax, out);
        },
    );
    Ok(())
}

/// One input row through one layer. Returns the output row's nonzero count.
fn propagate_row<T: Element>(
    geometry: &LayerGeometry,
    record: &PackedRecord<'_, T>,
    y: &[T],
    acc: &mut [T],
    bias: T,
    ymax: T,
    out: &mut [T],
) -> u32 {
    let col_blk = geometry.col_blk();
    let cols = record.col_idx();
    let vals = record.values();
    let mut count = 0;

    for slab in 0..geometry.n_slab() {
        acc.fill(T::zero());
        let base = slab * col_blk;

        for (row, &v) in y.iter().enumerate() {
            if v == T::zero() {
                continue;
            }
            for k in record.slab_range(slab, row) {
                let c = cols[k] as usize - base;
                acc[c] = acc[c] + v * vals[k];
            }
        }

        for (dst, &a) in out[base..base + col_blk].iter_mut().zip(acc.iter()) {
            let v = (a + bias).clamp_activation(ymax);
            *dst = v;
            if v > T::zero() {
                count += 1;
            }
        }
    }
    count
}

pub(crate) fn identify<T: Element>(y: &[T], neurons: usize, results: &mut [i32]) {
    results
        .par_iter_mut()
        .zip(y.par_chunks(neurons))
        .for_each(|(r, row)| *r = argmax_class(row));
}
