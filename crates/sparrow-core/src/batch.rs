// Active-row bookkeeping for an activation batch
//
// A batch of `num_inputs` rows keeps, next to its dense values, a per-row
// nonzero count `rlen` and the ascending list `rows` of row ids whose count is
// positive. Compaction rebuilds `rows` from `rlen` after every layer; rows
// that die out never come back because only listed rows are propagated.

/// Rebuild the active-row list from per-row nonzero counts.
///
/// Writes every index `i` with `rlen[i] > 0`, ascending, to the front of
/// `rows` and returns how many were written. `rows` must be at least as long
/// as `rlen`.
pub fn compact_rows(rlen: &[u32], rows: &mut [u32]) -> usize {
    let mut nnz = 0;
    for (i, &len) in rlen.iter().enumerate() {
        if len > 0 {
            rows[nnz] = i as u32;
            nnz += 1;
        }
    }
    nnz
}

/// Whether `rows[..nnz]` is exactly the ascending list of rows with `rlen > 0`.
pub fn is_compacted(rlen: &[u32], rows: &[u32], nnz: usize) -> bool {
    let listed = &rows[..nnz];
    listed.windows(2).all(|w| w[0] < w[1])
        && listed.iter().all(|&r| rlen.get(r as usize).is_some_and(|&l| l > 0))
        && rlen.iter().filter(|&&l| l > 0).count() == nnz
}
