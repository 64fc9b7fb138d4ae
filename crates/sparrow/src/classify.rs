// Classifier: final activations to one class per input
//
// A single batched identify pass over all rows on the compute stream. Rows
// that died out are all zero and report `NO_MATCH`.

use sparrow_core::{Backend, Element, Result};

/// Class of every row of `values` (rows of `neurons` values), in input order.
pub fn classify<B: Backend, T: Element>(
    device: &B::Device,
    stream: &B::Stream,
    values: &B::Managed<T>,
    num_inputs: usize,
    neurons: usize,
) -> Result<Vec<i32>> {
    let mut results = B::alloc_managed::<i32>(device, num_inputs)?;
    B::identify(device, stream, values, neurons, &mut results)?;
    B::synchronize(device, stream)?;
    Ok(results.to_vec())
}
