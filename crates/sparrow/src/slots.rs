// Device Double Buffer
//
// Two instances of each per-layer resource, addressed by layer parity:
// layer `l` reads slot `l % 2` ("current") and writes slot `1 - l % 2`
// ("next"). `split_mut` hands out both slots as disjoint `&mut` borrows, so
// the transfer stage can own one weight slot while the compute stage reads
// the other.

use sparrow_core::{Backend, Element, Error, Result};

/// A pair of slots alternated by layer parity.
#[derive(Debug)]
pub struct DoubleBuffer<S> {
    slots: [S; 2],
}

impl<S> DoubleBuffer<S> {
    pub fn new(even: S, odd: S) -> Self {
        Self {
            slots: [even, odd],
        }
    }

    /// Build both slots with a fallible constructor, called with parity 0 then 1.
    pub fn try_new(mut make: impl FnMut(usize) -> Result<S>) -> Result<Self> {
        Ok(Self::new(make(0)?, make(1)?))
    }

    /// The slot read by layer `layer`.
    pub fn current(&self, layer: usize) -> &S {
        &self.slots[layer % 2]
    }

    pub fn current_mut(&mut self, layer: usize) -> &mut S {
        &mut self.slots[layer % 2]
    }

    /// `(current, next)` for layer `layer`.
    pub fn split_mut(&mut self, layer: usize) -> (&mut S, &mut S) {
        let [even, odd] = &mut self.slots;
        if layer % 2 == 0 {
            (even, odd)
        } else {
            (odd, even)
        }
    }
}

/// One activation batch in managed memory.
///
/// `values` is the dense `num_inputs x neurons` matrix, `rlen` the per-row
/// nonzero counts and `rows` the active-row list (valid up to the active
/// count that travels with it).
pub struct ActivationSlot<B: Backend, T: Element> {
    pub values: B::Managed<T>,
    pub rows: B::Managed<u32>,
    pub rlen: B::Managed<u32>,
}

impl<B: Backend, T: Element> ActivationSlot<B, T> {
    /// Allocate a zeroed slot for `num_inputs` rows of `neurons` values.
    pub fn alloc(device: &B::Device, num_inputs: usize, neurons: usize) -> Result<Self> {
        let len = num_inputs.checked_mul(neurons).ok_or_else(|| {
            Error::device(
                "activation allocation",
                format!("{num_inputs} x {neurons} values overflow the address space"),
            )
        })?;
        Ok(Self {
            values: B::alloc_managed(device, len)?,
            rows: B::alloc_managed(device, num_inputs)?,
            rlen: B::alloc_managed(device, num_inputs)?,
        })
    }

    /// Zero the values and row lengths before the slot is written again.
    ///
    /// Kernels only write the rows they are given, so every row they skip
    /// must already read as dead.
    pub fn reset(&mut self, device: &B::Device) -> Result<()> {
        B::zero_managed(device, &mut self.values)?;
        B::zero_managed(device, &mut self.rlen)
    }

    /// Size of the slot in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.values.len() * std::mem::size_of::<T>()
            + (self.rows.len() + self.rlen.len()) * std::mem::size_of::<u32>()
    }
}
