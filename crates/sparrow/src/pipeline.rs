// Layer Pipeline: drives an activation batch through every layer
//
// Layer l (current parity c = l % 2, next parity n = 1 - c):
//
//   transfer stream:  upload record l+1 -> weight slot n      (scoped thread)
//   compute stream:   propagate(weights c, activations c) -> activations n
//                     synchronize
//                     compact rows of activations n
//                     reset activations c
//   join:             wait for the upload, synchronize transfer stream
//
// The upload borrows only weight slot n and the compute stage only slot c,
// so the two stages never touch the same buffer. The transfer stream is
// always joined and synchronized before the layer returns, including when
// the compute stage failed.

use std::time::Instant;

use sparrow_core::{compact_rows, Backend, Element, Error, LayerGeometry, PropagateArgs, Result};

use crate::profiler::Profiler;
use crate::slots::{ActivationSlot, DoubleBuffer};
use crate::store::WeightStore;

/// The two execution streams of one inference call.
pub struct Streams<B: Backend> {
    pub compute: B::Stream,
    pub transfer: B::Stream,
}

impl<B: Backend> Streams<B> {
    pub fn new(device: &B::Device) -> Result<Self> {
        Ok(Self {
            compute: B::create_stream(device)?,
            transfer: B::create_stream(device)?,
        })
    }
}

/// Bias and clamp of the activation rule, in the element type.
#[derive(Debug, Clone, Copy)]
pub struct Activation<T> {
    pub bias: T,
    pub ymax: T,
}

/// Everything a layer step needs besides its buffers.
pub struct LayerPipeline<'a, B: Backend, T: Element> {
    pub device: &'a B::Device,
    pub store: &'a WeightStore<B, T>,
    pub streams: &'a Streams<B>,
    pub activation: Activation<T>,
}

impl<'a, B: Backend, T: Element> LayerPipeline<'a, B, T> {
    fn geometry(&self) -> &'a LayerGeometry {
        self.store.geometry()
    }

    /// Run every layer. Weight slot 0 must hold layer 0 and activation slot 0
    /// the input batch with `active` listed rows; slot 1 of both must be zero.
    ///
    /// Returns the active row count before the first layer and after every
    /// layer. The final activations are in slot `num_layers % 2`.
    pub fn run(
        &self,
        weights: &mut DoubleBuffer<B::DeviceBuffer>,
        activations: &mut DoubleBuffer<ActivationSlot<B, T>>,
        mut active: usize,
        profiler: &mut Profiler,
    ) -> Result<Vec<usize>> {
        let num_layers = self.store.num_layers();
        let mut trace = Vec::with_capacity(num_layers + 1);
        trace.push(active);

        for layer in 0..num_layers {
            let start = Instant::now();
            active = self.step(layer, weights, activations, active)?;
            profiler.record("layer", start.elapsed());
            tracing::debug!(layer, active, "layer done");
            trace.push(active);
        }
        Ok(trace)
    }

    /// One layer: returns the new active row count.
    fn step(
        &self,
        layer: usize,
        weights: &mut DoubleBuffer<B::DeviceBuffer>,
        activations: &mut DoubleBuffer<ActivationSlot<B, T>>,
        active: usize,
    ) -> Result<usize> {
        let (w_cur, w_next) = weights.split_mut(layer);
        let (a_cur, a_next) = activations.split_mut(layer);
        let prefetch = (layer + 1 < self.store.num_layers()).then(|| self.store.record(layer + 1));
        let device = self.device;
        let transfer = &self.streams.transfer;

        std::thread::scope(|s| {
            let upload = prefetch.map(|record| {
                s.spawn(move || B::copy_to_device_async(device, transfer, record, w_next))
            });

            let computed = self.compute(w_cur, a_cur, a_next, active);

            let uploaded = match upload {
                Some(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::msg("weight transfer thread panicked"))),
                None => Ok(()),
            };
            let synced = B::synchronize(device, transfer);

            let active = computed?;
            uploaded?;
            synced?;
            Ok(active)
        })
    }

    /// Propagate, compact the written slot, reset the consumed slot.
    fn compute(
        &self,
        weights: &B::DeviceBuffer,
        cur: &mut ActivationSlot<B, T>,
        next: &mut ActivationSlot<B, T>,
        active: usize,
    ) -> Result<usize> {
        if active > 0 {
            B::propagate(
                self.device,
                &self.streams.compute,
                PropagateArgs {
                    geometry: self.geometry(),
                    weights,
                    y_in: &cur.values,
                    rows_in: &cur.rows,
                    active,
                    bias: self.activation.bias,
                    ymax: self.activation.ymax,
                    y_out: &mut next.values,
                    rlen_out: &mut next.rlen,
                },
            )?;
            B::synchronize(self.device, &self.streams.compute)?;
        }

        let active = compact_rows(&next.rlen, &mut next.rows);
        cur.reset(self.device)?;
        Ok(active)
    }
}
