// Weight Store: every packed layer record, back to back in pinned memory
//
//   [ layer 0 record ][ layer 1 record ] ... [ layer L-1 record ]
//   '-- record_elems --'
//
// Records have identical size, so layer `l` starts at element
// `l * record_elems` (byte `l * record_bytes`). The store is filled once at
// engine construction and only read afterwards: the pipeline uploads one
// record per layer from it.

use sparrow_core::{Backend, Element, Error, LayerGeometry, PackedRecord, Result};

/// Host-pinned staging region holding all layers of a network.
pub struct WeightStore<B: Backend, T: Element> {
    records: B::Pinned<T>,
    geometry: LayerGeometry,
    num_layers: usize,
}

impl<B: Backend, T: Element> WeightStore<B, T> {
    /// Allocate the pinned region and pack every layer of a weight file into it.
    ///
    /// Each record is validated after packing, so a store that loads is
    /// structurally sound.
    pub fn load(
        device: &B::Device,
        weight_bytes: &[u8],
        geometry: &LayerGeometry,
        num_layers: usize,
    ) -> Result<Self> {
        let len = num_layers.checked_mul(geometry.record_elems()).ok_or_else(|| {
            Error::device(
                "weight store allocation",
                format!("{num_layers} records overflow the address space"),
            )
        })?;
        let mut records = B::alloc_pinned::<T>(device, len)?;
        sparrow_data::read_weights_into(weight_bytes, geometry, num_layers, &mut records)?;

        let store = Self {
            records,
            geometry: *geometry,
            num_layers,
        };
        for layer in 0..num_layers {
            store.packed(layer)?.validate(geometry)?;
        }
        Ok(store)
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn geometry(&self) -> &LayerGeometry {
        &self.geometry
    }

    /// Size of the pinned region in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.num_layers * self.geometry.record_bytes()
    }

    /// Raw elements of layer `layer`'s record, as uploaded to the device.
    ///
    /// Panics if `layer >= num_layers()`.
    pub fn record(&self, layer: usize) -> &[T] {
        let n = self.geometry.record_elems();
        &self.records[layer * n..(layer + 1) * n]
    }

    /// Structured view of layer `layer`'s record.
    pub fn packed(&self, layer: usize) -> Result<PackedRecord<'_, T>> {
        PackedRecord::new(&self.geometry, self.record(layer))
    }
}
