//! # Sparrow
//!
//! Sparse deep-neural-network inference on a single accelerator.
//!
//! A network is a stack of sparse weight matrices. Sparrow packs every layer
//! into a fixed-size column-blocked record held in pinned host memory, then
//! streams the records through a double-buffered pipeline: while layer `l`
//! is propagated on the compute stream, layer `l + 1` is uploaded on the
//! transfer stream. After each layer the rows that died out are dropped from
//! the active set, so later layers only pay for live inputs.
//!
//! ## Usage
//!
//! ```no_run
//! use sparrow::prelude::*;
//!
//! # fn main() -> sparrow::Result<()> {
//! let config = EngineConfig::default().with_neurons(1024).with_layers(120);
//! let engine = Engine::<CpuBackend, f32>::new(CpuDevice::new(), "n1024.spwt", config)?;
//! let classes = engine.infer("sparse-images-1024.spin", 60_000)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `sparrow-core` | Element types, errors, layer geometry, packed records, Backend trait |
//! | `sparrow-cpu` | Host backend with rayon kernels |
//! | `sparrow-cuda` | CUDA backend (feature-gated) |
//! | `sparrow-data` | Weight/input file readers and writers, TSV conversion, golden files |

pub use sparrow_core::{
    argmax_class, compact_rows, Backend, BackendDevice, DType, EngineConfig, Element, Error,
    ErrorKind, LayerGeometry, PackedRecord, Result, NO_MATCH,
};

/// Re-export CPU backend.
pub use sparrow_cpu::{CpuBackend, CpuDevice};

/// Re-export CUDA backend (requires `cuda` feature + NVIDIA CUDA Toolkit).
#[cfg(feature = "cuda")]
pub use sparrow_cuda::{CudaBackend, CudaDevice};

/// Re-export the file formats and dataset tooling.
pub mod data {
    pub use sparrow_data::*;
}

/// Final class selection stage.
pub mod classify;

/// The inference engine.
pub mod engine;

/// The per-layer control loop.
pub mod pipeline;

/// Stage timings.
pub mod profiler;

/// Parity-indexed slot pairs and activation slots.
pub mod slots;

/// Pinned storage of all packed layers.
pub mod store;

pub use engine::{Engine, InferenceOutput};

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::engine::{Engine, InferenceOutput};
    pub use crate::profiler::{ProfileReport, Profiler};
    pub use crate::{CpuBackend, CpuDevice, DType, EngineConfig, Error, Result, NO_MATCH};
}
