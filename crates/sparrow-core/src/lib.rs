//! # sparrow-core
//!
//! Core types of the sparrow sparse DNN inference engine.
//!
//! This crate provides:
//! - [`DType`] / [`Element`]: element types (`f32`, `f64`)
//! - [`LayerGeometry`]: column-slab sizing and packed record layout
//! - [`PackedRecord`] / [`PackedRecordMut`]: views over one layer's packed weights
//! - [`compact_rows`]: active-row compaction
//! - [`argmax_class`] / [`NO_MATCH`]: the class selection rule
//! - [`Backend`] trait: abstraction over the accelerator (CPU, CUDA)
//! - [`EngineConfig`]: construction parameters

pub mod backend;
pub mod batch;
pub mod classify;
pub mod config;
pub mod dtype;
pub mod error;
pub mod geometry;
pub mod record;

pub use backend::{Backend, BackendDevice, HostBuffer, PropagateArgs};
pub use batch::{compact_rows, is_compacted};
pub use classify::{argmax_class, NO_MATCH};
pub use config::EngineConfig;
pub use dtype::{DType, Element, Scalar};
pub use error::{Error, ErrorKind, Result};
pub use geometry::{select_col_blk, LayerGeometry, INDEX_SIZE};
pub use record::{PackedRecord, PackedRecordMut};
