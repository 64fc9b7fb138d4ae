//! # sparrow-data
//!
//! Network and input files for sparrow.
//!
//! This crate provides:
//! - [`find_max_nnz`] / [`read_weights_into`]: the weight-file reader that
//!   packs every layer into the engine's pinned weight store
//! - [`read_inputs_into`]: the input-file reader producing the initial
//!   activation batch
//! - [`encode_weights`] / [`encode_inputs`]: writers for both formats
//! - [`tsv`]: GraphChallenge TSV conversion
//! - [`golden`]: truth-category files and scoring
//! - [`SyntheticConfig`]: seeded random networks and inputs

pub mod format;
pub mod golden;
pub mod inputs;
pub mod synthetic;
pub mod tsv;
pub mod weights;

pub use format::{InputHeader, WeightHeader, FORMAT_VERSION, INPUT_MAGIC, WEIGHT_MAGIC};
pub use golden::{matches_categories, read_categories};
pub use inputs::{encode_inputs, read_input_header, read_inputs_into};
pub use synthetic::SyntheticConfig;
pub use weights::{encode_weights, find_max_nnz, read_weight_header, read_weights_into};
