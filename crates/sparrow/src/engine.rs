// Engine: single-device sparse DNN inference
//
// Construction loads the whole network once:
//
//   validate config -> read weight file -> find_max_nnz -> LayerGeometry
//   -> pinned WeightStore (pack + validate every layer)
//
// Every configuration error surfaces before the pinned store is allocated.
// Each `infer` call then owns its device resources for its whole duration:
// two weight slots, two activation slots and two streams, all released when
// the call returns on any path.

use std::path::Path;
use std::time::Instant;

use sparrow_core::{
    Backend, BackendDevice, EngineConfig, Element, Error, LayerGeometry, Result,
};

use crate::classify::classify;
use crate::pipeline::{Activation, LayerPipeline, Streams};
use crate::profiler::{ProfileReport, Profiler};
use crate::slots::{ActivationSlot, DoubleBuffer};
use crate::store::WeightStore;

/// Result of one inference call with the pipeline's intermediate facts.
#[derive(Debug, Clone)]
pub struct InferenceOutput<T> {
    /// Predicted class per input, `NO_MATCH` for dead rows.
    pub classes: Vec<i32>,
    /// Active row count of the input batch, then after every layer.
    pub active_rows_per_layer: Vec<usize>,
    /// Final dense `num_inputs x neurons` activations.
    pub activations: Vec<T>,
    /// Stage timings of this call.
    pub profile: ProfileReport,
}

/// A loaded network ready for inference on one device.
pub struct Engine<B: Backend, T: Element> {
    device: B::Device,
    config: EngineConfig,
    store: WeightStore<B, T>,
    load_profile: ProfileReport,
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::io(path, e))
}

impl<B: Backend, T: Element> Engine<B, T> {
    /// Load the network in `weight_path`.
    pub fn new(device: B::Device, weight_path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let path = weight_path.as_ref();
        tracing::info!(path = %path.display(), device = %device.name(), "loading weights");
        let bytes = read_file(path)?;
        Self::from_bytes(device, &bytes, config)
    }

    /// Load a network from weight-file bytes already in memory.
    pub fn from_bytes(device: B::Device, weight_bytes: &[u8], config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut profiler = Profiler::new();
        let start = Instant::now();

        let neurons = config.num_neurons_per_layer;
        let num_layers = config.num_layers;
        let max_nnz = sparrow_data::find_max_nnz(weight_bytes, num_layers, neurons)?;
        let geometry =
            LayerGeometry::for_element::<T>(neurons, max_nnz, device.shared_mem_per_block())?;
        tracing::debug!(
            neurons,
            max_nnz,
            col_blk = geometry.col_blk(),
            n_slab = geometry.n_slab(),
            pad = geometry.pad(),
            record_bytes = geometry.record_bytes(),
            "layer geometry"
        );

        let store = WeightStore::load(&device, weight_bytes, &geometry, num_layers)?;
        profiler.record("load", start.elapsed());
        tracing::info!(
            layers = num_layers,
            bytes = store.size_in_bytes(),
            elapsed = ?start.elapsed(),
            "finished reading DNN layers"
        );

        Ok(Self {
            device,
            config,
            store,
            load_profile: profiler.report(),
        })
    }

    /// Classify every row of the input file; one class per input, in order.
    pub fn infer(&self, input_path: impl AsRef<Path>, num_inputs: usize) -> Result<Vec<i32>> {
        self.infer_detailed(input_path, num_inputs)
            .map(|out| out.classes)
    }

    /// Like [`infer`](Self::infer), also returning per-layer active counts,
    /// the final activations and stage timings.
    pub fn infer_detailed(
        &self,
        input_path: impl AsRef<Path>,
        num_inputs: usize,
    ) -> Result<InferenceOutput<T>> {
        let bytes = read_file(input_path.as_ref())?;
        self.infer_bytes(&bytes, num_inputs)
    }

    /// Run inference over input-file bytes already in memory.
    pub fn infer_bytes(&self, input_bytes: &[u8], num_inputs: usize) -> Result<InferenceOutput<T>> {
        let neurons = self.config.num_neurons_per_layer;
        if num_inputs == 0 || u32::try_from(num_inputs).is_err() {
            return Err(Error::config(format!(
                "num_inputs must be in 1..=u32::MAX, got {num_inputs}"
            )));
        }
        let header = sparrow_data::read_input_header(input_bytes)?;
        if header.inputs as usize != num_inputs {
            return Err(Error::GeometryMismatch {
                what: "input file rows",
                expected: num_inputs,
                got: header.inputs as usize,
            });
        }
        if header.neurons as usize != neurons {
            return Err(Error::GeometryMismatch {
                what: "input file neurons",
                expected: neurons,
                got: header.neurons as usize,
            });
        }

        let mut profiler = Profiler::new();
        let geometry = self.store.geometry();
        let device = &self.device;
        tracing::info!(num_inputs, layers = self.num_layers(), "start inferencing");

        let start = Instant::now();
        let mut weights = DoubleBuffer::try_new(|_| B::alloc_device(device, geometry.record_bytes()))?;
        B::copy_to_device(device, self.store.record(0), weights.current_mut(0))?;

        let mut activations =
            DoubleBuffer::try_new(|_| ActivationSlot::<B, T>::alloc(device, num_inputs, neurons))?;
        let input = activations.current_mut(0);
        let active = sparrow_data::read_inputs_into(
            input_bytes,
            num_inputs,
            neurons,
            &mut input.values,
            &mut input.rlen,
            &mut input.rows,
        )?;
        let streams = Streams::<B>::new(device)?;
        profiler.record("preprocess", start.elapsed());
        tracing::info!(active, elapsed = ?start.elapsed(), "finished preprocessing");

        let pipeline = LayerPipeline {
            device,
            store: &self.store,
            streams: &streams,
            activation: Activation {
                bias: T::from_f64(self.config.bias),
                ymax: T::from_f64(self.config.clamp_max),
            },
        };
        let start = Instant::now();
        let active_rows_per_layer = pipeline.run(&mut weights, &mut activations, active, &mut profiler)?;
        tracing::info!(elapsed = ?start.elapsed(), "finished inferencing");

        let last = activations.current(self.num_layers());
        let classes = profiler.measure("identify", || {
            classify::<B, T>(device, &streams.compute, &last.values, num_inputs, neurons)
        })?;
        tracing::info!(
            elapsed = ?profiler.stage_time("identify"),
            "finished identifying categories"
        );

        Ok(InferenceOutput {
            classes,
            active_rows_per_layer,
            activations: last.values.to_vec(),
            profile: profiler.report(),
        })
    }

    pub fn num_neurons_per_layer(&self) -> usize {
        self.config.num_neurons_per_layer
    }

    pub fn num_layers(&self) -> usize {
        self.config.num_layers
    }

    pub fn bias(&self) -> f64 {
        self.config.bias
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn geometry(&self) -> &LayerGeometry {
        self.store.geometry()
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Timing of the weight load at construction.
    pub fn load_profile(&self) -> &ProfileReport {
        &self.load_profile
    }
}
