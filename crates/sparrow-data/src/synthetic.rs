// Synthetic networks and inputs
//
// Random sparse networks for benchmarks and tests. Every output neuron of
// every layer draws `fan_in` distinct input neurons; inputs are binary
// images with a given pixel density, like the GraphChallenge MNIST set.
// Generation is deterministic for a given seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sparrow_core::Element;

/// Parameters of a synthetic network and input batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub neurons: usize,
    pub layers: usize,
    /// Nonzeros per output neuron per layer.
    pub fan_in: usize,
    /// Weights are drawn uniformly from `weight_range.0..weight_range.1`.
    pub weight_range: (f64, f64),
    pub num_inputs: usize,
    /// Probability that an input pixel is set.
    pub input_density: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            neurons: 1024,
            layers: 120,
            fan_in: 32,
            weight_range: (-0.25, 1.0),
            num_inputs: 60_000,
            input_density: 0.2,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    pub fn new(neurons: usize, layers: usize) -> Self {
        Self {
            neurons,
            layers,
            ..Self::default()
        }
    }

    pub fn fan_in(mut self, fan_in: usize) -> Self {
        self.fan_in = fan_in;
        self
    }

    pub fn weight_range(mut self, low: f64, high: f64) -> Self {
        self.weight_range = (low, high);
        self
    }

    pub fn num_inputs(mut self, n: usize) -> Self {
        self.num_inputs = n;
        self
    }

    pub fn input_density(mut self, density: f64) -> Self {
        self.input_density = density;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Per-layer `(row, col, value)` entries.
    pub fn network<T: Element>(&self) -> Vec<Vec<(u32, u32, T)>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let fan_in = self.fan_in.min(self.neurons);
        let (low, high) = self.weight_range;
        (0..self.layers)
            .map(|_| {
                let mut layer = Vec::with_capacity(self.neurons * fan_in);
                for col in 0..self.neurons {
                    for row in rand::seq::index::sample(&mut rng, self.neurons, fan_in) {
                        let w = if low < high { rng.gen_range(low..high) } else { low };
                        layer.push((row as u32, col as u32, T::from_f64(w)));
                    }
                }
                layer
            })
            .collect()
    }

    /// Input entries with value 1 at each set pixel.
    pub fn inputs<T: Element>(&self) -> Vec<(u32, u32, T)> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ 0x5eed_1e55);
        let p = self.input_density.clamp(0.0, 1.0);
        let mut entries = Vec::new();
        for row in 0..self.num_inputs {
            for col in 0..self.neurons {
                if rng.gen_bool(p) {
                    entries.push((row as u32, col as u32, T::one()));
                }
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_network_shape_and_determinism() {
        let cfg = SyntheticConfig::new(16, 3).fan_in(4).seed(7);
        let a = cfg.network::<f32>();
        let b = cfg.network::<f32>();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        for layer in &a {
            assert_eq!(layer.len(), 16 * 4);
            for col in 0..16u32 {
                let rows: HashSet<u32> = layer
                    .iter()
                    .filter(|e| e.1 == col)
                    .map(|e| e.0)
                    .collect();
                assert_eq!(rows.len(), 4);
            }
        }
    }

    #[test]
    fn test_fan_in_is_capped() {
        let net = SyntheticConfig::new(4, 1).fan_in(10).network::<f64>();
        assert_eq!(net[0].len(), 16);
    }

    #[test]
    fn test_inputs() {
        let cfg = SyntheticConfig::new(8, 1).num_inputs(5).input_density(1.0);
        let inputs = cfg.inputs::<f32>();
        assert_eq!(inputs.len(), 40);
        assert!(inputs.iter().all(|e| e.2 == 1.0));
        let none = cfg.input_density(0.0).inputs::<f32>();
        assert!(none.is_empty());
    }
}
