use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// Engine configuration
//
// Defaults follow the sparse DNN GraphChallenge: 1024 neurons per layer,
// 120 layers, bias -0.3, activations clamped to [0, 32].

/// Construction parameters of an inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Neurons per layer (width of every weight matrix).
    pub num_neurons_per_layer: usize,
    /// Number of layers in the weight file.
    pub num_layers: usize,
    /// Bias added to every output neuron of every layer.
    pub bias: f64,
    /// Upper clamp of the activation rule.
    pub clamp_max: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_neurons_per_layer: 1024,
            num_layers: 120,
            bias: -0.3,
            clamp_max: 32.0,
        }
    }
}

impl EngineConfig {
    pub fn with_neurons(mut self, num_neurons_per_layer: usize) -> Self {
        self.num_neurons_per_layer = num_neurons_per_layer;
        self
    }

    pub fn with_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_clamp_max(mut self, clamp_max: f64) -> Self {
        self.clamp_max = clamp_max;
        self
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_neurons_per_layer == 0 {
            return Err(Error::config("num_neurons_per_layer must be positive"));
        }
        if u32::try_from(self.num_neurons_per_layer).is_err() {
            return Err(Error::config(format!(
                "num_neurons_per_layer {} does not fit 32-bit indices",
                self.num_neurons_per_layer
            )));
        }
        if self.num_layers == 0 {
            return Err(Error::config("num_layers must be positive"));
        }
        if !self.bias.is_finite() {
            return Err(Error::config(format!("bias must be finite, got {}", self.bias)));
        }
        if !(self.clamp_max > 0.0) {
            return Err(Error::config(format!(
                "clamp_max must be positive, got {}",
                self.clamp_max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.num_neurons_per_layer, 1024);
        assert_eq!(c.num_layers, 120);
        assert_eq!(c.bias, -0.3);
        c.validate().unwrap();
    }

    #[test]
    fn test_toml_partial_override() {
        let c = EngineConfig::from_toml_str("num_layers = 480\nbias = -0.45\n").unwrap();
        assert_eq!(c.num_layers, 480);
        assert_eq!(c.bias, -0.45);
        assert_eq!(c.num_neurons_per_layer, 1024);
        assert_eq!(c.clamp_max, 32.0);
    }

    #[test]
    fn test_toml_rejects_unknown_and_invalid() {
        assert!(EngineConfig::from_toml_str("neurons = 4").is_err());
        assert!(EngineConfig::from_toml_str("num_layers = 0").is_err());
    }

    #[test]
    fn test_builder() {
        let c = EngineConfig::default()
            .with_neurons(4)
            .with_layers(2)
            .with_bias(0.0)
            .with_clamp_max(f64::MAX);
        assert_eq!((c.num_neurons_per_layer, c.num_layers), (4, 2));
        c.validate().unwrap();
        assert!(c.with_clamp_max(0.0).validate().is_err());
    }
}
