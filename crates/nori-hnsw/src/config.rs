//! HNSW tuning parameters.

use crate::error::{HnswError, Result};
use serde::{Deserialize, Serialize};

/// Largest accepted `max_connections`.
pub const MAX_CONNECTIONS_LIMIT: usize = 65_535;

/// Largest accepted `max_layers`; levels are stored in a single byte.
pub const MAX_LAYERS_LIMIT: usize = 64;

/// HNSW configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Max connections per node on layers above 0 (M parameter).
    /// Layer 0 allows twice as many.
    /// Default: 16
    pub max_connections: usize,

    /// Beam width during construction (ef_construction).
    /// Higher = better quality, slower build.
    /// Default: 200
    pub ef_construction: usize,

    /// Beam width during search (ef_search).
    /// Higher = better recall, slower search.
    /// Default: 50
    pub ef_search: usize,

    /// Maximum number of layers. Assigned levels are capped at `max_layers - 1`.
    /// Default: 16 (supports ~10^7 vectors at M=16)
    pub max_layers: usize,

    /// Seed for level assignment. `None` draws from OS entropy.
    /// Not persisted.
    pub seed: Option<u64>,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            ef_search: 50,
            max_layers: 16,
            seed: None,
        }
    }
}

impl HnswConfig {
    /// Config with explicit tuning values and defaults for the rest.
    pub fn with_tuning(max_connections: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            max_connections,
            ef_construction,
            ef_search,
            ..Default::default()
        }
    }

    /// Check every parameter against its accepted range.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONNECTIONS_LIMIT).contains(&self.max_connections) {
            return Err(HnswError::InvalidParameter(format!(
                "max_connections must be in [1, {}], got {}",
                MAX_CONNECTIONS_LIMIT, self.max_connections
            )));
        }
        if self.ef_construction < 1 {
            return Err(HnswError::InvalidParameter(format!(
                "ef_construction must be >= 1, got {}",
                self.ef_construction
            )));
        }
        if self.ef_search < 1 {
            return Err(HnswError::InvalidParameter(format!(
                "ef_search must be >= 1, got {}",
                self.ef_search
            )));
        }
        if !(1..=MAX_LAYERS_LIMIT).contains(&self.max_layers) {
            return Err(HnswError::InvalidParameter(format!(
                "max_layers must be in [1, {}], got {}",
                MAX_LAYERS_LIMIT, self.max_layers
            )));
        }
        Ok(())
    }

    /// Max connections in layer 0 (M_max0 = 2*M).
    pub fn m_max0(&self) -> usize {
        self.max_connections * 2
    }

    /// Neighbor capacity at a given layer.
    pub fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0()
        } else {
            self.max_connections
        }
    }

    /// Level multiplier m_L = 1/ln(M).
    ///
    /// M=1 would divide by zero, so it uses the M=2 multiplier.
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.max_connections.max(2) as f64).ln()
    }

    /// True if the parameters that shape the stored graph match.
    pub(crate) fn same_structure(&self, other: &HnswConfig) -> bool {
        self.max_connections == other.max_connections
            && self.ef_construction == other.ef_construction
            && self.max_layers == other.max_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults_are_valid() {
        let config = HnswConfig::default();
        config.validate().unwrap();
        assert_eq!(config.m_max0(), 32);
        assert_eq!(config.max_degree(0), 32);
        assert_eq!(config.max_degree(3), 16);
    }

    #[test]
    fn test_validate_ranges() {
        let bad = [
            HnswConfig::with_tuning(0, 200, 50),
            HnswConfig::with_tuning(65_536, 200, 50),
            HnswConfig::with_tuning(16, 0, 50),
            HnswConfig::with_tuning(16, 200, 0),
            HnswConfig {
                max_layers: 0,
                ..Default::default()
            },
            HnswConfig {
                max_layers: 65,
                ..Default::default()
            },
        ];

        for config in bad {
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter, "{:?}", config);
        }

        HnswConfig::with_tuning(1, 1, 1).validate().unwrap();
        HnswConfig::with_tuning(65_535, 1, 1).validate().unwrap();
    }

    #[test]
    fn test_level_multiplier() {
        let config = HnswConfig::default();
        assert!((config.level_multiplier() - 1.0 / 16f64.ln()).abs() < 1e-12);

        // M=1 falls back to the M=2 multiplier instead of dividing by zero
        let single = HnswConfig::with_tuning(1, 10, 10);
        assert!(single.level_multiplier().is_finite());
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: HnswConfig = serde_json::from_str(r#"{"max_connections": 8}"#).unwrap();
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.ef_construction, 200);
        assert_eq!(config.ef_search, 50);
        assert_eq!(config.seed, None);
    }
}
