//! Tunables for the graph stores, the spatial helpers and the router.
//!
//! Nothing here is global: every value is passed explicitly into the call
//! that needs it. `EngineConfig` bundles them for loading from TOML.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Hilbert grid steps per axis used when no other precision is given.
pub const DEFAULT_HILBERT_STEPS: u32 = 1 << 15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Vertex slots added whenever the vertex table is full.
    pub vertex_increment: u32,
    /// Edge slots added whenever the edge table is full.
    pub edge_increment: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            vertex_increment: 1024,
            edge_increment: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub hilbert_steps: u32,
    /// Box searches covering more grid cells than this scan all vertices.
    pub max_box_cells: u64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            hilbert_steps: DEFAULT_HILBERT_STEPS,
            max_box_cells: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub max_weight: f32,
    pub max_settles: usize,
    /// Half-width in degrees of the box used to resolve coordinates.
    pub search_offset: f32,
    /// Distances (meters) below this count as an exact hit.
    pub closest_epsilon: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_weight: f32::MAX,
            max_settles: usize::MAX,
            search_offset: 0.01,
            closest_epsilon: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractionConfig {
    pub witness_settle_limit: usize,
}

impl Default for ContractionConfig {
    fn default() -> Self {
        Self {
            witness_settle_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub graph: GraphConfig,
    pub spatial: SpatialConfig,
    pub router: RouterConfig,
    pub contraction: ContractionConfig,
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [spatial]
            hilbert_steps = 16

            [router]
            max_settles = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.spatial.hilbert_steps, 16);
        assert_eq!(config.spatial.max_box_cells, 4096);
        assert_eq!(config.router.max_settles, 1000);
        assert_eq!(config.router.max_weight, f32::MAX);
        assert_eq!(config.graph, GraphConfig::default());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("[router]\nmax_settles = \"many\"").unwrap_err();
        assert!(matches!(err, crate::GraphError::Config(_)));
    }
}
