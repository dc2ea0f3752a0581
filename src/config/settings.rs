use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pprd::{
    embeddings::SentenceEmbeddingsModelType,
    model::ClusterCount,
    partition::PartitionParams,
    reduce::UmapParams,
};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_LLM_MODEL: &str = "gemini-1.5-flash";

/// Tunables for one pipeline run. Every field has a default, so a config
/// file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub n_clusters: ClusterCount,
    /// Width of the reduced space the partitioner works in.
    pub n_components: usize,
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub n_epochs: usize,
    pub seed: u64,
    pub model: SentenceEmbeddingsModelType,
    pub llm_model: String,
    pub output_root: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_clusters: ClusterCount::try_new(10).unwrap_or(ClusterCount::MIN),
            n_components: 10,
            n_neighbors: 15,
            min_dist: 0.1,
            n_epochs: 200,
            seed: 42,
            model: SentenceEmbeddingsModelType::default(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            output_root: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// `output_root`, or the platform data dir when unset.
    pub fn output_root(&self) -> Result<PathBuf> {
        match &self.output_root {
            Some(root) => Ok(root.clone()),
            None => super::default_output_root(),
        }
    }

    /// Reducer settings for the partitioner's input space.
    pub fn cluster_umap(&self) -> UmapParams {
        self.umap(self.n_components)
    }

    /// Reducer settings for the 2-D plot.
    pub fn plot_umap(&self) -> UmapParams {
        self.umap(2)
    }

    fn umap(&self, n_components: usize) -> UmapParams {
        UmapParams::new(n_components, self.seed)
            .with_neighbors(self.n_neighbors)
            .with_min_dist(self.min_dist)
            .with_epochs(self.n_epochs)
    }

    pub fn partition(&self) -> PartitionParams {
        PartitionParams::new(self.n_clusters, self.seed)
    }
}
