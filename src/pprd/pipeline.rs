//! End-to-end runs over one dataset.
//!
//! Collaborators (embedder, visualizer, LLM) are built by the caller and
//! lent to [`Pipeline`]; nothing here constructs a model.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use ndarray::Array2;
use tracing::{info, warn};

use super::{
    artifacts::ArtifactStore,
    diagnostics::{Diagnostics, compute_diagnostics},
    embeddings::Embedder,
    error::PipelineError,
    model::{ClusterAssignment, PainPointSummaries, PostId, Posts},
    partition::KMeansPartitioner,
    preprocess::load_reddit_posts,
    reduce::{MIN_NEIGHBORS, UmapReducer},
    report::{DocumentAssembler, PrdDocument, PrdGenerator, parse_cluster_selection},
    summarize::{LanguageModel, Summarizer},
};
use crate::{config::PipelineConfig, display::viz::Visualizer};

/// Everything a [`Pipeline::run`] produced.
#[derive(Debug)]
pub struct PipelineOutput {
    pub store: ArtifactStore,
    pub posts: Posts,
    pub assignment: ClusterAssignment,
    pub diagnostics: Diagnostics,
    /// `None` when there were too few posts to lay out in 2-D.
    pub visualization: Option<PathBuf>,
    /// `None` when the run had no language model.
    pub summaries: Option<PainPointSummaries>,
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    embedder: &'a dyn Embedder,
    visualizer: &'a dyn Visualizer,
    llm: Option<&'a dyn LanguageModel>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        embedder: &'a dyn Embedder,
        visualizer: &'a dyn Visualizer,
    ) -> Self {
        Self {
            config,
            embedder,
            visualizer,
            llm: None,
        }
    }

    /// Summarise clusters with `llm` at the end of each run.
    pub fn with_llm(self, llm: &'a dyn LanguageModel) -> Self {
        Self {
            llm: Some(llm),
            ..self
        }
    }

    /// Artifact directory for `persona` and `dataset` under the configured
    /// output root.
    pub fn store(&self, persona: &str, dataset: &Path) -> Result<ArtifactStore> {
        ArtifactStore::open(&self.config.output_root()?, persona, dataset)
    }

    /// Load, clean, embed, cluster, diagnose, plot and (optionally)
    /// summarise `dataset`, writing every artifact along the way.
    ///
    /// The group count is checked against the post count before anything
    /// is written.
    pub fn run(&self, persona: &str, dataset: &Path) -> Result<PipelineOutput> {
        let posts = load_reddit_posts(dataset)?;
        let k = self.config.n_clusters.get();
        if posts.len() < k {
            return Err(PipelineError::InsufficientData {
                posts: posts.len(),
                k,
            }
            .into());
        }

        let store = self.store(persona, dataset)?;
        info!(persona, dir = %store.dir().display(), posts = posts.len(), k, "starting run");
        store.clear_cluster_outputs()?;
        store.write_cleaned_posts(&posts)?;

        let embeddings = store.load_or_generate_embeddings(self.embedder, &posts)?;
        let matrix = embeddings.to_f64_matrix()?;

        let assignment = self.cluster(&matrix, posts.post_ids())?;
        store.write_assignment(&assignment)?;
        info!(sizes = ?assignment.cluster_sizes(), "clustered posts");

        // Diagnostics are measured in the full embedding space.
        let diagnostics = compute_diagnostics(&matrix, assignment.labels(), k)?;
        store.write_diagnostics(&diagnostics)?;
        info!(
            silhouette = %diagnostics.silhouette,
            ratio = diagnostics.intra_inter_ratio,
            "computed diagnostics"
        );

        let visualization = if matrix.nrows() > MIN_NEIGHBORS {
            let coords = UmapReducer::new(self.config.plot_umap()).reduce(&matrix)?;
            Some(self.visualizer.render(
                &coords,
                assignment.labels(),
                k,
                assignment.post_ids(),
                &store.visualization_path(),
            )?)
        } else {
            warn!(posts = matrix.nrows(), "too few posts for a 2-D layout; skipping plot");
            None
        };

        let summaries = match self.llm {
            Some(llm) => {
                let summaries = Summarizer::new(llm)?.summarize_all(&posts, &assignment)?;
                store.write_summaries(&summaries)?;
                Some(summaries)
            }
            None => None,
        };

        Ok(PipelineOutput {
            store,
            posts,
            assignment,
            diagnostics,
            visualization,
            summaries,
        })
    }

    /// Reduce to the configured intermediate width, then partition.
    ///
    /// A single group needs no reduction. Inputs too small for the
    /// reducer's neighbourhood graph are partitioned in the full space.
    pub fn cluster(&self, matrix: &Array2<f64>, post_ids: Vec<PostId>) -> Result<ClusterAssignment> {
        let k = self.config.n_clusters.get();
        let partitioner = KMeansPartitioner::new(self.config.partition());
        let labels = if k == 1 {
            partitioner.partition(matrix)?
        } else if matrix.nrows() <= MIN_NEIGHBORS {
            warn!(
                posts = matrix.nrows(),
                "too few posts to reduce; partitioning full embeddings"
            );
            partitioner.partition(matrix)?
        } else {
            let reduced = UmapReducer::new(self.config.cluster_umap()).reduce(matrix)?;
            partitioner.partition(&reduced)?
        };
        Ok(ClusterAssignment::new(post_ids, labels, k)?)
    }
}

/// Recompute diagnostics from the cached embeddings and the saved
/// assignment of an earlier run. Without an explicit `k` the cluster count
/// of that run is used.
pub fn rediagnose(store: &ArtifactStore, k: Option<usize>) -> Result<Diagnostics> {
    let k = match k {
        Some(k) => k,
        None => store.saved_cluster_count()?,
    };
    let embeddings = store
        .read_embeddings()?
        .ok_or_else(|| anyhow!("no cached embeddings in {}", store.dir().display()))?;
    let assignment = ClusterAssignment::from_rows(store.read_assignment_rows()?, k)?;
    let diagnostics =
        compute_diagnostics(&embeddings.to_f64_matrix()?, assignment.labels(), k)?;
    store.write_diagnostics(&diagnostics)?;
    Ok(diagnostics)
}

/// Draft a PRD from the saved summaries of an earlier run. `selection` is
/// the user's comma-separated list of 1-based cluster numbers.
pub fn draft_prd<L, A>(
    store: &ArtifactStore,
    llm: &L,
    assembler: &A,
    persona_name: &str,
    selection: &str,
) -> Result<(PrdDocument, Vec<PathBuf>)>
where
    L: LanguageModel + ?Sized,
    A: DocumentAssembler + ?Sized,
{
    let summaries = store.read_summaries()?;
    let labels = parse_cluster_selection(selection, summaries.len());
    if labels.is_empty() {
        bail!(
            "no valid cluster numbers in {:?}; expected values between 1 and {}",
            selection,
            summaries.len()
        );
    }
    let dataset = store
        .dir()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let doc = PrdGenerator::new(llm)?.generate(persona_name, &dataset, &summaries, &labels)?;
    let written = assembler.assemble(&doc, store.dir())?;
    Ok((doc, written))
}
