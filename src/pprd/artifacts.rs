//! On-disk artifacts for one processed dataset.
//!
//! Tables are CSV with a header row; the embedding matrix is JSON. Every
//! file lives in `<root>/<persona>/<dataset stem>/`.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{info, warn};

use super::{
    diagnostics::{Diagnostics, Silhouette},
    embeddings::{Embedder, Embeddings},
    model::{AssignmentRow, ClusterAssignment, PainPointSummaries, PainPointSummary, Post, Posts},
};

pub const CLEANED_POSTS_FILE: &str = "cleaned_posts.csv";
pub const EMBEDDINGS_FILE: &str = "embeddings.json";
pub const ASSIGNMENT_FILE: &str = "clusters_kmeans_umap.csv";
pub const DIAGNOSTICS_FILE: &str = "cluster_diagnostics_metrics.csv";
pub const VISUALIZATION_FILE: &str = "cluster_visualization.svg";
pub const SUMMARIES_FILE: &str = "pain_point_summaries.csv";

/// Flat CSV form of [`Diagnostics`]. An undefined silhouette is an empty cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DiagnosticsRow {
    silhouette_score: Option<f64>,
    intra_cluster_distance: f64,
    inter_cluster_distance: f64,
    intra_inter_ratio: f64,
    num_clusters: usize,
}

impl From<&Diagnostics> for DiagnosticsRow {
    fn from(d: &Diagnostics) -> Self {
        Self {
            silhouette_score: d.silhouette.score(),
            intra_cluster_distance: d.intra_cluster_distance,
            inter_cluster_distance: d.inter_cluster_distance,
            intra_inter_ratio: d.intra_inter_ratio,
            num_clusters: d.num_clusters,
        }
    }
}

impl From<DiagnosticsRow> for Diagnostics {
    fn from(r: DiagnosticsRow) -> Self {
        Self {
            silhouette: r.silhouette_score.map_or(Silhouette::Undefined, Silhouette::Score),
            intra_cluster_distance: r.intra_cluster_distance,
            inter_cluster_distance: r.inter_cluster_distance,
            intra_inter_ratio: r.intra_inter_ratio,
            num_clusters: r.num_clusters,
        }
    }
}

/// Handle on the artifact directory of one (persona, dataset) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// `<root>/<persona>/<dataset file stem>`, created if necessary.
    pub fn open(root: &Path, persona: &str, dataset: &Path) -> Result<Self> {
        let stem = dataset
            .file_stem()
            .ok_or_else(|| anyhow!("dataset path has no file name: {}", dataset.display()))?;
        Self::at(root.join(persona).join(stem))
    }

    /// Use `dir` directly, creating it if necessary.
    pub fn at(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn visualization_path(&self) -> PathBuf {
        self.path(VISUALIZATION_FILE)
    }

    fn write_table<T: Serialize>(&self, file: &str, rows: impl IntoIterator<Item = T>) -> Result<PathBuf> {
        let path = self.path(file);
        let mut writer =
            csv::Writer::from_path(&path).with_context(|| format!("creating {}", path.display()))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        info!(path = %path.display(), "saved table");
        Ok(path)
    }

    fn read_table<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.path(file);
        let mut reader =
            csv::Reader::from_path(&path).with_context(|| format!("opening {}", path.display()))?;
        reader
            .deserialize()
            .collect::<std::result::Result<Vec<T>, _>>()
            .with_context(|| format!("parsing {}", path.display()))
    }

    pub fn write_cleaned_posts(&self, posts: &Posts) -> Result<PathBuf> {
        self.write_table(CLEANED_POSTS_FILE, posts.iter())
    }

    pub fn read_cleaned_posts(&self) -> Result<Posts> {
        Ok(self.read_table::<Post>(CLEANED_POSTS_FILE)?.into())
    }

    pub fn write_embeddings(&self, embeddings: &Embeddings) -> Result<PathBuf> {
        let path = self.path(EMBEDDINGS_FILE);
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), embeddings)?;
        info!(path = %path.display(), shape = %embeddings.shape(), "saved embeddings");
        Ok(path)
    }

    /// `None` when nothing has been cached yet.
    pub fn read_embeddings(&self) -> Result<Option<Embeddings>> {
        let path = self.path(EMBEDDINGS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let embeddings = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(embeddings))
    }

    /// Cached embeddings if they line up with `posts`, otherwise embed the
    /// cleaned texts and cache the result.
    pub fn load_or_generate_embeddings<E: Embedder + ?Sized>(
        &self,
        embedder: &E,
        posts: &Posts,
    ) -> Result<Embeddings> {
        if let Some(cached) = self.read_embeddings()? {
            let shape = cached.shape();
            if shape.rows() == posts.len() && shape.columns() == embedder.dimension() {
                info!(shape = %shape, "using cached embeddings");
                return Ok(cached);
            }
            warn!(
                cached = %shape,
                posts = posts.len(),
                dimension = embedder.dimension(),
                "cached embeddings do not match posts; regenerating"
            );
        }
        let embeddings = embedder.embed(&posts.cleaned_texts())?;
        self.write_embeddings(&embeddings)?;
        Ok(embeddings)
    }

    pub fn write_assignment(&self, assignment: &ClusterAssignment) -> Result<PathBuf> {
        self.write_table(ASSIGNMENT_FILE, assignment.rows())
    }

    /// Rows of the assignment table, in file order.
    pub fn read_assignment_rows(&self) -> Result<Vec<AssignmentRow>> {
        self.read_table(ASSIGNMENT_FILE)
    }

    pub fn write_diagnostics(&self, diagnostics: &Diagnostics) -> Result<PathBuf> {
        self.write_table(DIAGNOSTICS_FILE, [DiagnosticsRow::from(diagnostics)])
    }

    pub fn read_diagnostics(&self) -> Result<Diagnostics> {
        self.read_table::<DiagnosticsRow>(DIAGNOSTICS_FILE)?
            .into_iter()
            .next()
            .map(Diagnostics::from)
            .ok_or_else(|| anyhow!("{} is empty", DIAGNOSTICS_FILE))
    }

    pub fn write_summaries(&self, summaries: &PainPointSummaries) -> Result<PathBuf> {
        self.write_table(SUMMARIES_FILE, summaries.iter())
    }

    pub fn read_summaries(&self) -> Result<PainPointSummaries> {
        Ok(self
            .read_table::<PainPointSummary>(SUMMARIES_FILE)?
            .into_iter()
            .collect())
    }

    /// Cluster count of the last run, from its diagnostics or, failing
    /// that, its summaries.
    pub fn saved_cluster_count(&self) -> Result<usize> {
        if self.path(DIAGNOSTICS_FILE).exists() {
            return Ok(self.read_diagnostics()?.num_clusters);
        }
        if self.path(SUMMARIES_FILE).exists() {
            return Ok(self.read_summaries()?.len());
        }
        Err(anyhow!(
            "no saved diagnostics or summaries in {}; pass the cluster count explicitly",
            self.dir.display()
        ))
    }

    /// Drop everything derived from a clustering run.
    pub fn clear_cluster_outputs(&self) -> Result<()> {
        for file in [ASSIGNMENT_FILE, DIAGNOSTICS_FILE, VISUALIZATION_FILE, SUMMARIES_FILE] {
            let path = self.path(file);
            if path.exists() {
                fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::pprd::model::{ClusterLabel, PostId};

    struct CountingEmbedder {
        calls: Cell<usize>,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Embeddings> {
            self.calls.set(self.calls.get() + 1);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect::<Vec<_>>().into())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn posts() -> Posts {
        ["a", "bb", "ccc"]
            .iter()
            .map(|id| Post {
                post_id: PostId::from(*id),
                title: format!("title {}", id),
                selftext: "body, with \"quotes\"\nand lines".into(),
                combined_text: format!("title {}\nbody", id),
                cleaned_text: format!("title {} body", id),
            })
            .collect()
    }

    #[test]
    fn test_open_uses_dataset_stem() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(root.path(), "vibecoding", Path::new("/x/reddit_cursor_hot_500.json")).unwrap();
        assert_eq!(store.dir(), root.path().join("vibecoding").join("reddit_cursor_hot_500"));
        assert!(store.dir().is_dir());
    }

    #[test]
    fn test_cleaned_posts_table() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::at(root.path().to_path_buf()).unwrap();
        store.write_cleaned_posts(&posts()).unwrap();

        let header = fs::read_to_string(store.path(CLEANED_POSTS_FILE)).unwrap();
        assert!(header.starts_with("post_id,title,selftext,combined_text,cleaned_text\n"));
        assert_eq!(store.read_cleaned_posts().unwrap(), posts());
    }

    #[test]
    fn test_embeddings_cache() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::at(root.path().to_path_buf()).unwrap();
        let embedder = CountingEmbedder { calls: Cell::new(0) };

        let first = store.load_or_generate_embeddings(&embedder, &posts()).unwrap();
        let second = store.load_or_generate_embeddings(&embedder, &posts()).unwrap();
        assert_eq!(first, second);
        assert_eq!(embedder.calls.get(), 1);

        // A different post count invalidates the cache.
        let fewer: Posts = posts().iter().take(2).cloned().collect();
        let third = store.load_or_generate_embeddings(&embedder, &fewer).unwrap();
        assert_eq!(third.len(), 2);
        assert_eq!(embedder.calls.get(), 2);
    }

    #[test]
    fn test_diagnostics_with_sentinels() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::at(root.path().to_path_buf()).unwrap();
        let diagnostics = Diagnostics {
            silhouette: Silhouette::Undefined,
            intra_cluster_distance: 0.0,
            inter_cluster_distance: 0.0,
            intra_inter_ratio: f64::INFINITY,
            num_clusters: 1,
        };
        assert!(store.saved_cluster_count().is_err());
        store.write_diagnostics(&diagnostics).unwrap();
        assert_eq!(store.saved_cluster_count().unwrap(), 1);

        let text = fs::read_to_string(store.path(DIAGNOSTICS_FILE)).unwrap();
        assert!(text.starts_with(
            "silhouette_score,intra_cluster_distance,inter_cluster_distance,intra_inter_ratio,num_clusters\n"
        ));
        assert_eq!(store.read_diagnostics().unwrap(), diagnostics);
    }

    #[test]
    fn test_assignment_and_summaries() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::at(root.path().to_path_buf()).unwrap();
        let p = posts();
        let labels = [1usize, 0, 1].map(ClusterLabel::from).to_vec();
        let assignment = ClusterAssignment::new(p.post_ids(), labels, 2).unwrap();
        store.write_assignment(&assignment).unwrap();

        let text = fs::read_to_string(store.path(ASSIGNMENT_FILE)).unwrap();
        assert_eq!(text, "post_id,cluster_label\na,1\nbb,0\nccc,1\n");
        assert_eq!(store.read_assignment_rows().unwrap(), assignment.rows());

        let summaries: PainPointSummaries = vec![PainPointSummary {
            cluster_label: ClusterLabel::from(0),
            num_posts: 1,
            summary_text: "Users, sadly, wait.".into(),
        }]
        .into();
        store.write_summaries(&summaries).unwrap();
        assert_eq!(store.read_summaries().unwrap(), summaries);

        store.clear_cluster_outputs().unwrap();
        assert!(!store.path(ASSIGNMENT_FILE).exists());
        assert!(!store.path(SUMMARIES_FILE).exists());
    }
}
