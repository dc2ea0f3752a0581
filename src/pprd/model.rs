use std::{collections::BTreeMap, fmt::Display};

use derive_more::{AsRef, Deref, Display, From, Into, IntoIterator};
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};

/// Identifier of a Reddit submission. Taken from the source's `id` field.
#[derive(
    Default,
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
    AsRef,
    From,
)]
#[as_ref(str, String)]
#[serde(transparent)]
pub struct PostId {
    inner: String,
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        Self {
            inner: value.to_owned(),
        }
    }
}

/// One Reddit submission, after cleaning. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: PostId,
    pub title: String,
    pub selftext: String,
    pub combined_text: String,
    pub cleaned_text: String,
}

/// Posts in dataset order. Row `i` of every downstream matrix belongs to
/// post `i` of this collection.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, From, IntoIterator, Deref,
)]
#[serde(transparent)]
#[into_iterator(owned, ref)]
pub struct Posts(Vec<Post>);

impl FromIterator<Post> for Posts {
    fn from_iter<T: IntoIterator<Item = Post>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Posts {
    pub fn post_ids(&self) -> Vec<PostId> {
        self.0.iter().map(|p| p.post_id.clone()).collect()
    }

    /// The text fed to the embedder.
    pub fn cleaned_texts(&self) -> Vec<String> {
        self.0.iter().map(|p| p.cleaned_text.clone()).collect()
    }
}

/// Zero-based, contiguous cluster label. Humans see `label + 1`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    From,
    Into,
    Display,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ClusterLabel(usize);

impl ClusterLabel {
    pub fn index(&self) -> usize {
        self.0
    }

    /// The 1-based number shown on display surfaces.
    pub fn display_id(&self) -> usize {
        self.0 + 1
    }

    /// Inverse of [`ClusterLabel::display_id`]. `None` for 0.
    pub fn from_display_id(display_id: usize) -> Option<Self> {
        display_id.checked_sub(1).map(Self)
    }
}

/// Newtype for the requested group count, which must be at least 1.
#[derive(
    Debug, Copy, Clone, Hash, PartialEq, Eq, Into, AsRef, Deref, Serialize, Deserialize, Display,
)]
#[serde(try_from = "usize", into = "usize")]
pub struct ClusterCount(usize);

impl ClusterCount {
    pub const MIN: ClusterCount = ClusterCount(1);

    /// Panics if `k < ClusterCount::MIN`.
    fn new_unchecked(k: usize) -> Self {
        assert!(k >= Self::MIN.0, "invalid cluster count {}; must be >= {}", k, Self::MIN);
        Self(k)
    }

    pub fn try_new(k: usize) -> Result<Self> {
        if k < Self::MIN.0 {
            Err(PipelineError::InvalidParameter(format!(
                "invalid cluster count {}; must be >= {}",
                k,
                Self::MIN
            )))
        } else {
            Ok(Self::new_unchecked(k))
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for ClusterCount {
    type Error = PipelineError;

    fn try_from(value: usize) -> std::result::Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

/// Row of the cluster assignment table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub post_id: PostId,
    pub cluster_label: ClusterLabel,
}

/// Mapping of posts (in dataset order) to contiguous cluster labels.
///
/// Labels always live in `0..num_clusters`. Groups that received no posts
/// are still numbered; they simply have no members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    post_ids: Vec<PostId>,
    labels: Vec<ClusterLabel>,
    num_clusters: usize,
}

impl ClusterAssignment {
    pub fn new(post_ids: Vec<PostId>, labels: Vec<ClusterLabel>, num_clusters: usize) -> Result<Self> {
        if post_ids.len() != labels.len() {
            return Err(PipelineError::ShapeMismatch {
                expected: post_ids.len(),
                actual: labels.len(),
            });
        }
        if let Some(bad) = labels.iter().find(|l| l.index() >= num_clusters) {
            return Err(PipelineError::InvalidParameter(format!(
                "cluster label {} out of range for {} clusters",
                bad, num_clusters
            )));
        }
        Ok(Self {
            post_ids,
            labels,
            num_clusters,
        })
    }

    /// Rebuild an assignment from persisted rows.
    pub fn from_rows(rows: Vec<AssignmentRow>, num_clusters: usize) -> Result<Self> {
        let (post_ids, labels) = rows
            .into_iter()
            .map(|r| (r.post_id, r.cluster_label))
            .unzip();
        Self::new(post_ids, labels, num_clusters)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn labels(&self) -> &[ClusterLabel] {
        &self.labels
    }

    pub fn post_ids(&self) -> &[PostId] {
        &self.post_ids
    }

    /// Every label, including reserved empty ones.
    pub fn all_labels(&self) -> impl Iterator<Item = ClusterLabel> {
        (0..self.num_clusters).map(ClusterLabel::from)
    }

    /// Row indices of the posts in `label`, in dataset order.
    pub fn members(&self, label: ClusterLabel) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(i, l)| (*l == label).then_some(i))
            .collect()
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_clusters];
        for label in &self.labels {
            sizes[label.index()] += 1;
        }
        sizes
    }

    /// Labels reserved for groups that received no posts.
    pub fn empty_clusters(&self) -> Vec<ClusterLabel> {
        self.cluster_sizes()
            .into_iter()
            .enumerate()
            .filter_map(|(i, n)| (n == 0).then_some(ClusterLabel::from(i)))
            .collect()
    }

    pub fn rows(&self) -> Vec<AssignmentRow> {
        self.post_ids
            .iter()
            .zip(&self.labels)
            .map(|(post_id, cluster_label)| AssignmentRow {
                post_id: post_id.clone(),
                cluster_label: *cluster_label,
            })
            .collect()
    }
}

impl Display for ClusterAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut by_label: BTreeMap<ClusterLabel, Vec<&PostId>> = BTreeMap::new();
        for (post_id, label) in self.post_ids.iter().zip(&self.labels) {
            by_label.entry(*label).or_default().push(post_id);
        }
        for label in self.all_labels() {
            let members = by_label.remove(&label).unwrap_or_default();
            writeln!(f, "Cluster {} ({} posts)", label.display_id(), members.len())?;
            for post_id in members {
                writeln!(f, "  - {}", post_id)?;
            }
        }
        write!(f, "")
    }
}

/// LLM-written pain point summary for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PainPointSummary {
    pub cluster_label: ClusterLabel,
    pub num_posts: usize,
    pub summary_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, From, IntoIterator, Deref)]
#[serde(transparent)]
#[into_iterator(owned, ref)]
pub struct PainPointSummaries(Vec<PainPointSummary>);

impl FromIterator<PainPointSummary> for PainPointSummaries {
    fn from_iter<T: IntoIterator<Item = PainPointSummary>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl PainPointSummaries {
    pub fn get(&self, label: ClusterLabel) -> Option<&PainPointSummary> {
        self.0.iter().find(|s| s.cluster_label == label)
    }
}
