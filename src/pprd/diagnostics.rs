//! Cluster quality metrics.
//!
//! Everything here is a pure function of the embedding matrix and the
//! contiguous label assignment. Metrics that are mathematically undefined
//! for a given assignment come back as sentinels rather than errors, so a
//! poor clustering never aborts a run.

use std::fmt::Display;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::{
    error::{PipelineError, Result},
    model::ClusterLabel,
};

/// Silhouette score, or the sentinel for assignments where it has no
/// meaning (fewer than two populated groups, or a singleton group).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Silhouette {
    Score(f64),
    Undefined,
}

impl Silhouette {
    pub fn score(&self) -> Option<f64> {
        match self {
            Silhouette::Score(s) => Some(*s),
            Silhouette::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Silhouette::Score(_))
    }
}

impl Display for Silhouette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Silhouette::Score(s) => write!(f, "{:.4}", s),
            Silhouette::Undefined => write!(f, "undefined"),
        }
    }
}

/// Per-run summary of cluster quality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub silhouette: Silhouette,
    pub intra_cluster_distance: f64,
    pub inter_cluster_distance: f64,
    /// `intra / inter`; `f64::INFINITY` when the inter-cluster distance is 0.
    pub intra_inter_ratio: f64,
    pub num_clusters: usize,
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Silhouette score:            {}", self.silhouette)?;
        writeln!(f, "Avg. intra-cluster distance: {:.4}", self.intra_cluster_distance)?;
        writeln!(f, "Avg. inter-cluster distance: {:.4}", self.inter_cluster_distance)?;
        write!(f, "Intra/inter ratio:           {:.4}", self.intra_inter_ratio)
    }
}

/// Rule-of-thumb bands for reading the numbers. Reddit text is noisy, so
/// low scores are common; read them alongside the summaries.
pub const INTERPRETATION_GUIDE: &str = "\
Silhouette score: higher is better (>0.2 acceptable, >0.5 strong separation).
Intra-cluster distance: lower is better (<0.5 tight, <0.8 acceptable).
Inter-cluster distance: higher is better (>0.6 OK, >1.0 strong separation).
Intra/inter ratio: lower is better (<1.0 ideal, <1.2 good, >1.5 poor).";

/// Compute all four metrics at once.
pub fn compute_diagnostics(
    matrix: &Array2<f64>,
    labels: &[ClusterLabel],
    k: usize,
) -> Result<Diagnostics> {
    validate(matrix, labels, k)?;
    let centroids = centroids(matrix, labels, k);
    let intra = mean_intra_distance(matrix, labels, &centroids);
    let inter = mean_inter_distance(&centroids);
    Ok(Diagnostics {
        silhouette: silhouette_of(matrix, labels, k),
        intra_cluster_distance: intra,
        inter_cluster_distance: inter,
        intra_inter_ratio: intra_inter_ratio(intra, inter),
        num_clusters: k,
    })
}

/// Mean over all points of `(b - a) / max(a, b)`.
pub fn silhouette_score(matrix: &Array2<f64>, labels: &[ClusterLabel], k: usize) -> Result<Silhouette> {
    validate(matrix, labels, k)?;
    Ok(silhouette_of(matrix, labels, k))
}

/// Mean Euclidean distance from each point to its own group's centroid.
pub fn intra_cluster_distance(matrix: &Array2<f64>, labels: &[ClusterLabel], k: usize) -> Result<f64> {
    validate(matrix, labels, k)?;
    Ok(mean_intra_distance(matrix, labels, &centroids(matrix, labels, k)))
}

/// Mean pairwise Euclidean distance between the centroids of populated
/// groups. 0 when fewer than two groups are populated.
pub fn inter_cluster_distance(matrix: &Array2<f64>, labels: &[ClusterLabel], k: usize) -> Result<f64> {
    validate(matrix, labels, k)?;
    Ok(mean_inter_distance(&centroids(matrix, labels, k)))
}

/// `intra / inter`, with `f64::INFINITY` standing in when `inter` is 0.
pub fn intra_inter_ratio(intra: f64, inter: f64) -> f64 {
    if inter > 0.0 {
        intra / inter
    } else {
        f64::INFINITY
    }
}

fn validate(matrix: &Array2<f64>, labels: &[ClusterLabel], k: usize) -> Result<()> {
    if matrix.nrows() != labels.len() {
        return Err(PipelineError::ShapeMismatch {
            expected: matrix.nrows(),
            actual: labels.len(),
        });
    }
    if matrix.nrows() == 0 {
        return Err(PipelineError::InvalidParameter(
            "cannot compute diagnostics over an empty matrix".into(),
        ));
    }
    if let Some(bad) = labels.iter().find(|l| l.index() >= k) {
        return Err(PipelineError::InvalidParameter(format!(
            "cluster label {} out of range for {} clusters",
            bad, k
        )));
    }
    Ok(())
}

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let diff = &a - &b;
    diff.dot(&diff).sqrt()
}

/// Row indices per label; empty groups get an empty vec.
fn members(labels: &[ClusterLabel], k: usize) -> Vec<Vec<usize>> {
    let mut groups = vec![Vec::new(); k];
    for (i, label) in labels.iter().enumerate() {
        groups[label.index()].push(i);
    }
    groups
}

/// Centroid per label, `None` for empty groups.
fn centroids(matrix: &Array2<f64>, labels: &[ClusterLabel], k: usize) -> Vec<Option<Array1<f64>>> {
    members(labels, k)
        .into_iter()
        .map(|rows| {
            if rows.is_empty() {
                None
            } else {
                matrix.select(Axis(0), &rows).mean_axis(Axis(0))
            }
        })
        .collect()
}

fn mean_intra_distance(
    matrix: &Array2<f64>,
    labels: &[ClusterLabel],
    centroids: &[Option<Array1<f64>>],
) -> f64 {
    let total: f64 = matrix
        .outer_iter()
        .zip(labels)
        .filter_map(|(row, label)| {
            centroids[label.index()]
                .as_ref()
                .map(|c| euclidean(row, c.view()))
        })
        .sum();
    total / labels.len() as f64
}

fn mean_inter_distance(centroids: &[Option<Array1<f64>>]) -> f64 {
    let populated: Vec<&Array1<f64>> = centroids.iter().flatten().collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..populated.len() {
        for j in (i + 1)..populated.len() {
            total += euclidean(populated[i].view(), populated[j].view());
            pairs += 1;
        }
    }
    if pairs == 0 { 0.0 } else { total / pairs as f64 }
}

fn silhouette_of(matrix: &Array2<f64>, labels: &[ClusterLabel], k: usize) -> Silhouette {
    let groups: Vec<Vec<usize>> = members(labels, k)
        .into_iter()
        .filter(|g| !g.is_empty())
        .collect();
    if groups.len() < 2 || groups.iter().any(|g| g.len() == 1) {
        return Silhouette::Undefined;
    }

    let mean_distance = |i: usize, group: &[usize]| -> f64 {
        let row = matrix.row(i);
        let (sum, count) = group
            .iter()
            .filter(|&&j| j != i)
            .fold((0.0, 0usize), |(s, c), &j| (s + euclidean(row, matrix.row(j)), c + 1));
        sum / count as f64
    };

    let mut total = 0.0;
    for (own, group) in groups.iter().enumerate() {
        for &i in group {
            let a = mean_distance(i, group);
            let b = groups
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != own)
                .map(|(_, g)| mean_distance(i, g))
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 {
                total += (b - a) / denom;
            }
        }
    }
    let score = total / labels.len() as f64;
    if score.is_finite() {
        Silhouette::Score(score.clamp(-1.0, 1.0))
    } else {
        Silhouette::Undefined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(raw: &[usize]) -> Vec<ClusterLabel> {
        raw.iter().map(|l| ClusterLabel::from(*l)).collect()
    }

    fn line() -> Array2<f64> {
        array![[0.0, 0.0], [2.0, 0.0], [10.0, 0.0], [12.0, 0.0]]
    }

    #[test]
    fn test_known_values() {
        let d = compute_diagnostics(&line(), &labels(&[0, 0, 1, 1]), 2).unwrap();
        assert!((d.intra_cluster_distance - 1.0).abs() < 1e-12);
        assert!((d.inter_cluster_distance - 10.0).abs() < 1e-12);
        assert!((d.intra_inter_ratio - 0.1).abs() < 1e-12);

        // Per point: 9/11, 7/9, 7/9, 9/11.
        let expected = (9.0 / 11.0 + 7.0 / 9.0) / 2.0;
        let score = d.silhouette.score().unwrap();
        assert!((score - expected).abs() < 1e-12, "{} != {}", score, expected);
    }

    #[test]
    fn test_single_post_single_cluster() {
        let d = compute_diagnostics(&array![[0.3, 0.7, 0.1]], &labels(&[0]), 1).unwrap();
        assert_eq!(d.silhouette, Silhouette::Undefined);
        assert_eq!(d.intra_cluster_distance, 0.0);
        assert_eq!(d.inter_cluster_distance, 0.0);
        assert_eq!(d.intra_inter_ratio, f64::INFINITY);
    }

    #[test]
    fn test_singleton_group_is_undefined() {
        let s = silhouette_score(&line(), &labels(&[0, 0, 0, 1]), 2).unwrap();
        assert_eq!(s, Silhouette::Undefined);
    }

    #[test]
    fn test_empty_group_does_not_break_metrics() {
        // Label 2 is a reserved empty slot.
        let d = compute_diagnostics(&line(), &labels(&[0, 0, 1, 1]), 3).unwrap();
        assert!((d.inter_cluster_distance - 10.0).abs() < 1e-12);
        assert!(d.silhouette.is_defined());
        assert_eq!(d.num_clusters, 3);
    }

    #[test]
    fn test_identical_points_stay_finite() {
        let m = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let d = compute_diagnostics(&m, &labels(&[0, 0, 1, 1]), 2).unwrap();
        assert_eq!(d.silhouette, Silhouette::Score(0.0));
        assert_eq!(d.inter_cluster_distance, 0.0);
        assert_eq!(d.intra_inter_ratio, f64::INFINITY);
    }

    #[test]
    fn test_silhouette_bounded() {
        let m = array![
            [0.0, 1.0],
            [5.0, 3.0],
            [1.0, 1.5],
            [4.0, 4.0],
            [0.5, 0.0],
            [6.0, 2.0]
        ];
        // Deliberately poor assignment.
        let s = silhouette_score(&m, &labels(&[0, 0, 1, 1, 0, 1]), 2).unwrap();
        let score = s.score().unwrap();
        assert!((-1.0..=1.0).contains(&score));
        assert!(!score.is_nan());
    }

    #[test]
    fn test_ratio_guard() {
        assert_eq!(intra_inter_ratio(1.0, 0.0), f64::INFINITY);
        assert_eq!(intra_inter_ratio(0.0, 0.0), f64::INFINITY);
        assert_eq!(intra_inter_ratio(1.0, 4.0), 0.25);
    }

    #[test]
    fn test_rejects_mismatched_labels() {
        let result = compute_diagnostics(&line(), &labels(&[0, 1]), 2);
        assert!(matches!(result, Err(PipelineError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rejects_out_of_range_label() {
        let result = intra_cluster_distance(&line(), &labels(&[0, 0, 1, 4]), 2);
        assert!(matches!(result, Err(PipelineError::InvalidParameter(_))));
    }
}
