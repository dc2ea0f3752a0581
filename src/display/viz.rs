use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use ndarray::Array2;
use plotters::prelude::*;
use tracing::info;

use crate::pprd::model::{ClusterLabel, PostId};

/// Draws the 2-D layout of a clustering.
pub trait Visualizer {
    /// `coords` is `n x 2`; `labels` and `post_ids` line up with its rows.
    /// Returns the path actually written.
    fn render(
        &self,
        coords: &Array2<f64>,
        labels: &[ClusterLabel],
        num_clusters: usize,
        post_ids: &[PostId],
        output_path: &Path,
    ) -> Result<PathBuf>;
}

/// Static SVG scatter plot, one colour and legend entry per cluster,
/// empty clusters included.
#[derive(Debug, Clone)]
pub struct ScatterPlot {
    pub width: u32,
    pub height: u32,
    pub caption: String,
    pub point_size: u32,
}

impl Default for ScatterPlot {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 700,
            caption: "Reddit Post Clusters (UMAP 2D)".to_string(),
            point_size: 4,
        }
    }
}

impl ScatterPlot {
    pub fn with_caption(self, caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            ..self
        }
    }
}

/// Legend text for a cluster, using the 1-based display id.
pub fn legend_label(label: ClusterLabel) -> String {
    format!("Cluster {}", label.display_id())
}

/// Colour for a cluster; wraps around the palette for large `k`.
pub fn cluster_color(label: ClusterLabel) -> RGBColor {
    let (r, g, b) = Palette99::pick(label.index()).rgb();
    RGBColor(r, g, b)
}

/// Axis ranges covering every point, padded by 5% on each side. A
/// zero-width span is widened to 1 so the chart is never degenerate.
pub fn padded_bounds(coords: &Array2<f64>) -> (Range<f64>, Range<f64>) {
    let axis = |column: usize| {
        let (lo, hi) = coords
            .column(column)
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        if lo > hi {
            return -1.0..1.0;
        }
        let span = if hi - lo > 0.0 { hi - lo } else { 1.0 };
        let pad = span * 0.05;
        (lo - pad)..(hi + pad)
    };
    (axis(0), axis(1))
}

/// Points of each cluster in label order, one entry for every label in
/// `0..num_clusters` whether or not it has members.
pub fn cluster_series(
    coords: &Array2<f64>,
    labels: &[ClusterLabel],
    num_clusters: usize,
) -> Vec<(ClusterLabel, Vec<(f64, f64)>)> {
    (0..num_clusters)
        .map(ClusterLabel::from)
        .map(|label| {
            let points = labels
                .iter()
                .enumerate()
                .filter(|(_, l)| **l == label)
                .map(|(i, _)| (coords[[i, 0]], coords[[i, 1]]))
                .collect();
            (label, points)
        })
        .collect()
}

impl Visualizer for ScatterPlot {
    fn render(
        &self,
        coords: &Array2<f64>,
        labels: &[ClusterLabel],
        num_clusters: usize,
        post_ids: &[PostId],
        output_path: &Path,
    ) -> Result<PathBuf> {
        if coords.ncols() != 2 {
            bail!("scatter plot needs 2 columns, got {}", coords.ncols());
        }
        if coords.nrows() != labels.len() || labels.len() != post_ids.len() {
            bail!(
                "scatter plot inputs disagree: {} points, {} labels, {} post ids",
                coords.nrows(),
                labels.len(),
                post_ids.len()
            );
        }
        let (x_range, y_range) = padded_bounds(coords);

        // Scoped so the backend flushes before we return the path.
        {
            let root = SVGBackend::new(output_path, (self.width, self.height)).into_drawing_area();
            root.fill(&WHITE).with_context(|| "scatter: fill background")?;

            let mut ctx = ChartBuilder::on(&root)
                .caption(&self.caption, ("sans-serif", 24))
                .margin(20)
                .x_label_area_size(40)
                .y_label_area_size(50)
                .build_cartesian_2d(x_range, y_range)
                .with_context(|| "scatter: build_cartesian_2d")?;

            ctx.configure_mesh()
                .x_desc("UMAP-1")
                .y_desc("UMAP-2")
                .draw()
                .with_context(|| "scatter: draw mesh")?;

            for (label, points) in cluster_series(coords, labels, num_clusters) {
                let color = cluster_color(label);
                let size = self.point_size;
                ctx.draw_series(
                    points
                        .into_iter()
                        .map(|p| Circle::new(p, size, color.mix(0.7).filled())),
                )
                .with_context(|| format!("scatter: draw {}", legend_label(label)))?
                .label(legend_label(label))
                .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
            }

            ctx.configure_series_labels()
                .position(SeriesLabelPosition::UpperRight)
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .with_context(|| "scatter: draw legend")?;

            root.present().with_context(|| "scatter: write")?;
        }

        info!(path = %output_path.display(), points = labels.len(), "saved cluster visualization");
        Ok(output_path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn test_legend_uses_display_ids() {
        assert_eq!(legend_label(ClusterLabel::from(0)), "Cluster 1");
        assert_eq!(legend_label(ClusterLabel::from(9)), "Cluster 10");
    }

    #[test]
    fn test_colors_differ_per_cluster() {
        assert_ne!(cluster_color(ClusterLabel::from(0)), cluster_color(ClusterLabel::from(1)));
    }

    #[test]
    fn test_padded_bounds() {
        let coords = array![[0.0, 5.0], [10.0, 5.0]];
        let (x, y) = padded_bounds(&coords);
        assert_eq!(x, -0.5..10.5);
        assert!((y.start - 4.95).abs() < 1e-9);
        assert!((y.end - 5.05).abs() < 1e-9);
    }

    #[test]
    fn test_series_include_empty_clusters() {
        let coords = array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]];
        let labels = [1usize, 0, 1].map(ClusterLabel::from);
        let series = cluster_series(&coords, &labels, 3);

        let names: Vec<String> = series.iter().map(|(l, _)| legend_label(*l)).collect();
        assert_eq!(names, vec!["Cluster 1", "Cluster 2", "Cluster 3"]);
        assert_eq!(series[0].1, vec![(1.0, 1.0)]);
        assert_eq!(series[1].1, vec![(0.0, 0.0), (2.0, 2.0)]);
        assert!(series[2].1.is_empty());
    }

    #[test]
    fn test_rejects_wrong_width() {
        let coords = array![[0.0, 1.0, 2.0]];
        let dir = tempfile::tempdir().unwrap();
        let result = ScatterPlot::default().render(
            &coords,
            &[ClusterLabel::from(0)],
            1,
            &[PostId::from("a")],
            &dir.path().join("x.svg"),
        );
        assert!(result.is_err());
    }

    #[test]
    #[ignore = "needs system fonts"]
    fn test_render_svg() {
        let coords = array![[0.0, 0.0], [0.1, 0.2], [5.0, 5.0], [5.2, 4.9]];
        let labels = [0usize, 0, 1, 1].map(ClusterLabel::from);
        let ids: Vec<PostId> = ["a", "b", "c", "d"].map(PostId::from).to_vec();
        let dir = tempfile::tempdir().unwrap();
        let path = ScatterPlot::default()
            .render(&coords, &labels, 3, &ids, &dir.path().join("plot.svg"))
            .unwrap();
        let svg = std::fs::read_to_string(path).unwrap();
        assert!(svg.contains("Cluster 1"));
        assert!(svg.contains("Cluster 2"));
        assert!(svg.contains("Cluster 3"));
    }
}
