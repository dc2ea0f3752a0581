use thiserror::Error;

/// Errors raised by the clustering core. These are never recovered from
/// inside the core; the caller decides whether to retry with different
/// parameters or abort.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fewer posts than requested groups.
    #[error("insufficient data: {posts} posts cannot be partitioned into {k} groups")]
    InsufficientData { posts: usize, k: usize },

    /// Too few points to build the reducer's neighbourhood graph.
    #[error("degenerate input: {points} points supplied, at least {min_points} required")]
    DegenerateInput { points: usize, min_points: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Row count of one stage does not line up with another.
    #[error("shape mismatch: expected {expected} rows, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Clustering(#[from] linfa_clustering::KMeansError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
