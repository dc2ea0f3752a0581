pub mod artifacts;
pub mod diagnostics;
pub mod embeddings;
pub mod error;
pub mod model;
pub mod partition;
pub mod pipeline;
pub mod preprocess;
pub mod reduce;
pub mod renumber;
pub mod report;
pub mod summarize;
