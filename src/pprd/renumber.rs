use std::{collections::HashMap, hash::Hash};

use super::{
    error::{PipelineError, Result},
    model::ClusterLabel,
};

/// Remap raw group labels onto `0..m`, in order of first appearance.
///
/// The group holding the first post becomes label 0, the group holding the
/// first post outside group 0 becomes label 1, and so on. `raw` may use any
/// hashable symbols (`{0, 2, 5}`, strings, ...). The result depends only on
/// `raw` and its order, so `renumber(renumber(x)) == renumber(x)`.
///
/// When fewer than `k` distinct groups occur, the labels `m..k` are left
/// over as reserved empty groups; they are never interleaved with used
/// labels. More than `k` distinct groups is an error.
pub fn renumber<R>(raw: &[R], k: usize) -> Result<Vec<ClusterLabel>>
where
    R: Eq + Hash + Clone,
{
    let mut first_seen: HashMap<R, ClusterLabel> = HashMap::with_capacity(k);
    let labels = raw
        .iter()
        .map(|r| {
            let next = ClusterLabel::from(first_seen.len());
            *first_seen.entry(r.clone()).or_insert(next)
        })
        .collect::<Vec<_>>();

    if first_seen.len() > k {
        return Err(PipelineError::InvalidParameter(format!(
            "{} distinct groups found but only {} requested",
            first_seen.len(),
            k
        )));
    }
    Ok(labels)
}
