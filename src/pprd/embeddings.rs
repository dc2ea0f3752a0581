use anyhow::{Context, Result, anyhow};
use derive_more::{Display, From, Into, IntoIterator};
use ndarray::prelude::*;
use rust_bert::pipelines::sentence_embeddings::{self, SentenceEmbeddingsModel};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{EnumString, IntoStaticStr};
use tch::Device;
use tracing::info;

/// Turns cleaned post text into fixed-width vectors, one per input, in
/// input order.
///
/// Implementations are built once by the caller and handed to the
/// pipeline by reference.
pub trait Embedder {
    fn embed(&self, texts: &[String]) -> Result<Embeddings>;

    /// Width of every vector produced.
    fn dimension(&self) -> usize;
}

/// [`Embedder`] backed by a rust-bert sentence-embeddings model.
pub struct SentenceEmbedder {
    model: SentenceEmbeddingsModel,
    model_type: SentenceEmbeddingsModelType,
}

impl SentenceEmbedder {
    /// Load (downloading on first use) the given model onto `device`.
    /// - [`model_type`] The model type to use. Note that this is a mirror of the
    ///   [`rust_bert::pipelines::sentence_embeddings`] model type, instead of the
    ///   real thing, because as a foreign enum the latter doesn't play nicely with
    ///   the type system.
    pub fn new(model_type: SentenceEmbeddingsModelType, device: Device) -> Result<Self> {
        info!(model = %model_type, "loading sentence embeddings model");
        let model = sentence_embeddings::SentenceEmbeddingsBuilder::remote(model_type.into())
            .with_device(device)
            .create_model()
            .with_context(|| format!("SentenceEmbedder::new({})", model_type))?;
        Ok(Self { model, model_type })
    }

    pub fn model_type(&self) -> SentenceEmbeddingsModelType {
        self.model_type
    }
}

impl Embedder for SentenceEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Embeddings> {
        let embeddings: Embeddings = self
            .model
            .encode(texts)
            .map(Embeddings::from)
            .with_context(|| "SentenceEmbedder::embed()")?;
        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "model returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            ));
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.model_type.dimension()
    }
}

// ========================================================================
// Types

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, From, Into, Display)]
#[display("{{ rows:{} columns:{} }}", self.0.0, self.0.1)]
pub struct Shape((usize, usize));

impl Shape {
    pub fn rows(&self) -> usize {
        self.0.0
    }

    pub fn columns(&self) -> usize {
        self.0.1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, From, Into, IntoIterator)]
struct FlattenedEmbeddings(Vec<f32>);

/// Newtype wrapper around Embeddings.
/// Wraps a [`Vec<Vec<f32>>`] for type safety, and associates various utility methods.
/// Row `i` is the embedding of post `i`.
#[derive(Debug, Clone, Default, From, Serialize, Deserialize, IntoIterator, PartialEq)]
#[serde(transparent)]
pub struct Embeddings(Vec<Vec<f32>>);

impl Embeddings {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The shape of this Embeddings instance. Zero columns when empty.
    pub fn shape(&self) -> Shape {
        (self.0.len(), self.0.first().map_or(0, Vec::len)).into()
    }

    /// Flatten the wrapped [`Vec<Vec<f32>>`] into a ['Vec<f32>'] by
    /// concatenating the rows.
    fn as_flattened_vec(&self) -> FlattenedEmbeddings {
        self.0.iter().flatten().copied().collect::<Vec<f32>>().into()
    }

    /// Convert this Embeddings into an Array2. Fails if rows are ragged.
    pub fn as_ndarray(&self) -> Result<Array2<f32>> {
        let shape = self.shape();

        Array2::from_shape_vec(shape.0, self.as_flattened_vec().into())
            .with_context(|| format!("Embeddings::as_ndarray, shape: {}", shape))
    }

    /// The same matrix widened to `f64`, which is what the clustering core
    /// works in.
    pub fn to_f64_matrix(&self) -> Result<Array2<f64>> {
        Ok(self.as_ndarray()?.mapv(f64::from))
    }
}

// =====================================================================

/// Native enum that maps to a [`SentenceEmbeddingsModelType`].
/// This mirrors [`SentenceEmbeddingModelType`], but can receive
/// derived / implemented traits, etc, which the foreign type cannot.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    Default,
    IntoStaticStr,
    EnumString,
    Display,
)]
pub enum SentenceEmbeddingsModelType {
    DistiluseBaseMultilingualCased,
    BertBaseNliMeanTokens,
    AllMiniLmL12V2,
    #[default]
    AllMiniLmL6V2,
    AllDistilrobertaV1,
    ParaphraseAlbertSmallV2,
    SentenceT5Base,
}

impl SentenceEmbeddingsModelType {
    /// Output width of the model's pooled sentence vector.
    pub fn dimension(&self) -> usize {
        match self {
            Self::AllMiniLmL6V2 | Self::AllMiniLmL12V2 => 384,
            Self::DistiluseBaseMultilingualCased => 512,
            Self::BertBaseNliMeanTokens
            | Self::AllDistilrobertaV1
            | Self::ParaphraseAlbertSmallV2
            | Self::SentenceT5Base => 768,
        }
    }
}

impl From<SentenceEmbeddingsModelType> for sentence_embeddings::SentenceEmbeddingsModelType {
    fn from(val: SentenceEmbeddingsModelType) -> Self {
        match val {
            SentenceEmbeddingsModelType::DistiluseBaseMultilingualCased => {
                sentence_embeddings::SentenceEmbeddingsModelType::DistiluseBaseMultilingualCased
            }
            SentenceEmbeddingsModelType::BertBaseNliMeanTokens => {
                sentence_embeddings::SentenceEmbeddingsModelType::BertBaseNliMeanTokens
            }
            SentenceEmbeddingsModelType::AllMiniLmL12V2 => {
                sentence_embeddings::SentenceEmbeddingsModelType::AllMiniLmL12V2
            }
            SentenceEmbeddingsModelType::AllMiniLmL6V2 => {
                sentence_embeddings::SentenceEmbeddingsModelType::AllMiniLmL6V2
            }
            SentenceEmbeddingsModelType::AllDistilrobertaV1 => {
                sentence_embeddings::SentenceEmbeddingsModelType::AllDistilrobertaV1
            }
            SentenceEmbeddingsModelType::ParaphraseAlbertSmallV2 => {
                sentence_embeddings::SentenceEmbeddingsModelType::ParaphraseAlbertSmallV2
            }
            SentenceEmbeddingsModelType::SentenceT5Base => {
                sentence_embeddings::SentenceEmbeddingsModelType::SentenceT5Base
            }
        }
    }
}

impl From<SentenceEmbeddingsModelType> for PathBuf {
    fn from(value: SentenceEmbeddingsModelType) -> Self {
        PathBuf::from(Into::<&'static str>::into(value))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use tch::Device;

    use super::*;

    #[test]
    fn test_shape_and_ndarray() {
        let e = Embeddings::from(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(e.shape().rows(), 2);
        assert_eq!(e.shape().columns(), 3);
        let m = e.to_f64_matrix().unwrap();
        assert_eq!(m.row(1).to_vec(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_empty_shape() {
        assert_eq!(Embeddings::default().shape(), Shape::from((0, 0)));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let e = Embeddings::from(vec![vec![1.0, 2.0], vec![3.0]]);
        assert!(e.as_ndarray().is_err());
    }

    #[test]
    fn test_model_type_names() {
        assert_eq!(
            SentenceEmbeddingsModelType::from_str("AllMiniLmL6V2").unwrap(),
            SentenceEmbeddingsModelType::default()
        );
        assert_eq!(SentenceEmbeddingsModelType::default().dimension(), 384);
        assert_eq!(
            PathBuf::from(SentenceEmbeddingsModelType::SentenceT5Base),
            PathBuf::from("SentenceT5Base")
        );
    }

    #[test]
    #[ignore = "downloads model weights"]
    fn test_sentence_embedder() {
        let embedder =
            SentenceEmbedder::new(SentenceEmbeddingsModelType::AllMiniLmL6V2, Device::Cpu)
                .expect("Narrator: the model did not, in fact, load.");
        let texts = vec![
            "cursor keeps crashing when i open large files".to_string(),
            "how do i self host a vector database".to_string(),
        ];
        let embeddings = embedder.embed(&texts).unwrap();
        assert_eq!(embeddings.shape().rows(), 2);
        assert_eq!(embeddings.shape().columns(), embedder.dimension());
    }
}
