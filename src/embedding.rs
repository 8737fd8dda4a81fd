//! Text embedders.
//!
//! An [`Embedder`] maps text to a fixed-length vector. The vectors stored in
//! a [`VectorIndex`](crate::VectorIndex) and the query vectors compared
//! against them must come from the same embedder, so every index records
//! the [`EmbedderSpec`] that produced it.

use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use crate::{
    error::{Error, Result},
    model_manager::{ColbertEmbedder, DEFAULT_MODEL_ID},
    text_util,
};

/// Default dimension of [`HashingEmbedder`] vectors.
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// Maps text to embedding vectors.
pub trait Embedder: Send + Sync {
    /// Describes this embedder; stored in the index it writes to.
    fn spec(&self) -> EmbedderSpec;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> Result<usize>;

    /// Embed a single query. Empty text is allowed.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed document passages, preserving order.
    ///
    /// Fails with [`Error::Embedding`] if any passage is empty or
    /// whitespace-only.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Which embedder to use, in its textual form (`hashing`, `hashing:<dim>`,
/// `colbert`, `colbert:<model-id>`).
///
/// # Examples
///
/// ```
/// use docrag::embedding::EmbedderSpec;
///
/// let spec: EmbedderSpec = "hashing:64".parse().unwrap();
/// assert_eq!(spec, EmbedderSpec::Hashing { dimension: 64 });
/// assert_eq!(spec.to_string(), "hashing:64");
///
/// let spec: EmbedderSpec = "colbert:lightonai/ColBERT-Zero".parse().unwrap();
/// assert_eq!(spec.to_string(), "colbert:lightonai/ColBERT-Zero");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedderSpec {
    Hashing { dimension: usize },
    Colbert { model_id: String },
}

impl EmbedderSpec {
    /// Construct the embedder described by this spec.
    ///
    /// ColBERT models are loaded lazily, so this never touches the network.
    pub fn build(&self) -> Result<Box<dyn Embedder>> {
        Ok(match self {
            Self::Hashing { dimension } => {
                Box::new(HashingEmbedder::new(*dimension)?)
            }
            Self::Colbert { model_id } => {
                Box::new(ColbertEmbedder::new(model_id.clone()))
            }
        })
    }
}

impl Default for EmbedderSpec {
    fn default() -> Self {
        Self::Colbert {
            model_id: DEFAULT_MODEL_ID.to_string(),
        }
    }
}

impl fmt::Display for EmbedderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hashing { dimension } => write!(f, "hashing:{dimension}"),
            Self::Colbert { model_id } => write!(f, "colbert:{model_id}"),
        }
    }
}

impl FromStr for EmbedderSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, arg) = match s.trim().split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s.trim(), None),
        };

        match (kind, arg) {
            ("hashing", None) => Ok(Self::Hashing {
                dimension: DEFAULT_HASHING_DIMENSION,
            }),
            ("hashing", Some(dim)) => {
                let dimension = dim.parse().map_err(|_| {
                    Error::Config(format!("invalid hashing dimension: {dim}"))
                })?;
                Ok(Self::Hashing { dimension })
            }
            ("colbert", None) => Ok(Self::default()),
            ("colbert", Some(model_id)) if !model_id.is_empty() => {
                Ok(Self::Colbert {
                    model_id: model_id.to_string(),
                })
            }
            _ => Err(Error::Config(format!(
                "unknown embedder '{s}' (expected hashing[:dim] or colbert[:model])"
            ))),
        }
    }
}

/// Reject empty passages before they reach a backend.
pub(crate) fn check_batch_input(texts: &[String]) -> Result<()> {
    if let Some(i) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(Error::Embedding(format!(
            "cannot embed empty text (batch position {i})"
        )));
    }
    Ok(())
}

/// Check that a backend returned one vector per input, all of `dimension`.
pub(crate) fn check_batch_output(
    inputs: usize,
    vectors: &[Vec<f32>],
    dimension: usize,
) -> Result<()> {
    if vectors.len() != inputs {
        return Err(Error::Embedding(format!(
            "backend returned {} vectors for {inputs} inputs",
            vectors.len()
        )));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            actual: v.len(),
        });
    }
    Ok(())
}

/// Scale a vector to unit length. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Deterministic bag-of-words embedder based on signed feature hashing.
///
/// Each lowercase word token is hashed into one of `dimension` buckets with a
/// hash-derived sign, and the result is L2-normalised. Texts sharing words
/// end up close in cosine space. No model or network access is needed.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "embedding dimension must be positive".into(),
            ));
        }
        Ok(Self { dimension })
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text_util::word_tokens(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl Embedder for HashingEmbedder {
    fn spec(&self) -> EmbedderSpec {
        EmbedderSpec::Hashing {
            dimension: self.dimension,
        }
    }

    fn dimension(&self) -> Result<usize> {
        Ok(self.dimension)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_batch_input(texts)?;
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}
