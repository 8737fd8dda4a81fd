use std::sync::{Mutex, OnceLock};

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;

use crate::{
    embedding::{
        Embedder,
        EmbedderSpec,
        check_batch_input,
        check_batch_output,
        l2_normalize,
    },
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "DOCRAG_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn backend_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Embedding(format!("{context}: {e}"))
}

/// Manages the ColBERT model lifecycle, loading it on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            tracing::info!(model = %self.model_id, "loading ColBERT model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| {
                    backend_error(
                        &format!("failed to load model {}", self.model_id),
                        e,
                    )
                })?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::Embedding("model not loaded".to_string()))
    }

    /// Encode texts into one pooled vector each.
    ///
    /// ColBERT produces a `[batch, tokens, dim]` tensor of per-token
    /// embeddings; tokens are mean-pooled and the result L2-normalised.
    pub fn encode_pooled(
        &mut self,
        texts: &[String],
        is_query: bool,
    ) -> Result<Vec<Vec<f32>>> {
        let model = self.ensure_loaded()?;
        let embeddings: Tensor = model
            .encode(texts, is_query)
            .map_err(|e| backend_error("encoding failed", e))?;

        let pooled = embeddings
            .mean(1)
            .map_err(|e| backend_error("pooling failed", e))?;
        let mut vectors = pooled
            .to_vec2::<f32>()
            .map_err(|e| backend_error("unexpected embedding shape", e))?;

        for vector in &mut vectors {
            l2_normalize(vector);
        }
        Ok(vectors)
    }
}

/// [`Embedder`] backed by a lazily loaded ColBERT model.
pub struct ColbertEmbedder {
    manager: Mutex<ModelManager>,
    dimension: OnceLock<usize>,
}

impl ColbertEmbedder {
    pub fn new(model_id: String) -> Self {
        Self {
            manager: Mutex::new(ModelManager::with_model_id(model_id)),
            dimension: OnceLock::new(),
        }
    }

    fn encode(&self, texts: &[String], is_query: bool) -> Result<Vec<Vec<f32>>> {
        let mut manager = self
            .manager
            .lock()
            .map_err(|_| Error::Embedding("model lock poisoned".to_string()))?;
        let vectors = manager.encode_pooled(texts, is_query)?;
        if let Some(first) = vectors.first() {
            let _ = self.dimension.set(first.len());
        }
        Ok(vectors)
    }
}

impl Embedder for ColbertEmbedder {
    fn spec(&self) -> EmbedderSpec {
        let model_id = self
            .manager
            .lock()
            .map(|m| m.model_id().to_string())
            .unwrap_or_else(|poisoned| {
                poisoned.into_inner().model_id().to_string()
            });
        EmbedderSpec::Colbert { model_id }
    }

    /// Loads the model and embeds a probe text the first time it is asked.
    fn dimension(&self) -> Result<usize> {
        if let Some(dimension) = self.dimension.get() {
            return Ok(*dimension);
        }
        let probe = self.encode(&["dimension probe".to_string()], false)?;
        probe
            .first()
            .map(Vec::len)
            .ok_or_else(|| Error::Embedding("model returned no vectors".into()))
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.encode(&[text.to_string()], true)?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("model returned no vectors".into()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_batch_input(texts)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.encode(texts, false)?;
        check_batch_output(texts.len(), &vectors, self.dimension()?)?;
        Ok(vectors)
    }
}
