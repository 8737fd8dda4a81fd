use std::path::Path;

use crate::{
    embedding::{Embedder, EmbedderSpec},
    error::Result,
    ingestion::{IngestionConfig, IngestionPipeline},
    retrieval::RetrievalTool,
    vector_index::VectorIndex,
};

/// The embedder and index shared by ingestion and retrieval.
///
/// Built once at startup and passed by reference; dropping or
/// [closing](Self::close) it releases the index file.
pub struct RagContext {
    embedder: Box<dyn Embedder>,
    index: VectorIndex,
}

impl RagContext {
    /// Open the index in `index_dir` and pick an embedder for it.
    ///
    /// Without an explicit `requested` spec the embedder recorded in the
    /// index is reused, falling back to the default ColBERT model for a
    /// fresh index.
    pub fn open(
        index_dir: &Path,
        requested: Option<EmbedderSpec>,
    ) -> Result<Self> {
        let index = VectorIndex::open(index_dir)?;
        let recorded = index
            .embedder()?
            .map(|s| s.parse::<EmbedderSpec>())
            .transpose()?;

        let spec = match (requested, recorded) {
            (Some(requested), Some(recorded)) => {
                if requested != recorded {
                    tracing::warn!(
                        recorded = %recorded,
                        requested = %requested,
                        "index was built with a different embedder"
                    );
                }
                requested
            }
            (Some(requested), None) => requested,
            (None, Some(recorded)) => recorded,
            (None, None) => EmbedderSpec::default(),
        };

        tracing::debug!(embedder = %spec, "using embedder");
        Ok(Self::with_parts(spec.build()?, index))
    }

    pub fn with_parts(embedder: Box<dyn Embedder>, index: VectorIndex) -> Self {
        Self { embedder, index }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn pipeline(&self, config: IngestionConfig) -> IngestionPipeline<'_> {
        IngestionPipeline::new(self.embedder.as_ref(), &self.index, config)
    }

    pub fn retrieval(&self) -> RetrievalTool<'_> {
        RetrievalTool::new(self.embedder.as_ref(), &self.index)
    }

    pub fn close(self) {
        self.index.close();
    }
}

impl std::fmt::Debug for RagContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagContext")
            .field("embedder", &self.embedder.spec())
            .field("index", &self.index)
            .finish()
    }
}
