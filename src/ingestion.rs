//! The write path: documents → chunks → embeddings → index.
//!
//! Each file is processed on its own. Its chunks are embedded in batches and
//! written with a single [`VectorIndex::upsert`], so a file is either fully
//! indexed or not at all. A failing file is recorded in the
//! [`IngestionReport`] and the run moves on to the next one.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    chunking::{Chunker, ChunkingConfig},
    doc_id::DocumentId,
    embedding::Embedder,
    error::{Error, Result},
    loader::{DocumentFormat, DocumentSource},
    vector_index::{IndexEntry, VectorIndex},
    walker::DiscoveredFile,
};

/// Default number of chunks sent to the embedder per call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionConfig {
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
}

impl IngestionConfig {
    pub fn new(chunking: ChunkingConfig, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        Ok(Self {
            chunking,
            batch_size,
        })
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// A file that could not be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub document: String,
    pub reason: String,
}

impl DocumentFailure {
    fn new(file: &DiscoveredFile, error: Error) -> Self {
        match error {
            Error::Load { document, reason } => Self { document, reason },
            other => Self {
                document: file.source_name(),
                reason: other.to_string(),
            },
        }
    }
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    /// Files whose chunks were committed.
    pub files_indexed: usize,
    /// Documents (text files or PDF pages) in the committed files.
    pub documents_loaded: usize,
    pub chunks_written: usize,
    /// Files skipped because their type is not supported.
    pub skipped: Vec<String>,
    pub errors: Vec<DocumentFailure>,
    /// Whether the run stopped early on request.
    pub cancelled: bool,
}

impl IngestionReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// True when there were supported files and none of them made it in.
    pub fn all_failed(&self) -> bool {
        self.files_indexed == 0 && self.has_errors()
    }
}

impl fmt::Display for IngestionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Indexed {} files ({} documents, {} chunks)",
            self.files_indexed, self.documents_loaded, self.chunks_written
        )?;
        if !self.skipped.is_empty() {
            write!(f, ", skipped {} unsupported", self.skipped.len())?;
        }
        if self.has_errors() {
            write!(f, ", {} failed", self.errors.len())?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        for failure in &self.errors {
            write!(f, "\n  {}: {}", failure.document, failure.reason)?;
        }
        Ok(())
    }
}

/// Orchestrates chunking, embedding and storage over a [`DocumentSource`].
pub struct IngestionPipeline<'a> {
    embedder: &'a dyn Embedder,
    index: &'a VectorIndex,
    chunker: Chunker,
    batch_size: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        index: &'a VectorIndex,
        config: IngestionConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            chunker: Chunker::new(config.chunking),
            batch_size: config.batch_size.max(1),
            cancel: None,
        }
    }

    /// Stop between files once `flag` becomes true.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Discard everything in the index, then ingest `source` from scratch.
    pub fn rebuild(
        &self,
        source: &dyn DocumentSource,
    ) -> Result<IngestionReport> {
        self.index.clear()?;
        self.run(source)
    }

    /// Ingest every file `source` discovers.
    ///
    /// Only a failure to list the source is returned as an error; per-file
    /// failures end up in the report.
    pub fn run(&self, source: &dyn DocumentSource) -> Result<IngestionReport> {
        let files = source.discover()?;
        self.record_embedder()?;

        let mut report = IngestionReport::default();
        if files.is_empty() {
            tracing::warn!("no documents found");
            return Ok(report);
        }

        for file in &files {
            if self.is_cancelled() {
                tracing::info!("ingestion cancelled");
                report.cancelled = true;
                break;
            }

            let name = file.source_name();
            if DocumentFormat::from_path(&file.absolute_path).is_none() {
                tracing::warn!(file = %name, "skipping unsupported file type");
                report.skipped.push(name);
                continue;
            }

            match self.ingest_file(source, file) {
                Ok((documents, chunks)) => {
                    tracing::info!(file = %name, documents, chunks, "indexed");
                    report.files_indexed += 1;
                    report.documents_loaded += documents;
                    report.chunks_written += chunks;
                }
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "failed to index");
                    report.errors.push(DocumentFailure::new(file, e));
                }
            }
        }

        tracing::info!(
            files = report.files_indexed,
            chunks = report.chunks_written,
            skipped = report.skipped.len(),
            failed = report.errors.len(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// Note which embedder produced the index vectors.
    fn record_embedder(&self) -> Result<()> {
        let spec = self.embedder.spec().to_string();
        match self.index.embedder()? {
            None => self.index.set_embedder(&spec),
            Some(recorded) if recorded != spec => {
                tracing::warn!(
                    recorded = %recorded,
                    current = %spec,
                    "index was built with a different embedder"
                );
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    /// Load, chunk, embed and store one file. Returns the number of
    /// documents and chunks written.
    fn ingest_file(
        &self,
        source: &dyn DocumentSource,
        file: &DiscoveredFile,
    ) -> Result<(usize, usize)> {
        let documents = source.load(file)?;

        let mut entries = Vec::new();
        for document in &documents {
            let doc_id = DocumentId::for_document(document);
            for chunk in self.chunker.split(document) {
                entries.push(IndexEntry {
                    id: doc_id.chunk_id(chunk.index),
                    vector: Vec::new(),
                    text: chunk.text,
                    metadata: chunk.metadata,
                });
            }
        }

        for batch in entries.chunks_mut(self.batch_size) {
            let texts: Vec<String> =
                batch.iter().map(|e| e.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts)?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (entry, vector) in batch.iter_mut().zip(vectors) {
                entry.vector = vector;
            }
        }

        let written = self.index.upsert(&entries)?;
        Ok((documents.len(), written))
    }
}
