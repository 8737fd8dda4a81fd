//! docrag - local retrieval for retrieval-augmented answers.
//!
//! docrag splits `.txt` and `.pdf` documents into overlapping chunks, embeds
//! them, and stores the vectors in a persistent [`VectorIndex`]. At query
//! time a [`RetrievalTool`](retrieval::RetrievalTool) embeds the question,
//! finds the nearest passages by cosine similarity, and returns them as
//! numbered citations an AI agent can quote.
//!
//! # Quick start
//!
//! ```
//! # let tmp = tempfile::tempdir().unwrap();
//! # let docs = tmp.path().join("docs");
//! # std::fs::create_dir_all(&docs).unwrap();
//! # std::fs::write(docs.join("A.txt"), "The sky is blue.").unwrap();
//! # std::fs::write(docs.join("B.txt"), "Grass is green.").unwrap();
//! use docrag::{RagContext, embedding::EmbedderSpec, ingestion::IngestionConfig};
//! use docrag::loader::DirectorySource;
//!
//! let context = RagContext::open(
//!     &tmp.path().join("index"),
//!     Some(EmbedderSpec::Hashing { dimension: 384 }),
//! )
//! .unwrap();
//!
//! let report = context
//!     .pipeline(IngestionConfig::default())
//!     .rebuild(&DirectorySource::new(&docs))
//!     .unwrap();
//! assert_eq!(report.files_indexed, 2);
//!
//! let result = context.retrieval().retrieve("What color is the sky?", 4).unwrap();
//! assert_eq!(result.citations()[0].source, "A.txt");
//! println!("{result}");
//! ```

pub mod chunking;
pub mod config_db;
pub mod context;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod ingestion;
pub mod loader;
pub mod mcp;
pub mod model_manager;
pub mod retrieval;
pub mod settings;
pub mod text_util;
pub mod vector_index;
pub mod walker;

pub use config_db::ConfigDb;
pub use context::RagContext;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use embedding::{Embedder, EmbedderSpec, HashingEmbedder};
pub use error::{Error, Result};
pub use model_manager::{ColbertEmbedder, ModelManager};
pub use vector_index::{IndexEntry, ScoredEntry, VectorIndex};
