//! The read path: query → embedding → nearest passages → numbered citations.
//!
//! The text rendering of a [`Retrieval`] is what a conversation agent sees:
//! one `"[<n>] Source: <source>\n<snippet>"` block per passage, separated by
//! blank lines, or [`NO_CONTEXT_MESSAGE`] when the index is empty.

use std::fmt;

use serde::Serialize;

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    text_util::{self, DEFAULT_SNIPPET_MAX_CHARS},
    vector_index::{ScoredEntry, VectorIndex},
};

/// Number of passages returned when the caller does not ask for a count.
pub const DEFAULT_TOP_K: usize = 4;

/// Marker returned instead of an empty citation list.
pub const NO_CONTEXT_MESSAGE: &str =
    "No relevant context found in the indexed documents.";

/// Shown in place of a passage's source when its metadata has none.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// One numbered passage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// 1-based position in the bundle.
    pub index: usize,
    pub source: String,
    pub snippet: String,
    pub score: f32,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] Source: {}\n{}", self.index, self.source, self.snippet)
    }
}

/// A non-empty, ordered set of citations, best match first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CitationBundle {
    citations: Vec<Citation>,
}

impl CitationBundle {
    fn from_hits(hits: Vec<ScoredEntry>, snippet_chars: usize) -> Self {
        let citations = hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| Citation {
                index: i + 1,
                source: hit
                    .entry
                    .source()
                    .unwrap_or(UNKNOWN_SOURCE)
                    .to_string(),
                snippet: text_util::snippet(&hit.entry.text, snippet_chars),
                score: hit.score,
            })
            .collect();
        Self { citations }
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    pub fn first(&self) -> Option<&Citation> {
        self.citations.first()
    }
}

impl fmt::Display for CitationBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, citation) in self.citations.iter().enumerate() {
            if i > 0 {
                f.write_str("\n\n")?;
            }
            write!(f, "{citation}")?;
        }
        Ok(())
    }
}

/// Result of a successful query.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// The index holds nothing to cite.
    NoContext,
    Citations(CitationBundle),
}

impl Retrieval {
    /// The citations, or an empty slice for [`Retrieval::NoContext`].
    pub fn citations(&self) -> &[Citation] {
        match self {
            Self::NoContext => &[],
            Self::Citations(bundle) => bundle.citations(),
        }
    }
}

impl fmt::Display for Retrieval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContext => f.write_str(NO_CONTEXT_MESSAGE),
            Self::Citations(bundle) => write!(f, "{bundle}"),
        }
    }
}

/// The inline string shown to a user or agent when a query fails.
///
/// # Examples
///
/// ```
/// use docrag::{Error, retrieval::inline_error};
///
/// let err = Error::retrieval(Error::Config("index unreachable".into()));
/// assert_eq!(
///     inline_error(&err),
///     "Error querying vector store: configuration error: index unreachable"
/// );
/// ```
pub fn inline_error(error: &Error) -> String {
    match error {
        Error::Retrieval(cause) => format!("Error querying vector store: {cause}"),
        other => format!("Error querying vector store: {other}"),
    }
}

/// Query-time wrapper around an embedder and an index.
///
/// The embedder must be the one the index was built with; a query vector of
/// the wrong length fails instead of returning meaningless neighbours.
pub struct RetrievalTool<'a> {
    embedder: &'a dyn Embedder,
    index: &'a VectorIndex,
    snippet_chars: usize,
}

impl<'a> RetrievalTool<'a> {
    pub fn new(embedder: &'a dyn Embedder, index: &'a VectorIndex) -> Self {
        Self {
            embedder,
            index,
            snippet_chars: DEFAULT_SNIPPET_MAX_CHARS,
        }
    }

    /// Bound snippets to `snippet_chars` characters instead of 400.
    pub fn with_snippet_chars(mut self, snippet_chars: usize) -> Self {
        self.snippet_chars = snippet_chars;
        self
    }

    /// Find the `top_k` passages closest to `query`.
    ///
    /// Any populated index yields up to `top_k` citations regardless of how
    /// relevant they are; only an empty index gives
    /// [`Retrieval::NoContext`]. Embedding and index failures are wrapped in
    /// [`Error::Retrieval`].
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Retrieval> {
        if top_k == 0 {
            return Err(Error::Config("top_k must be positive".into()));
        }

        let vector = self.embedder.embed(query).map_err(Error::retrieval)?;
        let hits = self
            .index
            .search(&vector, top_k)
            .map_err(Error::retrieval)?;

        tracing::debug!(query, hits = hits.len(), "retrieved passages");
        if hits.is_empty() {
            return Ok(Retrieval::NoContext);
        }
        Ok(Retrieval::Citations(CitationBundle::from_hits(
            hits,
            self.snippet_chars,
        )))
    }

    /// Run a query and render it for an agent. Never fails: errors come back
    /// as the [`inline_error`] string.
    pub fn tool_output(&self, query: &str, top_k: usize) -> String {
        match self.retrieve(query, top_k) {
            Ok(retrieval) => retrieval.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed");
                inline_error(&e)
            }
        }
    }
}
