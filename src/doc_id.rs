use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use crate::loader::{Document, PAGE_KEY, SOURCE_KEY};

/// A stable identifier for one loaded document, derived from its `source`
/// and (for PDFs) its page number.
///
/// Rebuilding the index from the same files yields the same ids, so
/// re-ingesting a document overwrites its previous entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentId {
    /// The numeric hash of `(source, page)`.
    pub numeric: u64,
}

impl DocumentId {
    pub fn new(source: &str, page: Option<&str>) -> Self {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        page.hash(&mut hasher);
        Self {
            numeric: hasher.finish(),
        }
    }

    /// Derive the id from a document's metadata.
    pub fn for_document(document: &Document) -> Self {
        let source = document
            .metadata
            .get(SOURCE_KEY)
            .map(String::as_str)
            .unwrap_or_default();
        let page = document.metadata.get(PAGE_KEY).map(String::as_str);
        Self::new(source, page)
    }

    /// The index entry id for the `chunk_index`-th chunk of this document.
    ///
    /// # Examples
    ///
    /// ```
    /// use docrag::DocumentId;
    ///
    /// let id = DocumentId::new("A.txt", None);
    /// let chunk = id.chunk_id(3);
    /// assert!(chunk.starts_with(&id.to_string()));
    /// assert!(chunk.ends_with("-0003"));
    /// ```
    pub fn chunk_id(&self, chunk_index: usize) -> String {
        format!("{self}-{chunk_index:04}")
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.numeric)
    }
}
