//! Document loading: turning files on disk into [`Document`]s.
//!
//! Format handling sits behind the [`DocumentSource`] trait so the ingestion
//! pipeline only sees discovered files and loaded documents. The bundled
//! [`DirectorySource`] reads `.txt` files as UTF-8 and extracts `.pdf` files
//! page by page.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    walker::{self, DiscoveredFile},
};

/// Metadata attached to documents, chunks and index entries.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the originating file name.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding the document format (`txt` or `pdf`).
pub const FORMAT_KEY: &str = "format";
/// Metadata key holding the 1-based PDF page number.
pub const PAGE_KEY: &str = "page";

/// Raw document text plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    /// Create a document whose `source` metadata is set to `source`.
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), source.into());
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// File formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Pdf,
}

impl DocumentFormat {
    /// Classify a path by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Pdf => "pdf",
        }
    }
}

/// Where documents come from.
pub trait DocumentSource {
    /// List every candidate file, supported or not.
    fn discover(&self) -> Result<Vec<DiscoveredFile>>;

    /// Load one file into one or more documents.
    ///
    /// Fails with [`Error::Load`] when the file cannot be read, its format
    /// is unsupported, or it contains no text.
    fn load(&self, file: &DiscoveredFile) -> Result<Vec<Document>>;
}

/// Loads `.txt` and `.pdf` files from a directory tree.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DocumentSource for DirectorySource {
    fn discover(&self) -> Result<Vec<DiscoveredFile>> {
        std::fs::create_dir_all(&self.root)?;
        walker::discover_files(&self.root)
    }

    fn load(&self, file: &DiscoveredFile) -> Result<Vec<Document>> {
        let source = file.source_name();
        let load_error = |reason: String| Error::Load {
            document: source.clone(),
            reason,
        };

        let format = DocumentFormat::from_path(&file.absolute_path)
            .ok_or_else(|| load_error("unsupported file type".to_string()))?;

        let pages = match format {
            DocumentFormat::Text => {
                let text = std::fs::read_to_string(&file.absolute_path)
                    .map_err(|e| load_error(e.to_string()))?;
                vec![(None, text)]
            }
            DocumentFormat::Pdf => {
                let text = extract_pdf_text(&file.absolute_path)
                    .map_err(load_error)?;
                split_pdf_pages(&text)
            }
        };

        let documents: Vec<Document> = pages
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(page, text)| {
                let doc = Document::new(text, source.clone())
                    .with_metadata(FORMAT_KEY, format.as_str());
                match page {
                    Some(page) => doc.with_metadata(PAGE_KEY, page.to_string()),
                    None => doc,
                }
            })
            .collect();

        if documents.is_empty() {
            return Err(load_error("document contains no text".to_string()));
        }

        Ok(documents)
    }
}

/// Extract all text from a PDF.
///
/// `pdf-extract` panics on some malformed files; a panic is reported as a
/// failure of this one file.
fn extract_pdf_text(path: &Path) -> std::result::Result<String, String> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text(path)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(format!("failed to extract PDF text: {e}")),
        Err(_) => Err("PDF parser panicked".to_string()),
    }
}

/// Split extracted PDF text into `(page_number, text)` pairs.
///
/// `pdf-extract` separates pages with form feeds.
fn split_pdf_pages(text: &str) -> Vec<(Option<usize>, String)> {
    text.split('\x0c')
        .enumerate()
        .map(|(i, page)| (Some(i + 1), page.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_in(dir: &Path, name: &str) -> DiscoveredFile {
        DiscoveredFile {
            relative_path: PathBuf::from(name),
            absolute_path: dir.join(name),
        }
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a.txt")),
            Some(DocumentFormat::Text)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("b.PDF")),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("c.md")), None);
        assert_eq!(DocumentFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn loads_text_with_source_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("A.txt"), "The sky is blue.").unwrap();

        let source = DirectorySource::new(tmp.path());
        let docs = source.load(&file_in(tmp.path(), "A.txt")).unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "The sky is blue.");
        assert_eq!(docs[0].source(), Some("A.txt"));
        assert_eq!(docs[0].metadata.get(FORMAT_KEY).unwrap(), "txt");
        assert!(!docs[0].metadata.contains_key(PAGE_KEY));
    }

    #[test]
    fn empty_text_file_is_a_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("blank.txt"), "  \n\n ").unwrap();

        let source = DirectorySource::new(tmp.path());
        let err = source.load(&file_in(tmp.path(), "blank.txt")).unwrap_err();
        assert!(matches!(err, Error::Load { ref document, .. } if document == "blank.txt"));
    }

    #[test]
    fn invalid_utf8_is_a_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bad.txt"), [0xff, 0xfe, 0xfd]).unwrap();

        let source = DirectorySource::new(tmp.path());
        let err = source.load(&file_in(tmp.path(), "bad.txt")).unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn corrupt_pdf_is_a_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.pdf"), "not a pdf").unwrap();

        let source = DirectorySource::new(tmp.path());
        let err = source.load(&file_in(tmp.path(), "broken.pdf")).unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn unsupported_format_is_a_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.md"), "# Notes").unwrap();

        let source = DirectorySource::new(tmp.path());
        assert!(source.load(&file_in(tmp.path(), "notes.md")).is_err());
    }

    #[test]
    fn pdf_pages_split_on_form_feed() {
        let pages = split_pdf_pages("first\x0csecond\x0c");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], (Some(1), "first".to_string()));
        assert_eq!(pages[1], (Some(2), "second".to_string()));
    }

    #[test]
    fn discover_creates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("data").join("docs");
        let source = DirectorySource::new(&root);

        assert!(source.discover().unwrap().is_empty());
        assert!(root.is_dir());
    }
}
