//! Chunking utilities for splitting documents into overlapping passages.
//!
//! Sizes are measured in characters (Unicode scalar values). Each window is
//! at most `chunk_size` characters long and the next window starts exactly
//! `chunk_overlap` characters before the previous one ended, so neighbouring
//! chunks share that much context and the original text can be rebuilt by
//! dropping the overlapping prefix of every chunk after the first.
//!
//! Window ends are pulled back to a natural boundary when one is available:
//! a paragraph break, then a line break, then the end of a sentence, then any
//! whitespace. Only the second half of a window is searched, so chunks never
//! shrink below half the configured size except at the end of the text.

use crate::{
    error::{Error, Result},
    loader::{Document, Metadata},
};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Validated chunking parameters.
///
/// # Examples
///
/// ```
/// use docrag::chunking::ChunkingConfig;
///
/// assert!(ChunkingConfig::new(100, 20).is_ok());
/// assert!(ChunkingConfig::new(100, 100).is_err());
/// assert!(ChunkingConfig::new(0, 0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A passage of a larger document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// The chunk text content.
    pub text: String,
    /// Zero-based chunk index within the document.
    pub index: usize,
    /// Character offset where this chunk starts in the original document.
    pub start_offset: usize,
    /// Metadata inherited from the source document.
    pub metadata: Metadata,
}

impl Chunk {
    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Splits documents into overlapping chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Lazily split a document. Chunks carry the document's metadata.
    ///
    /// A document no longer than `chunk_size` yields a single chunk equal to
    /// its text. Whitespace-only windows are skipped so downstream embedders
    /// never see empty input.
    ///
    /// # Examples
    ///
    /// ```
    /// use docrag::chunking::{Chunker, ChunkingConfig};
    /// use docrag::loader::Document;
    ///
    /// let chunker = Chunker::new(ChunkingConfig::new(1000, 200).unwrap());
    /// let doc = Document::new("Hello, world!", "hello.txt");
    /// let chunks: Vec<_> = chunker.split(&doc).collect();
    /// assert_eq!(chunks.len(), 1);
    /// assert_eq!(chunks[0].text, "Hello, world!");
    /// assert_eq!(chunks[0].metadata.get("source").unwrap(), "hello.txt");
    /// ```
    pub fn split<'a>(&self, document: &'a Document) -> Chunks<'a> {
        Chunks::new(&document.text, &document.metadata, self.config)
    }
}

/// Iterator over the chunks of one document.
///
/// Cloning the iterator (or calling [`Chunker::split`] again) restarts the
/// sequence from any point.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    metadata: &'a Metadata,
    /// Byte offset of every char, plus `text.len()` as a sentinel.
    char_to_byte: Vec<usize>,
    config: ChunkingConfig,
    next_start: Option<usize>,
    index: usize,
}

impl<'a> Chunks<'a> {
    fn new(
        text: &'a str,
        metadata: &'a Metadata,
        config: ChunkingConfig,
    ) -> Self {
        let char_to_byte = text
            .char_indices()
            .map(|(byte_idx, _)| byte_idx)
            .chain(std::iter::once(text.len()))
            .collect();

        Self {
            text,
            metadata,
            char_to_byte,
            config,
            next_start: Some(0),
            index: 0,
        }
    }

    fn char_count(&self) -> usize {
        self.char_to_byte.len() - 1
    }

    fn byte_to_char(&self, byte: usize) -> usize {
        self.char_to_byte.partition_point(|&b| b < byte)
    }

    /// Pick the end of the window starting at `start`, pulling it back from
    /// `window_end` to the best natural boundary no earlier than `min_end`.
    fn window_end(&self, start: usize, window_end: usize) -> usize {
        let ChunkingConfig {
            chunk_size,
            chunk_overlap,
        } = self.config;
        // The next window starts `chunk_overlap` before this end; keep it
        // strictly after `start`.
        let min_end =
            (start + (chunk_overlap + 1).max(chunk_size / 2)).min(window_end);

        let start_byte = self.char_to_byte[start];
        let region = &self.text[start_byte..self.char_to_byte[window_end]];

        let candidates = [
            region.rfind("\n\n").map(|i| i + 2),
            region.rfind('\n').map(|i| i + 1),
            last_sentence_end(region),
            region
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8()),
        ];

        candidates
            .into_iter()
            .flatten()
            .map(|offset| self.byte_to_char(start_byte + offset))
            .find(|&end| end >= min_end)
            .unwrap_or(window_end)
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            let start = self.next_start?;
            let char_count = self.char_count();
            if start >= char_count {
                self.next_start = None;
                return None;
            }

            let window_end = (start + self.config.chunk_size).min(char_count);
            let end = if window_end < char_count {
                self.window_end(start, window_end)
            } else {
                window_end
            };

            self.next_start = (end < char_count)
                .then(|| end - self.config.chunk_overlap);

            let text =
                &self.text[self.char_to_byte[start]..self.char_to_byte[end]];
            if text.trim().is_empty() {
                continue;
            }

            let chunk = Chunk {
                text: text.to_string(),
                index: self.index,
                start_offset: start,
                metadata: self.metadata.clone(),
            };
            self.index += 1;
            return Some(chunk);
        }
    }
}

/// Byte offset just past the last `.`, `!` or `?` that is followed by
/// whitespace, including that whitespace character.
fn last_sentence_end(region: &str) -> Option<usize> {
    let mut following: Option<char> = None;
    for (i, c) in region.char_indices().rev() {
        if let Some(next) = following
            && matches!(c, '.' | '!' | '?')
            && next.is_whitespace()
        {
            return Some(i + c.len_utf8() + next.len_utf8());
        }
        following = Some(c);
    }
    None
}
