//! Persistent vector index backed by redb.
//!
//! Every entry is an `(id, vector, text, metadata)` tuple. Vectors and
//! records live in separate tables but are always written in the same
//! transaction, so an upsert is visible all at once or not at all. Search is
//! an exact scan ranked by cosine similarity (higher is closer).
//!
//! redb holds an exclusive lock on the database file while it is open, so a
//! second process trying to open the same index fails with a storage error
//! instead of interleaving writes.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    loader::{Metadata, SOURCE_KEY},
};

/// File name of the database inside the index directory.
pub const INDEX_FILE: &str = "vectors.redb";

const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");
const RECORDS: TableDefinition<&str, &str> = TableDefinition::new("records");
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

const DIMENSION_KEY: &str = "dimension";
const EMBEDDER_KEY: &str = "embedder";

const F32_SIZE: usize = std::mem::size_of::<f32>();

/// One stored passage.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

impl IndexEntry {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// A search hit with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// Text and metadata of an entry, stored as JSON.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    text: String,
    metadata: Metadata,
}

pub struct VectorIndex {
    db: Database,
    dir: PathBuf,
}

impl VectorIndex {
    /// Open or create the index stored in directory `dir`.
    ///
    /// The storage handle is released when the index is dropped or
    /// [closed](Self::close), on every exit path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docrag::VectorIndex;
    ///
    /// let index = VectorIndex::open(&tmp.path().join("index")).unwrap();
    /// assert!(index.is_empty().unwrap());
    /// assert_eq!(index.dimension().unwrap(), None);
    /// ```
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|_| Error::DataDir(dir.into()))?;
        let db = Database::create(dir.join(INDEX_FILE))?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(RECORDS)?;
        txn.open_table(META)?;
        txn.commit()?;

        tracing::debug!(path = %dir.display(), "opened vector index");
        Ok(Self {
            db,
            dir: dir.to_path_buf(),
        })
    }

    /// Open the index at `dir`, discard its contents, and fix its dimension.
    pub fn create(dir: &Path, dimension: usize) -> Result<Self> {
        let index = Self::open(dir)?;
        index.clear()?;
        index.set_dimension(dimension)?;
        Ok(index)
    }

    /// Release the storage handle.
    pub fn close(self) {
        tracing::debug!(path = %self.dir.display(), "closing vector index");
        drop(self);
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The vector dimension, once fixed by the first upsert or [`create`].
    ///
    /// [`create`]: Self::create
    pub fn dimension(&self) -> Result<Option<usize>> {
        let txn = self.db.begin_read()?;
        let meta = txn.open_table(META)?;
        let value = meta.get(DIMENSION_KEY)?.map(|v| v.value().to_string());
        value.map(|v| parse_dimension(&v)).transpose()
    }

    /// Fix the dimension of an empty index.
    ///
    /// Fails with [`Error::DimensionMismatch`] if a different dimension is
    /// already recorded.
    pub fn set_dimension(&self, dimension: usize) -> Result<()> {
        if dimension == 0 {
            return Err(Error::Config("index dimension must be positive".into()));
        }
        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            let stored = meta.get(DIMENSION_KEY)?.map(|v| v.value().to_string());
            match stored.map(|v| parse_dimension(&v)).transpose()? {
                Some(expected) if expected != dimension => {
                    return Err(Error::DimensionMismatch {
                        expected,
                        actual: dimension,
                    });
                }
                Some(_) => {}
                None => {
                    meta.insert(DIMENSION_KEY, dimension.to_string().as_str())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// The embedder spec recorded for this index, if any.
    pub fn embedder(&self) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let meta = txn.open_table(META)?;
        Ok(meta.get(EMBEDDER_KEY)?.map(|v| v.value().to_string()))
    }

    pub fn set_embedder(&self, spec: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            meta.insert(EMBEDDER_KEY, spec)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        Ok(vectors.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Insert or replace entries in a single transaction.
    ///
    /// All vectors must share the index dimension; the first upsert into an
    /// index without one fixes it. If any entry is rejected nothing is
    /// written. Returns the number of entries written.
    pub fn upsert(&self, entries: &[IndexEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            let stored = meta.get(DIMENSION_KEY)?.map(|v| v.value().to_string());
            let expected = match stored {
                Some(v) => parse_dimension(&v)?,
                None => entries[0].vector.len(),
            };

            if expected == 0 {
                return Err(Error::Config(
                    "cannot store zero-length vectors".into(),
                ));
            }
            if let Some(bad) =
                entries.iter().find(|e| e.vector.len() != expected)
            {
                // Dropping the transaction aborts it.
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: bad.vector.len(),
                });
            }

            meta.insert(DIMENSION_KEY, expected.to_string().as_str())?;

            let mut vectors = txn.open_table(VECTORS)?;
            let mut records = txn.open_table(RECORDS)?;
            for entry in entries {
                let record = serde_json::to_string(&StoredRecord {
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                })?;
                let bytes: &[u8] = bytemuck::cast_slice(&entry.vector);
                vectors.insert(entry.id.as_str(), bytes)?;
                records.insert(entry.id.as_str(), record.as_str())?;
            }
        }
        txn.commit()?;

        tracing::debug!(count = entries.len(), "upserted index entries");
        Ok(entries.len())
    }

    /// Fetch one entry by id.
    pub fn get(&self, id: &str) -> Result<Option<IndexEntry>> {
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let records = txn.open_table(RECORDS)?;

        let Some(vector) = vectors.get(id)? else {
            return Ok(None);
        };
        let vector = decode_vector(id, vector.value())?;
        let record = records.get(id)?.ok_or_else(|| Error::CorruptEntry {
            id: id.to_string(),
            reason: "vector has no record".to_string(),
        })?;
        let record = decode_record(id, record.value())?;

        Ok(Some(IndexEntry {
            id: id.to_string(),
            vector,
            text: record.text,
            metadata: record.metadata,
        }))
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut records = txn.open_table(RECORDS)?;
            let removed = vectors.remove(id)?.is_some();
            records.remove(id)?;
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    /// List all stored ids in key order.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let mut ids = Vec::new();
        for entry in vectors.iter()? {
            let (k, _) = entry?;
            ids.push(k.value().to_string());
        }
        Ok(ids)
    }

    /// Remove every entry and forget the dimension and embedder.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(RECORDS)?;
        txn.delete_table(META)?;
        txn.open_table(VECTORS)?;
        txn.open_table(RECORDS)?;
        txn.open_table(META)?;
        txn.commit()?;
        tracing::debug!(path = %self.dir.display(), "cleared vector index");
        Ok(())
    }

    /// Return the `top_k` entries most similar to `query`, best first.
    ///
    /// Ties are broken by id so results are stable. An empty index yields an
    /// empty result; a query of the wrong length fails with
    /// [`Error::DimensionMismatch`].
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>> {
        if top_k == 0 {
            return Err(Error::Config("top_k must be positive".into()));
        }

        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        if vectors.is_empty()? {
            return Ok(Vec::new());
        }

        let meta = txn.open_table(META)?;
        if let Some(v) = meta.get(DIMENSION_KEY)? {
            let expected = parse_dimension(v.value())?;
            if query.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let mut candidates = Vec::new();
        for entry in vectors.iter()? {
            let (k, v) = entry?;
            let id = k.value().to_string();
            let vector = decode_vector(&id, v.value())?;
            candidates.push((id, vector));
        }

        let mut scored: Vec<(String, f32)> = candidates
            .into_par_iter()
            .map(|(id, vector)| {
                let score = cosine_similarity(query, &vector);
                (id, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);

        let records = txn.open_table(RECORDS)?;
        scored
            .into_iter()
            .map(|(id, score)| {
                let vector = vectors
                    .get(id.as_str())?
                    .map(|v| decode_vector(&id, v.value()))
                    .transpose()?
                    .unwrap_or_default();
                let record = records.get(id.as_str())?.ok_or_else(|| {
                    Error::CorruptEntry {
                        id: id.clone(),
                        reason: "vector has no record".to_string(),
                    }
                })?;
                let record = decode_record(&id, record.value())?;
                Ok(ScoredEntry {
                    entry: IndexEntry {
                        id,
                        vector,
                        text: record.text,
                        metadata: record.metadata,
                    },
                    score,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` if either vector is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn parse_dimension(value: &str) -> Result<usize> {
    value.parse().map_err(|_| Error::CorruptEntry {
        id: DIMENSION_KEY.to_string(),
        reason: format!("invalid dimension '{value}'"),
    })
}

fn decode_vector(id: &str, bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % F32_SIZE != 0 {
        return Err(Error::CorruptEntry {
            id: id.to_string(),
            reason: format!("vector length {} is not a multiple of 4", bytes.len()),
        });
    }
    // redb values carry no alignment guarantee, so copy element-wise.
    Ok(bytes
        .chunks_exact(F32_SIZE)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn decode_record(id: &str, json: &str) -> Result<StoredRecord> {
    serde_json::from_str(json).map_err(|e| Error::CorruptEntry {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_index() -> (tempfile::TempDir, VectorIndex) {
        let tmp = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(&tmp.path().join("index")).unwrap();
        (tmp, index)
    }

    fn entry(id: &str, vector: Vec<f32>, text: &str) -> IndexEntry {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), format!("{id}.txt"));
        IndexEntry {
            id: id.to_string(),
            vector,
            text: text.to_string(),
            metadata,
        }
    }

    #[test]
    fn search_empty_index_returns_nothing() {
        let (_tmp, index) = test_index();
        assert!(index.search(&[1.0, 0.0], 4).unwrap().is_empty());
    }

    #[test]
    fn self_similarity_is_maximal() {
        let (_tmp, index) = test_index();
        let v = vec![0.3, -0.2, 0.9];
        index.upsert(&[entry("only", v.clone(), "text")]).unwrap();

        let hits = index.search(&v, 4).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, "only");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert_eq!(hits[0].entry.vector, v);
    }

    #[test]
    fn search_orders_by_similarity_and_limits() {
        let (_tmp, index) = test_index();
        index
            .upsert(&[
                entry("x", vec![1.0, 0.0], "x axis"),
                entry("y", vec![0.0, 1.0], "y axis"),
                entry("diag", vec![1.0, 1.0], "diagonal"),
                entry("neg", vec![-1.0, 0.0], "negative x"),
            ])
            .unwrap();

        let hits = index.search(&[1.0, 0.1], 3).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "diag", "y"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let all = index.search(&[1.0, 0.1], 10).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].entry.id, "neg");
    }

    #[test]
    fn zero_query_returns_top_k_in_id_order() {
        let (_tmp, index) = test_index();
        index
            .upsert(&[
                entry("b", vec![0.0, 1.0], "b"),
                entry("a", vec![1.0, 0.0], "a"),
                entry("c", vec![1.0, 1.0], "c"),
            ])
            .unwrap();

        let hits = index.search(&[0.0, 0.0], 2).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(hits.iter().all(|h| h.score == 0.0));
    }

    #[test]
    fn upsert_same_id_overwrites() {
        let (_tmp, index) = test_index();
        index.upsert(&[entry("doc", vec![1.0, 0.0], "first")]).unwrap();
        index.upsert(&[entry("doc", vec![0.0, 1.0], "second")]).unwrap();

        assert_eq!(index.len().unwrap(), 1);
        let stored = index.get("doc").unwrap().unwrap();
        assert_eq!(stored.text, "second");
        assert_eq!(stored.vector, vec![0.0, 1.0]);
    }

    #[test]
    fn dimension_mismatch_leaves_index_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let index = VectorIndex::create(&tmp.path().join("index"), 768).unwrap();
        index
            .upsert(&[entry("keep", vec![0.5; 768], "existing")])
            .unwrap();

        let err = index
            .upsert(&[
                entry("fits", vec![0.1; 768], "would fit"),
                entry("bad", vec![0.1; 384], "wrong size"),
            ])
            .unwrap_err();

        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 768,
                actual: 384
            }
        ));
        assert_eq!(index.list_ids().unwrap(), vec!["keep"]);
        assert_eq!(index.dimension().unwrap(), Some(768));
    }

    #[test]
    fn first_upsert_fixes_dimension() {
        let (_tmp, index) = test_index();
        assert_eq!(index.dimension().unwrap(), None);
        index.upsert(&[entry("a", vec![1.0, 2.0, 3.0], "a")]).unwrap();
        assert_eq!(index.dimension().unwrap(), Some(3));

        let err = index.upsert(&[entry("b", vec![1.0], "b")]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn query_dimension_mismatch_fails() {
        let (_tmp, index) = test_index();
        index.upsert(&[entry("a", vec![1.0, 0.0], "a")]).unwrap();
        let err = index.search(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn zero_top_k_rejected() {
        let (_tmp, index) = test_index();
        assert!(matches!(index.search(&[1.0], 0), Err(Error::Config(_))));
    }

    #[test]
    fn set_dimension_conflict() {
        let (_tmp, index) = test_index();
        index.set_dimension(4).unwrap();
        index.set_dimension(4).unwrap();
        assert!(matches!(
            index.set_dimension(8),
            Err(Error::DimensionMismatch {
                expected: 4,
                actual: 8
            })
        ));
    }

    #[test]
    fn clear_resets_entries_and_metadata() {
        let (_tmp, index) = test_index();
        index.upsert(&[entry("a", vec![1.0, 0.0], "a")]).unwrap();
        index.set_embedder("hashing:2").unwrap();

        index.clear().unwrap();

        assert!(index.is_empty().unwrap());
        assert_eq!(index.dimension().unwrap(), None);
        assert_eq!(index.embedder().unwrap(), None);
        index.upsert(&[entry("b", vec![1.0, 0.0, 0.0], "b")]).unwrap();
        assert_eq!(index.dimension().unwrap(), Some(3));
    }

    #[test]
    fn remove_entry() {
        let (_tmp, index) = test_index();
        index.upsert(&[entry("a", vec![1.0], "a")]).unwrap();
        assert!(index.remove("a").unwrap());
        assert!(!index.remove("a").unwrap());
        assert!(index.get("a").unwrap().is_none());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");

        {
            let index = VectorIndex::open(&dir).unwrap();
            index.upsert(&[entry("a", vec![1.0, 2.0], "kept")]).unwrap();
            index.set_embedder("hashing:2").unwrap();
            index.close();
        }

        let index = VectorIndex::open(&dir).unwrap();
        let stored = index.get("a").unwrap().unwrap();
        assert_eq!(stored.text, "kept");
        assert_eq!(stored.source(), Some("a.txt"));
        assert_eq!(index.embedder().unwrap().as_deref(), Some("hashing:2"));
        assert_eq!(index.dimension().unwrap(), Some(2));
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn decode_rejects_truncated_vectors() {
        assert!(decode_vector("x", &[0, 0, 0]).is_err());
        assert_eq!(decode_vector("x", &[]).unwrap(), Vec::<f32>::new());
    }
}
