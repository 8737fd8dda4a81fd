use std::path::Path;

use docrag::{
    DocumentId,
    Error,
    HashingEmbedder,
    IndexEntry,
    RagContext,
    VectorIndex,
    chunking::ChunkingConfig,
    embedding::{Embedder, EmbedderSpec},
    ingestion::IngestionConfig,
    loader::{DirectorySource, Metadata},
    retrieval::{NO_CONTEXT_MESSAGE, Retrieval},
};

fn write_docs(dir: &Path, docs: &[(&str, &str)]) {
    std::fs::create_dir_all(dir).unwrap();
    for (name, text) in docs {
        std::fs::write(dir.join(name), text).unwrap();
    }
}

fn open_hashing(dir: &Path) -> RagContext {
    RagContext::open(
        &dir.join("index"),
        Some(EmbedderSpec::Hashing { dimension: 384 }),
    )
    .unwrap()
}

#[test]
fn sky_question_cites_a_first() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_docs(&docs, &[("A.txt", "The sky is blue."), ("B.txt", "Grass is green.")]);

    let context = open_hashing(tmp.path());
    let report = context
        .pipeline(IngestionConfig::default())
        .rebuild(&DirectorySource::new(&docs))
        .unwrap();
    assert_eq!(report.files_indexed, 2);
    assert_eq!(report.chunks_written, 2);

    let result = context
        .retrieval()
        .retrieve("What color is the sky?", 4)
        .unwrap();
    let citations = result.citations();
    assert_eq!(citations[0].source, "A.txt");
    assert_eq!(citations[1].source, "B.txt");

    let output = result.to_string();
    assert!(output.starts_with("[1] Source: A.txt\nThe sky is blue."));
    assert!(output.contains("\n\n[2] Source: B.txt\n"));
}

#[test]
fn index_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_docs(&docs, &[("A.txt", "The sky is blue."), ("B.txt", "Grass is green.")]);

    {
        let context = open_hashing(tmp.path());
        context
            .pipeline(IngestionConfig::default())
            .rebuild(&DirectorySource::new(&docs))
            .unwrap();
        context.close();
    }

    let context = RagContext::open(&tmp.path().join("index"), None).unwrap();
    let result = context.retrieval().retrieve("green grass", 1).unwrap();
    assert_eq!(result.citations().len(), 1);
    assert_eq!(result.citations()[0].source, "B.txt");
}

#[test]
fn nested_files_keep_relative_source() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_docs(&docs.join("guides"), &[("setup.txt", "Install the toolchain first.")]);

    let context = open_hashing(tmp.path());
    context
        .pipeline(IngestionConfig::default())
        .rebuild(&DirectorySource::new(&docs))
        .unwrap();

    let result = context.retrieval().retrieve("install toolchain", 4).unwrap();
    assert_eq!(result.citations()[0].source, "guides/setup.txt");
}

#[test]
fn long_document_is_chunked_and_cited_by_passage() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    let mut text = String::new();
    for topic in ["apples", "bridges", "comets", "dolphins", "engines"] {
        text.push_str(&format!(
            "This paragraph is about {topic}. {topic} are discussed here at length.\n\n"
        ));
    }
    write_docs(&docs, &[("topics.txt", &text)]);

    let context = open_hashing(tmp.path());
    let config =
        IngestionConfig::new(ChunkingConfig::new(90, 10).unwrap(), 2).unwrap();
    let report = context
        .pipeline(config)
        .rebuild(&DirectorySource::new(&docs))
        .unwrap();
    assert!(report.chunks_written >= 5);

    let result = context.retrieval().retrieve("comets", 1).unwrap();
    let top = &result.citations()[0];
    assert_eq!(top.source, "topics.txt");
    assert!(top.snippet.contains("comets"));
    assert!(!top.snippet.contains('\n'));
}

#[test]
fn empty_corpus_gives_no_context_marker() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");

    let context = open_hashing(tmp.path());
    let report = context
        .pipeline(IngestionConfig::default())
        .rebuild(&DirectorySource::new(&docs))
        .unwrap();
    assert_eq!(report.files_indexed, 0);
    assert!(docs.is_dir());

    let tool = context.retrieval();
    assert_eq!(tool.retrieve("anything", 4).unwrap(), Retrieval::NoContext);
    assert_eq!(tool.tool_output("anything", 4), NO_CONTEXT_MESSAGE);
}

#[test]
fn mismatched_dimension_upsert_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let index = VectorIndex::create(&tmp.path().join("index"), 768).unwrap();

    let existing = IndexEntry {
        id: DocumentId::new("A.txt", None).chunk_id(0),
        vector: vec![0.25; 768],
        text: "The sky is blue.".to_string(),
        metadata: Metadata::from([("source".to_string(), "A.txt".to_string())]),
    };
    index.upsert(std::slice::from_ref(&existing)).unwrap();

    let embedder = HashingEmbedder::default();
    let wrong = IndexEntry {
        id: DocumentId::new("B.txt", None).chunk_id(0),
        vector: embedder.embed("Grass is green.").unwrap(),
        text: "Grass is green.".to_string(),
        metadata: Metadata::new(),
    };
    assert_eq!(wrong.vector.len(), 384);

    let err = index.upsert(&[wrong]).unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 768,
            actual: 384
        }
    ));

    assert_eq!(index.len().unwrap(), 1);
    assert_eq!(index.get(&existing.id).unwrap(), Some(existing));
}

#[test]
fn querying_with_a_different_embedder_fails_fast() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_docs(&docs, &[("A.txt", "The sky is blue.")]);

    {
        let context = open_hashing(tmp.path());
        context
            .pipeline(IngestionConfig::default())
            .rebuild(&DirectorySource::new(&docs))
            .unwrap();
    }

    let context = RagContext::open(
        &tmp.path().join("index"),
        Some(EmbedderSpec::Hashing { dimension: 768 }),
    )
    .unwrap();
    let output = context.retrieval().tool_output("sky", 4);
    assert_eq!(
        output,
        "Error querying vector store: dimension mismatch: index expects 384, got 768"
    );
}
