use std::path::{Path, PathBuf};

use docrag::{
    RagContext,
    embedding::EmbedderSpec,
    ingestion::IngestionConfig,
    loader::DirectorySource,
};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let docs_dir = data_dir.join("docs");
    std::fs::create_dir_all(&docs_dir)?;
    std::fs::write(docs_dir.join("A.txt"), "The sky is blue.")?;
    std::fs::write(docs_dir.join("B.txt"), "Grass is green.")?;

    let context = RagContext::open(
        &data_dir.join("index"),
        Some(EmbedderSpec::Hashing { dimension: 384 }),
    )?;
    context
        .pipeline(IngestionConfig::default())
        .rebuild(&DirectorySource::new(&docs_dir))?;
    context.close();

    Ok(())
}

#[tokio::test]
async fn mcp_stdio_retrieve_roundtrip() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = docrag_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("DOCRAG_DATA_DIR", tempdir.path())
                .env("DOCRAG_LOG", "warn");
        }),
    )?;

    let client = ().serve(transport).await?;

    let args = json!({
        "query": "What color is the sky?",
        "topK": 2
    });

    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("retrieve_docs")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await?;

    assert_eq!(result.is_error, Some(false));
    let structured = result.structured_content.expect("structured content");
    assert_eq!(structured.get("resultCount").and_then(|v| v.as_u64()), Some(2));
    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");
    assert_eq!(
        results[0].get("source").and_then(|v| v.as_str()),
        Some("A.txt")
    );

    let text = result
        .content
        .first()
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
        .unwrap_or_default();
    assert!(text.starts_with("[1] Source: A.txt\nThe sky is blue."));

    client.cancel().await?;
    Ok(())
}

fn docrag_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docrag") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docrag");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
