use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    context::RagContext,
    error,
    retrieval::{Citation, inline_error},
};

#[derive(Clone)]
pub struct DocragMcpServer {
    context: Arc<RagContext>,
    default_top_k: usize,
    tool_router: ToolRouter<Self>,
}

impl DocragMcpServer {
    fn new(context: RagContext, default_top_k: usize) -> Self {
        Self {
            context: Arc::new(context),
            default_top_k,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocragMcpServer {
    /// Retrieve the passages closest to a query, numbered for citation.
    #[tool(
        name = "retrieve_docs",
        description = "Search the indexed documents for passages relevant to a question. Returns numbered passages with their source file; cite them as [n]."
    )]
    pub async fn retrieve_docs(
        &self,
        params: Parameters<RetrieveParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let top_k = params.top_k.unwrap_or(self.default_top_k);

        let retrieval = match self
            .context
            .retrieval()
            .retrieve(&params.query, top_k)
        {
            Ok(retrieval) => retrieval,
            Err(e) => {
                tracing::warn!(error = %e, "retrieve_docs failed");
                return Ok(CallToolResult::error(vec![Content::text(
                    inline_error(&e),
                )]));
            }
        };

        let citations = retrieval.citations();
        let structured = serde_json::to_value(RetrieveResponse {
            query: &params.query,
            result_count: citations.len(),
            results: citations,
        })
        .map_err(|e| mcp_error("failed to serialize citations", e))?;

        let mut result =
            CallToolResult::success(vec![Content::text(retrieval.to_string())]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocragMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docrag", env!("CARGO_PKG_VERSION"))
                    .with_title("docrag MCP"),
            )
            .with_instructions(
                "Call retrieve_docs whenever the answer may depend on the indexed documents. \
                 Base the answer on the returned passages and cite them by number, e.g. [1]. \
                 If no relevant context is found, say so instead of inventing citations.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveParams {
    /// Free-text question or search query.
    pub query: String,
    /// Number of passages to return (default: 4).
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [Citation],
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Serve `retrieve_docs` over stdio until the client disconnects.
pub fn run_mcp(context: RagContext, default_top_k: usize) -> error::Result<()> {
    let server = DocragMcpServer::new(context, default_top_k);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::EmbedderSpec,
        ingestion::IngestionConfig,
        loader::DirectorySource,
        retrieval::NO_CONTEXT_MESSAGE,
    };

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    fn context_with_docs(
        tmp: &tempfile::TempDir,
        docs: &[(&str, &str)],
    ) -> RagContext {
        let docs_dir = tmp.path().join("docs");
        std::fs::create_dir_all(&docs_dir).unwrap();
        for (name, text) in docs {
            std::fs::write(docs_dir.join(name), text).unwrap();
        }
        let ctx = RagContext::open(
            &tmp.path().join("index"),
            Some(EmbedderSpec::Hashing { dimension: 128 }),
        )
        .unwrap();
        ctx.pipeline(IngestionConfig::default())
            .rebuild(&DirectorySource::new(&docs_dir))
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn retrieve_tool_returns_structured_citations() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_with_docs(
            &tmp,
            &[("A.txt", "The sky is blue."), ("B.txt", "Grass is green.")],
        );
        let server = DocragMcpServer::new(ctx, 4);

        let result = server
            .retrieve_docs(Parameters(RetrieveParams {
                query: "What color is the sky?".to_string(),
                top_k: Some(1),
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(false));
        let structured = result.structured_content.clone().expect("structured");
        assert_eq!(structured["resultCount"], 1);
        assert_eq!(structured["query"], "What color is the sky?");
        let results = structured["results"].as_array().expect("results array");
        assert_eq!(results[0]["source"], "A.txt");
        assert_eq!(results[0]["index"], 1);

        assert_eq!(text_of(&result), "[1] Source: A.txt\nThe sky is blue.");
    }

    #[tokio::test]
    async fn empty_index_returns_no_context_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_with_docs(&tmp, &[]);
        let server = DocragMcpServer::new(ctx, 4);

        let result = server
            .retrieve_docs(Parameters(RetrieveParams {
                query: "anything".to_string(),
                top_k: None,
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(false));
        assert_eq!(text_of(&result), NO_CONTEXT_MESSAGE);
        assert_eq!(result.structured_content.unwrap()["resultCount"], 0);
    }

    #[tokio::test]
    async fn failures_are_reported_inline() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_with_docs(&tmp, &[("A.txt", "The sky is blue.")]);
        let server = DocragMcpServer::new(ctx, 4);

        let result = server
            .retrieve_docs(Parameters(RetrieveParams {
                query: "sky".to_string(),
                top_k: Some(0),
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        assert!(result.structured_content.is_none());
        assert!(text_of(&result).starts_with("Error querying vector store:"));
    }
}
