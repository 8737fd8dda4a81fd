use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docrag",
    about = "Index local documents and retrieve cited passages for an AI agent"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedder to use: hashing[:DIM] or colbert[:MODEL]
    #[arg(long, global = true)]
    pub embedder: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rebuild the vector index from the documents directory
    Index(IndexArgs),
    /// Retrieve the passages closest to a query
    Retrieve(RetrieveArgs),
    /// Interactive retrieval loop
    Repl(ReplArgs),
    /// Show index location and statistics
    Status(StatusArgs),
    /// Manage persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Serve the retrieval tool over MCP (stdio) for an AI agent
    Mcp(McpArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Directory containing .txt and .pdf documents
    #[arg(long)]
    pub docs: Option<PathBuf>,

    /// Chunk size in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Characters shared by neighbouring chunks
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// Chunks per embedding call
    #[arg(long)]
    pub batch_size: Option<usize>,
}

// -- Retrieve --

#[derive(Debug, Parser)]
pub struct RetrieveArgs {
    /// The query
    pub query: String,

    /// Number of passages to return
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Output citations as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Repl --

#[derive(Debug, Parser)]
pub struct ReplArgs {
    /// Number of passages to return per query
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective settings
    Show,
    /// Persist a setting in config.redb
    Set {
        /// docs_dir, embedder, chunk_size, chunk_overlap, batch_size or top_k
        key: String,
        value: String,
    },
    /// Remove a stored setting (revert to default)
    Unset { key: String },
}

// -- MCP --

#[derive(Debug, Parser)]
pub struct McpArgs {
    /// Default number of passages when the caller gives none
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docrag",
            &mut std::io::stdout(),
        );
    }
}
