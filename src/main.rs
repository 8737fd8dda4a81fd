use std::{
    io::{BufRead, Write},
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use docrag::{
    ConfigDb,
    DataDir,
    Error,
    RagContext,
    Result,
    embedding::EmbedderSpec,
    loader::DirectorySource,
    retrieval::{Retrieval, inline_error},
    settings::{Overrides, SettingKey, Settings},
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCRAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(ExitCode::SUCCESS);
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    let mut overrides = Overrides {
        embedder: cli
            .embedder
            .as_deref()
            .map(str::parse::<EmbedderSpec>)
            .transpose()?,
        ..Overrides::default()
    };

    match cli.command {
        Command::Index(args) => {
            overrides.docs_dir = args.docs;
            overrides.chunk_size = args.chunk_size;
            overrides.chunk_overlap = args.chunk_overlap;
            overrides.batch_size = args.batch_size;
            let settings = Settings::resolve(&config_db, &overrides)?;
            cmd_index(&data_dir, &settings)
        }
        Command::Retrieve(args) => {
            overrides.top_k = args.top_k;
            let settings = Settings::resolve(&config_db, &overrides)?;
            cmd_retrieve(&data_dir, &settings, &args.query, args.json)
        }
        Command::Repl(args) => {
            overrides.top_k = args.top_k;
            let settings = Settings::resolve(&config_db, &overrides)?;
            cmd_repl(&data_dir, &settings)
        }
        Command::Status(args) => {
            let settings = Settings::resolve(&config_db, &overrides)?;
            cmd_status(&data_dir, &settings, args.json)
        }
        Command::Config { action } => {
            cmd_config(&config_db, &overrides, action)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Mcp(args) => {
            overrides.top_k = args.top_k;
            let settings = Settings::resolve(&config_db, &overrides)?;
            let context = open_context(&data_dir, &settings)?;
            docrag::mcp::run_mcp(context, settings.top_k)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Completions(_) => Ok(ExitCode::SUCCESS),
    }
}

fn open_context(data_dir: &DataDir, settings: &Settings) -> Result<RagContext> {
    RagContext::open(&data_dir.index_dir(), settings.embedder.clone())
}

/// Set the returned flag on the first Ctrl-C so ingestion stops between
/// files instead of mid-write.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&flag);

    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::debug!(error = %e, "no Ctrl-C handler");
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                eprintln!("Stopping after the current document...");
                handle.store(true, Ordering::Relaxed);
            }
        });
    if let Err(e) = spawned {
        tracing::debug!(error = %e, "no Ctrl-C handler");
    }

    flag
}

fn cmd_index(data_dir: &DataDir, settings: &Settings) -> Result<ExitCode> {
    let context = open_context(data_dir, settings)?;
    let source = DirectorySource::new(&settings.docs_dir);

    eprintln!(
        "Indexing documents from {} with {}",
        settings.docs_dir.display(),
        context.embedder().spec()
    );

    let report = context
        .pipeline(settings.ingestion_config()?)
        .with_cancel(cancel_on_ctrl_c())
        .rebuild(&source)?;

    if report.files_indexed == 0 && report.errors.is_empty() {
        eprintln!(
            "No documents found. Add .txt or .pdf files to {} and rerun.",
            settings.docs_dir.display()
        );
    }
    println!("{report}");
    context.close();

    Ok(if report.all_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_retrieve(
    data_dir: &DataDir,
    settings: &Settings,
    query: &str,
    json: bool,
) -> Result<ExitCode> {
    let context = open_context(data_dir, settings)?;
    let result = context.retrieval().retrieve(query, settings.top_k);

    let code = match result {
        Ok(retrieval) if json => {
            print_json(query, &retrieval)?;
            ExitCode::SUCCESS
        }
        Ok(retrieval) => {
            println!("{retrieval}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", inline_error(&e));
            ExitCode::FAILURE
        }
    };

    context.close();
    Ok(code)
}

fn print_json(query: &str, retrieval: &Retrieval) -> Result<()> {
    let citations = retrieval.citations();
    let value = json!({
        "query": query,
        "resultCount": citations.len(),
        "results": citations,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_repl(data_dir: &DataDir, settings: &Settings) -> Result<ExitCode> {
    let context = open_context(data_dir, settings)?;
    let tool = context.retrieval();

    println!(
        "Retrieving from {} (top {}). Type q, quit or exit to leave.",
        data_dir.index_dir().display(),
        settings.top_k
    );

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("\nQuery: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            println!();
            break;
        };
        let line = line?;
        let query = line.trim();

        if query.is_empty() {
            continue;
        }
        if matches!(query.to_lowercase().as_str(), "q" | "quit" | "exit") {
            break;
        }

        println!("{}", tool.tool_output(query, settings.top_k));
    }

    context.close();
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(
    data_dir: &DataDir,
    settings: &Settings,
    json: bool,
) -> Result<ExitCode> {
    let context = open_context(data_dir, settings)?;
    let index = context.index();
    let entries = index.len()?;
    let dimension = index.dimension()?;
    let embedder = index.embedder()?;

    if json {
        let value = json!({
            "dataDir": data_dir.root(),
            "indexDir": index.dir(),
            "docsDir": settings.docs_dir,
            "entries": entries,
            "dimension": dimension,
            "embedder": embedder,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Index: {}", index.dir().display());
        println!("Documents directory: {}", settings.docs_dir.display());
        println!("Entries: {entries}");
        match dimension {
            Some(dimension) => println!("Dimension: {dimension}"),
            None => println!("Dimension: (not set)"),
        }
        println!("Embedder: {}", embedder.as_deref().unwrap_or("(not set)"));
    }

    context.close();
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(
    config_db: &ConfigDb,
    overrides: &Overrides,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = Settings::resolve(config_db, overrides)?;
            for (key, value) in settings.describe() {
                println!("{key}\t{value}");
            }
        }
        ConfigAction::Set { key, value } => {
            let key: SettingKey = key.parse()?;
            key.validate(&value)?;
            config_db.set_setting(key.as_str(), &value)?;
            println!("Set {key} = {value}");
        }
        ConfigAction::Unset { key } => {
            let key: SettingKey = key.parse()?;
            if !config_db.remove_setting(key.as_str())? {
                return Err(Error::NotFound {
                    kind: "stored setting",
                    name: key.to_string(),
                });
            }
            println!("Removed {key}");
        }
    }
    Ok(())
}
