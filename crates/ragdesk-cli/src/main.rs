//! CLI entry point for the ragdesk backend.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ragdesk_core::{
    app_data_dir, load_config, load_documents, Config, EmbeddingManager, EnsureOutcome, OllamaClient,
    RagSearch, VectorStore,
};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Shown to the user instead of internal errors.
const GENERIC_FAILURE: &str = "Sorry, something went wrong while answering. Please try again.";
const PREVIEW_CHARS: usize = 200;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "ragdesk")]
#[command(about = "ragdesk: answer questions from your documents")]
struct Cli {
    /// Config file (default: config.toml in the app data directory).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Ollama server URL; overrides the config file.
    #[arg(long, global = true, value_name = "URL")]
    ollama_url: Option<String>,

    /// API key sent to Ollama as a bearer token.
    #[arg(long, global = true, env = "OLLAMA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show where the vector store lives and how many entries it holds.
    Status,
    /// Show where ragdesk stores its config and index (app data directory).
    DataDir,
    /// Load documents, build the vector store and save it.
    Build {
        /// Directory to read documents from (default: from config).
        #[arg(long, value_name = "DIR")]
        docs: Option<PathBuf>,
    },
    /// Search the saved vector store and print the closest chunks.
    Query {
        text: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Answer a single question from the saved vector store.
    Ask {
        text: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Build the store from the documents directory if it has not been saved yet.
        #[arg(long)]
        rebuild_if_missing: bool,
    },
    /// Interactive question answering, one question per line.
    Chat {
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragdesk=info,ragdesk_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(url) = cli.ollama_url {
        config.ollama_url = url;
    }
    if cli.api_key.is_some() {
        config.api_key = cli.api_key;
    }

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            let store = VectorStore::new(config.persist_dir()?)?;
            println!("ragdesk");
            println!("  store:     {}", store.persist_dir().display());
            println!("  documents: {}", config.documents_dir()?.display());
            println!("  models:    {} (embed), {} (chat)", config.embed_model, config.llm_model);
            if store.files_exist() {
                let mut store = store;
                store.load()?;
                println!("  entries:   {}", store.len());
            } else {
                println!("  entries:   not built (run `ragdesk build`)");
            }
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::Build { docs } => {
            let docs = match docs {
                Some(d) => d,
                None => config.documents_dir()?,
            };
            let documents = load_documents(&docs)?;
            let mut rag = rag_search(&config)?;
            let chunks = rag.rebuild(&documents).await?;
            println!(
                "Indexed {} chunk(s) from {} document(s) into {}",
                chunks,
                documents.len(),
                rag.store().persist_dir().display()
            );
        }
        Commands::Query { text, top_k, json } => {
            let rag = loaded(&config)?;
            let top_k = top_k.unwrap_or(config.top_k);
            let results = rag.store().query(&text, top_k, rag.embeddings()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
                return Ok(());
            }
            for (i, r) in results.iter().enumerate() {
                let preview: String = r.metadata.text.chars().take(PREVIEW_CHARS).collect();
                println!("  Result {}: Distance={:.4}", i + 1, r.distance);
                println!("  Text: {preview}...");
            }
        }
        Commands::Ask {
            text,
            top_k,
            rebuild_if_missing,
        } => {
            let mut rag = rag_search(&config)?;
            if rebuild_if_missing {
                if let EnsureOutcome::Built { chunks } = rag.ensure_built(&config.documents_dir()?).await? {
                    eprintln!("Built a new store with {chunks} chunk(s).");
                }
            } else {
                rag.store_mut().load()?;
            }
            let answer = rag.search_and_summarize(&text, top_k.unwrap_or(config.top_k)).await?;
            println!("{answer}");
        }
        Commands::Chat { top_k } => {
            let rag = loaded(&config)?;
            chat(&rag, top_k.unwrap_or(config.top_k)).await?;
        }
    }
    Ok(())
}

type OllamaRag = RagSearch<OllamaClient, OllamaClient>;

fn rag_search(config: &Config) -> Result<OllamaRag, BoxError> {
    let client = OllamaClient::connect(&config.ollama_url, config.api_key.as_deref())?
        .with_embed_model(&config.embed_model)
        .with_chat_model(&config.llm_model);
    let embeddings =
        EmbeddingManager::new(client.clone(), config.chunk_config()?)?.with_batch_size(config.embed_batch_size);
    let store = VectorStore::new(config.persist_dir()?)?;
    Ok(RagSearch::new(store, embeddings, client))
}

fn loaded(config: &Config) -> Result<OllamaRag, BoxError> {
    let mut rag = rag_search(config)?;
    rag.store_mut().load()?;
    Ok(rag)
}

/// Reads questions from stdin until EOF or `exit`. Failures are logged and the loop continues.
async fn chat(rag: &OllamaRag, top_k: usize) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    println!("Ask a question (empty line or `exit` to quit).");
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() || question.eq_ignore_ascii_case("exit") {
            break;
        }
        match rag.search_and_summarize(question, top_k).await {
            Ok(answer) => println!("{answer}\n"),
            Err(e) => {
                error!("chat request failed: {e}");
                println!("{GENERIC_FAILURE}\n");
            }
        }
    }
    Ok(())
}
