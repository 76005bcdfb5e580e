//! CLI entry point for the ragline retrieval pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use ragline_core::{
    app_data_dir, config_path, load_config, load_documents, split_paragraphs, BackendKind, Comparison, Config,
    Embedder, EmbedderConfig, HashingEmbeddings, Match, MemoryBackend, Metadata, MetadataFilter, MetadataValue,
    PineconeBackend, RetryPolicy, Retriever, ScoreKind, VectorBackend, WeaviateBackend,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragline")]
#[command(about = "ragline: ingest documents into vector stores and compare retrieval")]
struct Cli {
    /// More log output on stderr (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show the effective setup.
    Status,
    /// Show where ragline stores its config (app data directory).
    DataDir,
    /// Print the config file path and the effective config (secrets masked).
    Config,
    /// Load files or directories and ingest them into a backend.
    Ingest {
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
        #[arg(short, long, default_value = "pinecone")]
        backend: BackendKind,
        /// Ingest each paragraph as its own document.
        #[arg(long)]
        paragraphs: bool,
    },
    /// Retrieve the best matches for a question from one backend.
    Query {
        text: String,
        #[arg(short, long, default_value = "pinecone")]
        backend: BackendKind,
        /// Defaults to `retrieval.top_k` from the config.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Metadata equality filter, `key=value`; repeatable.
        #[arg(long = "where", value_name = "KEY=VALUE")]
        filters: Vec<String>,
        /// Print matches as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run the same question against several backends side by side.
    Compare {
        text: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(short, long, value_delimiter = ',', default_value = "pinecone,weaviate")]
        backends: Vec<BackendKind>,
    },
    /// Delete every record (and the index or collection) in a backend.
    Reset {
        #[arg(short, long)]
        backend: BackendKind,
    },
    /// Offline walkthrough: ingest, query and compare on in-memory stores.
    Demo,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli.command.unwrap_or(Commands::Status)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Status => {
            let config = effective_config();
            println!("ragline");
            println!("  embedding: {:?}", config.embedding.provider);
            println!(
                "  chunking:  max {} chars, overlap {}",
                config.chunking.max_length, config.chunking.overlap
            );
            println!(
                "  pinecone:  index {} ({})",
                config.pinecone.index,
                if config.pinecone.api_key.is_some() { "key set" } else { "no key" }
            );
            println!("  weaviate:  {} class {}", config.weaviate.url, config.weaviate.class_name);
        }
        Commands::DataDir => {
            let dir = app_data_dir().context("could not determine app data directory")?;
            println!("{}", dir.display());
        }
        Commands::Config => {
            match config_path() {
                Some(p) => println!("# {}", p.display()),
                None => println!("# (no app data directory)"),
            }
            print!("{}", masked(&effective_config()).to_toml_string()?);
        }
        Commands::Ingest {
            paths,
            backend,
            paragraphs,
        } => {
            let config = effective_config();
            let mut documents = load_documents(&paths)?;
            if paragraphs {
                documents = split_paragraphs(documents);
            }
            if documents.is_empty() {
                println!("No documents found.");
                return Ok(());
            }
            let mut retriever = build_retriever(&config)?;
            attach(&mut retriever, &config, backend)?;
            let texts: Vec<String> = documents.iter().map(|d| d.body.clone()).collect();
            let ids: Vec<String> = documents.iter().map(|d| d.id()).collect();
            let tags: Vec<Metadata> = documents.into_iter().map(|d| d.tags).collect();
            let report = retriever.add_documents_with_ids(&texts, &ids, backend, Some(&tags))?;
            println!(
                "Ingested {} of {} segment(s) from {} document(s) into {backend}",
                report.ingested, report.segments, report.documents
            );
            if let Some(failure) = &report.failures {
                println!("  {failure}");
                for f in &failure.failed {
                    println!("    {}: {}", f.id, f.reason);
                }
            }
            retriever.cleanup()?;
        }
        Commands::Query {
            text,
            backend,
            top_k,
            filters,
            json,
        } => {
            let config = effective_config();
            let filter = parse_filter(&filters)?;
            let mut retriever = build_retriever(&config)?;
            attach(&mut retriever, &config, backend)?;
            let top_k = top_k.unwrap_or(config.retrieval.top_k);
            let matches = if filter.is_empty() {
                retriever.retrieve(&text, backend, top_k)?
            } else {
                retriever.retrieve_filtered(&text, backend, top_k, &filter)?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else {
                print_matches(&matches);
            }
            retriever.cleanup()?;
        }
        Commands::Compare { text, top_k, backends } => {
            let config = effective_config();
            let mut retriever = build_retriever(&config)?;
            for &kind in &backends {
                // An unreachable backend still gets a slot in the comparison.
                if let Err(e) = attach(&mut retriever, &config, kind) {
                    warn!("{kind} not attached: {e:#}");
                }
            }
            let comparison = retriever.compare(&text, &backends, top_k.unwrap_or(config.retrieval.top_k))?;
            print_comparison(&comparison);
            retriever.cleanup()?;
        }
        Commands::Reset { backend } => {
            let config = effective_config();
            let mut retriever = build_retriever(&config)?;
            attach(&mut retriever, &config, backend)?;
            retriever.reset(backend)?;
            println!("Reset {backend}.");
            retriever.cleanup()?;
        }
        Commands::Demo => demo()?,
    }
    Ok(())
}

fn effective_config() -> Config {
    let mut config = load_config();
    config.apply_env();
    config
}

fn build_retriever(config: &Config) -> anyhow::Result<Retriever> {
    let service = config.embedding_service()?;
    let name = service.name().to_string();
    let embedder = Embedder::new(service, config.embedder_config())
        .with_context(|| format!("setting up {name} embeddings"))?;
    Ok(Retriever::new(embedder, config.chunk_params()?)?)
}

fn attach(retriever: &mut Retriever, config: &Config, kind: BackendKind) -> anyhow::Result<()> {
    let dimension = retriever.dimension();
    let backend: Box<dyn VectorBackend> = match kind {
        BackendKind::Pinecone => Box::new(PineconeBackend::open(config.pinecone_config(dimension)?)?),
        BackendKind::Weaviate => Box::new(WeaviateBackend::open(config.weaviate_config(dimension))?),
        BackendKind::Memory => Box::new(MemoryBackend::new(dimension)),
    };
    retriever.attach(backend)?;
    Ok(())
}

/// Copy of `config` with every secret that is set replaced by a placeholder.
fn masked(config: &Config) -> Config {
    let mut shown = config.clone();
    for key in [
        &mut shown.embedding.api_key,
        &mut shown.pinecone.api_key,
        &mut shown.weaviate.api_key,
    ] {
        if key.is_some() {
            *key = Some(SECRET_PLACEHOLDER.to_string());
        }
    }
    shown
}

const SECRET_PLACEHOLDER: &str = "********";

fn parse_filter(clauses: &[String]) -> anyhow::Result<MetadataFilter> {
    clauses.iter().try_fold(MetadataFilter::new(), |filter, clause| {
        let (key, raw) = clause
            .split_once('=')
            .with_context(|| format!("filter {clause:?} is not KEY=VALUE"))?;
        Ok(filter.eq(key.trim(), parse_value(raw.trim())))
    })
}

fn parse_value(raw: &str) -> MetadataValue {
    if let Ok(b) = raw.parse::<bool>() {
        MetadataValue::Bool(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        MetadataValue::Integer(i)
    } else if let Ok(x) = raw.parse::<f64>() {
        MetadataValue::Float(x)
    } else {
        MetadataValue::String(raw.to_string())
    }
}

fn preview(text: &str) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() > 70 {
        format!("{}...", line.chars().take(70).collect::<String>())
    } else {
        line
    }
}

fn print_matches(matches: &[Match]) {
    if matches.is_empty() {
        println!("  (no matches)");
    }
    for (i, m) in matches.iter().enumerate() {
        println!("  {}. [{:.3}] {}  {}", i + 1, m.score, m.id, preview(&m.text));
    }
}

fn print_comparison(comparison: &Comparison) {
    println!("Query: {} (top {})", comparison.query, comparison.top_k);
    for (kind, result) in &comparison.results {
        println!("{kind}:");
        match result {
            Ok(matches) => print_matches(matches),
            Err(failure) => println!("  failed: {}", failure.error),
        }
    }
}

const DEMO_TEXTS: [&str; 4] = [
    "Python is a programming language.",
    "Weaviate and Pinecone are vector databases.",
    "Rust guarantees memory safety without a garbage collector.",
    "Embeddings map text to vectors so that similar meanings land close together.",
];

/// Two in-memory stores stand in for the remote ones, one reporting
/// similarities and one reporting distances, so normalization is visible.
fn demo() -> anyhow::Result<()> {
    let dimension = 256;
    let embedder = Embedder::new(
        Box::new(HashingEmbeddings::new(dimension)),
        EmbedderConfig {
            dimension: Some(dimension),
            retry: RetryPolicy::none(),
            ..EmbedderConfig::default()
        },
    )?;
    let mut retriever = Retriever::new(embedder, Default::default())?;
    retriever.attach(Box::new(MemoryBackend::new(dimension).as_kind(BackendKind::Pinecone)))?;
    retriever.attach(Box::new(
        MemoryBackend::new(dimension)
            .as_kind(BackendKind::Weaviate)
            .with_score_kind(ScoreKind::Distance),
    ))?;

    let texts: Vec<String> = DEMO_TEXTS.iter().map(|t| t.to_string()).collect();
    let tags: Vec<Metadata> = (0..texts.len())
        .map(|i| {
            let topic = if i % 2 == 0 { "language" } else { "search" };
            Metadata::from([("topic".to_string(), MetadataValue::from(topic))])
        })
        .collect();
    for kind in BackendKind::REMOTE {
        let report = retriever.add_documents(&texts, kind, Some(&tags))?;
        println!("Ingested {} segment(s) into in-memory {kind}", report.ingested);
    }

    println!();
    println!("Query on pinecone stand-in: What is Python?");
    print_matches(&retriever.retrieve("What is Python?", BackendKind::Pinecone, 1)?);

    println!();
    let filter = MetadataFilter::new().eq("topic", "search");
    println!("Filtered (topic = search) on weaviate stand-in: vector databases");
    print_matches(&retriever.retrieve_filtered("vector databases", BackendKind::Weaviate, 2, &filter)?);

    println!();
    let comparison = retriever.compare("memory safety in Rust", &BackendKind::REMOTE, 2)?;
    print_comparison(&comparison);

    retriever.cleanup()?;
    Ok(())
}
