//! Docsight CLI - Command-line interface
//!
//! Usage:
//!   docsight ingest <file> --document-id <N>
//!   docsight ask <question> --document-id <N> [--top-k <K>]
//!   docsight summarize <file>
//!   docsight risks <file>
//!   docsight compare <file> <file>...
//!   docsight extract <file> [--doc-type <T>]
//!   docsight delete --document-id <N>
//!   docsight stats

use anyhow::Context;
use clap::{Parser, Subcommand};
use docsight_core::{AppConfig, ChunkId, ChunkRecord, DocumentId, LoggingConfig};
use docsight_parser::{DocumentParser, ParsedDocument, PlainTextParser};
use docsight_rag::{chunk_document, ExtractionKind, NamedDocument, RagService};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Chunk ids of document `N` start at `N * CHUNK_ID_STRIDE`
const CHUNK_ID_STRIDE: u64 = 1_000_000;

#[derive(Parser)]
#[command(name = "docsight")]
#[command(about = "Document question answering and analysis")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, chunk, embed and index a text or markdown file
    Ingest {
        file: PathBuf,
        #[arg(long)]
        document_id: DocumentId,
    },
    /// Ask a question about an ingested document
    Ask {
        question: String,
        #[arg(long)]
        document_id: DocumentId,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Summarize a document
    Summarize { file: PathBuf },
    /// Detect risks in a document
    Risks { file: PathBuf },
    /// Compare two or more documents
    Compare {
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,
    },
    /// Extract key information (legal, financial, research or general)
    Extract {
        file: PathBuf,
        #[arg(long, default_value = "general")]
        doc_type: String,
    },
    /// Remove an ingested document from the index
    Delete {
        #[arg(long)]
        document_id: DocumentId,
    },
    /// Show index and cache statistics
    Stats,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Directory holding the index artifacts and chunk lists
fn data_dir(config: &AppConfig) -> PathBuf {
    config
        .index
        .path
        .as_deref()
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("./data"), Path::to_path_buf)
}

fn chunks_path(data_dir: &Path, document_id: DocumentId) -> PathBuf {
    data_dir.join("chunks").join(format!("{document_id}.json"))
}

fn first_chunk_id(document_id: DocumentId) -> anyhow::Result<ChunkId> {
    document_id
        .checked_mul(CHUNK_ID_STRIDE)
        .with_context(|| format!("document id {document_id} is too large"))
}

fn read_document(path: &Path) -> anyhow::Result<ParsedDocument> {
    PlainTextParser
        .parse(path)
        .with_context(|| format!("failed to load {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn ingest(
    service: &RagService,
    config: &AppConfig,
    file: &Path,
    document_id: DocumentId,
) -> anyhow::Result<()> {
    let document = read_document(file)?;
    let chunks = chunk_document(
        &document.content,
        &config.chunking,
        first_chunk_id(document_id)?,
    )?;

    let replaced = service.remove_document(document_id)?;
    let ids = service.index_document(document_id, &chunks).await?;

    let path = chunks_path(&data_dir(config), document_id);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(&path, serde_json::to_vec_pretty(&chunks)?)
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!(
        document_id,
        file = %file.display(),
        chunks = chunks.len(),
        replaced,
        "document_ingested"
    );
    print_json(&serde_json::json!({
        "document_id": document_id,
        "file_name": document.file_name(),
        "words": document.word_count(),
        "chunks": chunks.len(),
        "vectors": ids.len(),
    }))
}

fn load_chunks(config: &AppConfig, document_id: DocumentId) -> anyhow::Result<Vec<ChunkRecord>> {
    let path = chunks_path(&data_dir(config), document_id);
    let bytes = std::fs::read(&path)
        .with_context(|| format!("document {document_id} has not been ingested"))?;
    serde_json::from_slice(&bytes).with_context(|| format!("corrupt chunk list {}", path.display()))
}

async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let service = RagService::from_config(&config)?;

    match cli.command {
        Commands::Ingest { file, document_id } => {
            ingest(&service, &config, &file, document_id).await?;
        }
        Commands::Ask {
            question,
            document_id,
            top_k,
        } => {
            let chunks = load_chunks(&config, document_id)?;
            let answer = service
                .answer(&question, document_id, &chunks, top_k)
                .await?;
            print_json(&answer)?;
        }
        Commands::Summarize { file } => {
            let document = read_document(&file)?;
            print_json(&service.summarize(&document.content).await)?;
        }
        Commands::Risks { file } => {
            let document = read_document(&file)?;
            print_json(&service.detect_risks(&document.content).await)?;
        }
        Commands::Compare { files } => {
            let documents = files
                .iter()
                .map(|path| {
                    let document = read_document(path)?;
                    let name = document.file_name().to_string();
                    Ok(NamedDocument::new(name, document.content))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            print_json(&service.compare_documents(&documents).await?)?;
        }
        Commands::Extract { file, doc_type } => {
            let document = read_document(&file)?;
            let kind: ExtractionKind = doc_type.parse()?;
            print_json(&service.extract_key_info(&document.content, kind).await)?;
        }
        Commands::Delete { document_id } => {
            let removed = service.remove_document(document_id)?;
            let path = chunks_path(&data_dir(&config), document_id);
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
            print_json(&serde_json::json!({
                "document_id": document_id,
                "removed_vectors": removed,
            }))?;
        }
        Commands::Stats => {
            print_json(&service.stats()?)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    run(cli, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsight_core::IndexConfig;

    #[test]
    fn test_parse_ask_command() {
        let cli = Cli::try_parse_from([
            "docsight",
            "ask",
            "What is the fee?",
            "--document-id",
            "4",
            "--top-k",
            "3",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ask { document_id: 4, top_k: 3, ref question } if question == "What is the fee?"
        ));
    }

    #[test]
    fn test_compare_requires_two_files() {
        assert!(Cli::try_parse_from(["docsight", "compare", "a.txt"]).is_err());
        assert!(Cli::try_parse_from(["docsight", "compare", "a.txt", "b.txt"]).is_ok());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["docsight", "stats", "--config", "docsight.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("docsight.toml")));
    }

    #[test]
    fn test_data_dir_follows_index_path() {
        let mut config = AppConfig::default();
        assert_eq!(data_dir(&config), PathBuf::from("./data"));

        config.index = IndexConfig {
            path: Some(PathBuf::from("/var/lib/docsight/index")),
            ..IndexConfig::default()
        };
        assert_eq!(data_dir(&config), PathBuf::from("/var/lib/docsight"));

        config.index.path = Some(PathBuf::from("index"));
        assert_eq!(data_dir(&config), PathBuf::from("./data"));
    }

    #[test]
    fn test_chunk_ids_per_document() {
        assert_eq!(first_chunk_id(3).unwrap(), 3_000_000);
        assert!(first_chunk_id(u64::MAX).is_err());
        assert_eq!(
            chunks_path(Path::new("/tmp/data"), 9),
            PathBuf::from("/tmp/data/chunks/9.json")
        );
    }

    #[tokio::test]
    async fn test_ingest_then_ask_offline() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("contract.txt");
        std::fs::write(
            &file,
            "Payment is due within thirty days.\n\nEither party may terminate with notice.",
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.llm.api_key = None;
        config.index.path = Some(dir.path().join("index"));

        let service = RagService::from_config(&config).unwrap();
        ingest(&service, &config, &file, 1).await.unwrap();

        let chunks = load_chunks(&config, 1).unwrap();
        assert_eq!(chunks[0].id, 1_000_000);

        let answer = service
            .answer("When is payment due?", 1, &chunks, 2)
            .await
            .unwrap();
        assert!(!answer.sources.is_empty());
        assert!(dir.path().join("index.index").exists());
    }
}
