//! CLI 모듈
//!
//! askamu-rag CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{ChatEngine, ChatResponse, EngineService};
use crate::collector::{CollectionStats, PdfCollector};
use crate::config::RagConfig;
use crate::embedding::{EmbeddingProvider, GeminiEmbedding};
use crate::knowledge::{open_vector_store, IndexHandle, IndexManifest, Indexer, WindowChunker};
use crate::loader::{CategoryReport, DocumentLoader, LoadOptions};
use crate::scraper::{create_renderer, WebScraper};
use crate::source_log::SourceLog;

const GREETING: &str = "Hello! How can I help you today?";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "askamu-rag")]
#[command(version, about = "Grounded Q&A over the AMU document corpus", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 새 PDF/URL을 읽어 인덱스에 추가
    Ingest {
        /// PDF 건너뛰기
        #[arg(long)]
        skip_pdfs: bool,

        /// URL 건너뛰기
        #[arg(long)]
        skip_urls: bool,

        /// PDF 폴더 (기본: data_pdf)
        #[arg(long)]
        pdf_dir: Option<PathBuf>,

        /// URL 목록 파일 (기본: data_web/urls.txt)
        #[arg(long)]
        url_file: Option<PathBuf>,
    },

    /// 대화형 채팅 (/reset, /quit)
    Chat {
        /// 검색할 청크 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// 질문 한 번
    Ask {
        question: String,

        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },

    /// 검색 결과만 출력
    Retrieve {
        query: String,

        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Ingest {
            skip_pdfs,
            skip_urls,
            pdf_dir,
            url_file,
        } => {
            if let Some(dir) = pdf_dir {
                config.paths.pdf_dir = dir;
            }
            if let Some(file) = url_file {
                config.paths.url_file = file;
            }
            cmd_ingest(config, LoadOptions { skip_pdfs, skip_urls }).await
        }
        Commands::Chat { top_k } => {
            if let Some(k) = top_k {
                config.chat.similarity_top_k = k;
            }
            cmd_chat(config).await
        }
        Commands::Ask { question, top_k } => {
            config.chat.similarity_top_k = top_k;
            cmd_ask(config, &question).await
        }
        Commands::Retrieve { query, top_k } => cmd_retrieve(config, &query, top_k).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
///
/// 로그에 없는 PDF/URL만 읽어 청킹, 임베딩 후 인덱스에 추가합니다.
/// 소스 로그는 인덱싱이 성공한 뒤에만 저장됩니다.
async fn cmd_ingest(config: RagConfig, options: LoadOptions) -> Result<()> {
    config.validate_for_ingest()?;

    if !options.skip_pdfs && config.paths.pdf_dir.is_dir() {
        let files = PdfCollector.collect(&config.paths.pdf_dir)?;
        let stats = CollectionStats::from_files(&files);
        println!(
            "[*] PDF folder: {} ({} files, {})",
            config.paths.pdf_dir.display(),
            stats.total_files,
            format_bytes(stats.total_size)
        );
    }

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(GeminiEmbedding::from_config(&config.models, &config.http)?);
    let store = open_vector_store(&config)
        .await
        .context("Failed to open vector store")?;
    let chunker = WindowChunker::from_config(&config.chunking)?;
    let indexer = Indexer::new(chunker, embedder, store, config.paths.manifest_path())
        .with_batch_size(config.vector_store.upsert_batch_size);

    let renderer = create_renderer(&config.scraper, &config.http)?;
    println!("[*] Page renderer: {}", renderer.name());
    let loader = DocumentLoader::new(&config.paths, WebScraper::new(renderer));

    let report = indexer
        .ingest(&loader, options)
        .await
        .context("Failed to ingest documents")?;

    print_category("PDFs", &report.load.pdfs);
    print_category("URLs", &report.load.urls);

    if report.load.total_documents() == 0 {
        println!("[!] No documents found.");
        return Ok(());
    }

    let build = &report.build;
    println!(
        "[OK] Indexed {} chunks from {} documents (index total: {} chunks)",
        build.upserted, build.documents, build.total_chunks
    );

    Ok(())
}

/// 대화 명령어 (chat)
async fn cmd_chat(config: RagConfig) -> Result<()> {
    let engine = load_engine(config).await?;
    let mut session = engine.new_session();

    println!("{}", GREETING);
    println!("(type /reset to clear the conversation, /quit to exit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();

        match message {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                println!("[OK] Conversation cleared.");
                println!("{}", GREETING);
                continue;
            }
            _ => {}
        }

        match session.chat(message, print_piece).await {
            Ok(response) => {
                println!();
                print_sources(&response);
            }
            Err(e) if e.is_fatal_for_query() => {
                println!();
                return Err(e).context("Chat engine is no longer usable");
            }
            Err(e) => {
                println!();
                println!("[!] Error during query: {}", e);
            }
        }
    }

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(config: RagConfig, question: &str) -> Result<()> {
    let engine = load_engine(config).await?;

    let response = engine
        .ask(question, print_piece)
        .await
        .context("Error during query")?;
    println!();
    print_sources(&response);

    Ok(())
}

/// 검색 명령어 (retrieve)
async fn cmd_retrieve(config: RagConfig, query: &str, top_k: usize) -> Result<()> {
    config.validate_for_query()?;

    println!("[*] Searching: \"{}\"", query);

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(GeminiEmbedding::from_config(&config.models, &config.http)?);
    let store = open_vector_store(&config)
        .await
        .context("Failed to open vector store")?;
    let handle = IndexHandle::load(&config.paths.manifest_path(), embedder, store).await?;

    let results = handle
        .as_retriever(top_k)
        .with_similarity_cutoff(config.chat.similarity_cutoff)
        .retrieve(query)
        .await
        .context("Search failed")?;

    if results.is_empty() {
        println!("\n[!] No results.");
        return Ok(());
    }

    println!("\n[OK] {} results:\n", results.len());
    for (i, chunk) in results.iter().enumerate() {
        let meta = &chunk.metadata.document;
        let location = match meta.page {
            Some(page) => format!("{} (page {})", citation_label(chunk.citation()), page),
            None => citation_label(chunk.citation()),
        };
        println!("{}. [score: {:.4}] {}", i + 1, chunk.score, location);
        if let Some(title) = &meta.title {
            println!("   Title: {}", title);
        }
        println!("   Source: {}", meta.source);
        println!("   {}", truncate_text(&chunk.text, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("askamu-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    // 비밀 값은 직렬화에서 제외됨
    println!("[*] Configuration:");
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!();

    print_credential("Google API key", config.models.api_key.is_some());
    print_credential("Pinecone API key", config.vector_store.pinecone_api_key.is_some());

    match SourceLog::load(&config.paths.source_log_path()) {
        Ok(log) => println!(
            "[OK] Source log: {} PDFs, {} URLs",
            log.pdf_count(),
            log.url_count()
        ),
        Err(e) => println!("[!] Source log unreadable: {}", e),
    }

    match IndexManifest::load(&config.paths.manifest_path()) {
        Ok(Some(manifest)) => {
            println!(
                "[OK] Index manifest: {} chunks from {} documents",
                manifest.chunk_count, manifest.document_count
            );
            println!(
                "     Model: {} (dimension {})",
                manifest.embedding_model, manifest.embedding_dimension
            );
            println!("     Backend: {}", manifest.backend);
            println!(
                "     Updated: {}",
                manifest.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
        Ok(None) => println!("[!] Index manifest: not found (run `askamu-rag ingest`)"),
        Err(e) => println!("[!] Index manifest unreadable: {}", e),
    }

    if config.validate_for_query().is_ok() {
        match open_vector_store(&config).await {
            Ok(store) => match store.describe().await {
                Ok(stats) => println!("[OK] Vector store: {} vectors", stats.total_vector_count),
                Err(e) => println!("[!] Vector store describe failed: {}", e),
            },
            Err(e) => println!("[!] Vector store unavailable: {}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn load_engine(config: RagConfig) -> Result<Arc<ChatEngine>> {
    EngineService::from_config(config)
        .get()
        .await
        .context("Chat engine not loaded")
}

fn print_piece(piece: &str) {
    if let Err(e) = write_piece(&mut std::io::stdout(), piece) {
        tracing::debug!("Failed to write answer piece to stdout: {}", e);
    }
}

fn write_piece(out: &mut impl Write, piece: &str) -> std::io::Result<()> {
    out.write_all(piece.as_bytes())?;
    out.flush()
}

fn print_category(label: &str, report: &CategoryReport) {
    println!(
        "[*] {}: {} new, {} skipped, {} failed -> {} documents",
        label, report.new, report.skipped, report.failed, report.documents
    );
}

fn print_credential(label: &str, present: bool) {
    if present {
        println!("[OK] {}: set", label);
    } else {
        println!("[!] {}: not set", label);
    }
}

fn print_sources(response: &ChatResponse) {
    if response.citations.is_empty() {
        return;
    }
    println!("\nSources:");
    for citation in &response.citations {
        if citation.starts_with("http") {
            println!("  - {} ({})", citation_label(citation), citation);
        } else {
            println!("  - {}", citation);
        }
    }
}

/// 인용 키 표시 이름 (URL은 마지막 경로 조각)
fn citation_label(citation: &str) -> String {
    match url::Url::parse(citation) {
        Ok(parsed) if citation.starts_with("http") => parsed
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(str::to_string)
            .or_else(|| parsed.host_str().map(str::to_string))
            .unwrap_or_else(|| citation.to_string()),
        _ => citation.to_string(),
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
