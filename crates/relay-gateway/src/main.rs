use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use relay_agent::{openai::OpenAiProvider, AnswerGenerator, LlmProvider, NullProvider, RagAgent};
use relay_core::RelayConfig;
use relay_gateway::{app, pipeline::TokioSpawner};
use relay_memory::MemoryManager;
use relay_whatsapp::WhatsAppClient;

#[derive(Parser, Debug)]
#[command(author, version, about = "WhatsApp knowledge-base relay")]
struct Cli {
    /// Path to relay.toml (default: $RELAY_CONFIG or ~/.relay/relay.toml)
    #[arg(long, short)]
    config: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the webhook server (default)
    Serve,
    /// Load the knowledge document into the index and exit
    LoadKnowledge,
    /// Answer one question on stdout, without WhatsApp
    Ask { question: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // .env is optional; real environment variables win.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay_gateway=info,relay_whatsapp=info,relay_agent=info,tower_http=debug".into()
            }),
        )
        .init();

    // config: --config > RELAY_CONFIG env > ~/.relay/relay.toml, then env overrides.
    // A broken config aborts startup: defaults would silently drop the app secret.
    let config = RelayConfig::load(cli.config.as_deref())?;
    for warning in config.warnings() {
        warn!("{warning}");
    }

    let db_path = &config.knowledge.database_path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    relay_memory::db::init_db(&db)?;
    let memory = Arc::new(MemoryManager::new(db));

    let provider = build_provider(&config);
    let agent = RagAgent::from_config(
        provider,
        Arc::clone(&memory),
        &config.agent,
        &config.knowledge,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::LoadKnowledge => {
            let report = agent.load_knowledge().await?;
            info!(
                collection = %report.collection,
                source = %report.source,
                chunks = report.chunks,
                "knowledge base loaded"
            );
            return Ok(());
        }
        Command::Ask { question } => {
            println!("{}", agent.query(&question, None).await?);
            return Ok(());
        }
        Command::Serve => {}
    }

    if config.knowledge.load_on_start {
        load_knowledge_if_empty(&agent, &memory).await;
    }

    let generator: Arc<dyn AnswerGenerator> = Arc::new(agent);
    let transport = Arc::new(WhatsAppClient::from_config(&config.whatsapp));
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let state = Arc::new(app::AppState::new(
        config,
        generator,
        transport,
        Arc::new(TokioSpawner),
    ));
    let router = app::build_router(state);

    info!("WhatsApp relay listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

/// OpenAI when an API key is configured, otherwise a provider that always
/// fails so every question gets the fallback reply.
fn build_provider(config: &RelayConfig) -> Box<dyn LlmProvider> {
    match config.agent.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            info!(
                model = %config.agent.model,
                base_url = %config.agent.base_url,
                "LLM provider: OpenAI"
            );
            Box::new(OpenAiProvider::new(
                key.to_string(),
                Some(config.agent.base_url.clone()),
            ))
        }
        None => {
            warn!("No LLM provider configured: every question will get the fallback reply");
            Box::new(NullProvider)
        }
    }
}

async fn load_knowledge_if_empty(agent: &RagAgent, memory: &MemoryManager) {
    match memory.chunk_count(agent.collection()) {
        Ok(0) => match agent.load_knowledge().await {
            Ok(report) => info!(
                collection = %report.collection,
                chunks = report.chunks,
                "knowledge base loaded at startup"
            ),
            Err(e) => warn!(error = %e, "startup knowledge load failed"),
        },
        Ok(n) => info!(collection = %agent.collection(), chunks = n, "knowledge base already loaded"),
        Err(e) => warn!(error = %e, "cannot count knowledge chunks"),
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
