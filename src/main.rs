//! Offline REPL driving the orchestrator over stdin/stdout.

use clap::Parser;
use std::io::{BufRead, Write};
use std::sync::Arc;
use valet_core::contract::EngineServices;
use valet_core::llm::{HttpChatProvider, LlmHelpers, NullChatProvider};
use valet_core::memory::{MemoryManager, Message};
use valet_core::orchestrator::{
    Delegates, KeywordIntentExtractor, Orchestrator, TemplateSource,
};
use valet_core::persistence::SessionPersistence;
use valet_core::pipelines::{
    create_preference_match_pipeline, create_product_search_pipeline, RollingSummariser,
};
use valet_core::privacy::AuditStore;
use valet_core::resilience::HealthMonitor;
use valet_core::stores::{
    FsObjectStore, MemoryKvStore, MemorySessionStore, MemorySummaryMirror, ShoppingAdapter,
    StaticShoppingAdapter,
};
use valet_core::Config;

#[derive(Debug, Parser)]
#[command(name = "valet-repl", about = "Purchase-contract engine REPL")]
struct Args {
    /// Contract template path; the built-in purchase workflow when omitted.
    #[arg(long)]
    template: Option<String>,

    /// Session id; a fresh UUID when omitted.
    #[arg(long)]
    session: Option<String>,

    /// Use the HTTP LLM provider (requires OPENAI_API_KEY); offline
    /// fallbacks otherwise.
    #[arg(long, default_value_t = false)]
    online: bool,

    /// Directory for audit artifacts.
    #[arg(long, default_value = "tmp")]
    artifact_dir: String,
}

fn demo_catalog() -> Vec<valet_core::contract::Product> {
    serde_json::from_value(serde_json::json!([
        {"name": "Vertex RTX 4070 12GB", "price": 599.0, "rating": 4.6,
         "description": "12GB GDDR6X, triple fan cooling", "brand": "Vertex"},
        {"name": "Nimbus RTX 4060 Ti 8GB", "price": 429.0, "rating": 4.3,
         "description": "8GB GDDR6, compact dual fan", "brand": "Nimbus"},
        {"name": "Aurora RX 7800 XT 16GB", "price": 549.0, "rating": 4.5,
         "description": "16GB GDDR6, open-air cooling", "brand": "Aurora"}
    ]))
    .unwrap_or_default()
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    valet_core::observability::init_tracing();

    let config = Config::from_env();
    let health = Arc::new(HealthMonitor::new(
        config.resilience.degradation_error_threshold,
    ));

    let llm = if args.online {
        Arc::new(LlmHelpers::new(
            Arc::new(HttpChatProvider::new(&config.llm)?),
            config.llm.model.clone(),
            config.llm.max_retries,
            health.clone(),
        ))
    } else {
        Arc::new(LlmHelpers::new(
            Arc::new(NullChatProvider),
            config.llm.model.clone(),
            0,
            health.clone(),
        ))
    };

    let adapter: Arc<dyn ShoppingAdapter> = Arc::new(StaticShoppingAdapter::new(demo_catalog()));
    let product_search =
        create_product_search_pipeline(adapter, llm.clone(), &config.pipeline);
    let preference_match = create_preference_match_pipeline(llm.clone(), config.pipeline.top_k);
    let persistence = Arc::new(SessionPersistence::new(
        Arc::new(MemorySessionStore::new()),
        health.clone(),
        &config.pipeline,
    ));
    let audit = Arc::new(AuditStore::new(Arc::new(FsObjectStore::new(
        &args.artifact_dir,
    ))));

    let services = Arc::new(EngineServices {
        config: config.clone(),
        llm: llm.clone(),
        product_search,
        preference_match,
        persistence,
        audit,
        health,
    });

    let memory = Arc::new(MemoryManager::new(
        Arc::new(MemoryKvStore::new()),
        Arc::new(MemorySummaryMirror::new()),
        RollingSummariser::default(),
        &config.memory,
    ));

    let template_source = match args.template {
        Some(path) => TemplateSource::Path(path),
        None => TemplateSource::Builtin,
    };
    let orchestrator = Orchestrator::new(
        services,
        memory,
        Arc::new(KeywordIntentExtractor::new(llm)),
        Delegates::default(),
        template_source,
    );

    let session_id = args
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    println!("valet-repl session {session_id} (ctrl-d to exit)");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = orchestrator
            .handle(&[Message::user(line)], &session_id)
            .await;
        println!("{}", reply.reply);
        if reply.contract_completed || reply.contract_cancelled || reply.contract_failed {
            println!("(contract closed)");
        }
    }

    Ok(())
}
