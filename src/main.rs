use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use parley::ai::{OllamaClassifier, RulesClassifier};
use parley::config::RuntimeConfig;
use parley::engine::Engine;
use parley::events::RuntimeEvent;
use parley::flow::{Flow, FlowRegistry};
use parley::logger::init_tracing;
use parley::service::{AiService, EmptyKnowledgeService, EmptyToolService, Services};
use parley::session::SessionStatus;
use parley::store::InMemorySessionStore;

#[derive(Parser, Debug)]
#[command(name = "parley", about = "Conversational flow runtime", version = "0.3.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a flow interactively on stdin/stdout
    Run(RunArgs),

    /// Check a flow document without running it
    Validate { file: PathBuf },

    /// Emit the JSON Schema of the flow wire format
    Schema,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to a flow JSON document
    flow: PathBuf,

    /// Seconds of inactivity before a session is dropped
    #[arg(long, default_value = "1800")]
    session_timeout: u64,

    /// Log level override (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Classify with a local Ollama server instead of the keyword rules
    #[arg(long)]
    ollama: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate { file } => validate(&file),
        Commands::Schema => {
            let schema = schemars::schema_for!(Flow);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = RuntimeConfig::load(None);
    init_tracing(&args.log_level, config.debug);

    let flow = FlowRegistry::load_flow_from_file(&args.flow)?;

    let ai: Arc<dyn AiService> = if args.ollama {
        Arc::new(OllamaClassifier::new())
    } else {
        RulesClassifier::new()
    };
    let services = Services::new(ai, Arc::new(EmptyKnowledgeService), Arc::new(EmptyToolService));
    let engine = Engine::with_config(
        InMemorySessionStore::new(args.session_timeout),
        services,
        config,
    );
    engine.subscribe(Arc::new(|event| {
        if let RuntimeEvent::MessageSent { message, .. } = event {
            println!("bot> {message}");
        }
    }));

    let mut session = engine.start_session(&flow).await?;
    let stdin = io::stdin();
    while session.status == SessionStatus::WaitingInput {
        print!("you> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            session = engine.end_session(&session.id).await?;
            break;
        }
        session = engine.process_input(&flow, &session.id, line.trim()).await?;
    }

    info!(session_id = %session.id, "session finished");
    println!(
        "[session {}: {}]",
        session.id,
        serde_json::to_value(session.status)?
            .as_str()
            .unwrap_or("unknown")
    );
    Ok(())
}

fn validate(file: &PathBuf) -> anyhow::Result<()> {
    let flow = FlowRegistry::load_flow_from_file(file)?;

    if flow.node(&flow.entry_node).is_none() {
        bail!("entry node `{}` does not exist", flow.entry_node);
    }
    for edge in &flow.edges {
        if flow.node(&edge.source).is_none() || flow.node(&edge.target).is_none() {
            bail!(
                "edge `{}` references missing node(s): {} -> {}",
                edge.id,
                edge.source,
                edge.target
            );
        }
    }

    println!(
        "{}: ok ({} nodes, {} edges, {} variables)",
        flow.name,
        flow.nodes.len(),
        flow.edges.len(),
        flow.variables.len()
    );
    Ok(())
}
