use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{warn, Level};

use dec_context::{ContextSelector, DirDocumentStore, RenderOptions};
use dec_core::ids::EnvironmentId;
use dec_core::messages::Attachment;
use dec_core::provider::StreamOptions;
use dec_core::sandbox::Sandbox;
use dec_engine::{
    ExecutionReport, LocalSandbox, MemorySandbox, Orchestrator, OrchestratorConfig, TurnEvent,
    TurnRequest,
};
use dec_llm::{AnthropicProvider, ApiKey};
use dec_protocol::{parse_response, parse_tool_calls};
use dec_settings::DecSettings;
use dec_telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(name = "dec")]
#[command(about = "Conversational code generation against a local project", long_about = None)]
struct Cli {
    /// Environment (project) to work in.
    #[arg(long, global = true, default_value = "default")]
    env: String,
    /// Document root, overriding settings.
    #[arg(long, global = true)]
    docs: Option<PathBuf>,
    /// Workspace root, overriding settings.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Apply file changes to memory only.
    #[arg(long, global = true)]
    dry_run: bool,
    /// Model override.
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session, one turn per line
    Chat,
    /// Run a single turn
    Send {
        text: String,
        /// File to attach (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
        /// Wait for the full reply instead of streaming it
        #[arg(long)]
        buffered: bool,
    },
    /// Show which documents would be selected for a message
    Select { text: String },
    /// Parse a saved model reply
    Parse { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = dec_telemetry::with_startup_logging(|| load_settings(&cli));

    let level = settings.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    dec_telemetry::init_telemetry(TelemetryConfig {
        log_level: level,
        json: settings.logging.json,
        ..Default::default()
    })?;

    match &cli.command {
        Commands::Select { text } => {
            let selection = ContextSelector::default().select(text);
            println!("{}", serde_json::to_string_pretty(&selection)?);
        }
        Commands::Parse { file } => {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            let parsed = parse_response(&text);
            let out = serde_json::json!({
                "commands": parsed.commands,
                "toolCalls": parse_tool_calls(&text),
                "cleaned": parsed.cleaned,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Send {
            text,
            attachments,
            buffered,
        } => {
            let orchestrator = build_orchestrator(&cli, &settings)?;
            let request = TurnRequest::new(env_id(&cli), text.as_str())
                .with_attachments(read_attachments(attachments)?);
            if *buffered {
                let output = orchestrator.send(request, &CancellationToken::new()).await?;
                println!("{}", output.assistant_message.content);
                report_execution(&output.execution);
            } else {
                stream_turn(&orchestrator, request).await?;
            }
        }
        Commands::Chat => {
            let orchestrator = build_orchestrator(&cli, &settings)?;
            chat(&orchestrator, env_id(&cli)).await?;
        }
    }
    Ok(())
}

fn load_settings(cli: &Cli) -> DecSettings {
    let mut settings = match dec_settings::load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "ignoring settings file");
            let mut defaults = DecSettings::default();
            dec_settings::apply_env_overrides(&mut defaults);
            defaults
        }
    };
    if let Some(docs) = &cli.docs {
        settings.documents.root = docs.display().to_string();
    }
    if let Some(workspace) = &cli.workspace {
        settings.workspace.root = workspace.display().to_string();
    }
    if let Some(model) = &cli.model {
        settings.provider.model = model.clone();
    }
    settings
}

fn env_id(cli: &Cli) -> EnvironmentId {
    EnvironmentId::from_raw(cli.env.as_str())
}

fn build_orchestrator(cli: &Cli, settings: &DecSettings) -> Result<Orchestrator> {
    let key_var = &settings.provider.api_key_env;
    let key = std::env::var(key_var).with_context(|| format!("{key_var} is not set"))?;
    let provider = AnthropicProvider::new(ApiKey::new(key), Some(settings.provider.model.as_str()))?;

    let documents = DirDocumentStore::new(&settings.documents.root);
    let sandbox: Arc<dyn Sandbox> = if cli.dry_run {
        Arc::new(MemorySandbox::new())
    } else {
        Arc::new(LocalSandbox::new(&settings.workspace.root))
    };

    let config = OrchestratorConfig {
        stream_options: StreamOptions {
            max_tokens: Some(settings.provider.max_tokens),
            temperature: settings.provider.temperature,
            stop_sequences: Vec::new(),
        },
        include_snapshot: settings.context.snapshot,
        ..Default::default()
    };
    let render = RenderOptions {
        include_catalog: settings.context.catalog,
        max_file_bytes: settings.context.max_file_bytes,
        max_files: settings.context.max_files,
    };

    Ok(
        Orchestrator::new(Arc::new(provider), Arc::new(documents), sandbox)
            .with_render_options(render)
            .with_config(config),
    )
}

fn read_attachments(paths: &[PathBuf]) -> Result<Vec<Attachment>> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Attachment::from_bytes(name, media_type(path)?, &bytes))
        })
        .collect()
}

fn media_type(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        _ => bail!("unsupported attachment type: {}", path.display()),
    })
}

/// Print one streamed turn. Ctrl-C aborts it.
async fn stream_turn(orchestrator: &Orchestrator, request: TurnRequest) -> Result<()> {
    let mut stream = orchestrator.send_streaming(request);
    let cancel = stream.cancellation();
    let mut printed = 0;
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                eprintln!("\n[aborted]");
                return Ok(());
            }
            event = stream.next() => event,
        };
        let Some(event) = event else { break };
        match event? {
            TurnEvent::User { .. } => {}
            TurnEvent::Assistant { text } => {
                // Cumulative text; a new phase starts over.
                if text.len() < printed || !text.is_char_boundary(printed) {
                    printed = 0;
                }
                write!(stdout, "{}", &text[printed..])?;
                stdout.flush()?;
                printed = text.len();
            }
            TurnEvent::ToolProcessing { tool_calls } => {
                let names: Vec<String> = tool_calls
                    .iter()
                    .flat_map(|c| c.examples.iter().chain(&c.context).cloned())
                    .collect();
                writeln!(stdout, "\n[loading {}]", names.join(", "))?;
                printed = 0;
            }
            TurnEvent::Done { execution, .. } => {
                writeln!(stdout)?;
                report_execution(&execution);
            }
        }
    }
    Ok(())
}

async fn chat(orchestrator: &Orchestrator, env: EnvironmentId) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("dec chat on `{env}`; empty line or Ctrl-D to quit");
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Err(e) = stream_turn(orchestrator, TurnRequest::new(env.clone(), line)).await {
            eprintln!("error: {e}");
        }
    }
    Ok(())
}

fn report_execution(report: &ExecutionReport) {
    let applied = report.outcomes.iter().filter(|o| o.succeeded()).count();
    if !report.outcomes.is_empty() {
        eprintln!("[{applied}/{} changes applied]", report.outcomes.len());
    }
    for error in &report.errors {
        eprintln!("  failed: {error}");
    }
}
