use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{Parser, Subcommand};
use mcp_dispatch::{
    inventory::ToolTarget, CallContext, Engine, EngineCollaborators, EngineConfig,
    ExecutionRequest,
};
use serde_json::{json, Map, Value};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "tool-dispatch")]
#[command(about = "Resolve, list and call MCP tools through the dispatch engine", long_about = None)]
struct Cli {
    /// Engine configuration file (YAML).
    #[arg(long, env = "TOOL_DISPATCH_CONFIG")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the discovery catalog of every enabled tool.
    ListTools,
    /// Call a tool by any accepted spelling of its name.
    Call {
        tool: String,
        /// Arguments as a JSON object.
        #[arg(long = "args")]
        arguments_json: Option<String>,
        /// Conversation id used for broker session affinity.
        #[arg(long)]
        thread_id: Option<String>,
    },
    /// Show how a name resolves without calling anything.
    Resolve { tool: String },
}

fn init_logging(json: bool) {
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();
}

fn parse_arguments(raw: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str(raw).context("--args must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--args must be a JSON object, got {other}"),
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = EngineConfig::from_file(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let collaborators =
        EngineCollaborators::from_config(&config).context("building engine collaborators")?;
    let engine = Engine::from_config(&config, collaborators)
        .await
        .context("starting engine")?;
    info!(
        servers = engine.manager().server_names().len(),
        custom_tools = engine.registry().len(),
        "engine ready"
    );

    let outcome = match cli.command {
        Command::ListTools => print_json(&engine.list_tools()).map(|_| true),
        Command::Resolve { tool } => match engine.resolve(&tool) {
            Ok(resolution) => {
                let target = match &resolution.target {
                    ToolTarget::Custom(info) => json!({
                        "kind": "custom",
                        "provider": info.provider,
                        "custom_type": info.custom_type,
                    }),
                    ToolTarget::Standard { server, .. } => json!({
                        "kind": "standard",
                        "server": server,
                    }),
                };
                print_json(&json!({
                    "requested": resolution.requested,
                    "candidates": resolution.candidates,
                    "tool": resolution.qualified_name(),
                    "remote_name": resolution.target.remote_name(),
                    "target": target,
                }))
                .map(|_| true)
            }
            Err(e) => print_json(&json!({
                "requested": tool,
                "error": e.to_string(),
                "error_kind": e.kind(),
            }))
            .map(|_| false),
        },
        Command::Call {
            tool,
            arguments_json,
            thread_id,
        } => match parse_arguments(arguments_json.as_deref()) {
            Ok(arguments) => {
                let ctx = thread_id.map(CallContext::for_thread).unwrap_or_default();
                let result = engine
                    .dispatch(ExecutionRequest::new(tool, arguments), &ctx)
                    .await;
                print_json(&result).map(|_| result.success)
            }
            Err(e) => Err(e),
        },
    };

    engine.shutdown().await;
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
