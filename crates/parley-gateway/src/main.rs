#![allow(clippy::print_stdout, clippy::print_stderr)] // CLI binary: stdout is the UI

mod assignment;
mod bot_tools;
mod buffer;
mod cli;
mod config;
mod config_check;
mod config_watcher;
mod coordinator;
mod followup;
mod gating;
mod run_loop;
#[cfg(test)]
mod test_support;
mod tracing_setup;
mod triggers;
mod webhook;

use anyhow::{Context, Result};
use clap::Parser;
use parley_agent::OpenAiAssistants;
use parley_channels::WahaGateway;
use parley_core::{
    AssistantBackend, ChannelHealth, ConversationStore, MessageGateway, TenantConfig,
};
use parley_store::SqliteConversationStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assignment::RoundRobin;
use crate::bot_tools::BotToolkit;
use crate::cli::{Cli, Commands, TenantCommands};
use crate::config::{Config, shared_config};
use crate::coordinator::{Coordinator, Services};
use crate::followup::FollowupScheduler;
use crate::webhook::WebhookState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = tracing_setup::init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "parley starting"
    );

    match cli.command {
        Commands::Serve => cmd_serve(cli.config.as_deref()).await,
        Commands::Check { format } => cmd_check(cli.config.as_deref(), &format),
        Commands::Tenant { command } => cmd_tenant(cli.config.as_deref(), command).await,
        Commands::Version => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// cmd_check: validate config without starting
// ---------------------------------------------------------------------------

fn cmd_check(config_path: Option<&str>, format: &str) -> Result<()> {
    let config_file = Config::find_config_path(config_path);
    let report = config_check::validate_config(&config_file);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report.to_json_value())?),
        _ => println!("{}", report.to_summary_string()),
    }

    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// cmd_tenant: per-tenant config documents
// ---------------------------------------------------------------------------

async fn cmd_tenant(config_path: Option<&str>, command: TenantCommands) -> Result<()> {
    let config_file = Config::find_config_path(config_path);
    let config = Config::load(&config_file)
        .with_context(|| format!("loading config from {}", config_file.display()))?;
    let store = SqliteConversationStore::open(&config.store.path)
        .with_context(|| format!("failed to open store at {}", config.store.path))?;

    match command {
        TenantCommands::Show { tenant } => match store.tenant_config(&tenant).await? {
            Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
            None => anyhow::bail!("no config stored for tenant {tenant}"),
        },
        TenantCommands::Put { tenant, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {file}"))?;
            let document: TenantConfig = serde_json::from_str(&raw)
                .with_context(|| format!("{file} is not a valid tenant config"))?;
            store.put_tenant_config(&tenant, &document).await?;
            println!("tenant {tenant} updated");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// cmd_serve: webhook server, turn dispatcher and config watcher
// ---------------------------------------------------------------------------

async fn cmd_serve(config_path: Option<&str>) -> Result<()> {
    let config_file = Config::find_config_path(config_path);
    let config = Config::load(&config_file)
        .with_context(|| format!("loading config from {}", config_file.display()))?;

    let report = config_check::validate_parsed(&config);
    if report.has_errors() {
        anyhow::bail!("invalid config:\n{}", report.error_messages().join("\n"));
    }

    let store: Arc<dyn ConversationStore> = Arc::new(
        SqliteConversationStore::open(&config.store.path)
            .with_context(|| format!("failed to open store at {}", config.store.path))?,
    );
    let assistant: Arc<dyn AssistantBackend> = Arc::new(
        OpenAiAssistants::from_env(
            &config.assistant.api_key_env,
            config.assistant.base_url.as_deref(),
        )
        .context("failed to initialize assistant backend")?,
    );
    let gateway_key = config
        .gateway
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok());
    let gateway: Arc<dyn MessageGateway> = Arc::new(WahaGateway::new(
        "whatsapp",
        &config.gateway.base_url,
        config.gateway.session.clone(),
        gateway_key,
    )?);

    match gateway.probe().await {
        ChannelHealth::Healthy => info!(gateway = gateway.id(), "gateway healthy"),
        ChannelHealth::Degraded(reason) => warn!(gateway = gateway.id(), %reason, "gateway degraded"),
        ChannelHealth::Unhealthy(reason) => {
            warn!(gateway = gateway.id(), %reason, "gateway unreachable, continuing");
        }
    }

    let listen = config.server.listen.clone();
    let bots = config.bots.len();
    let shared = shared_config(config);
    let shutdown = CancellationToken::new();

    let followups = FollowupScheduler::new(
        Arc::clone(&store),
        Arc::clone(&gateway),
        shutdown.clone(),
    );
    let assignment = Arc::new(RoundRobin::new());
    let tools = BotToolkit::new(
        Arc::clone(&shared),
        Arc::clone(&followups),
        Arc::clone(&assignment),
    )
    .registry();

    let services = Services {
        store,
        gateway,
        assistant,
        tools: Arc::new(tools),
        followups,
        assignment,
    };
    let (coordinator, turns) = Coordinator::new(Arc::clone(&shared), services, shutdown.clone());
    let dispatcher = tokio::spawn(Arc::clone(&coordinator).run_turns(turns));

    let _config_watcher =
        config_watcher::spawn_config_watcher(config_file, Arc::clone(&shared), shutdown.clone());

    let app = webhook::build_router(WebhookState {
        config: Arc::clone(&shared),
        coordinator,
    });
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;

    info!(listen = %listen, bots, "gateway started");
    println!("parley listening on {listen}");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
                () = signal_token.cancelled() => {}
            }
            signal_token.cancel();
        })
        .await
        .context("webhook server failed")?;

    shutdown.cancel();
    if let Err(e) = dispatcher.await {
        warn!(error = %e, "turn dispatcher panicked");
    }
    Ok(())
}
