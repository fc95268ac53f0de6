use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sellio_gateway::api::{ApiServer, ApiState};
use sellio_gateway::channels::{
    InstagramRelay, PlatformDispatcher, TelegramChannel, UpdateDedup,
};
use sellio_gateway::db::{self, ConversationRepo, IntegrationRepo, MessageRepo};
use sellio_gateway::pipeline::Pipeline;
use sellio_gateway::responder::{OpenAiResponder, Responder, UnconfiguredResponder};
use sellio_gateway::sync::{NotificationTransport, TelegramNotifier, WaitingCallSync};
use sellio_gateway::{Config, Error, Result, poll};

/// Sellio - messaging gateway for an AI sales assistant
#[derive(Parser)]
#[command(name = "sellio", version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "SELLIO_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(long, env = "SELLIO_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one Instagram inbox sweep and print the aggregate report
    Poll,
    /// Register the Telegram webhook for an integration's bot
    SetWebhook {
        /// Integration id
        #[arg(short, long)]
        integration: String,
        /// Public base URL (defaults to the configured one)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,sellio_gateway=info",
        1 => "info,sellio_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let port = cli.port.unwrap_or(config.port);

    let pool = db::init(&config.db_path)?;
    let integrations = IntegrationRepo::new(pool.clone());
    let conversations = ConversationRepo::new(pool.clone());
    let messages = MessageRepo::new(pool.clone());

    let relay = match (&config.relay.url, &config.relay.api_key) {
        (Some(url), Some(api_key)) => Some(InstagramRelay::new(url, api_key)),
        _ => {
            tracing::warn!("Instagram relay not configured, instagram integrations are inert");
            None
        }
    };

    let responder: Arc<dyn Responder> = match &config.openai.api_key {
        Some(api_key) => Arc::new(OpenAiResponder::new(
            api_key.clone(),
            config.openai.model.clone(),
        )),
        None => {
            tracing::warn!("OPENAI_API_KEY not set, replies will use the fallback text");
            Arc::new(UnconfiguredResponder)
        }
    };

    let notifier: Option<Arc<dyn NotificationTransport>> = config
        .waiting_call
        .bot_token
        .as_ref()
        .map(|token| Arc::new(TelegramNotifier::new(token.clone())) as Arc<dyn NotificationTransport>);
    if notifier.is_none() {
        tracing::warn!("waiting-call notifier bot not configured, cards disabled");
    }

    let sync = WaitingCallSync::new(
        conversations.clone(),
        messages.clone(),
        integrations.clone(),
        notifier,
        config.waiting_call.channel_id.clone(),
    );

    let transport = Arc::new(PlatformDispatcher::new(relay.clone(), integrations.clone()));

    let pipeline = Pipeline::new(
        conversations,
        messages,
        responder,
        transport,
        sync,
        config.context_messages,
    );

    match cli.command {
        None => {
            let state = Arc::new(ApiState {
                db: pool,
                integrations,
                pipeline,
                relay,
                telegram_dedup: Mutex::new(UpdateDedup::default()),
            });
            ApiServer::new(state, port).run().await
        }
        Some(Command::Poll) => {
            let report = poll::sweep(&integrations, relay.as_ref(), &pipeline).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(Command::SetWebhook { integration, url }) => {
            let base_url = url
                .or(config.public_url)
                .ok_or_else(|| Error::Config("no public URL configured for the webhook".into()))?;

            let integration = integrations
                .get(&integration)?
                .ok_or_else(|| Error::NotFound(format!("integration {integration}")))?;
            let token = integration
                .bot_token()
                .ok_or_else(|| Error::Channel("integration has no bot token".into()))?;

            let webhook_url = format!(
                "{}/api/webhooks/telegram/{}",
                base_url.trim_end_matches('/'),
                integration.id
            );
            TelegramChannel::new(token).set_webhook(&webhook_url).await
        }
    }
}
