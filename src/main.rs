use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use finbot::agent::{LlmDecisionEngine, MailProcessor};
use finbot::channels::auth::token_source_from_env;
use finbot::channels::{
    AlertNotifier, EmailAlertNotifier, EmailConfig, ImapMailbox, LogAlertNotifier, Mailer,
    SmtpMailer,
};
use finbot::config::{AgentConfig, WatcherConfig};
use finbot::extract::ExtractorChain;
use finbot::llm::{LlmConfig, create_provider};
use finbot::store::{FinanceStore, LibSqlFinanceStore};
use finbot::tools::ToolRegistry;
use finbot::watcher::MailWatcher;

/// How long shutdown waits for blocking IMAP I/O (an IDLE in progress)
/// before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Drive `fut` to completion, then stop the runtime without waiting on
/// blocking tasks for longer than `grace`.
fn block_on_with_grace<F>(
    runtime: tokio::runtime::Runtime,
    fut: F,
    grace: Duration,
) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let result = runtime.block_on(fut);
    runtime.shutdown_timeout(grace);
    result
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // stderr + daily rolling file
    let log_dir = PathBuf::from(env_or("FINBOT_LOG_DIR", "logs"));
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "finbot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    block_on_with_grace(runtime, run(), SHUTDOWN_GRACE)
}

async fn run() -> anyhow::Result<()> {
    // ── Configuration ───────────────────────────────────────────────────
    let email_config = EmailConfig::from_env()?;
    let watcher_config = WatcherConfig::from_env()?;
    let agent_config = AgentConfig::from_env(&email_config.username)?;
    let llm_config = LlmConfig::from_env()?;
    let auth = token_source_from_env(&email_config.username)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        user = %agent_config.user_email,
        imap = %email_config.imap_host,
        folder = %watcher_config.mailbox,
        model = %llm_config.model,
        "FinBot starting"
    );

    // ── Storage ─────────────────────────────────────────────────────────
    let db_path = PathBuf::from(env_or("FINBOT_DB_PATH", "./data/finbot.db"));
    let store: Arc<dyn FinanceStore> = Arc::new(
        LibSqlFinanceStore::new_local(&db_path)
            .await
            .with_context(|| format!("opening database at {}", db_path.display()))?,
    );

    // ── Outbound mail and alerts ────────────────────────────────────────
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(email_config.clone(), Arc::clone(&auth)));
    let notifier: Arc<dyn AlertNotifier> = match env_or("FINBOT_ALERTS", "email").as_str() {
        "log" => Arc::new(LogAlertNotifier),
        "email" => Arc::new(EmailAlertNotifier::new(Arc::clone(&mailer))),
        other => anyhow::bail!("FINBOT_ALERTS must be 'email' or 'log', got '{other}'"),
    };

    // ── Decision engine ─────────────────────────────────────────────────
    let llm = create_provider(&llm_config)?;
    let tools = Arc::new(ToolRegistry::with_finance_tools(store, notifier));
    let engine = Arc::new(LlmDecisionEngine::new(
        agent_config.name.clone(),
        llm,
        agent_config.max_turns,
    ));
    let processor = MailProcessor::new(
        agent_config,
        engine,
        tools,
        mailer,
        Arc::new(ExtractorChain::from_env()),
    );

    // ── Watch loop ──────────────────────────────────────────────────────
    let mailbox = ImapMailbox::new(email_config, watcher_config.mailbox.clone(), auth);
    let mut watcher = MailWatcher::new(mailbox, processor, watcher_config);

    tokio::select! {
        _ = watcher.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            tracing::info!("Shutdown requested");
        }
    }

    Ok(())
}
