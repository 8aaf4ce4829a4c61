use clap::{ArgGroup, Parser, Subcommand};
use smsrelay::config::normalize_base_url;
use smsrelay::connectivity::run_probe_loop;
use smsrelay::{
    group_by_phone_number, CommandSender, ConnectivityMonitor, DeliveryLedger, DispatchEngine,
    PollScheduler, ReachabilityProbe, RelayConfig, RequestId,
};
use smsrelay_remote::{FileTokenSource, HttpQueueClient, RemoteSettings, StaticToken, TokenSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "smsrelay", about = "Relay queued SMS requests from a backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long, env = "SMSRELAY_DATA_DIR", default_value = "./data")]
    data_dir: String,
    /// Default API base URL; a saved override (see set-api-url) wins.
    #[arg(long, env = "SMSRELAY_API_URL")]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the backend and send pending messages (default)
    Run,
    /// Show sent messages grouped by phone number
    History {
        #[arg(long)]
        json: bool,
    },
    /// Drop ledger entries by request id or phone number.
    ///
    /// Stop the relay first: a running relay keeps its own copy of the
    /// ledger and would write the entries back.
    #[command(group(ArgGroup::new("target").required(true).args(["id", "phone"])))]
    Forget {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Ignore a leftover relay.pid from a relay that did not exit cleanly
        #[arg(long)]
        force: bool,
    },
    /// Save an API base URL override; an empty value clears it
    SetApiUrl { url: String },
}

const PID_FILE: &str = "relay.pid";

/// `{data_dir}/relay.pid` for as long as the relay runs, so ledger
/// maintenance can tell a live relay owns the ledger.
struct PidFile(PathBuf);

impl PidFile {
    fn create(data_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(PID_FILE);
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(PidFile(path))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            tracing::warn!("Failed to remove {}: {}", self.0.display(), e);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_relay(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let send_command = config
        .send_command
        .clone()
        .ok_or("SMSRELAY_SEND_COMMAND is required to send messages")?;
    let sender = Arc::new(CommandSender::new(&send_command)?);

    let settings = RemoteSettings::load_or_default(&config.data_dir);
    let base_url = settings.resolve_base_url(&config.api_url);

    let ledger = Arc::new(DeliveryLedger::open(&config.ledger_path())?);
    let _pid_file = PidFile::create(&config.data_dir)?;

    let tokens: Arc<dyn TokenSource> = match &config.token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(FileTokenSource::new(config.token_path())),
    };
    let remote = Arc::new(HttpQueueClient::new(
        &base_url,
        tokens,
        config.request_timeout,
    ));

    let probe = ReachabilityProbe::new(base_url.clone(), config.request_timeout);
    let connectivity = ConnectivityMonitor::new(probe.probe().await);

    tracing::info!(
        api_url = %base_url,
        sender = sender.program(),
        ledger_entries = ledger.len(),
        "Starting SMS relay"
    );

    let engine = Arc::new(DispatchEngine::new(
        remote,
        sender,
        ledger,
        connectivity.clone(),
        config.dispatch.clone(),
    ));
    let scheduler = PollScheduler::new(Arc::clone(&engine), config.poll_interval);

    let probe_shutdown = Arc::new(Notify::new());
    let probe_task = tokio::spawn(run_probe_loop(
        probe,
        connectivity,
        config.probe_interval,
        Arc::clone(&probe_shutdown),
    ));
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    scheduler.stop();
    engine.shutdown();
    probe_shutdown.notify_one();
    let _ = scheduler_task.await;
    let _ = probe_task.await;

    // The engine stops before its next request, so this waits at most for
    // the send in progress and its retries. A second Ctrl-C skips the wait.
    if engine.is_running() {
        tracing::info!("Waiting for the in-flight send to finish (Ctrl-C again to force)");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(250)) => {
                    if !engine.is_running() {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    Ok(())
}

fn show_history(config: &RelayConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let ledger = DeliveryLedger::open(&config.ledger_path())?;
    let conversations = group_by_phone_number(&ledger.all());

    if json {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
        return Ok(());
    }

    if conversations.is_empty() {
        println!("No messages sent yet.");
        return Ok(());
    }

    for conversation in &conversations {
        println!(
            "{} ({} message{})",
            conversation.phone_number,
            conversation.entries.len(),
            if conversation.entries.len() == 1 { "" } else { "s" }
        );
        for entry in &conversation.entries {
            println!(
                "  {}  {:<6}  #{}  {}",
                entry.sent_at.format("%Y-%m-%d %H:%M:%S"),
                entry.outcome,
                entry.id,
                entry.body
            );
        }
    }
    Ok(())
}

fn forget(
    config: &RelayConfig,
    id: Option<String>,
    phone: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pid_file = config.data_dir.join(PID_FILE);
    if pid_file.exists() && !force {
        return Err(format!(
            "the relay appears to be running ({} exists); stop it first or pass --force",
            pid_file.display()
        )
        .into());
    }

    let ledger = DeliveryLedger::open(&config.ledger_path())?;

    let removed = match (id, phone) {
        (Some(id), _) => usize::from(ledger.remove_by_id(&RequestId::new(id))?),
        (None, Some(phone)) => ledger.remove_by_phone_number(&phone)?,
        (None, None) => 0,
    };

    println!(
        "Removed {} entr{}",
        removed,
        if removed == 1 { "y" } else { "ies" }
    );
    Ok(())
}

fn set_api_url(config: &RelayConfig, url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = RemoteSettings::load_or_default(&config.data_dir);
    settings.set_api_url(url);
    settings.save(&config.data_dir)?;

    match &settings.api_url {
        Some(url) => println!("API URL set to {}", url),
        None => println!("API URL override cleared, using {}", config.api_url),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = RelayConfig::from_env();
    config.data_dir = PathBuf::from(&cli.data_dir);
    if let Some(url) = cli.api_url.as_deref().map(normalize_base_url) {
        if !url.is_empty() {
            config.api_url = url;
        }
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_relay(config).await,
        Command::History { json } => show_history(&config, json),
        Command::Forget { id, phone, force } => forget(&config, id, phone, force),
        Command::SetApiUrl { url } => set_api_url(&config, &url),
    }
}
