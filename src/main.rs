use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use sea_orm::{ConnectOptions, Database};
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sitepulse::config::EngineConfig;
use sitepulse::monitoring::clock::SystemClock;
use sitepulse::monitoring::probe::{CheckConfig, HttpProber};
use sitepulse::monitoring::runner::{CheckRunner, RunnerSettings};
use sitepulse::monitoring::scheduler::Scheduler;
use sitepulse::notifications::dispatcher::Dispatcher;
use sitepulse::notifications::senders::email::EmailSender;
use sitepulse::notifications::senders::telegram::TelegramSender;
use sitepulse::version::VERSION;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "sitepulse.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info` with noisy query logging muted when RUST_LOG is unset.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    init_logging();
    info!("Starting sitepulse engine, version: {}", VERSION);
    dotenv().ok();

    let config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load engine configuration: {}", e);
            return Err(e.into());
        }
    };

    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(10);
    let db = Database::connect(opt).await?;
    info!("Database connection established");

    let email = match config.smtp() {
        Some(settings) => match EmailSender::new(&settings) {
            Ok(sender) => Some(sender),
            Err(e) => {
                error!("Failed to build SMTP transport: {}", e);
                return Err(e.into());
            }
        },
        None => {
            warn!("SMTP is not configured; email channels will not deliver");
            None
        }
    };
    let dispatcher = Dispatcher::new(email, TelegramSender::new(), config.action_base_url.clone());

    let clock = Arc::new(SystemClock);
    let runner = Arc::new(CheckRunner::new(
        db.clone(),
        HttpProber::new()?,
        CheckConfig::default(),
        dispatcher,
        clock.clone(),
        RunnerSettings {
            max_concurrent_checks: config.max_concurrent_checks,
            ..RunnerSettings::default()
        },
    ));

    let scheduler = Arc::new(Scheduler::new(
        db,
        runner,
        clock,
        Duration::from_secs(config.scheduler_interval_seconds),
    ));
    tokio::spawn(scheduler.start());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping");
    Ok(())
}
