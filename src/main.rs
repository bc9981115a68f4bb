use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod auth;
mod checker;
mod config;
mod error;
mod honeywell;
mod notify;
mod secrets;

#[derive(Parser)]
#[command(
    name = "honeywatch",
    version,
    about = "Honeywell thermostat monitor that texts you when it gets too hot"
)]
struct Cli {
    /// Path to config file [default: ~/.config/honeywatch/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check now, then on every poll interval (foreground, for systemd)
    Start,
    /// Run a single temperature check and exit
    Check,
    /// Log in to Honeywell and exchange the code for tokens, then exit
    Auth,
}

fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "honeywatch=info",
        1 => "honeywatch=debug",
        2 => "honeywatch=trace",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Read the Honeywell credentials and complete the interactive authorization.
async fn authorize(
    cfg: &config::Config,
    vault: &secrets::KeyVault,
) -> Result<auth::TokenManager> {
    let credentials = auth::Credentials::resolve(vault, &cfg.honeywell).await?;
    let authorizer = auth::WebDriverAuthorizer::new(&cfg.webdriver);
    auth::TokenManager::initialize(
        credentials,
        auth::OAuthEndpoints::from(&cfg.honeywell),
        &authorizer,
    )
    .await
}

async fn build_checker(cfg: &config::Config) -> Result<checker::Checker> {
    let vault = secrets::KeyVault::new(&cfg.keyvault_url, cfg.uami_client_id.clone())?;
    let tokens = authorize(cfg, &vault).await?;
    let notifier = notify::SmtpNotifier::connect(&cfg.email, &vault).await?;
    let devices = honeywell::DeviceClient::new(&cfg.honeywell.api_base_url)?;

    Ok(checker::Checker::new(
        tokens,
        devices,
        Box::new(notifier),
        cfg.honeywell.temperature_threshold,
    ))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
    }
    Ok(())
}

/// Run one cycle now, then one per `period` until `shutdown` resolves.
async fn run_loop(
    checker: &mut checker::Checker,
    period: Duration,
    shutdown: impl Future<Output = Result<()>>,
) -> Result<()> {
    // The first tick completes immediately.
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    tracing::info!(interval_secs = period.as_secs(), "entering check loop");

    loop {
        tokio::select! {
            res = &mut shutdown => return res,

            _ = timer.tick() => {
                let alerts = checker.run_cycle().await?;
                tracing::debug!(alerts, "check cycle complete");
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Start => {
            tracing::info!("starting honeywatch");
            let mut checker = build_checker(&cfg).await?;
            let period = Duration::from_secs(cfg.general.poll_interval_secs);
            run_loop(&mut checker, period, shutdown_signal()).await?;
            tracing::info!("honeywatch stopped");
        }
        Command::Check => {
            let mut checker = build_checker(&cfg).await?;
            let alerts = checker.run_cycle().await?;
            println!("check complete, {alerts} alert(s) sent");
        }
        Command::Auth => {
            let vault = secrets::KeyVault::new(&cfg.keyvault_url, cfg.uami_client_id.clone())?;
            let tokens = authorize(&cfg, &vault).await?;
            println!(
                "Authorization successful! Access token valid until {}",
                tokens.state().expires_at
            );
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli).await;
    if let Err(e) = &result {
        tracing::error!("an error occurred: {e:#}");
    }
    result
}
