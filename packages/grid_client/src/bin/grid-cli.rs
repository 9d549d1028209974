use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use grid_client::{ClientConfig, HttpTransport, LedgerEntry, PushStreamConsumer, SendOutcome, SessionContext};
use grid_protocol::CommandKind;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

/// A prompt answer is complete once no fragment arrived for this long.
const PROMPT_QUIET: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "grid-cli")]
#[command(about = "Issue grid commands through a gateway and watch the replies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding grid.toml (defaults to the current directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Gateway base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Tenant database name
    #[arg(long, global = true)]
    db: Option<String>,

    /// Credential from an earlier login
    #[arg(long, global = true)]
    token: Option<String>,

    /// Seconds to wait for replies before giving up
    #[arg(long, global = true, default_value = "10")]
    wait: u64,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print the credential
    Login {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        password: String,
    },
    /// Load a grid, or one row of it
    Load {
        grid: String,
        #[arg(long)]
        row: Option<String>,
    },
    /// Send a free-text prompt and print the streamed answer
    Prompt { text: String },
    /// Send one liveness ping
    Heartbeat,
    /// Print every reply pushed to this session until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "grid_client=debug,grid_cli=debug,info"
    } else {
        "grid_client=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let mut config = ClientConfig::load(&config_dir)
        .with_context(|| format!("loading config from {}", config_dir.display()))?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(db) = &cli.db {
        config.db_name = db.clone();
    }
    if config.db_name.is_empty() {
        bail!("no database name: pass --db or set db_name in grid.toml");
    }

    let transport = HttpTransport::new(config.base_url.clone());
    let session = SessionContext::new(config, transport);
    if let Some(token) = &cli.token {
        session
            .restore_credential(token)
            .await
            .context("the --token credential is not usable")?;
    }
    info!(session = %session.session_id(), "session created");

    let consumer = PushStreamConsumer::new(session.clone());
    let stop = consumer.stop_token();
    let streaming = tokio::spawn(async move { consumer.run().await });

    // the push channel has to be open before the backend can answer
    let observed = &session;
    wait_until(Duration::from_secs(cli.wait), || async move {
        observed.state().await.ledger().replies().next().is_some()
    })
    .await
    .context("push channel did not open")?;

    let outcome = match &cli.command {
        Commands::Login { user, password } => session.authenticate(user, password).await,
        Commands::Load { grid, row } => Some(session.navigate_to_grid(grid, row.as_deref()).await),
        Commands::Prompt { text } => Some(session.prompt(text).await),
        Commands::Heartbeat => Some(session.heartbeat().await),
        Commands::Watch => {
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            None
        }
    };

    match outcome {
        Some(SendOutcome::Sent) => {
            let deadline = Instant::now() + Duration::from_secs(cli.wait);
            let answered = wait_until(Duration::from_secs(cli.wait), || async move {
                observed.state().await.ledger().pending_count() == 0
            })
            .await;
            if answered.is_err() {
                warn!("no reply within {}s", cli.wait);
            } else if matches!(cli.command, Commands::Prompt { .. }) {
                // the first fragment resolves the request; the rest keep streaming
                let settled = wait_for_quiet(deadline, PROMPT_QUIET, || async move {
                    observed
                        .state()
                        .await
                        .ledger()
                        .replies()
                        .filter(|r| r.command == CommandKind::Prompt)
                        .filter_map(|r| r.message.as_ref())
                        .map(String::len)
                        .sum::<usize>()
                })
                .await;
                if settled.is_err() {
                    warn!("answer still streaming after {}s", cli.wait);
                }
            }
        }
        Some(SendOutcome::NotAuthorized) => warn!("not authorized, log in first and pass --token"),
        Some(SendOutcome::TransportFailed(e)) => warn!("send failed: {e}"),
        None => {}
    }

    stop.cancel();
    match streaming.await.context("streaming task panicked")? {
        Ok(summary) => info!(replies = summary.replies, malformed = summary.malformed, "done"),
        Err(e) => warn!("streaming ended with error: {e}"),
    }

    let state = session.state().await;
    for entry in state.ledger().entries() {
        match entry {
            LedgerEntry::Reply(reply) => println!("{}", serde_json::to_string(reply)?),
            LedgerEntry::Request(tracked) => println!(
                "{} {} {}",
                if tracked.timed_out { "timed-out" } else { "pending" },
                tracked.request.command,
                tracked.request.request_id
            ),
        }
    }
    if let Some(credential) = state.credential() {
        println!("token: {}", credential.token());
    }
    Ok(())
}

async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while !check().await {
        if Instant::now() >= deadline {
            bail!("timed out after {}s", timeout.as_secs());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

/// Poll `observe` until its value stays the same for `quiet`.
async fn wait_for_quiet<F, Fut>(deadline: Instant, quiet: Duration, mut observe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = usize>,
{
    let mut last = observe().await;
    let mut changed_at = Instant::now();
    while changed_at.elapsed() < quiet {
        if Instant::now() >= deadline {
            bail!("still changing at the deadline");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let current = observe().await;
        if current != last {
            last = current;
            changed_at = Instant::now();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn quiet_wait_outlasts_spaced_fragments() {
        let received = Arc::new(AtomicUsize::new(0));
        let writer = received.clone();
        tokio::spawn(async move {
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_millis(300)).await;
                writer.fetch_add(5, Ordering::SeqCst);
            }
        });

        let seen = &received;
        wait_for_quiet(
            Instant::now() + Duration::from_secs(10),
            PROMPT_QUIET,
            || async move { seen.load(Ordering::SeqCst) },
        )
        .await
        .unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_wait_gives_up_at_the_deadline() {
        let ticks = AtomicUsize::new(0);
        let ticks = &ticks;
        let result = wait_for_quiet(
            Instant::now() + Duration::from_secs(2),
            PROMPT_QUIET,
            || async move { ticks.fetch_add(1, Ordering::SeqCst) },
        )
        .await;
        assert!(result.is_err());
    }
}
