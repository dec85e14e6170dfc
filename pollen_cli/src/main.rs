use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pollen_core::config::{PollenConfig, get_config_dir};
use pollen_core::{AppEvent, DiskFile, Direction, SessionHandle, spawn_session};
use pollen_wan::IdentityManager;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod app;

use app::{Reporter, render_qr};

/// Event queue capacity between the session and the terminal
const EVENT_BUFFER: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "pollen", version, about = "Send files directly to a peer")]
struct Cli {
    /// Where received files are saved (overrides the config file)
    #[arg(long, env = "POLLEN_DOWNLOAD_DIR", global = true)]
    download_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print this endpoint's id
    Id {
        /// Also print the id as a QR code
        #[arg(long)]
        qr: bool,
    },
    /// Wait for peers and save the files they send
    Listen,
    /// Connect to a peer and send files
    Send {
        /// Endpoint id of the peer
        remote: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PollenConfig::load();
    let download_dir = cli
        .download_dir
        .clone()
        .unwrap_or_else(|| config.download_path.clone());

    let config_dir = get_config_dir().unwrap_or_else(|| PathBuf::from("."));
    let secret_key = IdentityManager::new(config_dir)
        .load_or_generate()
        .await
        .context("Failed to load identity")?;

    if let Command::Id { qr } = cli.command {
        let id = secret_key.public().to_string();
        println!("{} ({})", id, config.display_name);
        if qr {
            println!("{}", render_qr(&id)?);
        }
        return Ok(());
    }

    let (transport, incoming) = pollen_wan::start(secret_key).await?;
    let (session, mut events) = spawn_session(transport.clone(), incoming, EVENT_BUFFER);
    let mut reporter = Reporter::new(download_dir);

    let node_id = transport.node_id().to_string();
    let result = match cli.command {
        Command::Listen => listen(&mut events, &mut reporter, &node_id).await,
        Command::Send { remote, files } => {
            send(&session, &mut events, &mut reporter, &remote, &files).await
        }
        Command::Id { .. } => Ok(()),
    };

    transport.close().await;
    result
}

async fn listen(
    events: &mut mpsc::Receiver<AppEvent>,
    reporter: &mut Reporter,
    node_id: &str,
) -> Result<()> {
    println!("Listening as {}", node_id);
    println!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping");
                return Ok(());
            }
            event = events.recv() => match event {
                Some(event) => reporter.handle(&event).await,
                None => bail!("Session stopped"),
            },
        }
    }
}

async fn send(
    session: &SessionHandle,
    events: &mut mpsc::Receiver<AppEvent>,
    reporter: &mut Reporter,
    remote: &str,
    files: &[PathBuf],
) -> Result<()> {
    session.connect(remote).await?;
    loop {
        let event = next_event(events).await?;
        reporter.handle(&event).await;
        match event {
            AppEvent::Connected { .. } => break,
            AppEvent::Disconnected => bail!("Could not connect to {}", remote),
            _ => {}
        }
    }

    for path in files {
        let source = DiskFile::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        session.send_file(Box::new(source)).await?;

        loop {
            let event = next_event(events).await?;
            reporter.handle(&event).await;
            match event {
                AppEvent::TransferCompleted {
                    direction: Direction::Send,
                    ..
                } => break,
                AppEvent::Disconnected => {
                    bail!("Connection lost while sending {}", path.display())
                }
                _ => {}
            }
        }
    }

    session.disconnect().await?;
    while !matches!(next_event(events).await?, AppEvent::Disconnected) {}
    Ok(())
}

async fn next_event(events: &mut mpsc::Receiver<AppEvent>) -> Result<AppEvent> {
    events.recv().await.context("Session stopped")
}
