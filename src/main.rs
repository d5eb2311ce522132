//! meshtalk CLI — ignition key for the mesh node.
//!
//! Starts the BLE mesh engine, prints incoming events, and forwards
//! stdin lines as broadcast messages until EOF or Ctrl-C.

use clap::Parser;
use meshtalk::config::Config;
use meshtalk::identity::generate_peer_id;
use meshtalk::mesh::MeshEvent;
use meshtalk::{App, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the nickname this node announces.
    #[arg(short, long)]
    nickname: Option<String>,

    /// Log verbosity (passed straight to tracing's EnvFilter).
    #[arg(short, long)]
    verbosity: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref());
    if let Some(nickname) = args.nickname {
        config.nickname = nickname;
    }
    if let Some(verbosity) = args.verbosity {
        config.verbosity = verbosity;
    }

    use tracing_subscriber::{fmt, EnvFilter};
    fmt().with_env_filter(EnvFilter::new(&config.verbosity)).init();

    tracing::info!(nickname = %config.nickname, "starting meshtalk");

    let peer_id = generate_peer_id();
    let radio = build_radio().await?;

    let (app, mut events) = App::start_services(peer_id.clone(), config.nickname.clone(), radio);
    tracing::info!(peer_id = %peer_id, "mesh engine running");

    let event_printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MeshEvent::PublicMessage { nickname, content, .. } => {
                    println!("{nickname}: {content}");
                }
                MeshEvent::PeerConnected { peer_id } => {
                    tracing::info!(peer_id = %peer_id, "peer connected");
                }
                MeshEvent::PeerDisconnected { peer_id } => {
                    tracing::info!(peer_id = %peer_id, "peer disconnected");
                }
                MeshEvent::PeerListChanged { peers, .. } => {
                    tracing::debug!(count = peers.len(), "peer list changed");
                }
            }
        }
    });

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin());
    use tokio::io::AsyncBufReadExt;
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = lines.read_line(&mut line).await.unwrap_or(0);
        if bytes_read == 0 {
            break;
        }
        let content = line.trim_end().to_string();
        if !content.is_empty() {
            app.send_message(content).await;
        }
    }

    app.stop_services().await;
    event_printer.abort();
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn build_radio() -> Result<Box<dyn meshtalk::transport::RadioAdapter>> {
    use meshtalk::transport::btle_adapter::BtlePlugAdapter;

    let adapter = BtlePlugAdapter::new().await.map_err(|e| Box::new(e) as _)?;
    // BtlePlugAdapter is a cheap Arc handle internally, so the event pump
    // keeps its own clone and the engine gets this one as its
    // `Box<dyn RadioAdapter>` — no ownership fight between the two.
    adapter.spawn_event_pump();
    Ok(Box::new(adapter))
}

#[cfg(not(feature = "bluetooth"))]
async fn build_radio() -> Result<Box<dyn meshtalk::transport::RadioAdapter>> {
    Err("meshtalk was built without the `bluetooth` feature".into())
}
