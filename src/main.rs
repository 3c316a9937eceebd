//! vokey - einem Sprachraum beitreten
//!
//! Befehle auf stdin: `m` Mute umschalten, `r` Mikrofon erneut anfordern,
//! `q` Raum verlassen. Ctrl-C verlässt den Raum ebenfalls sauber.

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use vokey::call_engine::{CallEvent, MediaStatus};
use vokey::signaling::SignalingEvent;
use vokey::{Config, RoomClient};

#[derive(Parser, Debug)]
#[command(name = "vokey", version, about = "Join a mesh voice room")]
struct Cli {
    /// Room to join
    room_id: String,

    /// Coordinator base URL (overrides VOKEY_COORDINATOR_URL)
    #[arg(long, value_name = "URL")]
    coordinator: Option<String>,

    /// Join with the microphone muted
    #[arg(long)]
    muted: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vokey::init_logging();
    let cli = Cli::parse();

    let config = match cli.coordinator.as_deref() {
        Some(url) => Config::with_coordinator(url),
        None => Config::from_env(),
    }
    .context("invalid coordinator configuration")?;

    let client =
        RoomClient::join(&config, &cli.room_id, cli.muted).context("failed to join room")?;

    let mut signaling = client.signaling_events();
    let mut calls = client.call_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    println!("Commands: m = toggle mute, r = retry microphone, q = leave");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "m" => {
                        let muted = client.toggle_mute();
                        println!("Microphone {}", if muted { "muted" } else { "live" });
                    }
                    "r" => client.retry_microphone(),
                    "q" => break,
                    "" => {}
                    other => println!("Unknown command: {other}"),
                },
                // Ohne stdin nur noch auf Ctrl-C warten
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },

            event = signaling.recv() => match event {
                Ok(SignalingEvent::Joined { self_id, peers }) => {
                    println!("Joined {} as {} ({} peer(s))", client.room_id(), self_id, peers.len());
                }
                Ok(SignalingEvent::ReconnectFailed { attempts }) => {
                    eprintln!("Lost connection to coordinator after {attempts} attempt(s)");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} signaling event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },

            event = calls.recv() => match event {
                Ok(CallEvent::RemoteStreamReady { peer_id, stream }) => {
                    println!("Receiving audio from {} ({})", peer_id, stream.mime_type());
                }
                Ok(CallEvent::PeerRemoved { peer_id }) => println!("{peer_id} left"),
                Ok(CallEvent::MediaStatusChanged(status @ (MediaStatus::Denied | MediaStatus::NoDevice))) => {
                    println!("Microphone unavailable ({status}), type r to retry");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} call event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.leave().await;
    Ok(())
}
