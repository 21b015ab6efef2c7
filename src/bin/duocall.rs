//! Kommandozeilen-Client: verbindet mit dem Relay und führt einen Call

use anyhow::{Context, Result};
use clap::Parser;
use duocall::{controller_from_config, init_tracing, CallConfig, CallEvent, MediaSource};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "duocall", about = "Two-party WebRTC call over a relay signaling server")]
struct Args {
    /// WebSocket URL des Relay-Servers
    #[arg(long, env = "SIGNALING_URL")]
    signaling_url: Option<String>,

    #[arg(long, env = "SIGNALING_ROOM")]
    room: Option<String>,

    /// Nach dem Verbinden sofort einen Call starten
    #[arg(long, default_value_t = false)]
    call: bool,

    #[arg(long, env = "TURN_URL")]
    turn_url: Option<String>,

    /// Shared Secret für TURN REST Credentials
    #[arg(long, env = "TURN_SECRET")]
    turn_secret: Option<String>,

    /// Ohne Mikrofon-Prüfung (nur Tracks ohne Gerät)
    #[arg(long, default_value_t = false)]
    no_device: bool,
}

fn media_source(args: &Args) -> Arc<dyn MediaSource> {
    #[cfg(feature = "device-capture")]
    if !args.no_device {
        return Arc::new(duocall::media::DeviceMediaSource::new(false));
    }

    #[cfg(not(feature = "device-capture"))]
    if !args.no_device {
        warn!("Built without device-capture, using plain tracks");
    }

    Arc::new(duocall::StaticTrackSource::new(true, false))
}

/// Kommandozeile hat Vorrang vor `config.json` und Umgebung
fn apply_args(config: &mut CallConfig, args: &Args) {
    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }
    if args.room.is_some() {
        config.room = args.room.clone();
    }

    config.apply_env(|key: &str| match key {
        "TURN_URL" => args.turn_url.clone(),
        "TURN_SECRET" => args.turn_secret.clone(),
        _ => None,
    });
    if args.turn_secret.is_some() && config.turn.is_none() {
        warn!("--turn-secret given without a TURN server, ignoring it");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    let mut config = CallConfig::load().context("loading configuration")?;
    apply_args(&mut config, &args);
    config.validate().context("invalid configuration")?;

    info!("Connecting to {}", config.signaling_url);
    let controller = Arc::new(controller_from_config(&config, media_source(&args)));
    let guard = controller.spawn()?;

    // Status-Übergänge ausgeben
    let mut status = controller.status();
    let mut call_started = false;
    let want_call = args.call;
    let status_controller = Arc::clone(&controller);
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            println!("status: {}", current);

            if want_call && !call_started && current == duocall::CallStatus::Connected {
                call_started = true;
                if let Err(e) = status_controller.start_call().await {
                    warn!("Failed to start call: {}", e);
                }
            }
        }
    });

    // Stream-Events ausgeben
    let mut events = controller.subscribe();
    let events_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CallEvent::LocalStream(stream) => {
                    println!("local stream {} ({:?})", stream.stream_id, stream.track_ids)
                }
                CallEvent::RemoteStream { handle, stream_id } => {
                    println!("remote stream {} on connection {}", stream_id, handle)
                }
                CallEvent::RemoteTrack { handle, track } => {
                    println!("remote {:?} track {} on connection {}", track.kind, track.id, handle)
                }
                CallEvent::Error(reason) => eprintln!("error: {}", reason),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down");

    guard.shutdown().await;
    status_task.abort();
    events_task.abort();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use duocall::config::TurnConfig;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["duocall"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_turn_secret_applies_to_configured_server() {
        let mut config = CallConfig::default();
        config.turn = Some(TurnConfig {
            url: "turn:from-file:3478".to_string(),
            secret: None,
            ttl_secs: 3600,
            username: None,
            credential: None,
        });

        apply_args(&mut config, &args(&["--turn-secret", "cli-secret"]));

        let turn = config.turn.clone().unwrap();
        assert_eq!(turn.url, "turn:from-file:3478");
        assert_eq!(turn.secret.as_deref(), Some("cli-secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_turn_url_and_secret_from_command_line() {
        let mut config = CallConfig::default();
        apply_args(
            &mut config,
            &args(&["--turn-url", "turn:cli:3478", "--turn-secret", "s", "--room", "r1"]),
        );

        let turn = config.turn.clone().unwrap();
        assert_eq!(turn.url, "turn:cli:3478");
        assert_eq!(turn.secret.as_deref(), Some("s"));
        assert_eq!(config.room.as_deref(), Some("r1"));
    }
}
