mod socket;

use std::time::Duration;

use embedplay_core::{NodeId, NodeTree, Orchestrator, OrchestratorEvent, Playlist, SimulatedPlayer};
use embedplay_proto::config::Config;
use embedplay_proto::protocol::{ExternalNotification, PresentationMode};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A custom tracing layer that forwards log lines to connected clients
struct BroadcastLayer {
    sender: broadcast::Sender<String>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<String>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Clients only see WARN and ERROR
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let now = chrono::Local::now();
        let mut message = format!("{} [{}] ", now.format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is OK
        let _ = self.sender.send(message);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// Host nodes for each presentation mode.  The headless daemon has no real
/// page, so the hosts live in an in-memory document.
#[derive(Debug, Clone, Copy)]
pub struct Hosts {
    pub hidden: NodeId,
    pub floating: NodeId,
    pub fullscreen: NodeId,
}

impl Hosts {
    fn build(tree: &mut NodeTree) -> anyhow::Result<Self> {
        let root = tree.root();
        Ok(Self {
            hidden: tree.create_child(root, "div", Some("hidden-host"))?,
            floating: tree.create_child(root, "div", Some("floating-host"))?,
            fullscreen: tree.create_child(root, "div", Some("fullscreen-host"))?,
        })
    }

    pub fn for_mode(&self, mode: PresentationMode) -> NodeId {
        match mode {
            PresentationMode::Hidden => self.hidden,
            PresentationMode::Floating => self.floating,
            PresentationMode::Fullscreen => self.fullscreen,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Setup broadcast channel first so we can use it for logging
    let (log_tx, _) = broadcast::channel::<String>(100);

    let log_path = config.daemon.log_file.clone();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Create layers: file writer + broadcast
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(log_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,embedplay_core=debug,embedplay_daemon=debug",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", Config::config_path());

    let mut tree = NodeTree::new();
    let hosts = Hosts::build(&mut tree)?;

    let mut orchestrator = Orchestrator::new(tree, &config);
    if !config.playlist.video_ids.is_empty() {
        let playlist = Playlist::from_video_ids(config.playlist.video_ids.clone())
            .with_repeat(config.playlist.repeat);
        info!("Playlist: {} tracks ({:?})", playlist.len(), playlist.repeat());
        orchestrator = orchestrator.with_playlist(playlist);
    }

    let now = Instant::now();
    orchestrator.present(&hosts.hidden, PresentationMode::Hidden, now);

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<ExternalNotification>();
    let player = SimulatedPlayer::new().with_notifications(notify_tx);
    orchestrator.attach_player(Box::new(player.clone()), now);
    orchestrator.handle_notification(ExternalNotification::Ready);

    // Cue the first track so a client can press play straight away.
    let first = orchestrator
        .playlist()
        .and_then(Playlist::current)
        .map(|track| track.video_id.clone());
    if let Some(video_id) = first {
        orchestrator.load_video(&video_id, false);
    }

    // Event channel: all external inputs funnel into the orchestrator
    let (event_tx, event_rx) = mpsc::channel::<socket::CoreEvent>(256);

    // Forward player callbacks into the event loop.
    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            if forward_tx
                .send(OrchestratorEvent::Notification(notification))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Ctrl-C received");
        let _ = shutdown_tx.send(OrchestratorEvent::Shutdown).await;
    });

    let _socket_handle = socket::start_server(
        config.daemon.bind_address.clone(),
        config.daemon.port,
        socket::ServerChannels {
            event_tx: event_tx.clone(),
            state_rx: orchestrator.watch_state(),
            player_events: orchestrator.subscribe(),
            log_tx: log_tx.clone(),
            hosts,
        },
    );

    info!("Daemon initialised, running event loop");
    // The simulated player is not Send: both futures stay on this task.
    tokio::select! {
        _ = orchestrator.run(event_rx) => {}
        _ = run_playhead(player, Duration::from_secs(1)) => {}
    }

    Ok(())
}

/// Move the simulated playhead forward in real time.
async fn run_playhead(player: SimulatedPlayer, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        player.advance(period.as_secs_f64());
    }
}
