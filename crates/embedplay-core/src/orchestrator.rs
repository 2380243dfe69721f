//! Orchestrator: single-owner event loop for all player state.
//!
//! Owns the binding (and through it the external player), the state store,
//! the playlist and the quality negotiator.  Nothing else touches them: user
//! intents, presentation changes and player callbacks all arrive as
//! `OrchestratorEvent`s, or as direct method calls when the orchestrator is
//! driven synchronously (tests, embedding).
//!
//! After every input that changes the read model a fresh `PlayerSnapshot` is
//! published on the watch channel and `PlayerEvent::StateUpdated` goes out on
//! the broadcast channel, alongside the semantic events themselves.
use embedplay_proto::config::Config;
use embedplay_proto::protocol::{
    ExternalNotification, PlayerCommand, PlayerEvent, PlayerSnapshot, PresentationMode,
    QualityLevel,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::binding::{ExternalPlayerBinding, MoveOutcome};
use crate::dispatcher::{self, perceptual_volume, report, CommandContext};
use crate::dom::HostDocument;
use crate::external::ExternalPlayer;
use crate::quality::QualityNegotiator;
use crate::queue::{Playlist, QueueAdapter};
use crate::store::PlayerStore;

// ── OrchestratorEvent ────────────────────────────────────────────────────────

/// All inputs into the orchestrator loop.
#[derive(Debug)]
pub enum OrchestratorEvent<N> {
    /// A batch of semantic commands from a client.
    Dispatch(Vec<PlayerCommand>),
    TogglePlay,
    /// Re-host the player under `host` for `mode`.
    Present { host: N, mode: PresentationMode },
    /// Callback from the external player.
    Notification(ExternalNotification),
    SelectTrack(usize),
    CycleRepeat,
    /// Manual quality override.
    SetQuality(QualityLevel),
    Shutdown,
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

pub struct Orchestrator<D: HostDocument> {
    binding: ExternalPlayerBinding<D>,
    store: PlayerStore,
    playlist: Option<Playlist>,
    negotiator: QualityNegotiator,
    presentation: PresentationMode,
    event_tx: broadcast::Sender<PlayerEvent>,
    state_tx: watch::Sender<PlayerSnapshot>,
}

impl<D: HostDocument> Orchestrator<D> {
    pub fn new(document: D, config: &Config) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let store = PlayerStore::new(config.player.default_volume);
        let (state_tx, _) = watch::channel(store.snapshot());
        Self {
            binding: ExternalPlayerBinding::new(document, config.player.container_id.clone()),
            store,
            playlist: None,
            negotiator: QualityNegotiator::new(config.quality.clone()),
            presentation: PresentationMode::default(),
            event_tx,
            state_tx,
        }
    }

    pub fn with_playlist(mut self, playlist: Playlist) -> Self {
        self.playlist = Some(playlist);
        self.publish();
        self
    }

    pub fn binding(&self) -> &ExternalPlayerBinding<D> {
        &self.binding
    }

    pub fn binding_mut(&mut self) -> &mut ExternalPlayerBinding<D> {
        &mut self.binding
    }

    pub fn store(&self) -> &PlayerStore {
        &self.store
    }

    pub fn negotiator(&self) -> &QualityNegotiator {
        &self.negotiator
    }

    pub fn playlist(&self) -> Option<&Playlist> {
        self.playlist.as_ref()
    }

    pub fn presentation(&self) -> PresentationMode {
        self.presentation
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }

    /// Latest published snapshot, for tasks that cannot borrow the orchestrator.
    pub fn watch_state(&self) -> watch::Receiver<PlayerSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let playlist = self.playlist.as_ref();
        PlayerSnapshot {
            requested_quality: self.negotiator.requested(),
            actual_quality: self.negotiator.actual(),
            displayed_quality: self.negotiator.displayed(),
            available_qualities: self.negotiator.available().to_vec(),
            presentation: self.presentation,
            queue_index: playlist.and_then(Playlist::current_index),
            queue_len: playlist.map_or(0, Playlist::len),
            repeat_mode: playlist.map(Playlist::repeat).unwrap_or_default(),
            ..self.store.snapshot()
        }
    }

    // ── player lifecycle ─────────────────────────────────────────────────────

    /// Register a freshly created player.  Quality knowledge from a previous
    /// instance is dropped and the current mode is negotiated from scratch.
    pub fn attach_player(&mut self, player: Box<dyn ExternalPlayer>, now: Instant) {
        info!("Orchestrator: player attached ({:?})", self.presentation);
        self.binding.attach_player(player);
        self.negotiator.reset();
        if let Some(player) = self.binding.player() {
            self.negotiator.refresh_available(player);
        }
        self.negotiator.on_mode_change(self.presentation, now);
        let volume = self.store.state().volume;
        if let Some(player) = self.binding.player_mut() {
            report("set_volume", player.set_volume(perceptual_volume(volume)));
        }
        self.publish();
    }

    /// Cancel timers and drop the player handle.
    pub fn shutdown(&mut self) {
        info!("Orchestrator: shutting down");
        self.negotiator.cancel();
        if self.binding.release().is_some() {
            self.store.set_api_ready(false);
        }
        self.publish();
    }

    // ── intents ──────────────────────────────────────────────────────────────

    pub fn dispatch(&mut self, commands: &[PlayerCommand]) {
        self.run_batch(commands, false);
        self.publish();
    }

    pub fn toggle_play(&mut self) {
        self.store.toggle_play(self.binding.player_mut());
        self.publish();
    }

    pub fn seek(&mut self, seconds: f64) {
        self.seek_to(seconds);
        self.publish();
    }

    pub fn load_video(&mut self, video_id: &str, autoplay: bool) {
        self.store
            .load_video(self.binding.player_mut(), video_id, autoplay);
        self.publish();
    }

    pub fn select_track(&mut self, index: usize) {
        let Some(change) = self.playlist.as_mut().and_then(|p| p.select(index)) else {
            debug!("Orchestrator: select {} ignored", index);
            return;
        };
        self.apply(
            PlayerEvent::TrackChanged {
                index: change.index,
                video_id: change.video_id,
            },
            false,
        );
        self.publish();
    }

    pub fn cycle_repeat(&mut self) {
        if let Some(playlist) = self.playlist.as_mut() {
            playlist.cycle_repeat();
            self.publish();
        }
    }

    /// Manual quality override: same optimistic path as a negotiated request.
    pub fn set_quality(&mut self, quality: QualityLevel, now: Instant) {
        let Some(player) = self.binding.player_mut() else {
            return;
        };
        let offered = self.negotiator.available();
        if !offered.is_empty() && !offered.contains(&quality) {
            debug!("Orchestrator: {} not offered by the player, requesting anyway", quality);
        }
        if let Some(requested) = self.negotiator.request(player, quality, now) {
            self.emit(PlayerEvent::QualityRequested { quality: requested });
        }
        self.publish();
    }

    /// Move the player under `host` and start negotiating quality for `mode`.
    pub fn present(&mut self, host: &D::Node, mode: PresentationMode, now: Instant) -> MoveOutcome {
        let outcome = self.binding.move_to_host(host, mode);
        if matches!(outcome, MoveOutcome::Refused | MoveOutcome::Failed) {
            return outcome;
        }
        if self.binding.has_player() {
            self.negotiator.on_mode_change(mode, now);
        }
        if self.presentation != mode {
            info!("Orchestrator: presentation {:?} → {:?}", self.presentation, mode);
            self.presentation = mode;
            self.emit(PlayerEvent::PresentationChanged { mode });
        }
        self.publish();
        outcome
    }

    // ── reconciliation ───────────────────────────────────────────────────────

    pub fn handle_notification(&mut self, notification: ExternalNotification) {
        match notification {
            ExternalNotification::StateChange { state, video_id } => {
                let absorbed = self.store.absorb_state_change(state, video_id.as_deref());
                let ended = absorbed.events.contains(&PlayerEvent::Ended);
                for event in absorbed.events {
                    self.emit(event);
                }
                if absorbed.resume_playback {
                    debug!("Orchestrator: resuming playback on the new item");
                    self.run_batch(&[PlayerCommand::Play], false);
                }
                if ended {
                    self.advance_after_end();
                }
            }
            ExternalNotification::QualityChange { quality } => {
                if self.negotiator.on_quality_notification(quality) {
                    self.emit(PlayerEvent::QualityConfirmed { quality });
                }
            }
            ExternalNotification::Ready => {
                info!("Orchestrator: external API ready");
                self.store.set_api_ready(true);
            }
        }
        self.publish();
    }

    /// Periodic tick: refresh the timeline and reconcile quality.
    pub fn poll(&mut self, now: Instant) {
        let Some(player) = self.binding.player() else {
            return;
        };
        self.store.sync_timeline(player);
        self.negotiator.refresh_available(player);
        let suspended = self.store.is_loading_new_video();
        if let Some(quality) = self.negotiator.poll(player, now, suspended) {
            self.emit(PlayerEvent::QualityConfirmed { quality });
        }
        self.publish();
    }

    /// Fire the quality debounce if it is due.
    pub fn fire_due(&mut self, now: Instant) {
        if let Some(quality) = self.negotiator.fire_due(self.binding.player_mut(), now) {
            self.emit(PlayerEvent::QualityRequested { quality });
        }
        self.publish();
    }

    // ── event loop ───────────────────────────────────────────────────────────

    /// Run until `Shutdown` arrives or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<OrchestratorEvent<D::Node>>) {
        info!("Orchestrator: starting event loop");
        let mut ticker = tokio::time::interval(self.negotiator.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.negotiator.next_deadline();
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("Orchestrator: event channel closed, shutting down");
                        break;
                    }
                    Some(OrchestratorEvent::Shutdown) => {
                        info!("Orchestrator: shutdown requested");
                        break;
                    }
                    Some(evt) => self.handle_event(evt, Instant::now()),
                },
                _ = ticker.tick() => self.poll(Instant::now()),
                _ = deadline_reached(deadline) => self.fire_due(Instant::now()),
            }
        }

        self.shutdown();
    }

    fn handle_event(&mut self, event: OrchestratorEvent<D::Node>, now: Instant) {
        match event {
            OrchestratorEvent::Dispatch(commands) => self.dispatch(&commands),
            OrchestratorEvent::TogglePlay => self.toggle_play(),
            OrchestratorEvent::Present { host, mode } => {
                self.present(&host, mode, now);
            }
            OrchestratorEvent::Notification(n) => self.handle_notification(n),
            OrchestratorEvent::SelectTrack(index) => self.select_track(index),
            OrchestratorEvent::CycleRepeat => self.cycle_repeat(),
            OrchestratorEvent::SetQuality(quality) => self.set_quality(quality, now),
            OrchestratorEvent::Shutdown => self.shutdown(),
        }
    }

    // ── internals ────────────────────────────────────────────────────────────

    /// Run the dispatcher, record intents for the commands the player
    /// accepted, then act on what it emitted.  `resume` forces autoplay on
    /// any resulting track change.
    fn run_batch(&mut self, commands: &[PlayerCommand], resume: bool) {
        let mut emitted = Vec::new();
        let accepted = {
            let mut emit = |event: PlayerEvent| emitted.push(event);
            dispatcher::run(
                commands,
                CommandContext {
                    player: self.binding.player_mut(),
                    emit: &mut emit,
                    queue: self.playlist.as_mut().map(|q| q as &mut dyn QueueAdapter),
                },
            )
        };
        for command in accepted {
            self.store.record_intent(command);
        }
        for event in emitted {
            self.apply(event, resume);
        }
    }

    /// Forward a dispatcher event downstream, then act on it.
    fn apply(&mut self, event: PlayerEvent, resume: bool) {
        self.emit(event.clone());
        match &event {
            PlayerEvent::SeekRequested { seconds } => self.seek_to(*seconds),
            PlayerEvent::PlayRequested => {
                if let Some(player) = self.binding.player_mut() {
                    if report("play", player.play()) {
                        self.store.record_intent(&PlayerCommand::Play);
                    }
                }
            }
            PlayerEvent::TrackChanged { video_id, .. } => {
                let autoplay = resume
                    || self.store.is_playing()
                    || self.store.pending_play_state() == Some(true);
                self.store
                    .load_video(self.binding.player_mut(), video_id, autoplay);
            }
            _ => {}
        }
    }

    fn seek_to(&mut self, seconds: f64) {
        if !self.binding.has_player() {
            return;
        }
        self.store.seek(self.binding.player_mut(), seconds);
        self.emit(PlayerEvent::SeekCompleted { seconds });
    }

    /// The current item finished: repeat-one restarts it, anything else asks
    /// the queue for the next track and keeps playing.
    fn advance_after_end(&mut self) {
        if self.playlist.is_none() {
            return;
        }
        debug!("Orchestrator: item ended, advancing");
        self.run_batch(&[PlayerCommand::RequestNextTrack], true);
    }

    fn emit(&self, event: PlayerEvent) {
        debug!("Orchestrator: event {:?}", event);
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
        if changed {
            self.emit(PlayerEvent::StateUpdated);
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
