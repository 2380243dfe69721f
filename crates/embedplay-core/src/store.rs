//! Player state store.
//!
//! The only writer of transport state.  External notifications are turned
//! into store actions by the orchestrator; nothing else mutates the fields.
//!
//! Three flags absorb the external player's latency:
//!
//! ```text
//!  is_loading_new_video     : load issued, new item not yet confirmed;
//!                             notifications from the old item are dropped
//!  was_playing_before_load  : resume intent across a load
//!  pending_play_state       : user play/pause not yet confirmed; rendered
//!                             instead of the confirmed value
//! ```

use embedplay_proto::protocol::{ExternalPlayerState, PlayerCommand, PlayerEvent, PlayerSnapshot};
use tracing::{debug, warn};

use crate::dispatcher::{issue_load, report};
use crate::external::ExternalPlayer;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    /// Linear 0–100 slider value (before the perceptual curve).
    pub volume: f64,
    pub api_ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadTracker {
    pub is_loading_new_video: bool,
    pub was_playing_before_load: bool,
    pub pending_play_state: Option<bool>,
    /// Identity requested by the latest load.  Only a notification bearing
    /// this identity confirms it; a newer load replaces it.
    target_video_id: Option<String>,
    /// Identity that was active when the load was issued.
    pre_load_video_id: Option<String>,
}

/// Result of absorbing one external state notification.
#[derive(Debug, Default, PartialEq)]
pub struct Absorbed {
    pub events: Vec<PlayerEvent>,
    /// The confirmed item arrived idle but playback was wanted before the load.
    pub resume_playback: bool,
}

#[derive(Debug, Default)]
pub struct PlayerStore {
    state: PlayerState,
    loading: LoadTracker,
    video_id: Option<String>,
    rev: u64,
}

impl PlayerStore {
    pub fn new(initial_volume: f64) -> Self {
        Self {
            state: PlayerState {
                volume: initial_volume.clamp(0.0, 100.0),
                ..Default::default()
            },
            rev: 1,
            ..Default::default()
        }
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn loading(&self) -> &LoadTracker {
        &self.loading
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn is_loading_new_video(&self) -> bool {
        self.loading.is_loading_new_video
    }

    pub fn pending_play_state(&self) -> Option<bool> {
        self.loading.pending_play_state
    }

    /// Transport state for play/pause iconography: the pending value wins.
    pub fn displayed_is_playing(&self) -> bool {
        self.loading
            .pending_play_state
            .unwrap_or(self.state.is_playing)
    }

    fn touch(&mut self) {
        self.rev += 1;
    }

    // ── atomic setters ───────────────────────────────────────────────────────

    pub fn set_playing(&mut self, playing: bool) {
        self.state.is_playing = playing;
        self.touch();
    }

    pub fn set_current_time(&mut self, seconds: f64) {
        self.state.current_time = seconds.max(0.0);
        self.touch();
    }

    pub fn set_duration(&mut self, seconds: f64) {
        self.state.duration = seconds.max(0.0);
        self.touch();
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.state.volume = volume.clamp(0.0, 100.0);
        self.touch();
    }

    pub fn set_api_ready(&mut self, ready: bool) {
        self.state.api_ready = ready;
        self.touch();
    }

    pub fn set_loading_new_video(&mut self, loading: bool) {
        self.loading.is_loading_new_video = loading;
        self.touch();
    }

    pub fn set_was_playing_before_load(&mut self, was_playing: bool) {
        self.loading.was_playing_before_load = was_playing;
        self.touch();
    }

    pub fn set_pending_play_state(&mut self, pending: Option<bool>) {
        self.loading.pending_play_state = pending;
        self.touch();
    }

    // ── intents ──────────────────────────────────────────────────────────────

    /// Optimistic bookkeeping for a command the player accepted.  Commands
    /// whose external call failed must not be recorded.
    pub fn record_intent(&mut self, command: &PlayerCommand) {
        match command {
            PlayerCommand::Play => self.expect_transport(true),
            PlayerCommand::Pause => self.expect_transport(false),
            PlayerCommand::Seek { seconds } => {
                self.loading.is_loading_new_video = false;
                self.state.current_time = seconds.max(0.0);
                self.touch();
            }
            PlayerCommand::Load { video_id, autoplay } => self.begin_load(video_id, *autoplay),
            PlayerCommand::SetVolume { volume } => self.set_volume(*volume),
            PlayerCommand::RequestNextTrack | PlayerCommand::RequestPreviousTrack => {}
        }
    }

    /// A user toggle always overrides an in-flight load's suppression.
    fn expect_transport(&mut self, playing: bool) {
        self.loading.is_loading_new_video = false;
        self.loading.pending_play_state = Some(playing);
        self.state.is_playing = playing;
        self.touch();
    }

    fn begin_load(&mut self, video_id: &str, autoplay: bool) {
        self.loading.was_playing_before_load = autoplay || self.state.is_playing;
        self.loading.is_loading_new_video = true;
        self.loading.target_video_id = Some(video_id.to_string());
        // Reloading the active item: there is no old identity to filter out.
        self.loading.pre_load_video_id = self
            .video_id
            .clone()
            .filter(|current| current != video_id);
        debug!(
            "store: loading {} (resume={}, pre-load={:?})",
            video_id, self.loading.was_playing_before_load, self.loading.pre_load_video_id
        );
        self.touch();
    }

    // ── composite actions ────────────────────────────────────────────────────

    pub fn toggle_play(&mut self, player: Option<&mut dyn ExternalPlayer>) {
        let Some(player) = player else {
            return;
        };
        let target = !self.state.is_playing;
        let accepted = if target {
            report("play", player.play())
        } else {
            report("pause", player.pause())
        };
        if accepted {
            self.expect_transport(target);
        }
    }

    pub fn seek(&mut self, player: Option<&mut dyn ExternalPlayer>, seconds: f64) {
        let Some(player) = player else {
            return;
        };
        if report("seek", player.seek(seconds, true)) {
            self.record_intent(&PlayerCommand::Seek { seconds });
        }
    }

    pub fn load_video(
        &mut self,
        player: Option<&mut dyn ExternalPlayer>,
        video_id: &str,
        autoplay: bool,
    ) {
        let Some(player) = player else {
            return;
        };
        if report("load", issue_load(player, video_id, autoplay)) {
            self.begin_load(video_id, autoplay);
        }
    }

    // ── reconciliation ───────────────────────────────────────────────────────

    /// Absorb a state-change notification from the external player.
    pub fn absorb_state_change(
        &mut self,
        state: ExternalPlayerState,
        video_id: Option<&str>,
    ) -> Absorbed {
        let mut absorbed = Absorbed::default();

        if self.loading.is_loading_new_video {
            match video_id {
                Some(id) if Some(id) == self.loading.target_video_id.as_deref() => {
                    debug!("store: load confirmed for {} ({:?})", id, state);
                    self.loading.is_loading_new_video = false;
                    self.loading.target_video_id = None;
                    self.video_id = Some(id.to_string());
                    absorbed.events.push(PlayerEvent::LoadConfirmed {
                        video_id: id.to_string(),
                    });
                    if self.loading.was_playing_before_load
                        && matches!(
                            state,
                            ExternalPlayerState::Cued | ExternalPlayerState::Paused
                        )
                        && self.loading.pending_play_state != Some(false)
                    {
                        absorbed.resume_playback = true;
                    }
                    self.touch();
                }
                Some(id) if Some(id) == self.loading.pre_load_video_id.as_deref() => {
                    debug!("store: dropping stale {:?} for {} while loading", state, id);
                    return absorbed;
                }
                _ => {
                    debug!(
                        "store: dropping {:?} for {:?}, waiting on {:?}",
                        state, video_id, self.loading.target_video_id
                    );
                    return absorbed;
                }
            }
        } else if let Some(id) = video_id {
            if self.video_id.as_deref() != Some(id) {
                self.video_id = Some(id.to_string());
                self.touch();
            }
        }

        match state {
            ExternalPlayerState::Playing => self.confirm_transport(true, &mut absorbed),
            ExternalPlayerState::Paused => self.confirm_transport(false, &mut absorbed),
            ExternalPlayerState::Ended => {
                self.state.is_playing = false;
                self.loading.pending_play_state = None;
                absorbed.events.push(PlayerEvent::Ended);
                self.touch();
            }
            ExternalPlayerState::Cued => {
                if self.loading.pending_play_state.is_none() && !absorbed.resume_playback {
                    self.state.is_playing = false;
                    self.touch();
                }
            }
            ExternalPlayerState::Buffering | ExternalPlayerState::Unstarted => {}
        }
        absorbed
    }

    fn confirm_transport(&mut self, playing: bool, absorbed: &mut Absorbed) {
        match self.loading.pending_play_state {
            Some(pending) if pending != playing => {
                // Stale echo of the previous transport state.
                debug!(
                    "store: ignoring confirmed playing={} while {} is pending",
                    playing, pending
                );
                return;
            }
            _ => {}
        }
        self.loading.pending_play_state = None;
        self.state.is_playing = playing;
        absorbed.events.push(if playing {
            PlayerEvent::ConfirmedPlay
        } else {
            PlayerEvent::ConfirmedPause
        });
        self.touch();
    }

    /// Refresh position and duration from the player.  Skipped while a load
    /// is in flight since the readings would belong to the old item.
    pub fn sync_timeline(&mut self, player: &dyn ExternalPlayer) {
        if self.loading.is_loading_new_video {
            return;
        }
        let current = match player.current_time() {
            Ok(t) => t,
            Err(e) => {
                warn!("store: reading current time failed: {}", e);
                return;
            }
        };
        let duration = match player.duration() {
            Ok(d) => d,
            Err(e) => {
                warn!("store: reading duration failed: {}", e);
                return;
            }
        };
        if current != self.state.current_time || duration != self.state.duration {
            self.state.current_time = current.max(0.0);
            self.state.duration = duration.max(0.0);
            self.touch();
        }
    }

    /// Store-owned part of the read model.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            rev: self.rev,
            is_playing: self.state.is_playing,
            displayed_is_playing: self.displayed_is_playing(),
            current_time: self.state.current_time,
            duration: self.state.duration,
            volume: self.state.volume,
            api_ready: self.state.api_ready,
            is_loading_new_video: self.loading.is_loading_new_video,
            was_playing_before_load: self.loading.was_playing_before_load,
            pending_play_state: self.loading.pending_play_state,
            video_id: self.video_id.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{PlayerCall, SimulatedPlayer};

    #[test]
    fn test_toggle_is_optimistic_and_clears_loading() {
        let mut store = PlayerStore::new(50.0);
        let mut player = SimulatedPlayer::new();
        store.load_video(Some(&mut player), "a", true);
        assert!(store.is_loading_new_video());

        store.toggle_play(Some(&mut player));
        assert!(!store.is_loading_new_video());
        assert_eq!(store.pending_play_state(), Some(true));
        assert!(store.is_playing());
        assert!(store.displayed_is_playing());
        assert_eq!(
            player.calls(),
            vec![PlayerCall::Load("a".into()), PlayerCall::Play]
        );
    }

    #[test]
    fn test_controls_without_player_are_noops() {
        let mut store = PlayerStore::new(50.0);
        let rev = store.rev();
        store.toggle_play(None);
        store.seek(None, 30.0);
        store.load_video(None, "a", true);
        assert_eq!(store.rev(), rev);
        assert_eq!(store.pending_play_state(), None);
        assert!(!store.is_loading_new_video());
    }

    #[test]
    fn test_seek_is_optimistic() {
        let mut store = PlayerStore::new(50.0);
        let mut player = SimulatedPlayer::new();
        store.seek(Some(&mut player), 42.0);
        assert_eq!(store.state().current_time, 42.0);
        assert_eq!(
            player.calls(),
            vec![PlayerCall::Seek {
                seconds: 42.0,
                allow_seek_ahead: true
            }]
        );
    }

    #[test]
    fn test_load_records_resume_intent() {
        let mut store = PlayerStore::new(50.0);
        store.set_playing(true);
        store.record_intent(&PlayerCommand::Load {
            video_id: "b".into(),
            autoplay: false,
        });
        assert!(store.loading().was_playing_before_load);
        assert!(store.is_loading_new_video());
    }

    #[test]
    fn test_stale_notification_is_dropped_while_loading() {
        let mut store = PlayerStore::new(50.0);
        store.absorb_state_change(ExternalPlayerState::Playing, Some("a"));
        store.record_intent(&PlayerCommand::Load {
            video_id: "b".into(),
            autoplay: true,
        });

        let stale = store.absorb_state_change(ExternalPlayerState::Paused, Some("a"));
        assert_eq!(stale, Absorbed::default());
        assert!(store.is_loading_new_video());
        assert!(store.is_playing());

        let fresh = store.absorb_state_change(ExternalPlayerState::Playing, Some("b"));
        assert!(!store.is_loading_new_video());
        assert_eq!(store.video_id(), Some("b"));
        assert_eq!(
            fresh.events,
            vec![
                PlayerEvent::LoadConfirmed {
                    video_id: "b".into()
                },
                PlayerEvent::ConfirmedPlay
            ]
        );
    }

    #[test]
    fn test_superseded_load_is_not_confirmed_by_earlier_target() {
        let mut store = PlayerStore::new(50.0);
        store.absorb_state_change(ExternalPlayerState::Playing, Some("x"));
        store.record_intent(&PlayerCommand::Load {
            video_id: "a".into(),
            autoplay: true,
        });
        store.record_intent(&PlayerCommand::Load {
            video_id: "b".into(),
            autoplay: true,
        });

        let late = store.absorb_state_change(ExternalPlayerState::Playing, Some("a"));
        assert_eq!(late, Absorbed::default());
        assert!(store.is_loading_new_video());
        assert_eq!(store.video_id(), Some("x"));

        let confirmed = store.absorb_state_change(ExternalPlayerState::Playing, Some("b"));
        assert!(!store.is_loading_new_video());
        assert_eq!(store.video_id(), Some("b"));
        assert_eq!(
            confirmed.events[0],
            PlayerEvent::LoadConfirmed {
                video_id: "b".into()
            }
        );
    }

    #[test]
    fn test_failed_load_leaves_store_untouched() {
        let mut store = PlayerStore::new(50.0);
        let mut player = SimulatedPlayer::new();
        store.absorb_state_change(ExternalPlayerState::Playing, Some("x"));
        player.fail_on("load_by_id");
        let before = store.loading().clone();

        store.load_video(Some(&mut player), "b", true);
        assert!(!store.is_loading_new_video());
        assert_eq!(store.loading(), &before);

        let paused = store.absorb_state_change(ExternalPlayerState::Paused, Some("x"));
        assert_eq!(paused.events, vec![PlayerEvent::ConfirmedPause]);
        assert!(!store.is_playing());
    }

    #[test]
    fn test_failed_toggle_keeps_transport() {
        let mut store = PlayerStore::new(50.0);
        let mut player = SimulatedPlayer::new();
        player.fail_on("play");
        store.toggle_play(Some(&mut player));
        assert_eq!(store.pending_play_state(), None);
        assert!(!store.is_playing());
    }

    #[test]
    fn test_cued_item_resumes_when_playing_before_load() {
        let mut store = PlayerStore::new(50.0);
        store.absorb_state_change(ExternalPlayerState::Playing, Some("a"));
        store.record_intent(&PlayerCommand::Load {
            video_id: "b".into(),
            autoplay: false,
        });
        let absorbed = store.absorb_state_change(ExternalPlayerState::Cued, Some("b"));
        assert!(absorbed.resume_playback);
    }

    #[test]
    fn test_reload_of_same_item_confirms_on_identity() {
        let mut store = PlayerStore::new(50.0);
        store.absorb_state_change(ExternalPlayerState::Playing, Some("a"));
        store.record_intent(&PlayerCommand::Load {
            video_id: "a".into(),
            autoplay: true,
        });
        store.absorb_state_change(ExternalPlayerState::Buffering, Some("a"));
        assert!(!store.is_loading_new_video());
    }

    #[test]
    fn test_pending_survives_contradicting_echo() {
        let mut store = PlayerStore::new(50.0);
        store.absorb_state_change(ExternalPlayerState::Playing, Some("a"));
        store.record_intent(&PlayerCommand::Pause);

        let echo = store.absorb_state_change(ExternalPlayerState::Playing, Some("a"));
        assert!(echo.events.is_empty());
        assert_eq!(store.pending_play_state(), Some(false));
        assert!(!store.displayed_is_playing());

        let confirmed = store.absorb_state_change(ExternalPlayerState::Paused, Some("a"));
        assert_eq!(confirmed.events, vec![PlayerEvent::ConfirmedPause]);
        assert_eq!(store.pending_play_state(), None);
    }

    #[test]
    fn test_ended_clears_transport() {
        let mut store = PlayerStore::new(50.0);
        store.absorb_state_change(ExternalPlayerState::Playing, Some("a"));
        let absorbed = store.absorb_state_change(ExternalPlayerState::Ended, Some("a"));
        assert_eq!(absorbed.events, vec![PlayerEvent::Ended]);
        assert!(!store.is_playing());
    }

    #[test]
    fn test_timeline_sync_skipped_while_loading() {
        let mut store = PlayerStore::new(50.0);
        let mut player = SimulatedPlayer::new();
        player.load_by_id("a").unwrap();
        player.advance(12.0);
        store.sync_timeline(&player);
        assert_eq!(store.state().current_time, 12.0);
        assert_eq!(store.state().duration, 240.0);

        store.record_intent(&PlayerCommand::Load {
            video_id: "b".into(),
            autoplay: true,
        });
        player.advance(5.0);
        store.sync_timeline(&player);
        assert_eq!(store.state().current_time, 12.0);
    }

    #[test]
    fn test_rev_bumps_on_mutation() {
        let mut store = PlayerStore::new(50.0);
        let before = store.rev();
        store.set_volume(120.0);
        assert_eq!(store.state().volume, 100.0);
        assert!(store.rev() > before);
        assert_eq!(store.snapshot().rev, store.rev());
    }
}
