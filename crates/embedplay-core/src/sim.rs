//! In-process stand-in for the embedded player.
//!
//! Used by the headless daemon and by tests.  Mutating calls are recorded,
//! and state transitions are reported through an optional notification
//! channel the same way the real player's callbacks would be.  Quality
//! changes are applied lazily (on the next quality read) and clamped to the
//! available levels, which mirrors the eventual consistency of the real API.

use std::cell::RefCell;
use std::rc::Rc;

use embedplay_proto::protocol::{ExternalNotification, ExternalPlayerState, QualityLevel};
use tokio::sync::mpsc;
use tracing::debug;

use crate::external::{ExternalPlayer, PlayerError, PlayerResult};

const DEFAULT_DURATION_SECS: f64 = 240.0;

/// A mutating call observed by the simulated player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    Play,
    Pause,
    Seek { seconds: f64, allow_seek_ahead: bool },
    SetVolume(f64),
    Load(String),
    Cue(String),
    SetQuality(QualityLevel),
}

#[derive(Debug)]
struct SimState {
    state: ExternalPlayerState,
    video_id: Option<String>,
    current_time: f64,
    duration: f64,
    volume: f64,
    quality: QualityLevel,
    pending_quality: Option<QualityLevel>,
    available: Vec<QualityLevel>,
    supports_cue: bool,
    failing: Vec<&'static str>,
    calls: Vec<PlayerCall>,
}

/// Cloning yields another handle onto the same simulated player.
#[derive(Clone)]
pub struct SimulatedPlayer {
    inner: Rc<RefCell<SimState>>,
    notify_tx: Option<mpsc::UnboundedSender<ExternalNotification>>,
}

impl Default for SimulatedPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlayer {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimState {
                state: ExternalPlayerState::Unstarted,
                video_id: None,
                current_time: 0.0,
                duration: 0.0,
                volume: 100.0,
                quality: QualityLevel::Auto,
                pending_quality: None,
                available: QualityLevel::ORDERED.to_vec(),
                supports_cue: true,
                failing: Vec::new(),
                calls: Vec::new(),
            })),
            notify_tx: None,
        }
    }

    /// Report state transitions on `tx`.
    pub fn with_notifications(mut self, tx: mpsc::UnboundedSender<ExternalNotification>) -> Self {
        self.notify_tx = Some(tx);
        self
    }

    pub fn without_cue(self) -> Self {
        self.inner.borrow_mut().supports_cue = false;
        self
    }

    pub fn with_available_levels(self, levels: Vec<QualityLevel>) -> Self {
        self.set_available_levels(levels);
        self
    }

    /// Change the levels the player offers, as after a stream switch.
    pub fn set_available_levels(&self, levels: Vec<QualityLevel>) {
        self.inner.borrow_mut().available = levels;
    }

    pub fn with_quality(self, quality: QualityLevel) -> Self {
        self.inner.borrow_mut().quality = quality;
        self
    }

    /// Make every later call named `call` fail as if the external API threw.
    pub fn fail_on(&self, call: &'static str) {
        self.inner.borrow_mut().failing.push(call);
    }

    /// Undo [`Self::fail_on`] for `call`.
    pub fn recover(&self, call: &'static str) {
        self.inner.borrow_mut().failing.retain(|c| *c != call);
    }

    pub fn calls(&self) -> Vec<PlayerCall> {
        self.inner.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.borrow_mut().calls.clear();
    }

    pub fn quality_requests(&self) -> usize {
        self.inner
            .borrow()
            .calls
            .iter()
            .filter(|c| matches!(c, PlayerCall::SetQuality(_)))
            .count()
    }

    pub fn state(&self) -> ExternalPlayerState {
        self.inner.borrow().state
    }

    /// Advance the playhead, ending the item when it runs past the duration.
    pub fn advance(&self, seconds: f64) {
        let ended = {
            let mut s = self.inner.borrow_mut();
            if s.state != ExternalPlayerState::Playing {
                return;
            }
            s.current_time += seconds;
            if s.current_time >= s.duration {
                s.current_time = s.duration;
                s.state = ExternalPlayerState::Ended;
                true
            } else {
                false
            }
        };
        if ended {
            self.notify_state();
        }
    }

    fn check(&self, call: &'static str) -> PlayerResult<()> {
        if self.inner.borrow().failing.contains(&call) {
            return Err(PlayerError::api(call, "simulated failure"));
        }
        Ok(())
    }

    fn record(&self, call: PlayerCall) {
        self.inner.borrow_mut().calls.push(call);
    }

    fn transition(&self, state: ExternalPlayerState) {
        self.inner.borrow_mut().state = state;
        self.notify_state();
    }

    fn notify_state(&self) {
        let Some(tx) = &self.notify_tx else {
            return;
        };
        let (state, video_id) = {
            let s = self.inner.borrow();
            (s.state, s.video_id.clone())
        };
        debug!("sim: state → {:?} video={:?}", state, video_id);
        let _ = tx.send(ExternalNotification::StateChange { state, video_id });
    }

    fn load_item(&self, video_id: &str) {
        let mut s = self.inner.borrow_mut();
        s.video_id = Some(video_id.to_string());
        s.current_time = 0.0;
        s.duration = DEFAULT_DURATION_SECS;
    }

    /// Nearest available level at or below `wanted`, else the lowest available.
    fn clamp_quality(available: &[QualityLevel], wanted: QualityLevel) -> Option<QualityLevel> {
        if wanted == QualityLevel::Auto {
            return Some(QualityLevel::Auto);
        }
        let wanted_rank = wanted.rank()?;
        QualityLevel::ORDERED
            .iter()
            .skip(wanted_rank)
            .find(|q| available.contains(q))
            .or_else(|| available.last())
            .copied()
    }
}

impl ExternalPlayer for SimulatedPlayer {
    fn play(&mut self) -> PlayerResult<()> {
        self.check("play")?;
        self.record(PlayerCall::Play);
        if self.inner.borrow().video_id.is_some() {
            self.transition(ExternalPlayerState::Playing);
        }
        Ok(())
    }

    fn pause(&mut self) -> PlayerResult<()> {
        self.check("pause")?;
        self.record(PlayerCall::Pause);
        if self.inner.borrow().video_id.is_some() {
            self.transition(ExternalPlayerState::Paused);
        }
        Ok(())
    }

    fn seek(&mut self, seconds: f64, allow_seek_ahead: bool) -> PlayerResult<()> {
        self.check("seek")?;
        self.record(PlayerCall::Seek {
            seconds,
            allow_seek_ahead,
        });
        let mut s = self.inner.borrow_mut();
        let duration = s.duration.max(0.0);
        s.current_time = seconds.clamp(0.0, duration);
        Ok(())
    }

    fn set_volume(&mut self, volume: f64) -> PlayerResult<()> {
        self.check("set_volume")?;
        self.record(PlayerCall::SetVolume(volume));
        self.inner.borrow_mut().volume = volume.clamp(0.0, 100.0);
        Ok(())
    }

    fn volume(&self) -> PlayerResult<f64> {
        self.check("volume")?;
        Ok(self.inner.borrow().volume)
    }

    fn current_time(&self) -> PlayerResult<f64> {
        self.check("current_time")?;
        Ok(self.inner.borrow().current_time)
    }

    fn duration(&self) -> PlayerResult<f64> {
        self.check("duration")?;
        Ok(self.inner.borrow().duration)
    }

    fn player_state(&self) -> PlayerResult<ExternalPlayerState> {
        self.check("player_state")?;
        Ok(self.inner.borrow().state)
    }

    fn load_by_id(&mut self, video_id: &str) -> PlayerResult<()> {
        self.check("load_by_id")?;
        self.record(PlayerCall::Load(video_id.to_string()));
        self.load_item(video_id);
        self.transition(ExternalPlayerState::Buffering);
        self.transition(ExternalPlayerState::Playing);
        Ok(())
    }

    fn supports_cue(&self) -> bool {
        self.inner.borrow().supports_cue
    }

    fn cue_by_id(&mut self, video_id: &str) -> PlayerResult<()> {
        if !self.supports_cue() {
            return Err(PlayerError::Unsupported("cue_by_id"));
        }
        self.check("cue_by_id")?;
        self.record(PlayerCall::Cue(video_id.to_string()));
        self.load_item(video_id);
        self.transition(ExternalPlayerState::Cued);
        Ok(())
    }

    fn playback_quality(&self) -> PlayerResult<QualityLevel> {
        self.check("playback_quality")?;
        let mut s = self.inner.borrow_mut();
        if let Some(wanted) = s.pending_quality.take() {
            if let Some(applied) = Self::clamp_quality(&s.available, wanted) {
                s.quality = applied;
            }
        }
        Ok(s.quality)
    }

    fn set_playback_quality(&mut self, quality: QualityLevel) -> PlayerResult<()> {
        self.check("set_playback_quality")?;
        self.record(PlayerCall::SetQuality(quality));
        self.inner.borrow_mut().pending_quality = Some(quality);
        Ok(())
    }

    fn available_quality_levels(&self) -> PlayerResult<Vec<QualityLevel>> {
        self.check("available_quality_levels")?;
        Ok(self.inner.borrow().available.clone())
    }

    fn video_id(&self) -> Option<String> {
        self.inner.borrow().video_id.clone()
    }
}
