//! Capability contract of the embedded third-party player.
//!
//! The player object is owned by someone else: every call may fail, most
//! calls are only confirmed later through an [`ExternalNotification`], and
//! some implementations lack optional primitives such as cue-only loading.
//!
//! [`ExternalNotification`]: embedplay_proto::protocol::ExternalNotification

use embedplay_proto::protocol::{ExternalPlayerState, QualityLevel};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlayerError {
    /// The implementation does not expose this primitive.
    #[error("external player does not support {0}")]
    Unsupported(&'static str),
    /// The external API threw.
    #[error("external player call {call} failed: {message}")]
    Api { call: &'static str, message: String },
}

impl PlayerError {
    pub fn api(call: &'static str, message: impl Into<String>) -> Self {
        PlayerError::Api {
            call,
            message: message.into(),
        }
    }
}

pub type PlayerResult<T> = Result<T, PlayerError>;

pub trait ExternalPlayer {
    fn play(&mut self) -> PlayerResult<()>;
    fn pause(&mut self) -> PlayerResult<()>;
    fn seek(&mut self, seconds: f64, allow_seek_ahead: bool) -> PlayerResult<()>;
    /// `volume` is already on the player's own 0–100 scale.
    fn set_volume(&mut self, volume: f64) -> PlayerResult<()>;
    fn volume(&self) -> PlayerResult<f64>;
    fn current_time(&self) -> PlayerResult<f64>;
    fn duration(&self) -> PlayerResult<f64>;
    fn player_state(&self) -> PlayerResult<ExternalPlayerState>;
    /// Load and start playing.
    fn load_by_id(&mut self, video_id: &str) -> PlayerResult<()>;

    /// Whether [`ExternalPlayer::cue_by_id`] is available.
    fn supports_cue(&self) -> bool {
        false
    }

    /// Load without starting playback.
    fn cue_by_id(&mut self, _video_id: &str) -> PlayerResult<()> {
        Err(PlayerError::Unsupported("cue_by_id"))
    }

    fn playback_quality(&self) -> PlayerResult<QualityLevel>;
    fn set_playback_quality(&mut self, quality: QualityLevel) -> PlayerResult<()>;
    fn available_quality_levels(&self) -> PlayerResult<Vec<QualityLevel>>;

    /// Identity of the item currently loaded, if any.
    fn video_id(&self) -> Option<String>;
}
