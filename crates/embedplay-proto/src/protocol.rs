use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest payload a peer may announce in a frame header.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Semantic intents accepted by the command dispatcher.  A batch is processed
/// in array order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum PlayerCommand {
    Play,
    Pause,
    Seek { seconds: f64 },
    Load { video_id: String, autoplay: bool },
    /// Linear 0–100 slider value; the dispatcher applies the perceptual curve.
    SetVolume { volume: f64 },
    RequestNextTrack,
    RequestPreviousTrack,
}

/// Semantic notifications published to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum PlayerEvent {
    /// Local restart request (repeat-one interception).
    SeekRequested { seconds: f64 },
    PlayRequested,
    /// The queue cursor moved; the new current track should be loaded.
    TrackChanged { index: usize, video_id: String },
    ConfirmedPlay,
    ConfirmedPause,
    SeekCompleted { seconds: f64 },
    LoadConfirmed { video_id: String },
    Ended,
    QualityRequested { quality: QualityLevel },
    QualityConfirmed { quality: QualityLevel },
    PresentationChanged { mode: PresentationMode },
    StateUpdated,
}

/// Visual hosting context of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationMode {
    /// Audio only; the player element is parked off-screen.
    #[default]
    Hidden,
    Floating,
    Fullscreen,
}

impl PresentationMode {
    pub fn shows_video(self) -> bool {
        !matches!(self, PresentationMode::Hidden)
    }
}

/// Playback quality tiers, ordered from highest to lowest, plus `Auto`.
///
/// Wire names match the external player's own identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Hd2160,
    Hd1440,
    Hd1080,
    Hd720,
    Large,
    Medium,
    Small,
    Tiny,
    Auto,
}

impl QualityLevel {
    /// Concrete tiers, highest first.  `Auto` is not part of the ordering.
    pub const ORDERED: [QualityLevel; 8] = [
        QualityLevel::Hd2160,
        QualityLevel::Hd1440,
        QualityLevel::Hd1080,
        QualityLevel::Hd720,
        QualityLevel::Large,
        QualityLevel::Medium,
        QualityLevel::Small,
        QualityLevel::Tiny,
    ];

    /// Position in [`Self::ORDERED`]; `None` for `Auto`.
    pub fn rank(self) -> Option<usize> {
        Self::ORDERED.iter().position(|q| *q == self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityLevel::Hd2160 => "hd2160",
            QualityLevel::Hd1440 => "hd1440",
            QualityLevel::Hd1080 => "hd1080",
            QualityLevel::Hd720 => "hd720",
            QualityLevel::Large => "large",
            QualityLevel::Medium => "medium",
            QualityLevel::Small => "small",
            QualityLevel::Tiny => "tiny",
            QualityLevel::Auto => "auto",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDERED
            .iter()
            .copied()
            .chain(std::iter::once(QualityLevel::Auto))
            .find(|q| q.as_str() == s)
            .ok_or_else(|| format!("unknown quality level '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    Playlist,
}

impl RepeatMode {
    /// Cycle order used by the repeat toggle: off → playlist → one → off.
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::Playlist,
            RepeatMode::Playlist => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

/// State codes reported by the external player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalPlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl ExternalPlayerState {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            -1 => Some(ExternalPlayerState::Unstarted),
            0 => Some(ExternalPlayerState::Ended),
            1 => Some(ExternalPlayerState::Playing),
            2 => Some(ExternalPlayerState::Paused),
            3 => Some(ExternalPlayerState::Buffering),
            5 => Some(ExternalPlayerState::Cued),
            _ => None,
        }
    }

    pub fn to_i32(self) -> i32 {
        match self {
            ExternalPlayerState::Unstarted => -1,
            ExternalPlayerState::Ended => 0,
            ExternalPlayerState::Playing => 1,
            ExternalPlayerState::Paused => 2,
            ExternalPlayerState::Buffering => 3,
            ExternalPlayerState::Cued => 5,
        }
    }
}

/// A callback delivered by the external player, already decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExternalNotification {
    StateChange {
        state: ExternalPlayerState,
        #[serde(default)]
        video_id: Option<String>,
    },
    QualityChange {
        quality: QualityLevel,
    },
    /// The external API finished initialising.
    Ready,
}

/// Read model of the orchestration core.  `rev` increases on every store
/// mutation so clients can detect missed updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub is_playing: bool,
    /// Transport state to render: the pending value when one is in flight.
    pub displayed_is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub api_ready: bool,
    pub is_loading_new_video: bool,
    pub was_playing_before_load: bool,
    pub pending_play_state: Option<bool>,
    pub video_id: Option<String>,
    pub requested_quality: Option<QualityLevel>,
    pub actual_quality: Option<QualityLevel>,
    pub displayed_quality: Option<QualityLevel>,
    /// Levels the player currently offers, highest first, `auto` last.
    #[serde(default)]
    pub available_qualities: Vec<QualityLevel>,
    #[serde(default)]
    pub presentation: PresentationMode,
    pub queue_index: Option<usize>,
    pub queue_len: usize,
    #[serde(default)]
    pub repeat_mode: RepeatMode,
}

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "req")]
pub enum Request {
    Dispatch { commands: Vec<PlayerCommand> },
    TogglePlay,
    Present { mode: PresentationMode },
    SelectTrack { index: usize },
    CycleRepeat,
    SetQuality { quality: QualityLevel },
    GetState,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        snapshot: PlayerSnapshot,
    },
    State {
        snapshot: PlayerSnapshot,
    },
    Event {
        event: PlayerEvent,
    },
    Log {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Payload length announced by the frame header at the start of `data`.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(header) as usize)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        let Some(len) = Self::frame_len(data) else {
            anyhow::bail!("Insufficient data for length header");
        };
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
