//! Queue adapter and playlist traversal.
//!
//! Forward traversal may wrap (repeat-playlist continues the mix), backward
//! traversal always clamps at the first track.

use embedplay_proto::protocol::RepeatMode;
use tracing::debug;

/// A track position change produced by traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackChange {
    pub index: usize,
    pub video_id: String,
}

/// Capabilities the command dispatcher needs from a queue.
pub trait QueueAdapter {
    /// Advance the cursor.  `None` when it did not move.
    fn next(&mut self) -> Option<TrackChange>;
    /// Step the cursor back.  `None` when it did not move.
    fn previous(&mut self) -> Option<TrackChange>;
    fn repeat_mode(&self) -> Option<RepeatMode> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub video_id: String,
}

impl Track {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    tracks: Vec<Track>,
    current_index: usize,
    repeat: RepeatMode,
}

impl Playlist {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            current_index: 0,
            repeat: RepeatMode::Off,
        }
    }

    pub fn from_video_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ids.into_iter().map(Track::new).collect())
    }

    pub fn with_repeat(mut self, repeat: RepeatMode) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Cursor position, `None` for an empty playlist.
    pub fn current_index(&self) -> Option<usize> {
        if self.tracks.is_empty() {
            None
        } else {
            Some(self.current_index)
        }
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.current_index)
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
    }

    /// off → playlist → one → off
    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat = self.repeat.cycled();
        debug!("queue: repeat → {:?}", self.repeat);
        self.repeat
    }

    /// Jump to `index`.  Out-of-range and same-index selections do nothing.
    pub fn select(&mut self, index: usize) -> Option<TrackChange> {
        if index >= self.tracks.len() || index == self.current_index {
            return None;
        }
        self.move_to(index)
    }

    fn move_to(&mut self, index: usize) -> Option<TrackChange> {
        self.current_index = index;
        let track = self.tracks.get(index)?;
        debug!("queue: cursor → {} ({})", index, track.video_id);
        Some(TrackChange {
            index,
            video_id: track.video_id.clone(),
        })
    }
}

impl QueueAdapter for Playlist {
    fn next(&mut self) -> Option<TrackChange> {
        if self.tracks.is_empty() {
            return None;
        }
        let last = self.tracks.len() - 1;
        if self.current_index < last {
            return self.move_to(self.current_index + 1);
        }
        match self.repeat {
            RepeatMode::Playlist => self.move_to(0),
            // Repeat-one is intercepted by the dispatcher; a direct call
            // stops at the end like `Off`.
            RepeatMode::Off | RepeatMode::One => None,
        }
    }

    fn previous(&mut self) -> Option<TrackChange> {
        if self.current_index == 0 || self.tracks.is_empty() {
            return None;
        }
        self.move_to(self.current_index - 1)
    }

    fn repeat_mode(&self) -> Option<RepeatMode> {
        Some(self.repeat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(repeat: RepeatMode) -> Playlist {
        Playlist::from_video_ids(["a", "b", "c"]).with_repeat(repeat)
    }

    #[test]
    fn test_next_wraps_under_repeat_playlist() {
        let mut p = playlist(RepeatMode::Playlist);
        p.select(2);
        let change = p.next().unwrap();
        assert_eq!(change.index, 0);
        assert_eq!(change.video_id, "a");
        assert_eq!(p.current_index(), Some(0));
    }

    #[test]
    fn test_next_stops_at_end_without_repeat() {
        let mut p = playlist(RepeatMode::Off);
        p.select(2);
        assert_eq!(p.next(), None);
        assert_eq!(p.current_index(), Some(2));
    }

    #[test]
    fn test_next_under_repeat_one_does_not_wrap() {
        let mut p = playlist(RepeatMode::One);
        p.select(2);
        assert_eq!(p.next(), None);
        assert_eq!(p.current_index(), Some(2));
    }

    #[test]
    fn test_previous_clamps_for_every_repeat_mode() {
        for repeat in [RepeatMode::Off, RepeatMode::One, RepeatMode::Playlist] {
            let mut p = playlist(repeat);
            assert_eq!(p.previous(), None);
            assert_eq!(p.current_index(), Some(0));
        }
    }

    #[test]
    fn test_previous_steps_back() {
        let mut p = playlist(RepeatMode::Off);
        p.select(2);
        assert_eq!(p.previous().map(|c| c.index), Some(1));
    }

    #[test]
    fn test_empty_playlist_is_inert() {
        let mut p = Playlist::default().with_repeat(RepeatMode::Playlist);
        assert_eq!(p.next(), None);
        assert_eq!(p.previous(), None);
        assert_eq!(p.select(0), None);
        assert_eq!(p.current_index(), None);
    }

    #[test]
    fn test_tracks_are_identified_by_video_id() {
        let playlist = Playlist::from_video_ids(["a", "b"]);
        assert_eq!(
            playlist.current(),
            Some(&Track {
                video_id: "a".into()
            })
        );
    }

    #[test]
    fn test_select_ignores_out_of_range() {
        let mut p = playlist(RepeatMode::Off);
        assert_eq!(p.select(7), None);
        assert_eq!(p.select(0), None);
        assert_eq!(p.select(1).map(|c| c.video_id), Some("b".to_string()));
    }
}
