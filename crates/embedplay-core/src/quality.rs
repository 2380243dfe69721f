//! Quality negotiation per presentation mode.
//!
//! ```text
//!   Idle ──mode change──▶ Debouncing ──300 ms quiet──▶ Requested ──2 s──▶ Idle
//!    ▲                        │ (mode change resets the timer)     │
//!    └──── polling (1 s) ◀────┴──────────── guard blocks polling ──┘
//! ```
//!
//! `requested` is the optimistic value shown while a change is in flight;
//! `actual` is what polling last read from the player.  The negotiator never
//! reads the clock itself: every time-dependent call takes `now`, so the
//! event loop and tests share one notion of time.

use embedplay_proto::config::QualityConfig;
use embedplay_proto::protocol::{PresentationMode, QualityLevel};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::external::ExternalPlayer;

#[derive(Debug)]
pub struct QualityNegotiator {
    config: QualityConfig,
    mode: PresentationMode,
    /// Mode whose target was last settled (requested or already matching).
    negotiated_mode: Option<PresentationMode>,
    debounce_deadline: Option<Instant>,
    guard_until: Option<Instant>,
    requested: Option<QualityLevel>,
    actual: Option<QualityLevel>,
    /// Levels offered to callers, see [`available_levels`].
    available: Vec<QualityLevel>,
}

impl QualityNegotiator {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            mode: PresentationMode::default(),
            negotiated_mode: None,
            debounce_deadline: None,
            guard_until: None,
            requested: None,
            actual: None,
            available: Vec::new(),
        }
    }

    pub fn mode(&self) -> PresentationMode {
        self.mode
    }

    pub fn requested(&self) -> Option<QualityLevel> {
        self.requested
    }

    pub fn actual(&self) -> Option<QualityLevel> {
        self.actual
    }

    pub fn available(&self) -> &[QualityLevel] {
        &self.available
    }

    pub fn in_flight(&self) -> bool {
        self.guard_until.is_some()
    }

    /// Requested value while a change is in flight, polled value otherwise.
    pub fn displayed(&self) -> Option<QualityLevel> {
        if self.in_flight() {
            self.requested.or(self.actual)
        } else {
            self.actual.or(self.requested)
        }
    }

    pub fn target_for(&self, mode: PresentationMode) -> QualityLevel {
        self.config.target_for(mode)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        self.config.poll_interval()
    }

    /// When the event loop must call [`Self::fire_due`] next.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce_deadline
    }

    /// Record a presentation-mode change and (re)start the debounce window.
    pub fn on_mode_change(&mut self, mode: PresentationMode, now: Instant) {
        if self.debounce_deadline.is_some() {
            debug!("quality: {:?} → {:?}, debounce restarted", self.mode, mode);
        }
        self.mode = mode;
        self.debounce_deadline = Some(now + self.config.debounce());
    }

    /// Issue the debounced request once the window has passed.  Returns the
    /// quality that was requested, if any.
    pub fn fire_due(
        &mut self,
        player: Option<&mut dyn ExternalPlayer>,
        now: Instant,
    ) -> Option<QualityLevel> {
        match self.debounce_deadline {
            Some(deadline) if deadline <= now => {}
            _ => return None,
        }
        self.debounce_deadline = None;

        if self.negotiated_mode == Some(self.mode) {
            debug!("quality: mode settled back on {:?}, nothing to do", self.mode);
            return None;
        }
        let player = player?;
        let target = self.target_for(self.mode);
        if self.actual == Some(target) {
            debug!("quality: already at {} for {:?}", target, self.mode);
            self.negotiated_mode = Some(self.mode);
            return None;
        }
        // A failed request leaves the mode unsettled so the next change retries.
        let requested = self.request(player, target, now)?;
        self.negotiated_mode = Some(self.mode);
        Some(requested)
    }

    /// Ask the player for `quality` and hold the optimistic value for the
    /// in-flight window.  The player clamps unavailable levels itself.
    pub fn request(
        &mut self,
        player: &mut dyn ExternalPlayer,
        quality: QualityLevel,
        now: Instant,
    ) -> Option<QualityLevel> {
        if let Err(e) = player.set_playback_quality(quality) {
            warn!("quality: set_playback_quality({}) failed: {}", quality, e);
            return None;
        }
        info!("quality: requested {} for {:?}", quality, self.mode);
        self.requested = Some(quality);
        self.guard_until = Some(now + self.config.in_flight_guard());
        Some(quality)
    }

    /// Periodic reconciliation.  Skipped during the in-flight window and while
    /// `suspended` (a new item is loading).  Returns the new actual quality
    /// when it changed.
    pub fn poll(
        &mut self,
        player: &dyn ExternalPlayer,
        now: Instant,
        suspended: bool,
    ) -> Option<QualityLevel> {
        if let Some(until) = self.guard_until {
            if now < until {
                return None;
            }
            debug!("quality: in-flight guard expired");
            self.guard_until = None;
        }
        if suspended {
            return None;
        }
        match player.playback_quality() {
            Ok(quality) if self.actual != Some(quality) => {
                debug!("quality: actual {:?} → {}", self.actual, quality);
                self.actual = Some(quality);
                Some(quality)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("quality: reading playback quality failed: {}", e);
                None
            }
        }
    }

    /// Re-read the levels the player offers.  Returns whether they changed.
    pub fn refresh_available(&mut self, player: &dyn ExternalPlayer) -> bool {
        let levels = available_levels(player);
        if levels == self.available {
            return false;
        }
        debug!("quality: available {:?}", levels);
        self.available = levels;
        true
    }

    /// Quality-change callback from the player.  Ends the in-flight window
    /// early when it reports the requested level.
    pub fn on_quality_notification(&mut self, quality: QualityLevel) -> bool {
        if self.in_flight() && self.requested == Some(quality) {
            self.guard_until = None;
        }
        if self.actual == Some(quality) {
            return false;
        }
        self.actual = Some(quality);
        true
    }

    /// Forget all quality knowledge; used when the player is re-hosted.
    pub fn reset(&mut self) {
        self.negotiated_mode = None;
        self.guard_until = None;
        self.requested = None;
        self.actual = None;
        self.available.clear();
    }

    /// Cancel every timer (teardown).
    pub fn cancel(&mut self) {
        self.debounce_deadline = None;
        self.guard_until = None;
    }
}

/// Levels to offer callers: the ordered tiers the player reports, highest
/// first, with `auto` last when reported.
pub fn available_levels(player: &dyn ExternalPlayer) -> Vec<QualityLevel> {
    let reported = match player.available_quality_levels() {
        Ok(levels) => levels,
        Err(e) => {
            warn!("quality: reading available levels failed: {}", e);
            return Vec::new();
        }
    };
    QualityLevel::ORDERED
        .iter()
        .chain(std::iter::once(&QualityLevel::Auto))
        .filter(|q| reported.contains(q))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{PlayerCall, SimulatedPlayer};
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn negotiator() -> QualityNegotiator {
        QualityNegotiator::new(QualityConfig::default())
    }

    /// Negotiator that has already settled on `Hidden`.
    fn settled(player: &mut SimulatedPlayer, t0: Instant) -> QualityNegotiator {
        let mut q = negotiator();
        q.on_mode_change(PresentationMode::Hidden, t0);
        q.fire_due(Some(&mut *player), t0 + ms(300));
        player.clear_calls();
        q
    }

    #[test]
    fn test_flip_back_within_window_requests_nothing() {
        let t0 = Instant::now();
        let mut player = SimulatedPlayer::new();
        let mut q = settled(&mut player, t0);

        let t1 = t0 + ms(5000);
        q.on_mode_change(PresentationMode::Floating, t1);
        assert_eq!(q.fire_due(Some(&mut player), t1 + ms(100)), None);
        q.on_mode_change(PresentationMode::Hidden, t1 + ms(150));
        assert_eq!(q.fire_due(Some(&mut player), t1 + ms(300)), None);
        assert_eq!(q.fire_due(Some(&mut player), t1 + ms(450)), None);
        assert_eq!(q.fire_due(Some(&mut player), t1 + ms(2000)), None);
        assert_eq!(player.quality_requests(), 0);
    }

    #[test]
    fn test_single_change_requests_once() {
        let t0 = Instant::now();
        let mut player = SimulatedPlayer::new();
        let mut q = settled(&mut player, t0);

        let t1 = t0 + ms(5000);
        q.on_mode_change(PresentationMode::Fullscreen, t1);
        assert_eq!(q.fire_due(Some(&mut player), t1 + ms(299)), None);
        assert_eq!(
            q.fire_due(Some(&mut player), t1 + ms(300)),
            Some(QualityLevel::Hd1080)
        );
        assert_eq!(q.fire_due(Some(&mut player), t1 + ms(900)), None);
        assert_eq!(player.calls(), vec![PlayerCall::SetQuality(QualityLevel::Hd1080)]);
        assert_eq!(q.requested(), Some(QualityLevel::Hd1080));
        assert_eq!(q.displayed(), Some(QualityLevel::Hd1080));
    }

    #[test]
    fn test_guard_blocks_polling_then_converges() {
        let t0 = Instant::now();
        let mut player = SimulatedPlayer::new()
            .with_available_levels(vec![QualityLevel::Hd720, QualityLevel::Medium, QualityLevel::Tiny])
            .with_quality(QualityLevel::Medium);
        let mut q = negotiator();
        assert_eq!(q.poll(&player, t0, false), Some(QualityLevel::Medium));

        q.on_mode_change(PresentationMode::Fullscreen, t0);
        q.fire_due(Some(&mut player), t0 + ms(300));
        assert!(q.in_flight());

        // Inside the window the stale reading must not replace the optimistic one.
        assert_eq!(q.poll(&player, t0 + ms(1300), false), None);
        assert_eq!(q.displayed(), Some(QualityLevel::Hd1080));

        // After the window, polling reads the clamped level the player applied.
        assert_eq!(q.poll(&player, t0 + ms(2300), false), Some(QualityLevel::Hd720));
        assert!(!q.in_flight());
        assert_eq!(q.displayed(), Some(QualityLevel::Hd720));
    }

    #[test]
    fn test_matching_actual_skips_request() {
        let t0 = Instant::now();
        let mut player = SimulatedPlayer::new().with_quality(QualityLevel::Medium);
        let mut q = negotiator();
        q.poll(&player, t0, false);
        q.on_mode_change(PresentationMode::Floating, t0);
        assert_eq!(q.fire_due(Some(&mut player), t0 + ms(300)), None);
        assert_eq!(player.quality_requests(), 0);
    }

    #[test]
    fn test_polling_suspended_while_loading() {
        let player = SimulatedPlayer::new().with_quality(QualityLevel::Small);
        let mut q = negotiator();
        assert_eq!(q.poll(&player, Instant::now(), true), None);
        assert_eq!(q.actual(), None);
        assert_eq!(q.poll(&player, Instant::now(), false), Some(QualityLevel::Small));
    }

    #[test]
    fn test_failed_request_leaves_state_untouched() {
        let t0 = Instant::now();
        let mut player = SimulatedPlayer::new();
        player.fail_on("set_playback_quality");
        let mut q = negotiator();
        q.on_mode_change(PresentationMode::Fullscreen, t0);
        assert_eq!(q.fire_due(Some(&mut player), t0 + ms(300)), None);
        assert_eq!(q.requested(), None);
        assert!(!q.in_flight());
    }

    #[test]
    fn test_failed_request_is_retried_on_next_change() {
        let t0 = Instant::now();
        let mut player = SimulatedPlayer::new();
        let mut q = settled(&mut player, t0);

        player.fail_on("set_playback_quality");
        let t1 = t0 + ms(5000);
        q.on_mode_change(PresentationMode::Fullscreen, t1);
        assert_eq!(q.fire_due(Some(&mut player), t1 + ms(300)), None);

        player.recover("set_playback_quality");
        let t2 = t1 + ms(5000);
        q.on_mode_change(PresentationMode::Fullscreen, t2);
        assert_eq!(
            q.fire_due(Some(&mut player), t2 + ms(300)),
            Some(QualityLevel::Hd1080)
        );
        assert_eq!(player.calls(), vec![PlayerCall::SetQuality(QualityLevel::Hd1080)]);
    }

    #[test]
    fn test_refresh_available_reports_changes() {
        let player = SimulatedPlayer::new()
            .with_available_levels(vec![QualityLevel::Medium, QualityLevel::Auto]);
        let mut q = negotiator();
        assert!(q.refresh_available(&player));
        assert!(!q.refresh_available(&player));
        assert_eq!(q.available(), &[QualityLevel::Medium, QualityLevel::Auto]);
        q.reset();
        assert!(q.available().is_empty());
    }

    #[test]
    fn test_notification_confirms_early() {
        let t0 = Instant::now();
        let mut player = SimulatedPlayer::new();
        let mut q = negotiator();
        q.request(&mut player, QualityLevel::Large, t0);
        assert!(q.in_flight());
        assert!(q.on_quality_notification(QualityLevel::Large));
        assert!(!q.in_flight());
        assert_eq!(q.displayed(), Some(QualityLevel::Large));
    }

    #[test]
    fn test_reset_and_cancel() {
        let t0 = Instant::now();
        let mut player = SimulatedPlayer::new();
        let mut q = negotiator();
        q.request(&mut player, QualityLevel::Large, t0);
        q.on_mode_change(PresentationMode::Floating, t0);
        q.cancel();
        assert_eq!(q.next_deadline(), None);
        assert!(!q.in_flight());
        q.reset();
        assert_eq!(q.requested(), None);
        assert_eq!(q.displayed(), None);
    }

    #[test]
    fn test_available_levels_intersects_in_order() {
        let player = SimulatedPlayer::new().with_available_levels(vec![
            QualityLevel::Auto,
            QualityLevel::Tiny,
            QualityLevel::Hd1080,
            QualityLevel::Medium,
        ]);
        assert_eq!(
            available_levels(&player),
            vec![
                QualityLevel::Hd1080,
                QualityLevel::Medium,
                QualityLevel::Tiny,
                QualityLevel::Auto
            ]
        );
    }
}
