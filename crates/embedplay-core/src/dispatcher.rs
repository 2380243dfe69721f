//! Command dispatcher: translates a batch of [`PlayerCommand`]s into calls on
//! the external player and the queue.
//!
//! The dispatcher is stateless.  Optimistic bookkeeping lives in the store;
//! everything here is a direct translation plus the repeat-one interception.

use embedplay_proto::protocol::{PlayerCommand, PlayerEvent, RepeatMode};
use tracing::{debug, warn};

use crate::external::{ExternalPlayer, PlayerResult};
use crate::queue::QueueAdapter;

/// Everything a dispatch pass may touch.
pub struct CommandContext<'a> {
    /// Live player handle; `None` while the external API is not ready.
    pub player: Option<&'a mut dyn ExternalPlayer>,
    pub emit: &'a mut dyn FnMut(PlayerEvent),
    pub queue: Option<&'a mut dyn QueueAdapter>,
}

/// Perceptual volume curve: `(e^(v/100) − 1) / (e − 1) × 100`.
///
/// Input is a linear 0–100 slider value; output is on the player's 0–100
/// scale.  Quiet settings get proportionally less output.
pub fn perceptual_volume(volume: f64) -> f64 {
    let v = volume.clamp(0.0, 100.0) / 100.0;
    v.exp_m1() / 1.0f64.exp_m1() * 100.0
}

/// Load `video_id`, starting playback only when `autoplay` is set.
///
/// Without autoplay a cue is preferred; players lacking a cue primitive get
/// a load followed by an immediate pause.
pub(crate) fn issue_load(
    player: &mut dyn ExternalPlayer,
    video_id: &str,
    autoplay: bool,
) -> PlayerResult<()> {
    if autoplay {
        return player.load_by_id(video_id);
    }
    if player.supports_cue() {
        return player.cue_by_id(video_id);
    }
    player.load_by_id(video_id)?;
    player.pause()
}

/// Log a failed external call.  Returns whether the call went through.
pub(crate) fn report(call: &str, result: PlayerResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("dispatcher: {} failed: {}", call, e);
            false
        }
    }
}

/// Run `commands` in order and return the ones the player accepted.
///
/// Missing player or queue turns the affected commands into no-ops; external
/// errors are logged and the batch continues.  Queue commands never appear
/// in the result since they make no player call.
pub fn run<'c>(commands: &'c [PlayerCommand], ctx: CommandContext<'_>) -> Vec<&'c PlayerCommand> {
    let mut accepted = Vec::new();
    if commands.is_empty() {
        return accepted;
    }
    let CommandContext {
        mut player,
        emit,
        mut queue,
    } = ctx;

    for command in commands {
        debug!("dispatcher: {:?}", command);
        let ok = match command {
            PlayerCommand::Play => player
                .as_mut()
                .is_some_and(|p| report("play", p.play())),
            PlayerCommand::Pause => player
                .as_mut()
                .is_some_and(|p| report("pause", p.pause())),
            PlayerCommand::Seek { seconds } => player
                .as_mut()
                .is_some_and(|p| report("seek", p.seek(*seconds, true))),
            PlayerCommand::Load { video_id, autoplay } => player
                .as_mut()
                .is_some_and(|p| report("load", issue_load(&mut **p, video_id, *autoplay))),
            PlayerCommand::SetVolume { volume } => player
                .as_mut()
                .is_some_and(|p| report("set_volume", p.set_volume(perceptual_volume(*volume)))),
            PlayerCommand::RequestNextTrack => match queue.as_mut() {
                Some(q) if q.repeat_mode() == Some(RepeatMode::One) => {
                    debug!("dispatcher: repeat-one, restarting locally");
                    emit(PlayerEvent::SeekRequested { seconds: 0.0 });
                    emit(PlayerEvent::PlayRequested);
                    false
                }
                Some(q) => {
                    if let Some(change) = q.next() {
                        emit(PlayerEvent::TrackChanged {
                            index: change.index,
                            video_id: change.video_id,
                        });
                    }
                    false
                }
                None => {
                    debug!("dispatcher: next requested without a queue");
                    false
                }
            },
            PlayerCommand::RequestPreviousTrack => match queue.as_mut() {
                Some(q) => {
                    if let Some(change) = q.previous() {
                        emit(PlayerEvent::TrackChanged {
                            index: change.index,
                            video_id: change.video_id,
                        });
                    }
                    false
                }
                None => {
                    debug!("dispatcher: previous requested without a queue");
                    false
                }
            },
        };
        if ok {
            accepted.push(command);
        }
    }
    accepted
}
