//! Orchestration core for an embedded third-party media player.
//!
//! The external player is slow, fallible and reports back asynchronously.
//! This crate keeps a consistent, optimistic view of it: commands go out
//! through the [`dispatcher`], confirmations come back into the [`store`],
//! and the [`orchestrator`] ties both to the queue, the quality negotiator
//! and the container binding.

pub mod binding;
pub mod dispatcher;
pub mod dom;
pub mod external;
pub mod orchestrator;
pub mod quality;
pub mod queue;
pub mod sim;
pub mod store;

pub use binding::{ExternalPlayerBinding, MoveOutcome};
pub use dom::{DomError, HostDocument, HostStyle, NodeId, NodeTree};
pub use external::{ExternalPlayer, PlayerError, PlayerResult};
pub use orchestrator::{Orchestrator, OrchestratorEvent};
pub use quality::QualityNegotiator;
pub use queue::{Playlist, QueueAdapter, Track, TrackChange};
pub use sim::{PlayerCall, SimulatedPlayer};
pub use store::PlayerStore;
