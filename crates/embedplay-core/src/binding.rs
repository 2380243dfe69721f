//! Binding between the player container element and whichever host is
//! currently showing it.
//!
//! The container is created once and moved between hosts, never recreated:
//! recreating it would tear down the external player and lose playback.
//! The binding also owns the external player handle itself.

use embedplay_proto::protocol::PresentationMode;
use tracing::{debug, info, warn};

use crate::dom::{DomError, HostDocument, HostStyle};
use crate::external::ExternalPlayer;

/// Result of [`ExternalPlayerBinding::move_to_host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The container was already a direct child of the host; styles refreshed.
    AlreadyHosted,
    Moved,
    /// The host lies inside the container; moving would create a cycle.
    Refused,
    /// The document rejected the operation.
    Failed,
}

pub struct ExternalPlayerBinding<D: HostDocument> {
    document: D,
    container_id: String,
    container: Option<D::Node>,
    host: Option<D::Node>,
    player: Option<Box<dyn ExternalPlayer>>,
}

impl<D: HostDocument> ExternalPlayerBinding<D> {
    pub fn new(document: D, container_id: impl Into<String>) -> Self {
        Self {
            document,
            container_id: container_id.into(),
            container: None,
            host: None,
            player: None,
        }
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn current_host(&self) -> Option<&D::Node> {
        self.host.as_ref()
    }

    /// Return the container, creating it on first use.
    ///
    /// Lookup order: the cached node if still attached, then the node with
    /// the container id.  When the external player has replaced the
    /// container with its own output element, that element's parent is used.
    pub fn ensure(&mut self) -> Result<D::Node, DomError> {
        if let Some(cached) = &self.container {
            if self.document.is_attached(cached) {
                return Ok(cached.clone());
            }
            debug!("binding: cached container detached, looking it up again");
        }

        let node = match self.document.find_by_id(&self.container_id) {
            Some(found) if self.document.is_player_output(&found) => {
                match self.document.parent(&found) {
                    Some(parent) => parent,
                    None => self.document.create_container(&self.container_id)?,
                }
            }
            Some(found) => found,
            None => {
                info!("binding: creating container #{}", self.container_id);
                self.document.create_container(&self.container_id)?
            }
        };
        self.container = Some(node.clone());
        Ok(node)
    }

    /// Re-parent the container under `host` and style it for `mode`.
    pub fn move_to_host(&mut self, host: &D::Node, mode: PresentationMode) -> MoveOutcome {
        let container = match self.ensure() {
            Ok(node) => node,
            Err(e) => {
                warn!("binding: no container available: {}", e);
                return MoveOutcome::Failed;
            }
        };

        let style = HostStyle::for_mode(mode);
        if self.document.parent(&container).as_ref() == Some(host) {
            self.style(&container, &style);
            self.host = Some(host.clone());
            return MoveOutcome::AlreadyHosted;
        }

        if self.document.contains(&container, host) {
            warn!(
                "binding: refusing to move container into its own descendant {:?}",
                host
            );
            return MoveOutcome::Refused;
        }

        if let Err(e) = self.document.append_child(host, &container) {
            warn!("binding: moving container to {:?} failed: {}", host, e);
            return MoveOutcome::Failed;
        }
        self.style(&container, &style);
        debug!("binding: container now hosted by {:?} ({:?})", host, mode);
        self.host = Some(host.clone());
        MoveOutcome::Moved
    }

    fn style(&mut self, container: &D::Node, style: &HostStyle) {
        if let Err(e) = self.document.apply_style(container, style) {
            warn!("binding: styling container failed: {}", e);
        }
    }

    // ── player handle ────────────────────────────────────────────────────────

    pub fn attach_player(&mut self, player: Box<dyn ExternalPlayer>) {
        if self.player.is_some() {
            debug!("binding: replacing attached player");
        }
        self.player = Some(player);
    }

    pub fn has_player(&self) -> bool {
        self.player.is_some()
    }

    pub fn player(&self) -> Option<&dyn ExternalPlayer> {
        self.player.as_deref()
    }

    pub fn player_mut(&mut self) -> Option<&mut dyn ExternalPlayer> {
        self.player.as_deref_mut().map(|p| p as &mut dyn ExternalPlayer)
    }

    /// Drop the player handle and forget the host.  The container element
    /// stays where it is.
    pub fn release(&mut self) -> Option<Box<dyn ExternalPlayer>> {
        self.host = None;
        self.player.take()
    }
}
