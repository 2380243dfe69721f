use crate::Hosts;
use embedplay_core::{NodeId, OrchestratorEvent};
use embedplay_proto::protocol::{
    Broadcast, Message, PlayerEvent, PlayerSnapshot, Request, MAX_FRAME_LEN, PROTOCOL_VERSION,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

pub type CoreEvent = OrchestratorEvent<NodeId>;

/// Channels shared by every client connection.
pub struct ServerChannels {
    pub event_tx: mpsc::Sender<CoreEvent>,
    pub state_rx: watch::Receiver<PlayerSnapshot>,
    pub player_events: broadcast::Receiver<PlayerEvent>,
    pub log_tx: broadcast::Sender<String>,
    pub hosts: Hosts,
}

struct ClientChannels {
    event_tx: mpsc::Sender<CoreEvent>,
    state_rx: watch::Receiver<PlayerSnapshot>,
    player_events: broadcast::Receiver<PlayerEvent>,
    logs: broadcast::Receiver<String>,
    hosts: Hosts,
}

impl ServerChannels {
    fn for_client(&self) -> ClientChannels {
        ClientChannels {
            event_tx: self.event_tx.clone(),
            state_rx: self.state_rx.clone(),
            player_events: self.player_events.resubscribe(),
            logs: self.log_tx.subscribe(),
            hosts: self.hosts,
        }
    }
}

pub fn start_server(
    bind_address: String,
    port: u16,
    channels: ServerChannels,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let client = channels.for_client();
                    tokio::spawn(async move {
                        handle_client(stream, id, client).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

/// Map a wire request onto an orchestrator input.  `GetState` is answered by
/// the connection itself.
fn to_core_event(request: Request, hosts: &Hosts) -> Option<CoreEvent> {
    let event = match request {
        Request::Dispatch { commands } => OrchestratorEvent::Dispatch(commands),
        Request::TogglePlay => OrchestratorEvent::TogglePlay,
        Request::Present { mode } => OrchestratorEvent::Present {
            host: hosts.for_mode(mode),
            mode,
        },
        Request::SelectTrack { index } => OrchestratorEvent::SelectTrack(index),
        Request::CycleRepeat => OrchestratorEvent::CycleRepeat,
        Request::SetQuality { quality } => OrchestratorEvent::SetQuality(quality),
        Request::GetState => return None,
    };
    Some(event)
}

async fn handle_client(stream: TcpStream, client_id: usize, mut client: ClientChannels) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current snapshot on connect
    if let Ok(encoded) = encode_hello(&client.state_rx) {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        let requests = match take_requests(&mut read_buf, client_id) {
                            Ok(requests) => requests,
                            Err(e) => {
                                warn!("Client {}: {}, disconnecting", client_id, e);
                                break;
                            }
                        };
                        for request in requests {
                            info!("Client {} sent request: {:?}", client_id, request);
                            match to_core_event(request, &client.hosts) {
                                Some(event) => {
                                    if client.event_tx.send(event).await.is_err() {
                                        warn!("Orchestrator event channel closed");
                                        return;
                                    }
                                }
                                None => {
                                    if let Ok(encoded) = encode_state(&client.state_rx) {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = client.player_events.recv() => {
                let encoded = match msg {
                    Ok(PlayerEvent::StateUpdated) => encode_state(&client.state_rx),
                    Ok(event) => Message::Broadcast(Broadcast::Event { event }).encode(),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} player events", client_id, n);
                        encode_state(&client.state_rx)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }

            msg = client.logs.recv() => {
                match msg {
                    Ok(message) => {
                        if let Ok(encoded) = Message::Broadcast(Broadcast::Log { message }).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Pull every complete frame off the front of `buf` and return the requests
/// among them.  A complete frame that fails to decode is dropped; a header
/// announcing more than [`MAX_FRAME_LEN`] bytes is an error.
fn take_requests(buf: &mut Vec<u8>, client_id: usize) -> anyhow::Result<Vec<Request>> {
    let mut requests = Vec::new();
    while let Some(len) = Message::frame_len(buf) {
        if len > MAX_FRAME_LEN {
            anyhow::bail!("frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN);
        }
        if buf.len() < 4 + len {
            break;
        }
        match Message::decode(buf) {
            Ok((Message::Request(request), consumed)) => {
                buf.drain(..consumed);
                requests.push(request);
            }
            Ok((_, consumed)) => {
                buf.drain(..consumed);
            }
            Err(e) => {
                warn!("Client {} sent a malformed frame: {}", client_id, e);
                buf.drain(..4 + len);
            }
        }
    }
    Ok(requests)
}

fn encode_hello(state_rx: &watch::Receiver<PlayerSnapshot>) -> anyhow::Result<Vec<u8>> {
    let snapshot = state_rx.borrow().clone();
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        snapshot,
    })
    .encode()
}

fn encode_state(state_rx: &watch::Receiver<PlayerSnapshot>) -> anyhow::Result<Vec<u8>> {
    let snapshot = state_rx.borrow().clone();
    Message::Broadcast(Broadcast::State { snapshot }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedplay_core::NodeTree;
    use embedplay_proto::protocol::{PlayerCommand, PresentationMode};

    fn hosts() -> Hosts {
        let mut tree = NodeTree::new();
        Hosts::build(&mut tree).unwrap()
    }

    #[test]
    fn test_present_maps_to_mode_host() {
        let hosts = hosts();
        match to_core_event(
            Request::Present {
                mode: PresentationMode::Fullscreen,
            },
            &hosts,
        ) {
            Some(OrchestratorEvent::Present { host, mode }) => {
                assert_eq!(host, hosts.fullscreen);
                assert_eq!(mode, PresentationMode::Fullscreen);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_passes_batch_through() {
        let hosts = hosts();
        let commands = vec![PlayerCommand::Play, PlayerCommand::Seek { seconds: 4.0 }];
        match to_core_event(
            Request::Dispatch {
                commands: commands.clone(),
            },
            &hosts,
        ) {
            Some(OrchestratorEvent::Dispatch(batch)) => assert_eq!(batch, commands),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_get_state_is_answered_locally() {
        assert!(to_core_event(Request::GetState, &hosts()).is_none());
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut buf = frame(b"{x");
        buf.extend(Message::Request(Request::GetState).encode().unwrap());
        let requests = take_requests(&mut buf, 1).unwrap();
        assert_eq!(requests, vec![Request::GetState]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let encoded = Message::Request(Request::TogglePlay).encode().unwrap();
        let mut buf = encoded[..encoded.len() - 2].to_vec();
        assert!(take_requests(&mut buf, 1).unwrap().is_empty());
        assert_eq!(buf.len(), encoded.len() - 2);

        buf.extend_from_slice(&encoded[encoded.len() - 2..]);
        assert_eq!(take_requests(&mut buf, 1).unwrap(), vec![Request::TogglePlay]);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut buf = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        assert!(take_requests(&mut buf, 1).is_err());
    }

    #[test]
    fn test_hello_carries_snapshot() {
        let snapshot = PlayerSnapshot {
            rev: 7,
            ..Default::default()
        };
        let (_tx, rx) = watch::channel(snapshot.clone());
        let encoded = encode_hello(&rx).unwrap();
        let (decoded, consumed) = Message::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(
            decoded,
            Message::Broadcast(Broadcast::Hello {
                protocol_version: PROTOCOL_VERSION,
                snapshot,
            })
        );
    }
}
