//! Length-prefixed JSON socket for clients.
//!
//! On connect a client gets a `Hello` with the full session snapshot, then
//! every session update.  Browse requests are answered to the requesting
//! client only.

use std::sync::Arc;

use openradio_proto::protocol::{Broadcast, Command, MediaEntry, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::core::ServiceEvent;
use crate::handle::ServiceHandle;
use crate::session::{SessionStore, SessionUpdate};

pub fn start_server(bind_address: String, port: u16, handle: ServiceHandle) -> tokio::task::JoinHandle<()> {
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
        serve(listener, handle).await;
    })
}

/// Accept clients on `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, handle: ServiceHandle) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let handle = handle.clone();
                tokio::spawn(async move {
                    handle_client(stream, id, handle).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: TcpStream, client_id: usize, handle: ServiceHandle) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();
    let session = handle.session();
    let mut updates = handle.subscribe();
    let (children_tx, mut children_rx) = mpsc::channel::<Broadcast>(16);

    if let Ok(encoded) = encode_hello(&session).await {
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

                        while read_buf.len() >= 4 {
                            let cmd = match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    cmd
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                    continue;
                                }
                                Err(_) => break,
                            };
                            debug!("Client {} sent command: {:?}", client_id, cmd);

                            let sent = match cmd {
                                Command::LoadChildren { parent_id } => {
                                    browse(&handle, parent_id, children_tx.clone()).await
                                }
                                cmd => handle.send_event(ServiceEvent::ClientCommand(cmd)).await.is_ok(),
                            };
                            if !sent {
                                warn!("ServiceEvent channel closed");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            Some(children) = children_rx.recv() => {
                if let Ok(encoded) = Message::Broadcast(children).encode() {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }

            update = updates.recv() => {
                match update {
                    Ok(update) => {
                        let broadcast = to_broadcast(update, &session).await;
                        if let Ok(encoded) = Message::Broadcast(broadcast).encode() {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} session updates", client_id, n);
                        if let Ok(encoded) = encode_state(&session).await {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Ask the core for the children of `parent_id`; the answer is queued for
/// this client once it arrives.  Returns false if the core is gone.
async fn browse(handle: &ServiceHandle, parent_id: String, out: mpsc::Sender<Broadcast>) -> bool {
    let (reply, rx) = oneshot::channel::<Vec<MediaEntry>>();
    let event = ServiceEvent::LoadChildren {
        parent_id: parent_id.clone(),
        reply,
    };
    if handle.send_event(event).await.is_err() {
        return false;
    }
    tokio::spawn(async move {
        if let Ok(entries) = rx.await {
            let _ = out.send(Broadcast::Children { parent_id, entries }).await;
        }
    });
    true
}

pub async fn to_broadcast(update: SessionUpdate, session: &SessionStore) -> Broadcast {
    match update {
        SessionUpdate::StateUpdated => Broadcast::State {
            data: session.get_state().await,
        },
        SessionUpdate::Children { parent_id, entries } => Broadcast::Children { parent_id, entries },
        SessionUpdate::ChildrenChanged { parent_id } => Broadcast::ChildrenChanged { parent_id },
        SessionUpdate::Notice(message) => Broadcast::Notice { message },
        SessionUpdate::Error(message) => Broadcast::Error { message },
        SessionUpdate::Location(country_code) => Broadcast::Location { country_code },
        SessionUpdate::Idle => Broadcast::Idle,
        SessionUpdate::Log(message) => Broadcast::Log { message },
    }
}

async fn encode_hello(session: &Arc<SessionStore>) -> anyhow::Result<Vec<u8>> {
    let state = session.get_state().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        service_rev: rev,
        state,
    })
    .encode()
}

async fn encode_state(session: &Arc<SessionStore>) -> anyhow::Result<Vec<u8>> {
    let state = session.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}
