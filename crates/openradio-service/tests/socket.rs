mod common;

use std::time::Duration;

use common::{station, Harness, Setup};
use openradio_proto::media_id;
use openradio_proto::protocol::{Broadcast, Command, Message, PlaybackState, PROTOCOL_VERSION};
use openradio_service::socket;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    async fn connect(h: &Harness) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(socket::serve(listener, h.handle.clone()));
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: Vec::new(),
        }
    }

    async fn send(&mut self, cmd: Command) {
        let encoded = Message::Command(cmd).encode().unwrap();
        self.stream.write_all(&encoded).await.unwrap();
    }

    async fn recv(&mut self) -> Broadcast {
        let read = async {
            loop {
                if let Ok((msg, consumed)) = Message::decode(&self.buf) {
                    self.buf.drain(..consumed);
                    match msg {
                        Message::Broadcast(b) => return b,
                        other => panic!("unexpected message: {other:?}"),
                    }
                }
                let mut tmp = [0u8; 4096];
                let n = self.stream.read(&mut tmp).await.unwrap();
                assert!(n > 0, "server closed the connection");
                self.buf.extend_from_slice(&tmp[..n]);
            }
        };
        tokio::time::timeout(Duration::from_secs(30), read)
            .await
            .expect("no frame from server")
    }

    /// Next broadcast matching `pred`, skipping the rest.
    async fn recv_until(&mut self, pred: impl Fn(&Broadcast) -> bool) -> Broadcast {
        loop {
            let b = self.recv().await;
            if pred(&b) {
                return b;
            }
        }
    }
}

#[tokio::test]
async fn test_client_gets_hello_then_browses_and_plays() {
    let h = Harness::start(Setup {
        favorites: vec![station(1, "One"), station(2, "Two")],
        ..Setup::default()
    })
    .await;
    let mut client = Client::connect(&h).await;

    match client.recv().await {
        Broadcast::Hello {
            protocol_version, ..
        } => assert_eq!(protocol_version, PROTOCOL_VERSION),
        other => panic!("expected hello, got {other:?}"),
    }

    client
        .send(Command::LoadChildren {
            parent_id: media_id::FAVORITES.into(),
        })
        .await;
    match client
        .recv_until(|b| matches!(b, Broadcast::Children { .. }))
        .await
    {
        Broadcast::Children { parent_id, entries } => {
            assert_eq!(parent_id, media_id::FAVORITES);
            assert_eq!(entries.len(), 2);
        }
        _ => unreachable!(),
    }

    client
        .send(Command::PlayFromMediaId {
            media_id: "2".into(),
        })
        .await;
    match client
        .recv_until(|b| {
            matches!(b, Broadcast::State { data } if data.playback.state == PlaybackState::Buffering)
        })
        .await
    {
        Broadcast::State { data } => {
            assert_eq!(data.current_index, Some(1));
            assert_eq!(data.queue.len(), 2);
        }
        _ => unreachable!(),
    }

    h.shutdown().await;
}

#[tokio::test]
async fn test_browse_reply_goes_to_requester_only() {
    let h = Harness::start(Setup {
        favorites: vec![station(1, "One")],
        ..Setup::default()
    })
    .await;
    let mut asking = Client::connect(&h).await;
    let mut watching = Client::connect(&h).await;
    asking.recv().await;
    watching.recv().await;

    asking
        .send(Command::LoadChildren {
            parent_id: media_id::FAVORITES.into(),
        })
        .await;
    asking
        .recv_until(|b| matches!(b, Broadcast::Children { .. }))
        .await;

    asking.send(Command::RequestLocation).await;
    let seen = watching
        .recv_until(|b| matches!(b, Broadcast::Children { .. } | Broadcast::Location { .. }))
        .await;
    match seen {
        Broadcast::Location { country_code } => assert_eq!(country_code, "DE"),
        other => panic!("browse reply leaked to another client: {other:?}"),
    }

    h.shutdown().await;
}
