//! In-process bot host for integration tests.

#![allow(dead_code)]

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use botlink::{BotClient, ClientConfig, ClientEvent, ConnectionState, Endpoint, EventStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const WAIT: Duration = Duration::from_secs(5);

/// Await `future`, failing the test after [`WAIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting")
}

#[derive(Clone, Debug)]
enum Control {
    Push(String),
    Kick,
}

struct Shared {
    frames: Mutex<Vec<(usize, Value)>>,
    connections: AtomicUsize,
    silent: Vec<String>,
    control: broadcast::Sender<Control>,
}

/// Minimal bot server: answers requests, records every frame and can push
/// events or drop its connections on demand.
pub struct MockHost {
    pub addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MockHost {
    pub async fn start() -> Self {
        Self::with_silent(&[]).await
    }

    /// Start a host that never answers the named requests.
    pub async fn with_silent(silent: &[&str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (control, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            frames: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            silent: silent.iter().map(|name| name.to_string()).collect(),
            control,
        });

        let accept_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_id = accept_shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
                let control_rx = accept_shared.control.subscribe();
                tokio::spawn(serve(
                    stream,
                    conn_id,
                    control_rx,
                    Arc::clone(&accept_shared),
                ));
            }
        });

        Self { addr, shared, task }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.addr.port())
    }

    /// Client config pointing at this host, with short timers.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.endpoint())
            .reconnect_delay(Duration::from_millis(100))
            .connect_timeout(Duration::from_secs(2))
            .bootstrap(false)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Every frame received, tagged with the 1-based connection number.
    pub fn frames(&self) -> Vec<(usize, Value)> {
        self.shared.frames.lock().expect("frames lock").clone()
    }

    /// Frames of one connection, in arrival order.
    pub fn frames_on(&self, conn_id: usize) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|(id, _)| *id == conn_id)
            .map(|(_, frame)| frame)
            .collect()
    }

    /// Frames with the given `request` name.
    pub fn requests(&self, name: &str) -> Vec<(usize, Value)> {
        self.frames()
            .into_iter()
            .filter(|(_, frame)| frame["request"] == name)
            .collect()
    }

    /// Poll until a frame matching `predicate` has arrived.
    pub async fn wait_for_frame(&self, predicate: impl Fn(usize, &Value) -> bool) -> (usize, Value) {
        within(async {
            loop {
                if let Some(found) = self
                    .frames()
                    .into_iter()
                    .find(|(conn_id, frame)| predicate(*conn_id, frame))
                {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
    }

    pub async fn wait_for_connections(&self, count: usize) {
        within(async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }

    /// Send a frame to every open connection.
    pub fn push(&self, frame: Value) {
        self.push_text(frame.to_string());
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.shared.control.send(Control::Push(text.into()));
    }

    /// Close every open connection from the host side.
    pub fn kick(&self) {
        let _ = self.shared.control.send(Control::Kick);
    }
}

impl Drop for MockHost {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    conn_id: usize,
    mut control_rx: broadcast::Receiver<Control>,
    shared: Arc<Shared>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    let hello = json!({"request": "Hello", "info": {"name": "mock", "version": "0.0.1"}});
    if ws.send(Message::text(hello.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    shared.frames.lock().expect("frames lock").push((conn_id, frame.clone()));
                    if let Some(reply) = respond(&frame, &shared.silent)
                        && ws.send(Message::text(reply.to_string())).await.is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            control = control_rx.recv() => match control {
                Ok(Control::Push(text)) => {
                    if ws.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Control::Kick) => {
                    let _ = ws.close(None).await;
                    break;
                }
                Err(_) => break,
            },
        }
    }
}

fn respond(frame: &Value, silent: &[String]) -> Option<Value> {
    let name = frame["request"].as_str()?;
    let id = frame["id"].clone();
    if silent.iter().any(|silent| silent == name) {
        return None;
    }

    let reply = match name {
        "Fail" => json!({"id": id, "status": "error", "error": "Action failed"}),
        "GetBroadcaster" => json!({
            "id": id,
            "status": "ok",
            "platforms": {"twitch": {"broadcastUserName": "streamer"}},
            "connected": ["twitch"],
            "disconnected": ["youtube"]
        }),
        "GetActions" => json!({
            "id": id,
            "status": "ok",
            "count": 1,
            "actions": [{"id": "a1", "name": "Shoutout", "group": "Chat", "enabled": true}]
        }),
        "GetCommands" => json!({
            "id": id,
            "status": "ok",
            "count": 1,
            "commands": [{"id": "c1", "name": "so", "enabled": true, "commands": ["!so"]}]
        }),
        "GetEvents" => json!({
            "id": id,
            "status": "ok",
            "events": {"Twitch": ["ChatMessage", "Follow"], "General": ["Custom"]}
        }),
        _ => json!({"id": id, "status": "ok"}),
    };
    Some(reply)
}

/// Connect `client` and wait until it is connected.
pub async fn connect(client: &BotClient) {
    client.connect().await.expect("connect");
    within(client.wait_for_state(ConnectionState::Connected))
        .await
        .expect("client alive");
}

/// Next lifecycle or host event matching `predicate`.
pub async fn next_matching(
    events: &mut EventStream,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    within(async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
}

/// A port nothing listens on.
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr").port()
}
