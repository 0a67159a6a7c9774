//! Connection actor for the bot server link.
//!
//! The actor runs in a background task and owns everything that touches the
//! socket:
//! - Dialing the endpoint picked by the [`HostSelector`]
//! - Bootstrap requests and subscription replay after every open
//! - Routing inbound frames through the [`EventDispatcher`]
//! - Tearing down on close and arming the reconnect timer
//!
//! Commands from [`BotClient`](crate::BotClient) handles arrive over an mpsc
//! channel and are processed one at a time, interleaved with inbound frames.

use std::{future, sync::Arc, time::Duration};

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};

use crate::{
    config::{ClientConfig, Endpoint},
    dispatcher::EventDispatcher,
    error::{BotError, BotResult},
    event::ClientEvent,
    host::HostSelector,
    pending::{PendingRequestTable, ResponseReceiver},
    protocol::{self, requests},
    reconnect::ReconnectScheduler,
    session::{self, SessionSnapshot},
    subscription::{EventSubscriptions, SubscriptionRegistry},
    tls,
    types::{ConnectionState, RequestId},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a deliberate disconnect waits for the close frame to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Commands sent from the client API to the connection actor.
pub enum ActorCommand {
    /// Start dialing. Fails unless disconnected.
    Connect {
        reply_tx: oneshot::Sender<BotResult<()>>,
    },
    /// Close the connection and stop reconnecting.
    Disconnect { reply_tx: oneshot::Sender<()> },
    /// Send a request; the reply carries the receiver of its response.
    Request {
        name: String,
        payload: Value,
        timeout: Option<Duration>,
        reply_tx: oneshot::Sender<BotResult<ResponseReceiver>>,
    },
    /// Add events to the registry and send the new ones when connected.
    Subscribe {
        category: String,
        events: Vec<String>,
        reply_tx: oneshot::Sender<BotResult<Option<ResponseReceiver>>>,
    },
    /// Remove events from the registry and send the removed ones when connected.
    Unsubscribe {
        category: String,
        events: Vec<String>,
        reply_tx: oneshot::Sender<BotResult<Option<ResponseReceiver>>>,
    },
}

/// A dial in progress.
struct Dial {
    endpoint: Endpoint,
    handle: JoinHandle<BotResult<WsStream>>,
}

/// An open connection.
struct Link {
    endpoint: Endpoint,
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

/// Channels and shared stores the actor works with.
pub(crate) struct ActorHandles {
    pub(crate) cmd_rx: mpsc::Receiver<ActorCommand>,
    pub(crate) pending: Arc<PendingRequestTable>,
    pub(crate) subscriptions: Arc<SubscriptionRegistry>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) session_tx: Arc<watch::Sender<SessionSnapshot>>,
    pub(crate) events_tx: broadcast::Sender<ClientEvent>,
}

/// The connection actor manages the lifecycle of one logical connection.
pub struct ConnectionActor {
    config: Arc<ClientConfig>,
    cmd_rx: mpsc::Receiver<ActorCommand>,
    pending: Arc<PendingRequestTable>,
    subscriptions: Arc<SubscriptionRegistry>,
    dispatcher: EventDispatcher,
    hosts: HostSelector,
    reconnect: ReconnectScheduler,
    state_tx: watch::Sender<ConnectionState>,
    session_tx: Arc<watch::Sender<SessionSnapshot>>,
    events_tx: broadcast::Sender<ClientEvent>,
    dialing: Option<Dial>,
    link: Option<Link>,
    /// Collector of the current connection's bootstrap responses.
    bootstrap: Option<JoinHandle<()>>,
    /// Number of connections opened so far.
    connections: u64,
}

impl ConnectionActor {
    pub(crate) fn new(config: Arc<ClientConfig>, handles: ActorHandles) -> Self {
        let hosts = HostSelector::new(
            config.primary.clone(),
            config.fallback_endpoint(),
            config.failover_threshold,
        );
        let dispatcher =
            EventDispatcher::new(Arc::clone(&handles.pending), handles.events_tx.clone());

        Self {
            reconnect: ReconnectScheduler::new(config.reconnect_delay),
            config,
            cmd_rx: handles.cmd_rx,
            pending: handles.pending,
            subscriptions: handles.subscriptions,
            dispatcher,
            hosts,
            state_tx: handles.state_tx,
            session_tx: handles.session_tx,
            events_tx: handles.events_tx,
            dialing: None,
            link: None,
            bootstrap: None,
            connections: 0,
        }
    }

    /// Run until every client handle is dropped.
    pub async fn run(mut self) {
        info!(url = %self.hosts.primary(), "Starting bot client actor");

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        info!("All client handles dropped; shutting down actor");
                        self.disconnect("client shut down").await;
                        break;
                    }
                },

                (endpoint, result) = next_dial(&mut self.dialing) => match result {
                    Ok(ws) => self.on_open(endpoint, ws).await,
                    Err(e) => self.on_dial_failed(endpoint, e),
                },

                frame = next_frame(&mut self.link) => match frame {
                    Some(Ok(message)) => self.handle_message(message),
                    Some(Err(e)) => self.connection_lost(BotError::from(e).to_string()),
                    None => self.connection_lost("stream ended".to_string()),
                },

                () = self.reconnect.fired() => {
                    if self.state().is_disconnected() {
                        debug!("Reconnect timer fired");
                        self.begin_connect();
                    }
                }
            }
        }

        info!("Bot client actor stopped");
    }

    async fn handle_command(&mut self, cmd: ActorCommand) {
        match cmd {
            ActorCommand::Connect { reply_tx } => {
                let state = self.state();
                let result = if state.is_disconnected() {
                    self.reconnect.enable();
                    self.reconnect.cancel();
                    self.begin_connect();
                    Ok(())
                } else {
                    Err(BotError::AlreadyConnected { state })
                };
                let _ = reply_tx.send(result);
            }
            ActorCommand::Disconnect { reply_tx } => {
                self.disconnect("client disconnected").await;
                let _ = reply_tx.send(());
            }
            ActorCommand::Request {
                name,
                payload,
                timeout,
                reply_tx,
            } => {
                let result = self.send_request(&name, payload, timeout).await;
                let _ = reply_tx.send(result);
            }
            ActorCommand::Subscribe {
                category,
                events,
                reply_tx,
            } => {
                let result = self
                    .update_subscriptions(requests::SUBSCRIBE, category, events)
                    .await;
                let _ = reply_tx.send(result);
            }
            ActorCommand::Unsubscribe {
                category,
                events,
                reply_tx,
            } => {
                let result = self
                    .update_subscriptions(requests::UNSUBSCRIBE, category, events)
                    .await;
                let _ = reply_tx.send(result);
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }

    fn begin_connect(&mut self) {
        let endpoint = self.hosts.choose_endpoint();
        info!(url = %endpoint, failures = self.hosts.failures(), "Connecting to bot server");

        self.set_state(ConnectionState::Connecting);
        self.emit(ClientEvent::Connecting {
            endpoint: endpoint.clone(),
        });

        let handle = tokio::spawn(dial(endpoint.clone(), self.config.connect_timeout));
        self.dialing = Some(Dial { endpoint, handle });
    }

    async fn on_open(&mut self, endpoint: Endpoint, ws: WsStream) {
        info!(url = %endpoint, "Connected to bot server");
        self.hosts.record_success();
        self.reconnect.cancel();

        let (write, read) = ws.split();
        self.link = Some(Link {
            endpoint: endpoint.clone(),
            write,
            read,
        });
        self.connections += 1;
        self.session_tx.send_replace(SessionSnapshot {
            connection: self.connections,
            ..Default::default()
        });

        self.set_state(ConnectionState::Connected);
        self.emit(ClientEvent::Connected { endpoint });

        // Queued before the actor returns to its command channel, so no
        // application request can overtake them.
        self.enqueue_bootstrap().await;
    }

    async fn enqueue_bootstrap(&mut self) {
        let mut replies = Vec::new();
        if self.config.bootstrap {
            for request in [
                requests::GET_BROADCASTER,
                requests::GET_ACTIONS,
                requests::GET_COMMANDS,
            ] {
                match self.send_request(request, Value::Null, None).await {
                    Ok(reply) => replies.push((request, reply)),
                    Err(e) => warn!(request, error = %e, "Failed to send bootstrap request"),
                }
            }
        }

        let subscriptions = self.subscriptions.snapshot();
        if !subscriptions.is_empty() {
            debug!(categories = subscriptions.len(), "Replaying subscriptions");
            let payload = protocol::subscription_payload(&subscriptions);
            match self.send_request(requests::SUBSCRIBE, payload, None).await {
                Ok(reply) => {
                    tokio::spawn(log_failed_reply(requests::SUBSCRIBE, reply));
                }
                Err(e) => warn!(error = %e, "Failed to replay subscriptions"),
            }
        }

        if self.config.bootstrap {
            self.bootstrap = Some(tokio::spawn(session::collect_bootstrap(
                replies,
                Arc::clone(&self.session_tx),
                self.events_tx.clone(),
                self.connections,
            )));
        }
    }

    fn on_dial_failed(&mut self, endpoint: Endpoint, error: BotError) {
        warn!(url = %endpoint, error = %error, "Connection attempt failed");
        self.hosts.record_failure(&endpoint);
        self.set_state(ConnectionState::Disconnected);
        self.emit(ClientEvent::Disconnected {
            reason: error.to_string(),
        });
        self.schedule_reconnect();
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Text(text) => {
                self.dispatcher.handle_frame(text.as_str());
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    self.dispatcher.handle_frame(text);
                }
                Err(e) => warn!(error = %e, "Discarding non UTF-8 binary frame"),
            },
            Message::Close(frame) => {
                let reason = match frame {
                    Some(frame) => format!(
                        "closed by host ({}): {}",
                        u16::from(frame.code),
                        frame.reason.as_str()
                    ),
                    None => "closed by host".to_string(),
                };
                self.connection_lost(reason);
            }
            // tungstenite answers pings itself
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    /// The open connection went away without being asked to.
    fn connection_lost(&mut self, reason: String) {
        let Some(link) = self.link.take() else {
            return;
        };
        warn!(url = %link.endpoint, reason = %reason, "Connection lost");
        drop(link);

        self.teardown(&reason);
        self.schedule_reconnect();
    }

    /// Close everything and stop reconnecting until the next `connect`.
    async fn disconnect(&mut self, reason: &str) {
        self.reconnect.disable();

        if let Some(dial) = self.dialing.take() {
            debug!(url = %dial.endpoint, "Aborting dial");
            dial.handle.abort();
        }

        if let Some(mut link) = self.link.take() {
            info!(url = %link.endpoint, "Closing connection");
            match tokio::time::timeout(CLOSE_TIMEOUT, link.write.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Close handshake failed"),
                Err(_) => debug!("Close handshake timed out"),
            }
        }

        self.teardown(reason);
    }

    fn teardown(&mut self, reason: &str) {
        if let Some(task) = self.bootstrap.take() {
            task.abort();
        }

        let was = self.state();
        self.set_state(ConnectionState::Disconnected);
        self.session_tx.send_replace(SessionSnapshot::default());

        let drained = self.pending.drain_all(reason);
        if drained > 0 {
            debug!(drained, reason, "Rejected pending requests");
        }

        if !was.is_disconnected() {
            self.emit(ClientEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.schedule() {
            let delay = self.reconnect.delay();
            info!(delay = %humantime::format_duration(delay), "Reconnect scheduled");
            self.emit(ClientEvent::ReconnectScheduled { delay });
        }
    }

    /// Register and write one request frame.
    ///
    /// A write failure settles the returned receiver with the error.
    async fn send_request(
        &mut self,
        name: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> BotResult<ResponseReceiver> {
        let Some(link) = self.link.as_mut() else {
            return Err(BotError::NotConnected);
        };

        let id = RequestId::new();
        let text = protocol::encode_request(name, &id, payload)?;
        let reply = self
            .pending
            .add(id.clone(), timeout.unwrap_or(self.config.request_timeout))?;

        debug!(request = name, request_id = %id, "Sending request");
        if let Err(e) = link.write.send(Message::text(text)).await {
            let error = BotError::from(e);
            warn!(request = name, request_id = %id, error = %error, "Failed to send request");
            self.pending.reject(&id, error);
        }

        Ok(reply)
    }

    async fn update_subscriptions(
        &mut self,
        request: &'static str,
        category: String,
        events: Vec<String>,
    ) -> BotResult<Option<ResponseReceiver>> {
        let delta = if request == requests::SUBSCRIBE {
            self.subscriptions.add(&category, &events)
        } else {
            self.subscriptions.remove(&category, &events)
        };

        if delta.is_empty() || self.link.is_none() {
            return Ok(None);
        }

        debug!(request, category = %category, events = ?delta, "Sending subscription change");
        let payload = protocol::subscription_payload(&EventSubscriptions::from([(category, delta)]));
        self.send_request(request, payload, None).await.map(Some)
    }
}

/// Dial one endpoint within the connect window.
async fn dial(endpoint: Endpoint, connect_timeout: Duration) -> BotResult<WsStream> {
    let url = endpoint.url()?;
    if url.scheme() == "wss" {
        tls::install_crypto_provider();
    }
    match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(BotError::ConnectTimeout {
            url: url.to_string(),
            duration: connect_timeout,
        }),
    }
}

/// Resolve when the dial in progress finishes; pending forever when idle.
async fn next_dial(dialing: &mut Option<Dial>) -> (Endpoint, BotResult<WsStream>) {
    let Some(dial) = dialing.as_mut() else {
        return future::pending().await;
    };

    let result = match (&mut dial.handle).await {
        Ok(result) => result,
        Err(e) => Err(BotError::internal(format!("Dial task failed: {e}"))),
    };
    let endpoint = dial.endpoint.clone();
    *dialing = None;
    (endpoint, result)
}

/// Next message of the open connection; pending forever when there is none.
async fn next_frame(link: &mut Option<Link>) -> Option<Result<Message, tungstenite::Error>> {
    match link {
        Some(link) => link.read.next().await,
        None => future::pending().await,
    }
}

async fn log_failed_reply(request: &'static str, reply: ResponseReceiver) {
    if let Ok(Err(e)) = reply.await {
        warn!(request, error = %e, "Request failed");
    }
}
