//! User-facing client API.
//!
//! [`BotClient`] is a cheap-to-clone handle to a background
//! [`ConnectionActor`]. Requests fail fast while the client is not connected;
//! events and lifecycle notifications are delivered through [`EventStream`].

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, oneshot, watch,
};
use tracing::{info, warn};

use crate::{
    actor::{ActorCommand, ActorHandles, ConnectionActor},
    config::ClientConfig,
    error::{BotError, BotResult},
    event::{BotEvent, ClientEvent},
    pending::{PendingRequestTable, ResponseReceiver},
    protocol::requests,
    session::{ActionInfo, ActionList, BroadcasterInfo, CommandInfo, CommandList, SessionSnapshot},
    subscription::{EventSubscriptions, SubscriptionRegistry},
    types::ConnectionState,
};

/// Identifies the action a `DoAction` request runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionRef {
    Id(String),
    Name(String),
}

impl ActionRef {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

#[derive(Deserialize)]
struct EventList {
    #[serde(default)]
    events: EventSubscriptions,
}

/// Client for a local bot server.
///
/// # Example
///
/// ```rust,ignore
/// let client = BotClient::new(ClientConfig::new(Endpoint::new("127.0.0.1", 8080)))?;
/// client.subscribe("Twitch", ["ChatMessage"]).await?;
/// client.connect().await?;
/// client.wait_for_state(ConnectionState::Connected).await?;
///
/// let mut events = client.events();
/// while let Some(chat) = events.next_for(botlink::CHAT_NEW).await {
///     println!("{chat:?}");
/// }
/// ```
#[derive(Clone)]
pub struct BotClient {
    cmd_tx: mpsc::Sender<ActorCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    session_rx: watch::Receiver<SessionSnapshot>,
    events_tx: broadcast::Sender<ClientEvent>,
    pending: Arc<PendingRequestTable>,
    subscriptions: Arc<SubscriptionRegistry>,
    config: Arc<ClientConfig>,
}

impl BotClient {
    /// Validate the configuration and spawn the connection actor.
    ///
    /// The client starts disconnected; call [`connect`](Self::connect) to
    /// dial. Must be called from within a tokio runtime. The actor stops once
    /// every clone of the client is dropped.
    pub fn new(config: ClientConfig) -> BotResult<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (session_tx, session_rx) = watch::channel(SessionSnapshot::default());
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity);
        let pending = Arc::new(PendingRequestTable::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());

        let actor = ConnectionActor::new(
            Arc::clone(&config),
            ActorHandles {
                cmd_rx,
                pending: Arc::clone(&pending),
                subscriptions: Arc::clone(&subscriptions),
                state_tx,
                session_tx: Arc::new(session_tx),
                events_tx: events_tx.clone(),
            },
        );
        tokio::spawn(actor.run());

        info!(url = %config.primary, "Bot client created");

        Ok(Self {
            cmd_tx,
            state_rx,
            session_rx,
            events_tx,
            pending,
            subscriptions,
            config,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start connecting.
    ///
    /// Returns once the dial has started; completion is observed through
    /// [`ClientEvent::Connected`] or [`wait_for_state`](Self::wait_for_state).
    /// Fails with [`BotError::AlreadyConnected`] unless disconnected.
    pub async fn connect(&self) -> BotResult<()> {
        self.call(|reply_tx| ActorCommand::Connect { reply_tx }).await?
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Pending requests are rejected with a connection-closed error.
    pub async fn disconnect(&self) -> BotResult<()> {
        match self
            .call(|reply_tx| ActorCommand::Disconnect { reply_tx })
            .await
        {
            Ok(()) | Err(BotError::Shutdown) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> BotResult<()> {
        let mut state_rx = self.state_rx.clone();
        state_rx
            .wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| BotError::Shutdown)
    }

    // ========================================================================
    // Request-Response API
    // ========================================================================

    /// Send a named request and await the response frame.
    ///
    /// `payload` is a JSON object merged into the frame, or `null`. Fails
    /// immediately with [`BotError::NotConnected`] unless connected.
    pub async fn request(&self, name: &str, payload: Value) -> BotResult<Value> {
        self.request_with_timeout(name, payload, None).await
    }

    /// Like [`request`](Self::request), overriding the configured timeout.
    pub async fn request_with_timeout(
        &self,
        name: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> BotResult<Value> {
        if !self.is_connected() {
            return Err(BotError::NotConnected);
        }

        let response_rx = self
            .call(|reply_tx| ActorCommand::Request {
                name: name.to_string(),
                payload,
                timeout,
                reply_tx,
            })
            .await??;
        await_response(response_rx).await
    }

    /// Send a named request and deserialize the response frame.
    pub async fn request_as<T: DeserializeOwned>(&self, name: &str, payload: Value) -> BotResult<T> {
        let response = self.request(name, payload).await?;
        Ok(serde_json::from_value(response)?)
    }

    pub async fn get_broadcaster(&self) -> BotResult<BroadcasterInfo> {
        self.request_as(requests::GET_BROADCASTER, Value::Null).await
    }

    pub async fn get_actions(&self) -> BotResult<Vec<ActionInfo>> {
        let list: ActionList = self.request_as(requests::GET_ACTIONS, Value::Null).await?;
        Ok(list.actions)
    }

    pub async fn get_commands(&self) -> BotResult<Vec<CommandInfo>> {
        let list: CommandList = self.request_as(requests::GET_COMMANDS, Value::Null).await?;
        Ok(list.commands)
    }

    /// Event names the host can deliver, by category.
    pub async fn get_events(&self) -> BotResult<EventSubscriptions> {
        let list: EventList = self.request_as(requests::GET_EVENTS, Value::Null).await?;
        Ok(list.events)
    }

    /// Run an action with optional arguments.
    pub async fn do_action(&self, action: ActionRef, args: Map<String, Value>) -> BotResult<Value> {
        let mut payload = json!({ "action": action });
        if !args.is_empty() {
            payload["args"] = Value::Object(args);
        }
        self.request(requests::DO_ACTION, payload).await
    }

    // ========================================================================
    // Subscription API
    // ========================================================================

    /// Add events to the subscription set.
    ///
    /// While connected the newly added names are sent right away and the
    /// host's answer is awaited; otherwise they are sent on the next connect.
    pub async fn subscribe<I, S>(&self, category: &str, events: I) -> BotResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let events = events.into_iter().map(Into::into).collect();
        let response_rx = self
            .call(|reply_tx| ActorCommand::Subscribe {
                category: category.to_string(),
                events,
                reply_tx,
            })
            .await??;
        if let Some(response_rx) = response_rx {
            await_response(response_rx).await?;
        }
        Ok(())
    }

    /// Remove events from the subscription set.
    pub async fn unsubscribe<I, S>(&self, category: &str, events: I) -> BotResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let events = events.into_iter().map(Into::into).collect();
        let response_rx = self
            .call(|reply_tx| ActorCommand::Unsubscribe {
                category: category.to_string(),
                events,
                reply_tx,
            })
            .await??;
        if let Some(response_rx) = response_rx {
            await_response(response_rx).await?;
        }
        Ok(())
    }

    /// Current subscription set, as replayed on the next connect.
    pub fn subscriptions(&self) -> EventSubscriptions {
        self.subscriptions.snapshot()
    }

    // ========================================================================
    // Events and session
    // ========================================================================

    /// Stream of events and lifecycle notifications emitted from now on.
    pub fn events(&self) -> EventStream {
        EventStream {
            rx: self.events_tx.subscribe(),
        }
    }

    /// Bootstrap results of the current connection.
    pub fn session(&self) -> SessionSnapshot {
        self.session_rx.borrow().clone()
    }

    /// Wait until the bootstrap of the current connection has completed.
    pub async fn wait_for_session(&self) -> BotResult<SessionSnapshot> {
        let mut session_rx = self.session_rx.clone();
        session_rx
            .wait_for(|snapshot| snapshot.ready)
            .await
            .map(|snapshot| snapshot.clone())
            .map_err(|_| BotError::Shutdown)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ActorCommand,
    ) -> BotResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| BotError::Shutdown)?;
        reply_rx.await.map_err(|_| BotError::Shutdown)
    }
}

async fn await_response(response_rx: ResponseReceiver) -> BotResult<Value> {
    response_rx
        .await
        .map_err(|_| BotError::internal("Response channel dropped"))?
}

/// Receiver of [`ClientEvent`]s.
///
/// A consumer that falls behind by more than the channel capacity skips the
/// oldest events.
pub struct EventStream {
    rx: broadcast::Receiver<ClientEvent>,
}

impl EventStream {
    /// Next event; `None` once the client and its actor are gone.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event consumer lagging; dropped events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next host event published under `key`, e.g. `chat:new` or
    /// `Twitch:Follow`.
    pub async fn next_for(&mut self, key: &str) -> Option<Arc<BotEvent>> {
        while let Some(event) = self.recv().await {
            if let ClientEvent::Event {
                key: event_key,
                event,
            } = event
                && event_key == key
            {
                return Some(event);
            }
        }
        None
    }
}
