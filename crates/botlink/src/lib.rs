//! # botlink
//!
//! Resilient WebSocket client for locally running streaming bot servers.
//!
//! The client issues request/response calls over a JSON text protocol,
//! consumes the server's event stream and keeps both working across
//! connection loss: it reconnects after a fixed delay, fails over to an
//! alternate endpoint when the primary keeps refusing, and replays the
//! subscription set after every open.
//!
//! ## Architecture
//!
//! ```text
//!  BotClient (clone per task)          ConnectionActor (one task)
//!  ──────────────────────────          ─────────────────────────────────────
//!  connect / disconnect   ──mpsc──▶    HostSelector ─▶ dial ─▶ Link
//!  request / subscribe                 ReconnectScheduler
//!          ▲                           send_request ─▶ PendingRequestTable
//!          │ oneshot                   inbound frame ─▶ EventDispatcher
//!          └─────────────────────────────────────────────┘        │
//!  events() ◀───────────── broadcast<ClientEvent> ◀───────────────┘
//!  state() / session() ◀── watch
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use botlink::{BotClient, ClientConfig, ConnectionState, Endpoint, CHAT_NEW};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BotClient::new(ClientConfig::new(Endpoint::new("127.0.0.1", 8080)))?;
//!     client.subscribe("Twitch", ["ChatMessage"]).await?;
//!     client.connect().await?;
//!     client.wait_for_state(ConnectionState::Connected).await?;
//!
//!     let mut events = client.events();
//!     while let Some(chat) = events.next_for(CHAT_NEW).await {
//!         println!("{chat:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod host;
pub mod pending;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod subscription;
mod tls;
pub mod types;

pub use client::{ActionRef, BotClient, EventStream};
pub use config::{ClientConfig, Endpoint, FallbackEndpoint};
pub use error::{BotError, BotResult};
pub use event::{
    BotEvent, CHAT_NEW, ChatEvent, ClientEvent, FOLLOW_NEW, FollowEvent, GIFT_RECEIVED, GiftEvent,
    RawEvent,
};
pub use session::{ActionInfo, BroadcasterInfo, CommandInfo, SessionSnapshot};
pub use subscription::EventSubscriptions;
pub use types::{ConnectionState, RequestId};
