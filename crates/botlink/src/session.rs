//! Host state fetched by the bootstrap sequence after each connect.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::{error::BotResult, event::ClientEvent, pending::ResponseReceiver, protocol::requests};

/// Broadcaster accounts known to the host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcasterInfo {
    /// Per-platform account details, keyed by lowercase platform name.
    #[serde(default)]
    pub platforms: BTreeMap<String, Value>,
    #[serde(default)]
    pub connected: Vec<String>,
    #[serde(default)]
    pub disconnected: Vec<String>,
}

/// An action defined on the host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

/// A chat command defined on the host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Trigger strings, e.g. `!so`.
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Deserialize)]
pub(crate) struct ActionList {
    #[serde(default)]
    pub(crate) actions: Vec<ActionInfo>,
}

#[derive(Deserialize)]
pub(crate) struct CommandList {
    #[serde(default)]
    pub(crate) commands: Vec<CommandInfo>,
}

/// Cached results of the bootstrap sequence for the current connection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub broadcaster: Option<BroadcasterInfo>,
    pub actions: Vec<ActionInfo>,
    pub commands: Vec<CommandInfo>,
    /// Set once every bootstrap response has been handled.
    pub ready: bool,
    /// Sequence number of the connection this snapshot belongs to; 0 while
    /// disconnected.
    pub connection: u64,
}

impl SessionSnapshot {
    /// Find an action by name.
    pub fn action(&self, name: &str) -> Option<&ActionInfo> {
        self.actions.iter().find(|action| action.name == name)
    }

    fn apply(&mut self, request: &str, response: Value) -> BotResult<()> {
        match request {
            requests::GET_BROADCASTER => {
                self.broadcaster = Some(serde_json::from_value(response)?);
            }
            requests::GET_ACTIONS => {
                self.actions = serde_json::from_value::<ActionList>(response)?.actions;
            }
            requests::GET_COMMANDS => {
                self.commands = serde_json::from_value::<CommandList>(response)?.commands;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Await the bootstrap responses of one connection and fold them into the
/// session cache.
///
/// Runs detached from the connection actor; requests that fail or time out
/// are logged and leave their part of the cache empty. Stops writing once the
/// cache has moved on to another connection.
pub(crate) async fn collect_bootstrap(
    replies: Vec<(&'static str, ResponseReceiver)>,
    session: Arc<watch::Sender<SessionSnapshot>>,
    events_tx: broadcast::Sender<ClientEvent>,
    connection: u64,
) {
    for (request, reply) in replies {
        let response = match reply.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(request, error = %e, "Bootstrap request failed");
                continue;
            }
            Err(_) => {
                warn!(request, "Bootstrap request dropped");
                continue;
            }
        };

        let mut applied = Ok(());
        let current = session.send_if_modified(|snapshot| {
            if snapshot.connection != connection {
                return false;
            }
            applied = snapshot.apply(request, response);
            true
        });
        if !current {
            return;
        }
        if let Err(e) = applied {
            warn!(request, error = %e, "Unexpected bootstrap response shape");
        }
    }

    let ready = session.send_if_modified(|snapshot| {
        if snapshot.connection != connection {
            return false;
        }
        snapshot.ready = true;
        true
    });
    if ready {
        debug!(connection, "Session bootstrap complete");
        let _ = events_tx.send(ClientEvent::SessionReady);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{pending::PendingRequestTable, types::RequestId};

    #[test]
    fn test_apply_actions() {
        let mut snapshot = SessionSnapshot::default();
        snapshot
            .apply(
                requests::GET_ACTIONS,
                json!({
                    "id": "1", "status": "ok", "count": 1,
                    "actions": [{"id": "a1", "name": "Shoutout", "group": "Chat", "enabled": true}]
                }),
            )
            .expect("applied");

        assert_eq!(snapshot.actions.len(), 1);
        let action = snapshot.action("Shoutout").expect("action");
        assert_eq!(action.id, "a1");
        assert!(action.enabled);
    }

    #[test]
    fn test_apply_broadcaster() {
        let mut snapshot = SessionSnapshot::default();
        snapshot
            .apply(
                requests::GET_BROADCASTER,
                json!({
                    "platforms": {"twitch": {"broadcastUserName": "streamer"}},
                    "connected": ["twitch"],
                    "disconnected": ["youtube"],
                    "id": "2", "status": "ok"
                }),
            )
            .expect("applied");

        let broadcaster = snapshot.broadcaster.expect("broadcaster");
        assert_eq!(broadcaster.connected, vec!["twitch"]);
        assert_eq!(
            broadcaster.platforms["twitch"]["broadcastUserName"],
            "streamer"
        );
    }

    #[test]
    fn test_apply_bad_shape() {
        let mut snapshot = SessionSnapshot::default();
        let result = snapshot.apply(requests::GET_COMMANDS, json!({"commands": "nope"}));
        assert!(result.is_err());
        assert!(snapshot.commands.is_empty());
    }

    #[tokio::test]
    async fn test_collect_bootstrap_skips_failures() {
        let pending = Arc::new(PendingRequestTable::new());
        let actions_id = RequestId::new();
        let commands_id = RequestId::new();
        let actions = pending
            .add(actions_id.clone(), Duration::from_secs(5))
            .expect("added");
        let commands = pending
            .add(commands_id.clone(), Duration::from_secs(5))
            .expect("added");

        let (session, mut session_rx) = watch::channel(SessionSnapshot {
            connection: 1,
            ..Default::default()
        });
        let (events_tx, mut events_rx) = broadcast::channel(4);

        pending.resolve(
            &actions_id,
            json!({"actions": [{"id": "a1", "name": "Hi"}]}),
        );
        pending.drain_all("closed");

        collect_bootstrap(
            vec![
                (requests::GET_ACTIONS, actions),
                (requests::GET_COMMANDS, commands),
            ],
            Arc::new(session),
            events_tx,
            1,
        )
        .await;

        let snapshot = session_rx.borrow_and_update().clone();
        assert!(snapshot.ready);
        assert_eq!(snapshot.actions.len(), 1);
        assert!(snapshot.commands.is_empty());
        assert!(matches!(events_rx.try_recv(), Ok(ClientEvent::SessionReady)));
    }

    #[tokio::test]
    async fn test_collect_bootstrap_ignores_stale_connection() {
        let pending = Arc::new(PendingRequestTable::new());
        let id = RequestId::new();
        let actions = pending
            .add(id.clone(), Duration::from_secs(5))
            .expect("added");
        pending.resolve(&id, json!({"actions": [{"id": "a1", "name": "Hi"}]}));

        // The cache already belongs to connection 3.
        let (session, session_rx) = watch::channel(SessionSnapshot {
            connection: 3,
            ..Default::default()
        });
        let (events_tx, mut events_rx) = broadcast::channel(4);

        collect_bootstrap(
            vec![(requests::GET_ACTIONS, actions)],
            Arc::new(session),
            events_tx,
            2,
        )
        .await;

        let snapshot = session_rx.borrow().clone();
        assert!(!snapshot.ready);
        assert!(snapshot.actions.is_empty());
        assert!(events_rx.try_recv().is_err());
    }
}
