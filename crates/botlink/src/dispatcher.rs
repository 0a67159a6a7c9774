//! Inbound frame classification and routing.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    event::{BotEvent, ClientEvent, RawEvent},
    pending::PendingRequestTable,
    protocol::{self, EventHeader},
    types::RequestId,
};

/// What happened to an inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Settled the pending request with this id.
    Response(RequestId),
    /// Published as an event under `keys`.
    Event { keys: Vec<String> },
    /// The host greeting.
    Hello,
    /// Not JSON, or neither a known response nor an event.
    Discarded,
}

/// Routes inbound frames to pending requests and event consumers.
pub struct EventDispatcher {
    pending: Arc<PendingRequestTable>,
    events_tx: broadcast::Sender<ClientEvent>,
}

impl EventDispatcher {
    pub fn new(pending: Arc<PendingRequestTable>, events_tx: broadcast::Sender<ClientEvent>) -> Self {
        Self { pending, events_tx }
    }

    /// Classify and route one text frame. Never fails; bad frames are dropped.
    pub fn handle_frame(&self, raw: &str) -> Dispatch {
        let frame = match protocol::parse_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Discarding malformed frame");
                return Dispatch::Discarded;
            }
        };

        if let Some(id) = protocol::frame_id(&frame)
            && self.pending.contains(&id)
        {
            let settled = match protocol::response_outcome(frame) {
                Ok(response) => self.pending.resolve(&id, response),
                Err(e) => self.pending.reject(&id, e),
            };
            if settled {
                return Dispatch::Response(id);
            }
            // Timed out between the lookup and the settle.
            return Dispatch::Discarded;
        }

        if let Some(header) = EventHeader::from_frame(&frame) {
            return self.publish(header, frame);
        }

        if protocol::is_hello(&frame) {
            debug!("Received host greeting");
            return Dispatch::Hello;
        }

        debug!(frame = raw, "Discarding unrecognized frame");
        Dispatch::Discarded
    }

    fn publish(&self, header: EventHeader, mut frame: Value) -> Dispatch {
        let raw = RawEvent {
            source: header.source.unwrap_or_default(),
            kind: header.kind,
            data: frame
                .get_mut("data")
                .map(Value::take)
                .unwrap_or(Value::Null),
        };

        let mut keys = Vec::with_capacity(3);
        let normalized = BotEvent::normalize(&raw);
        let namespaced = raw.namespaced_key();

        let raw_event = Arc::new(BotEvent::Raw(raw));
        keys.push(self.emit(raw_event.key().to_string(), Arc::clone(&raw_event)));
        if let Some(key) = namespaced {
            keys.push(self.emit(key, raw_event));
        }
        if let Some(event) = normalized {
            keys.push(self.emit(event.key().to_string(), Arc::new(event)));
        }

        debug!(keys = ?keys, "Published event");
        Dispatch::Event { keys }
    }

    fn emit(&self, key: String, event: Arc<BotEvent>) -> String {
        // No receivers is fine
        let _ = self.events_tx.send(ClientEvent::Event {
            key: key.clone(),
            event,
        });
        key
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn dispatcher() -> (
        EventDispatcher,
        Arc<PendingRequestTable>,
        broadcast::Receiver<ClientEvent>,
    ) {
        let pending = Arc::new(PendingRequestTable::new());
        let (events_tx, events_rx) = broadcast::channel(16);
        (
            EventDispatcher::new(Arc::clone(&pending), events_tx),
            pending,
            events_rx,
        )
    }

    fn next_event(rx: &mut broadcast::Receiver<ClientEvent>) -> (String, Arc<BotEvent>) {
        match rx.try_recv() {
            Ok(ClientEvent::Event { key, event }) => (key, event),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frame_is_discarded() {
        let (dispatcher, _, mut rx) = dispatcher();
        assert_eq!(dispatcher.handle_frame("{not json"), Dispatch::Discarded);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_frame_without_id_or_event_is_discarded() {
        let (dispatcher, _, _rx) = dispatcher();
        assert_eq!(
            dispatcher.handle_frame(r#"{"status":"ok"}"#),
            Dispatch::Discarded
        );
    }

    #[test]
    fn test_hello_is_recognized() {
        let (dispatcher, _, _rx) = dispatcher();
        assert_eq!(
            dispatcher.handle_frame(r#"{"request":"Hello","info":{"name":"bot"}}"#),
            Dispatch::Hello
        );
    }

    #[tokio::test]
    async fn test_response_resolves_pending() {
        let (dispatcher, pending, _rx) = dispatcher();
        let id = RequestId::from("1-100");
        let response_rx = pending.add(id.clone(), Duration::from_secs(10)).expect("added");

        let dispatch = dispatcher.handle_frame(r#"{"id":"1-100","status":"ok","count":0}"#);
        assert_eq!(dispatch, Dispatch::Response(id));

        let response = response_rx.await.expect("sender kept").expect("ok");
        assert_eq!(response["count"], 0);
    }

    #[tokio::test]
    async fn test_error_status_rejects_pending() {
        let (dispatcher, pending, _rx) = dispatcher();
        let id = RequestId::from("2-100");
        let response_rx = pending.add(id.clone(), Duration::from_secs(10)).expect("added");

        dispatcher.handle_frame(r#"{"id":"2-100","status":"error","error":"Action not found"}"#);

        let err = response_rx.await.expect("sender kept").expect_err("remote");
        assert_eq!(err.to_string(), "Remote error: Action not found");
    }

    #[tokio::test]
    async fn test_duplicate_response_is_discarded() {
        let (dispatcher, pending, _rx) = dispatcher();
        let id = RequestId::from("3-100");
        let _response_rx = pending.add(id.clone(), Duration::from_secs(10)).expect("added");

        let frame = r#"{"id":"3-100","status":"ok"}"#;
        assert_eq!(dispatcher.handle_frame(frame), Dispatch::Response(id));
        assert_eq!(dispatcher.handle_frame(frame), Dispatch::Discarded);
    }

    #[test]
    fn test_unknown_id_with_event_is_published() {
        let (dispatcher, _, mut rx) = dispatcher();
        let dispatch = dispatcher
            .handle_frame(r#"{"id":"999","event":{"source":"General","type":"Custom"},"data":{}}"#);
        assert_eq!(
            dispatch,
            Dispatch::Event {
                keys: vec!["Custom".to_string(), "General:Custom".to_string()]
            }
        );
        assert_eq!(next_event(&mut rx).0, "Custom");
    }

    #[test]
    fn test_numeric_source_still_publishes_under_type() {
        let (dispatcher, _, mut rx) = dispatcher();
        let dispatch =
            dispatcher.handle_frame(r#"{"event":{"source":42,"type":"Custom"},"data":{"n":1}}"#);
        assert_eq!(
            dispatch,
            Dispatch::Event {
                keys: vec!["Custom".to_string()]
            }
        );
        let (key, event) = next_event(&mut rx);
        assert_eq!(key, "Custom");
        assert_eq!(event.raw().source, "");
        assert_eq!(event.raw().data["n"], 1);
    }

    #[test]
    fn test_chat_message_is_published_raw_and_normalized() {
        let (dispatcher, _, mut rx) = dispatcher();
        let frame = json!({
            "event": {"source": "Twitch", "type": "ChatMessage"},
            "data": {"message": {"message": "hi"}, "user": {"name": "bob"}}
        });

        let dispatch = dispatcher.handle_frame(&frame.to_string());
        assert_eq!(
            dispatch,
            Dispatch::Event {
                keys: vec![
                    "ChatMessage".to_string(),
                    "Twitch:ChatMessage".to_string(),
                    "chat:new".to_string(),
                ]
            }
        );

        let (key, event) = next_event(&mut rx);
        assert_eq!(key, "ChatMessage");
        assert!(matches!(&*event, BotEvent::Raw(raw) if raw.source == "Twitch"));

        let (key, _) = next_event(&mut rx);
        assert_eq!(key, "Twitch:ChatMessage");

        let (key, event) = next_event(&mut rx);
        assert_eq!(key, "chat:new");
        let BotEvent::Chat(chat) = &*event else {
            panic!("expected chat event");
        };
        assert_eq!(chat.platform, "twitch");
        assert_eq!(chat.user, "bob");
        assert_eq!(chat.text, "hi");
        assert_eq!(chat.raw.data["user"]["name"], "bob");
    }

    #[test]
    fn test_unparseable_shape_passes_through_raw() {
        let (dispatcher, _, mut rx) = dispatcher();
        let dispatch = dispatcher
            .handle_frame(r#"{"event":{"source":"Twitch","type":"Follow"},"data":{"weird":1}}"#);
        assert_eq!(
            dispatch,
            Dispatch::Event {
                keys: vec!["Follow".to_string(), "Twitch:Follow".to_string()]
            }
        );
        let (_, event) = next_event(&mut rx);
        assert_eq!(event.raw().data["weird"], 1);
    }
}
