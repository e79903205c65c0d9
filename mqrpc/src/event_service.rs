//! Typed client of the event backend: rooms, events, state and editions.
//!
//! Like [`crate::conference::Conference`], every method is a plain call of the
//! matching backend method with unset options left out of the payload.

use std::ops::Deref;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::conference::{Page, TimeRange};
use crate::error::RpcError;
use crate::event::{EventListener, EventSource};
use crate::service::{Service, ServiceOptions};
use crate::transport::{ListenerId, Transport};
use crate::Result;

pub const APP_NAME: &str = "event";

/// Room notification labels
pub mod events {
    pub const AGENT_UPDATE: &str = "agent.update";
    pub const EVENT_CREATE: &str = "event.create";
    pub const ROOM_ENTER: &str = "room.enter";
    pub const ROOM_LEAVE: &str = "room.leave";
}

/// Kind of change recorded in an edition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Addition,
    Modification,
    Removal,
}

impl ChangeType {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Addition => "addition",
            ChangeType::Modification => "modification",
            ChangeType::Removal => "removal",
        }
    }
}

/// Fields of `room.update`, only the set ones are sent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoomChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_claim: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_persistent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_occurred_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_occurred_at: Option<i64>,
}

/// Cursor of `edition.list` and `change.list`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CreatedFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

#[derive(Serialize)]
struct ById<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct ByRoom<'a> {
    room_id: &'a str,
}

#[derive(Serialize)]
struct RoomCreate<'a> {
    audience: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a Value>,
    time: TimeRange,
}

#[derive(Serialize)]
struct RoomUpdate<'a> {
    id: &'a str,
    #[serde(flatten)]
    changes: &'a RoomChanges,
}

#[derive(Serialize)]
struct Filtered<'a, K: Serialize, F: Serialize> {
    #[serde(flatten)]
    key: K,
    #[serde(flatten)]
    filter: &'a F,
}

#[derive(Serialize)]
struct AgentUpdate<'a> {
    account_id: &'a str,
    room_id: &'a str,
    value: bool,
}

#[derive(Serialize)]
struct EventCreate<'a> {
    data: &'a Value,
    room_id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(flatten)]
    opts: &'a EventOptions,
}

#[derive(Serialize)]
struct StateRead<'a> {
    room_id: &'a str,
    sets: &'a [&'a str],
    #[serde(flatten)]
    filter: &'a StateFilter,
}

#[derive(Serialize)]
struct ChangeCreate<'a> {
    edition_id: &'a str,
    event: &'a Value,
    #[serde(rename = "type")]
    kind: ChangeType,
}

#[derive(Clone)]
pub struct EventService {
    service: Service,
}

impl EventService {
    #[inline]
    pub fn new(transport: Arc<dyn Transport>, agent_id: &str) -> Result<Self> {
        Self::with_options(transport, ServiceOptions::new(agent_id, APP_NAME))
    }

    #[inline]
    pub fn with_options(transport: Arc<dyn Transport>, opts: ServiceOptions) -> Result<Self> {
        Ok(Self { service: Service::with_options(transport, opts)? })
    }

    #[inline]
    pub fn service(&self) -> &Service {
        &self.service
    }

    pub async fn create_room(
        &self,
        audience: &str,
        time: TimeRange,
        tags: Option<&Value>,
    ) -> std::result::Result<Value, RpcError> {
        self.request("room.create", &RoomCreate { audience, tags, time }).await
    }

    #[inline]
    pub async fn read_room(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("room.read", &ById { id }).await
    }

    #[inline]
    pub async fn update_room(&self, id: &str, changes: &RoomChanges) -> std::result::Result<Value, RpcError> {
        self.request("room.update", &RoomUpdate { id, changes }).await
    }

    #[inline]
    pub async fn enter_room(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("room.enter", &ById { id }).await
    }

    #[inline]
    pub async fn leave_room(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("room.leave", &ById { id }).await
    }

    #[inline]
    pub async fn list_agents(&self, room_id: &str, page: Page) -> std::result::Result<Value, RpcError> {
        self.request("agent.list", &Filtered { key: ByRoom { room_id }, filter: &page }).await
    }

    /// Bans (`value` true) or un-bans an account in the room
    pub async fn update_agent(
        &self,
        room_id: &str,
        account_id: &str,
        value: bool,
    ) -> std::result::Result<Value, RpcError> {
        self.request("agent.update", &AgentUpdate { account_id, room_id, value }).await
    }

    pub async fn create_event(
        &self,
        room_id: &str,
        kind: &str,
        data: &Value,
        opts: &EventOptions,
    ) -> std::result::Result<Value, RpcError> {
        self.request("event.create", &EventCreate { data, room_id, kind, opts }).await
    }

    #[inline]
    pub async fn list_events(&self, room_id: &str, filter: &EventFilter) -> std::result::Result<Value, RpcError> {
        self.request("event.list", &Filtered { key: ByRoom { room_id }, filter }).await
    }

    /// Reads the current state of `sets` in the room
    pub async fn read_state(
        &self,
        room_id: &str,
        sets: &[&str],
        filter: &StateFilter,
    ) -> std::result::Result<Value, RpcError> {
        self.request("state.read", &StateRead { room_id, sets, filter }).await
    }

    #[inline]
    pub async fn create_edition(&self, room_id: &str) -> std::result::Result<Value, RpcError> {
        self.request("edition.create", &ByRoom { room_id }).await
    }

    pub async fn list_editions(
        &self,
        room_id: &str,
        filter: &CreatedFilter,
    ) -> std::result::Result<Value, RpcError> {
        self.request("edition.list", &Filtered { key: ByRoom { room_id }, filter }).await
    }

    #[inline]
    pub async fn delete_edition(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("edition.delete", &ById { id }).await
    }

    #[inline]
    pub async fn commit_edition(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("edition.commit", &ById { id }).await
    }

    pub async fn create_change(
        &self,
        edition_id: &str,
        kind: ChangeType,
        event: &Value,
    ) -> std::result::Result<Value, RpcError> {
        self.request("change.create", &ChangeCreate { edition_id, event, kind }).await
    }

    /// Lists the changes of edition `id`
    #[inline]
    pub async fn list_changes(&self, id: &str, filter: &CreatedFilter) -> std::result::Result<Value, RpcError> {
        self.request("change.list", &Filtered { key: ById { id }, filter }).await
    }

    #[inline]
    pub async fn delete_change(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("change.delete", &ById { id }).await
    }

    #[inline]
    async fn request<P: Serialize>(&self, method: &str, params: &P) -> std::result::Result<Value, RpcError> {
        self.service.call(method, params).await
    }
}

impl Deref for EventService {
    type Target = Service;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.service
    }
}

impl EventSource for EventService {
    #[inline]
    fn on(&self, label: &str, listener: EventListener) -> ListenerId {
        self.service.on(label, listener)
    }

    #[inline]
    fn off(&self, id: ListenerId) {
        self.service.off(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::memory::MemoryTransport;
    use bytestring::ByteString;
    use mqrpc_codec::{header, Codec, JsonCodec, Labels, Publish, PublishProperties};
    use parking_lot::Mutex;
    use serde_json::json;

    async fn event_service() -> (MemoryTransport, EventService) {
        let transport = MemoryTransport::new();
        transport.connect();
        let service = EventService::new(Arc::new(transport.clone()), "web.alpha").unwrap();
        service.rpc().ready().await.unwrap();
        (transport, service)
    }

    /// Answers the next published request with an empty object, returns its method and params
    async fn answer<F>(transport: &MemoryTransport, call: F) -> (String, Value)
    where
        F: std::future::Future<Output = std::result::Result<Value, RpcError>> + Send + 'static,
    {
        let call = tokio::spawn(call);
        let request = loop {
            if let Some(p) = transport.last_published() {
                break p;
            }
            tokio::task::yield_now().await;
        };
        transport.clear_published();
        let props = &request.properties;
        let method = props.user_property(header::METHOD).map(|m| m.to_string()).unwrap_or_default();
        let id = props.correlation_id().unwrap();
        transport
            .deliver(Publish::new(
                props.response_topic.clone().unwrap_or_else(|| ByteString::from_static("")),
                JsonCodec.encode(&json!({})),
                PublishProperties::response(&id, &Labels::default()),
            ))
            .await;
        assert_eq!(call.await.unwrap().unwrap(), json!({}));
        (method, JsonCodec.decode(&request.payload))
    }

    #[tokio::test]
    async fn test_room_and_agent_methods() {
        let (transport, service) = event_service().await;
        assert_eq!(service.topics().topic_out, "agents/web.alpha/api/v1/out/event");

        let s = service.clone();
        let (method, params) = answer(&transport, async move { s.create_room("example.org", (10, 20), None).await }).await;
        assert_eq!(method, "room.create");
        assert_eq!(params, json!({"audience": "example.org", "time": [10, 20]}));

        let s = service.clone();
        let changes = RoomChanges { tags: Some(json!({"topic": "math"})), time: None };
        let (method, params) = answer(&transport, async move { s.update_room("room-1", &changes).await }).await;
        assert_eq!(method, "room.update");
        assert_eq!(params, json!({"id": "room-1", "tags": {"topic": "math"}}));

        let s = service.clone();
        let (method, params) =
            answer(&transport, async move { s.update_agent("room-1", "acc.example.org", true).await }).await;
        assert_eq!(method, "agent.update");
        assert_eq!(params, json!({"account_id": "acc.example.org", "room_id": "room-1", "value": true}));

        let s = service.clone();
        let (method, params) =
            answer(&transport, async move { s.list_agents("room-1", Page { limit: Some(5), offset: None }).await })
                .await;
        assert_eq!(method, "agent.list");
        assert_eq!(params, json!({"room_id": "room-1", "limit": 5}));
    }

    #[tokio::test]
    async fn test_event_and_state_methods() {
        let (transport, service) = event_service().await;

        let s = service.clone();
        let opts = EventOptions { is_claim: Some(true), set: Some("layout".into()), ..Default::default() };
        let (method, params) = answer(&transport, async move {
            s.create_event("room-1", "layout", &json!({"name": "grid"}), &opts).await
        })
        .await;
        assert_eq!(method, "event.create");
        assert_eq!(
            params,
            json!({"data": {"name": "grid"}, "room_id": "room-1", "type": "layout", "is_claim": true, "set": "layout"})
        );

        let s = service.clone();
        let filter = EventFilter { kind: Some("message".into()), last_occurred_at: Some(42), ..Default::default() };
        let (method, params) = answer(&transport, async move { s.list_events("room-1", &filter).await }).await;
        assert_eq!(method, "event.list");
        assert_eq!(params, json!({"room_id": "room-1", "type": "message", "last_occurred_at": 42}));

        let s = service.clone();
        let (method, params) = answer(&transport, async move {
            s.read_state("room-1", &["layout", "pin"], &StateFilter { limit: Some(10), ..Default::default() }).await
        })
        .await;
        assert_eq!(method, "state.read");
        assert_eq!(params, json!({"room_id": "room-1", "sets": ["layout", "pin"], "limit": 10}));
    }

    #[tokio::test]
    async fn test_edition_and_change_methods() {
        let (transport, service) = event_service().await;

        let s = service.clone();
        let (method, params) = answer(&transport, async move { s.create_edition("room-1").await }).await;
        assert_eq!(method, "edition.create");
        assert_eq!(params, json!({"room_id": "room-1"}));

        let s = service.clone();
        let filter = CreatedFilter { last_created_at: Some(7), limit: None };
        let (method, params) = answer(&transport, async move { s.list_editions("room-1", &filter).await }).await;
        assert_eq!(method, "edition.list");
        assert_eq!(params, json!({"room_id": "room-1", "last_created_at": 7}));

        let s = service.clone();
        let (method, params) = answer(&transport, async move { s.commit_edition("ed-1").await }).await;
        assert_eq!(method, "edition.commit");
        assert_eq!(params, json!({"id": "ed-1"}));

        let s = service.clone();
        let (method, params) = answer(&transport, async move {
            s.create_change("ed-1", ChangeType::Modification, &json!({"id": "ev-1"})).await
        })
        .await;
        assert_eq!(method, "change.create");
        assert_eq!(params, json!({"edition_id": "ed-1", "event": {"id": "ev-1"}, "type": "modification"}));

        let s = service.clone();
        let (method, params) =
            answer(&transport, async move { s.list_changes("ed-1", &CreatedFilter::default()).await }).await;
        assert_eq!(method, "change.list");
        assert_eq!(params, json!({"id": "ed-1"}));

        let s = service.clone();
        let (method, _) = answer(&transport, async move { s.delete_change("ch-1").await }).await;
        assert_eq!(method, "change.delete");
        assert_eq!(ChangeType::Removal.as_str(), "removal");
    }

    #[tokio::test]
    async fn test_room_notifications() {
        let (transport, service) = event_service().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        service.on(events::EVENT_CREATE, Arc::new(move |e: &Event| s.lock().push(e.clone())));

        transport
            .deliver(Publish::new(
                "apps/event/api/v1/rooms/room-1/events",
                JsonCodec.encode(&json!({"type": "message"})),
                PublishProperties::event(events::EVENT_CREATE, &Labels::default()),
            ))
            .await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].param("roomId"), Some("room-1"));
    }
}
