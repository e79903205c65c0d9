//! Typed client of the conference backend on top of [`Service`].
//!
//! Every method is a plain [`Service::send`] of the matching backend method.
//! Unset optional parameters are left out of the request payload.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::RpcError;
use crate::event::{Event, EventListener, EventSource};
use crate::service::{Service, ServiceOptions};
use crate::timeout::wait_for_event;
use crate::transport::{ListenerId, Transport};
use crate::Result;

pub const APP_NAME: &str = "conference";

/// Room notification labels
pub mod events {
    pub const ROOM_ENTER: &str = "room.enter";
    pub const ROOM_LEAVE: &str = "room.leave";
    pub const RTC_STREAM_UPDATE: &str = "rtc_stream.update";
}

/// Time range as `[start, end]` unix seconds
pub type TimeRange = (i64, i64);

/// Pagination of list methods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Page {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl Page {
    #[inline]
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit: Some(limit), offset: Some(offset) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RtcStreamFilter {
    #[serde(flatten)]
    pub page: Page,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeRange>,
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
    backend: Option<&'a str>,
    time: TimeRange,
}

#[derive(Serialize)]
struct RoomUpdate<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    audience: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<TimeRange>,
}

#[derive(Serialize)]
struct RoomList<'a, F: Serialize> {
    room_id: &'a str,
    #[serde(flatten)]
    filter: &'a F,
}

#[derive(Serialize)]
struct RtcSignal<'a> {
    handle_id: &'a str,
    jsep: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
}

#[derive(Serialize)]
struct Message<'a> {
    room_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<&'a str>,
    data: &'a Value,
}

#[derive(Clone)]
pub struct Conference {
    service: Service,
}

impl Conference {
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
        backend: Option<&str>,
    ) -> std::result::Result<Value, RpcError> {
        self.request("room.create", &RoomCreate { audience, backend, time }).await
    }

    #[inline]
    pub async fn read_room(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("room.read", &ById { id }).await
    }

    pub async fn update_room(
        &self,
        id: &str,
        audience: Option<&str>,
        time: Option<TimeRange>,
    ) -> std::result::Result<Value, RpcError> {
        self.request("room.update", &RoomUpdate { id, audience, time }).await
    }

    #[inline]
    pub async fn delete_room(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("room.delete", &ById { id }).await
    }

    #[inline]
    pub async fn enter_room(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("room.enter", &ById { id }).await
    }

    /// Enters the room and waits for the `room.enter` notification of `agent_id`.
    ///
    /// Fails with the call's error if entering fails, or with a timeout error
    /// when no confirmation arrives within `timeout`.
    pub async fn enter_room_confirmed(
        &self,
        id: &str,
        agent_id: &str,
        timeout: Duration,
    ) -> std::result::Result<Event, RpcError> {
        let agent_id = agent_id.to_owned();
        let filter = move |e: &Event| e.data.get("agent_id").and_then(Value::as_str) == Some(agent_id.as_str());
        wait_for_event(self, events::ROOM_ENTER, filter, self.enter_room(id), timeout, Some(events::ROOM_ENTER)).await
    }

    #[inline]
    pub async fn leave_room(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("room.leave", &ById { id }).await
    }

    #[inline]
    pub async fn list_agents(&self, room_id: &str, page: Page) -> std::result::Result<Value, RpcError> {
        self.request("agent.list", &RoomList { room_id, filter: &page }).await
    }

    #[inline]
    pub async fn create_rtc(&self, room_id: &str) -> std::result::Result<Value, RpcError> {
        self.request("rtc.create", &ByRoom { room_id }).await
    }

    #[inline]
    pub async fn read_rtc(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("rtc.read", &ById { id }).await
    }

    #[inline]
    pub async fn list_rtc(&self, room_id: &str, page: Page) -> std::result::Result<Value, RpcError> {
        self.request("rtc.list", &RoomList { room_id, filter: &page }).await
    }

    #[inline]
    pub async fn connect_rtc(&self, id: &str) -> std::result::Result<Value, RpcError> {
        self.request("rtc.connect", &ById { id }).await
    }

    pub async fn list_rtc_streams(
        &self,
        room_id: &str,
        filter: &RtcStreamFilter,
    ) -> std::result::Result<Value, RpcError> {
        self.request("rtc_stream.list", &RoomList { room_id, filter }).await
    }

    pub async fn create_rtc_signal(
        &self,
        handle_id: &str,
        jsep: &Value,
        label: Option<&str>,
    ) -> std::result::Result<Value, RpcError> {
        self.request("rtc_signal.create", &RtcSignal { handle_id, jsep, label }).await
    }

    /// Sends `data` to every agent in the room
    #[inline]
    pub async fn broadcast_message(&self, room_id: &str, data: &Value) -> std::result::Result<Value, RpcError> {
        self.request("message.broadcast", &Message { room_id, agent_id: None, data }).await
    }

    /// Sends `data` to one agent in the room
    #[inline]
    pub async fn unicast_message(
        &self,
        room_id: &str,
        agent_id: &str,
        data: &Value,
    ) -> std::result::Result<Value, RpcError> {
        self.request("message.unicast", &Message { room_id, agent_id: Some(agent_id), data }).await
    }

    #[inline]
    async fn request<P: Serialize>(&self, method: &str, params: &P) -> std::result::Result<Value, RpcError> {
        self.service.call(method, params).await
    }
}

impl Deref for Conference {
    type Target = Service;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.service
    }
}

impl EventSource for Conference {
    #[inline]
    fn on(&self, label: &str, listener: EventListener) -> ListenerId {
        self.service.on(label, listener)
    }

    #[inline]
    fn off(&self, id: ListenerId) {
        self.service.off(id)
    }
}
