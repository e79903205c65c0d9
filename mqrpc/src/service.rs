//! Agent-facing facade: one [`RpcEngine`] on the agent topics plus a route
//! turning room notifications into local events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use mqrpc_codec::{Codec, JsonCodec, Labels, MessageKind, QoS};
use mqrpc_conf::Settings;

use crate::error::RpcError;
use crate::event::{Event, EventBus, EventListener, EventSource};
use crate::rpc::{Handler, RpcEngine, DEDUP_CAPACITY_DEFAULT};
use crate::timeout::{race_with_timeout, DEFAULT_TIMEOUT};
use crate::transport::{Inbound, ListenerId, RouteHandler, Transport};
use crate::Result;

/// Topics derived from the agent identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTopics {
    /// Requests to this agent and replies to its calls
    pub topic_in: String,
    /// Calls made by this agent
    pub topic_out: String,
    /// Route pattern of room notifications, `roomId` names the room level
    pub notifications: String,
}

impl AgentTopics {
    pub fn new(agent_id: &str, app_name: &str, api_version: &str) -> Self {
        Self {
            topic_in: format!("agents/{agent_id}/api/{api_version}/in/{app_name}"),
            topic_out: format!("agents/{agent_id}/api/{api_version}/out/{app_name}"),
            notifications: format!("apps/{app_name}/api/{api_version}/rooms/+roomId/events"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub agent_id: String,
    pub app_name: String,
    pub api_version: String,
    pub qos: QoS,
    pub dedup_capacity: usize,
    /// Bound of [`Service::send_timeout`]
    pub request_timeout: Duration,
}

impl ServiceOptions {
    pub fn new<A: Into<String>, N: Into<String>>(agent_id: A, app_name: N) -> Self {
        Self {
            agent_id: agent_id.into(),
            app_name: app_name.into(),
            api_version: "v1".into(),
            qos: QoS::AtLeastOnce,
            dedup_capacity: DEDUP_CAPACITY_DEFAULT,
            request_timeout: DEFAULT_TIMEOUT,
        }
    }

    #[inline]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[inline]
    pub fn api_version<V: Into<String>>(mut self, version: V) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            agent_id: settings.agent.id.clone(),
            app_name: settings.agent.app_name.clone(),
            api_version: settings.agent.api_version.clone(),
            qos: settings.rpc.publish_qos,
            dedup_capacity: settings.rpc.dedup_capacity,
            request_timeout: settings.rpc.request_timeout,
        }
    }

    #[inline]
    pub fn topics(&self) -> AgentTopics {
        AgentTopics::new(&self.agent_id, &self.app_name, &self.api_version)
    }
}

struct ServiceInner {
    rpc: RpcEngine,
    bus: EventBus,
    topics: AgentTopics,
    request_timeout: Duration,
    destroyed: AtomicBool,
}

#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    #[inline]
    pub fn new(transport: Arc<dyn Transport>, agent_id: &str, app_name: &str) -> Result<Self> {
        Self::with_options(transport, ServiceOptions::new(agent_id, app_name))
    }

    pub fn with_options(transport: Arc<dyn Transport>, opts: ServiceOptions) -> Result<Self> {
        let topics = opts.topics();
        let codec: Arc<dyn Codec> = Arc::new(JsonCodec);

        let bus = EventBus::new();
        let route_bus = bus.clone();
        let route_codec = codec.clone();
        let route: RouteHandler = Arc::new(move |inbound: Inbound| {
            if let MessageKind::Event { label } = MessageKind::classify(&inbound.publish.properties) {
                let data = route_codec.decode(&inbound.publish.payload);
                let event = Event { label: label.to_string(), data, params: inbound.params };
                let n = route_bus.emit(&event);
                log::debug!("{} event {} delivered to {n} listeners", inbound.publish.topic, event.label);
            }
            async {}.boxed()
        });
        transport.attach_route(&topics.notifications, route)?;

        let rpc = RpcEngine::builder(transport.clone(), topics.topic_in.as_str(), topics.topic_out.as_str())
            .shared_codec(codec)
            .qos(opts.qos)
            .dedup_capacity(opts.dedup_capacity)
            .build();
        let rpc = match rpc {
            Ok(rpc) => rpc,
            Err(e) => {
                transport.detach_route(&topics.notifications);
                return Err(e);
            }
        };

        log::info!("service started, in: {}, out: {}", topics.topic_in, topics.topic_out);
        Ok(Self { inner: Arc::new(ServiceInner {
            rpc,
            bus,
            topics,
            request_timeout: opts.request_timeout,
            destroyed: AtomicBool::new(false),
        }) })
    }

    #[inline]
    pub fn from_settings(transport: Arc<dyn Transport>, settings: &Settings) -> Result<Self> {
        Self::with_options(transport, ServiceOptions::from_settings(settings))
    }

    #[inline]
    pub fn topics(&self) -> &AgentTopics {
        &self.inner.topics
    }

    #[inline]
    pub fn rpc(&self) -> &RpcEngine {
        &self.inner.rpc
    }

    #[inline]
    pub fn register<H: Handler>(&self, method: &str, handler: H) -> std::result::Result<(), RpcError> {
        self.inner.rpc.register(method, handler)
    }

    #[inline]
    pub fn unregister(&self, method: &str) -> std::result::Result<(), RpcError> {
        self.inner.rpc.unregister(method)
    }

    #[inline]
    pub async fn send(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        self.inner.rpc.send(method, params).await
    }

    /// [`Service::send`] bounded by the configured request timeout
    #[inline]
    pub async fn send_timeout(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        race_with_timeout(self.send(method, params), self.inner.request_timeout, Some(method)).await
    }

    #[inline]
    pub async fn call<P, R>(&self, method: &str, params: &P) -> std::result::Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.inner.rpc.call(method, params).await
    }

    #[inline]
    pub fn set_labels(&self, labels: Labels) {
        self.inner.rpc.set_labels(labels)
    }

    #[inline]
    pub fn clear_labels(&self) {
        self.inner.rpc.clear_labels()
    }

    /// Detaches the notification route, drops every local listener and destroys the engine
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.rpc.transport().detach_route(&self.inner.topics.notifications);
        self.inner.bus.clear();
        self.inner.rpc.destroy().await;
    }
}

impl EventSource for Service {
    #[inline]
    fn on(&self, label: &str, listener: EventListener) -> ListenerId {
        self.inner.bus.on(label, listener)
    }

    #[inline]
    fn off(&self, id: ListenerId) {
        self.inner.bus.off(id)
    }
}
