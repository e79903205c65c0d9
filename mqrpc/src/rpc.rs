//! Request/response correlation over a pub/sub [`Transport`].
//!
//! Every outbound call becomes a publish on the outbound topic carrying a fresh
//! correlation id and the engine's inbound topic as response topic. Replies,
//! inbound requests and engine-internal notifications all arrive on the inbound
//! topic and are told apart by their header, see [`MessageKind`].
//!
//! All mutable state sits behind one mutex that is never held across an await.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use bytestring::ByteString;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rust_box::dequemap::DequeBTreeMap as DequeMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use mqrpc_codec::header::is_success;
use mqrpc_codec::{Codec, JsonCodec, Labels, MessageKind, Publish, PublishProperties, QoS};

use crate::error::RpcError;
use crate::transport::{Inbound, Lifecycle, LifecycleListener, ListenerId, RouteHandler, Transport};
use crate::Result;

pub const DEDUP_CAPACITY_DEFAULT: usize = 100_000;

/// Serves inbound requests for one method.
///
/// By default the handler runs on the transport's delivery task, so a slow
/// handler holds back every message routed after it, replies included. Use
/// [`RpcEngineBuilder::spawn_handlers`] to run requests on their own tasks.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, params: Value) -> Value;
}

#[async_trait::async_trait]
impl<F> Handler for F
where
    F: Fn(Value) -> Value + Send + Sync + 'static,
{
    #[inline]
    async fn handle(&self, params: Value) -> Value {
        self(params)
    }
}

/// Adapts an async closure into a [`Handler`]
pub struct AsyncHandler<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> Handler for AsyncHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    #[inline]
    async fn handle(&self, params: Value) -> Value {
        (self.0)(params).await
    }
}

/// Callback for engine-internal push messages, keyed by event label
pub type Notification = Arc<dyn Fn(Value) + Send + Sync>;

type Waiter = Shared<BoxFuture<'static, std::result::Result<(), RpcError>>>;

enum SubscriptionState {
    Unsubscribed,
    Subscribing { generation: u64, done: Waiter },
    Subscribed,
}

impl SubscriptionState {
    #[inline]
    fn waiter(&self) -> Option<Waiter> {
        match self {
            SubscriptionState::Subscribing { done, .. } => Some(done.clone()),
            _ => None,
        }
    }
}

struct PendingRequest {
    method: String,
    tx: oneshot::Sender<std::result::Result<Value, RpcError>>,
}

impl PendingRequest {
    #[inline]
    fn complete(self, result: std::result::Result<Value, RpcError>) {
        if self.tx.send(result).is_err() {
            log::debug!("[{}] caller is gone", self.method);
        }
    }
}

struct State {
    pending: HashMap<ByteString, PendingRequest>,
    handlers: HashMap<String, Arc<dyn Handler>>,
    notifications: HashMap<String, Notification>,
    //inbound request ids already served, oldest first
    seen: DequeMap<ByteString, ()>,
    subscription: SubscriptionState,
    generation: u64,
    labels: Labels,
    listener: Option<ListenerId>,
    destroyed: bool,
}

struct Inner {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    topic_in: String,
    topic_out: String,
    qos: QoS,
    dedup_capacity: usize,
    spawn_handlers: bool,
    state: Mutex<State>,
}

impl Inner {
    /// Starts a subscribe of the inbound topic and records it as the one in flight.
    fn subscribe_in(self: &Arc<Self>) -> Option<Waiter> {
        let weak = Arc::downgrade(self);
        let transport = self.transport.clone();
        let topic = self.topic_in.clone();
        let qos = self.qos;

        let mut state = self.state.lock();
        if state.destroyed {
            return None;
        }
        state.generation += 1;
        let generation = state.generation;

        let done = async move {
            let res = transport.subscribe(&topic, qos).await.map_err(RpcError::from);
            match &res {
                Ok(()) => log::debug!("{topic} subscribed"),
                Err(e) => log::warn!("{topic} subscribe failed, {e}"),
            }
            let destroyed = match weak.upgrade() {
                Some(inner) => {
                    let mut state = inner.state.lock();
                    if matches!(state.subscription, SubscriptionState::Subscribing { generation: g, .. } if g == generation)
                    {
                        state.subscription =
                            if res.is_ok() { SubscriptionState::Subscribed } else { SubscriptionState::Unsubscribed };
                    }
                    state.destroyed
                }
                None => true,
            };
            //torn down while the subscribe was in flight
            if destroyed && res.is_ok() {
                if let Err(e) = transport.unsubscribe(&topic).await {
                    log::warn!("{topic} unsubscribe failed, {e}");
                }
            }
            res
        }
        .boxed()
        .shared();
        state.subscription = SubscriptionState::Subscribing { generation, done: done.clone() };
        drop(state);

        //drive the subscribe even when no call is waiting on it
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(done.clone());
        }
        Some(done)
    }

    /// Removes the pending request and completes it. The only way a call settles.
    #[inline]
    fn settle(&self, id: &ByteString, result: std::result::Result<Value, RpcError>) -> bool {
        let req = self.state.lock().pending.remove(id);
        match req {
            Some(req) => {
                req.complete(result);
                true
            }
            None => false,
        }
    }

    fn discard_all(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.subscription = SubscriptionState::Unsubscribed;
            std::mem::take(&mut state.pending)
        };
        if !pending.is_empty() {
            log::info!("{} connection closed, discarding {} pending requests", self.topic_in, pending.len());
        }
        for (_, req) in pending {
            let err = RpcError::service(format!("[{}] Connection closed", req.method));
            req.complete(Err(err));
        }
    }

    async fn handle_inbound(self: Arc<Self>, inbound: Inbound) {
        let publish = inbound.publish;
        let payload = self.codec.decode(&publish.payload);
        let kind = MessageKind::classify(&publish.properties);
        log::debug!("{} inbound {}", publish.topic, kind.type_name());
        match kind {
            MessageKind::Response { correlation_id, status } => {
                let result = if is_success(status) { Ok(payload) } else { Err(RpcError::Response { status, payload }) };
                if !self.settle(&correlation_id, result) {
                    log::debug!("{correlation_id} is not pending, response dropped");
                }
            }
            MessageKind::Request { correlation_id, method, response_topic } => {
                let handle = if self.spawn_handlers { tokio::runtime::Handle::try_current().ok() } else { None };
                match handle {
                    Some(handle) => {
                        handle.spawn(async move {
                            self.handle_request(correlation_id, method, response_topic, payload).await
                        });
                    }
                    None => self.handle_request(correlation_id, method, response_topic, payload).await,
                }
            }
            MessageKind::Event { label } => {
                let notification = self.state.lock().notifications.get(&*label).cloned();
                if let Some(notification) = notification {
                    notification(payload);
                }
            }
            MessageKind::Unknown => {}
        }
    }

    async fn handle_request(
        &self,
        correlation_id: ByteString,
        method: ByteString,
        response_topic: Option<ByteString>,
        payload: Value,
    ) {
        let handler = {
            let mut state = self.state.lock();
            let handler = match state.handlers.get(&*method) {
                Some(h) => h.clone(),
                None => {
                    log::debug!("[{method}] no handler, request {correlation_id} dropped");
                    return;
                }
            };
            if state.seen.contains_key(&correlation_id) {
                log::debug!("[{method}] request {correlation_id} already served");
                return;
            }
            state.seen.insert(correlation_id.clone(), ());
            if self.dedup_capacity > 0 {
                while state.seen.len() > self.dedup_capacity {
                    state.seen.pop_front();
                }
            }
            handler
        };

        let result = handler.handle(payload).await;

        let response_topic = match response_topic {
            Some(t) if !t.is_empty() => t,
            _ => {
                log::warn!("[{method}] request {correlation_id} has no response topic");
                return;
            }
        };
        let labels = self.state.lock().labels.clone();
        let properties = PublishProperties::response(&correlation_id, &labels);
        let publish = Publish::new(response_topic, self.codec.encode(&result), properties).qos(self.qos);
        if let Err(e) = self.transport.publish(publish).await {
            log::warn!("[{method}] response {correlation_id} publish failed, {e}");
        }
    }
}

/// Correlates outbound calls with their replies and serves inbound calls.
///
/// Cloning is cheap, every clone drives the same engine.
#[derive(Clone)]
pub struct RpcEngine {
    inner: Arc<Inner>,
}

impl fmt::Debug for RpcEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEngine")
            .field("topic_in", &self.inner.topic_in)
            .field("topic_out", &self.inner.topic_out)
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl RpcEngine {
    #[inline]
    pub fn builder<I, O>(transport: Arc<dyn Transport>, topic_in: I, topic_out: O) -> RpcEngineBuilder
    where
        I: Into<String>,
        O: Into<String>,
    {
        RpcEngineBuilder::new(transport, topic_in.into(), topic_out.into())
    }

    /// Calls `method` on the peer and waits for its reply.
    ///
    /// Fails right away when the transport is disconnected. If a subscribe of the
    /// inbound topic is in flight the publish waits for it. Dropping the returned
    /// future forgets the request.
    pub async fn send(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        let inner = &self.inner;
        if !inner.transport.is_connected() {
            return Err(RpcError::service(format!("[{method}] Client disconnected")));
        }

        let id = ByteString::from(Uuid::new_v4().to_string());
        let payload = inner.codec.encode(&params);
        let (tx, rx) = oneshot::channel();
        let (properties, waiter) = {
            let mut state = inner.state.lock();
            if state.destroyed {
                return Err(RpcError::service(format!("[{method}] Service destroyed")));
            }
            let properties = PublishProperties::request(&id, &inner.topic_in, method, &state.labels);
            state.pending.insert(id.clone(), PendingRequest { method: method.to_owned(), tx });
            (properties, state.subscription.waiter())
        };
        let _pending = scopeguard::guard(id.clone(), |id| {
            inner.state.lock().pending.remove(&id);
        });

        let ready = match waiter {
            Some(waiter) => waiter.await,
            None => Ok(()),
        };
        match ready {
            //already failed, for example by a close while the subscribe was in flight
            Ok(()) if !inner.state.lock().pending.contains_key(&id) => {
                log::debug!("[{method}] request {id} settled before publish");
            }
            Ok(()) => {
                let publish = Publish::new(inner.topic_out.as_str(), payload, properties).qos(inner.qos);
                log::debug!("[{method}] request {id} to {}", inner.topic_out);
                if let Err(e) = inner.transport.publish(publish).await {
                    inner.settle(&id, Err(RpcError::from(e)));
                }
            }
            Err(e) => {
                inner.settle(&id, Err(e));
            }
        }

        match rx.await {
            Ok(res) => res,
            Err(_) => Err(RpcError::service(format!("[{method}] Request discarded"))),
        }
    }

    /// [`RpcEngine::send`] with serde conversions on both ends
    pub async fn call<P, R>(&self, method: &str, params: &P) -> std::result::Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| RpcError::service(format!("[{method}] {e}")))?;
        let reply = self.send(method, params).await?;
        serde_json::from_value(reply).map_err(|e| RpcError::service(format!("[{method}] {e}")))
    }

    /// Publishes an `event` message with `label` to an arbitrary topic
    pub async fn broadcast(&self, topic: &str, label: &str, params: Value) -> std::result::Result<(), RpcError> {
        let inner = &self.inner;
        if !inner.transport.is_connected() {
            return Err(RpcError::service(format!("[{label}] Client disconnected")));
        }
        let properties = PublishProperties::event(label, &inner.state.lock().labels);
        let publish = Publish::new(topic, inner.codec.encode(&params), properties).qos(inner.qos);
        inner.transport.publish(publish).await.map_err(RpcError::from)
    }

    /// Waits for the in-flight subscribe of the inbound topic and reports its outcome
    pub async fn ready(&self) -> std::result::Result<(), RpcError> {
        let waiter = {
            let state = self.inner.state.lock();
            match &state.subscription {
                SubscriptionState::Subscribed => return Ok(()),
                SubscriptionState::Unsubscribed => {
                    return Err(RpcError::service(format!("[{}] Not subscribed", self.inner.topic_in)))
                }
                SubscriptionState::Subscribing { done, .. } => done.clone(),
            }
        };
        waiter.await
    }

    pub fn register<H: Handler>(&self, method: &str, handler: H) -> std::result::Result<(), RpcError> {
        let mut state = self.inner.state.lock();
        if state.handlers.contains_key(method) {
            return Err(RpcError::service(format!("Method {method} is already registered")));
        }
        state.handlers.insert(method.to_owned(), Arc::new(handler));
        Ok(())
    }

    pub fn unregister(&self, method: &str) -> std::result::Result<(), RpcError> {
        match self.inner.state.lock().handlers.remove(method) {
            Some(_) => Ok(()),
            None => Err(RpcError::service(format!("Method {method} was not registered"))),
        }
    }

    /// Registers the callback for engine-internal `event` messages with `label`, replacing any previous one
    pub fn on_notification<F>(&self, label: &str, f: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner.state.lock().notifications.insert(label.to_owned(), Arc::new(f));
    }

    #[inline]
    pub fn off_notification(&self, label: &str) -> bool {
        self.inner.state.lock().notifications.remove(label).is_some()
    }

    /// Replaces the labels merged into every message published from now on
    #[inline]
    pub fn set_labels(&self, labels: Labels) {
        self.inner.state.lock().labels = labels;
    }

    #[inline]
    pub fn clear_labels(&self) {
        self.inner.state.lock().labels = Labels::default();
    }

    #[inline]
    pub fn labels(&self) -> Labels {
        self.inner.state.lock().labels.clone()
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    #[inline]
    pub fn is_subscribed(&self) -> bool {
        matches!(self.inner.state.lock().subscription, SubscriptionState::Subscribed)
    }

    #[inline]
    pub fn topic_in(&self) -> &str {
        &self.inner.topic_in
    }

    #[inline]
    pub fn topic_out(&self) -> &str {
        &self.inner.topic_out
    }

    #[inline]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    #[inline]
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.inner.codec
    }

    /// Detaches from the transport and drops all state. Calling it again does nothing.
    ///
    /// Calls still pending fail with a service error. A subscribe still in
    /// flight is awaited before the inbound topic is unsubscribed.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        let (listener, pending, waiter) = {
            let mut state = inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.labels = Labels::default();
            state.handlers.clear();
            state.notifications.clear();
            state.seen = DequeMap::default();
            let waiter = std::mem::replace(&mut state.subscription, SubscriptionState::Unsubscribed).waiter();
            (state.listener.take(), std::mem::take(&mut state.pending), waiter)
        };
        drop(pending);

        if let Some(id) = listener {
            inner.transport.off(id);
        }
        inner.transport.detach_route(&inner.topic_in);
        if let Some(waiter) = waiter {
            let _ = waiter.await;
        }
        if let Err(e) = inner.transport.unsubscribe(&inner.topic_in).await {
            log::warn!("{} unsubscribe failed, {e}", inner.topic_in);
        }
        log::debug!("{} rpc engine destroyed", inner.topic_in);
    }
}

pub struct RpcEngineBuilder {
    transport: Arc<dyn Transport>,
    topic_in: String,
    topic_out: String,
    codec: Arc<dyn Codec>,
    qos: QoS,
    dedup_capacity: usize,
    spawn_handlers: bool,
    notifications: HashMap<String, Notification>,
}

impl RpcEngineBuilder {
    fn new(transport: Arc<dyn Transport>, topic_in: String, topic_out: String) -> Self {
        Self {
            transport,
            topic_in,
            topic_out,
            codec: Arc::new(JsonCodec),
            qos: QoS::AtLeastOnce,
            dedup_capacity: DEDUP_CAPACITY_DEFAULT,
            spawn_handlers: false,
            notifications: HashMap::new(),
        }
    }

    #[inline]
    pub fn codec<C: Codec>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    #[inline]
    pub fn shared_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    #[inline]
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Maximum number of remembered inbound request ids, 0 keeps all of them
    #[inline]
    pub fn dedup_capacity(mut self, cap: usize) -> Self {
        self.dedup_capacity = cap;
        self
    }

    /// Runs each inbound request on its own task of the current runtime,
    /// so inbound delivery does not wait for handlers
    #[inline]
    pub fn spawn_handlers(mut self, spawn: bool) -> Self {
        self.spawn_handlers = spawn;
        self
    }

    #[inline]
    pub fn notification<F>(mut self, label: &str, f: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.notifications.insert(label.to_owned(), Arc::new(f));
        self
    }

    /// Takes publish QoS and dedup capacity from the `rpc` configuration section
    #[inline]
    pub fn settings(self, rpc: &mqrpc_conf::Rpc) -> Self {
        self.qos(rpc.publish_qos).dedup_capacity(rpc.dedup_capacity)
    }

    /// Attaches the inbound route and lifecycle listener, and subscribes right
    /// away when the transport is already connected
    pub fn build(self) -> Result<RpcEngine> {
        let inner = Arc::new(Inner {
            transport: self.transport,
            codec: self.codec,
            topic_in: self.topic_in,
            topic_out: self.topic_out,
            qos: self.qos,
            dedup_capacity: self.dedup_capacity,
            spawn_handlers: self.spawn_handlers,
            state: Mutex::new(State {
                pending: HashMap::new(),
                handlers: HashMap::new(),
                notifications: self.notifications,
                seen: DequeMap::default(),
                subscription: SubscriptionState::Unsubscribed,
                generation: 0,
                labels: Labels::default(),
                listener: None,
                destroyed: false,
            }),
        });

        let weak = Arc::downgrade(&inner);
        let route: RouteHandler = Arc::new(move |inbound: Inbound| {
            let weak: Weak<Inner> = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_inbound(inbound).await;
                }
            }
            .boxed()
        });
        inner.transport.attach_route(&inner.topic_in, route)?;

        let weak = Arc::downgrade(&inner);
        let listener: LifecycleListener = Arc::new(move |event: Lifecycle| {
            if let Some(inner) = weak.upgrade() {
                log::debug!("{} transport {event}", inner.topic_in);
                match event {
                    Lifecycle::Connect => {
                        let _ = inner.subscribe_in();
                    }
                    Lifecycle::Close => inner.discard_all(),
                }
            }
        });
        let id = inner.transport.on(listener);
        inner.state.lock().listener = Some(id);

        if inner.transport.is_connected() {
            let _ = inner.subscribe_in();
        }

        Ok(RpcEngine { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use bytes::Bytes;
    use serde_json::json;

    const IN: &str = "agents/a/api/v1/in/app";
    const OUT: &str = "agents/a/api/v1/out/app";

    fn engine() -> (MemoryTransport, RpcEngine) {
        let transport = MemoryTransport::new();
        transport.connect();
        let engine = RpcEngine::builder(Arc::new(transport.clone()), IN, OUT).build().unwrap();
        (transport, engine)
    }

    fn request(id: &str, method: &str) -> Publish {
        let props = PublishProperties::request(id, "reply/topic", method, &Labels::default());
        Publish::new(IN, Bytes::from_static(b"{\"x\":1}"), props)
    }

    #[tokio::test]
    async fn test_subscribes_when_connected() {
        let (transport, engine) = engine();
        engine.ready().await.unwrap();
        assert!(engine.is_subscribed());
        assert_eq!(transport.subscriptions(), vec![IN.to_string()]);
        assert_eq!(transport.route_count(), 1);
    }

    #[tokio::test]
    async fn test_not_subscribed_while_disconnected() {
        let transport = MemoryTransport::new();
        let engine = RpcEngine::builder(Arc::new(transport.clone()), IN, OUT).build().unwrap();
        assert_eq!(transport.subscribe_count(), 0);
        assert!(engine.ready().await.unwrap_err().is_service());

        transport.connect();
        engine.ready().await.unwrap();
        assert_eq!(transport.subscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_dedup_guard_is_bounded() {
        let transport = MemoryTransport::new();
        transport.connect();
        let engine =
            RpcEngine::builder(Arc::new(transport.clone()), IN, OUT).dedup_capacity(2).build().unwrap();
        let calls = Arc::new(Mutex::new(0usize));
        let c = calls.clone();
        engine
            .register("count", move |_p: Value| {
                *c.lock() += 1;
                Value::Null
            })
            .unwrap();

        for id in ["r1", "r2", "r3", "r1"] {
            transport.deliver(request(id, "count")).await;
        }
        //r1 was evicted by r3, so its redelivery runs the handler again
        assert_eq!(*calls.lock(), 4);

        transport.deliver(request("r3", "count")).await;
        assert_eq!(*calls.lock(), 4);
    }

    #[tokio::test]
    async fn test_notification() {
        let transport = MemoryTransport::new();
        transport.connect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let engine = RpcEngine::builder(Arc::new(transport.clone()), IN, OUT)
            .notification("agent.ping", move |v| s.lock().push(v))
            .build()
            .unwrap();

        let event = |label: &str| {
            Publish::new(IN, Bytes::from_static(b"[1,2]"), PublishProperties::event(label, &Labels::default()))
        };
        transport.deliver(event("agent.ping")).await;
        transport.deliver(event("agent.other")).await;
        assert_eq!(*seen.lock(), vec![json!([1, 2])]);

        assert!(engine.off_notification("agent.ping"));
        assert!(!engine.off_notification("agent.ping"));
        transport.deliver(event("agent.ping")).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_async_handler() {
        let (transport, engine) = engine();
        engine
            .register(
                "double",
                AsyncHandler(|p: Value| async move { json!(p["x"].as_i64().unwrap_or_default() * 2) }),
            )
            .unwrap();
        transport.deliver(request("r1", "double")).await;
        let reply = transport.last_published().unwrap();
        assert_eq!(reply.topic, "reply/topic");
        assert_eq!(engine.codec().decode(&reply.payload), json!(2));
        assert_eq!(reply.properties.correlation_id(), Some(ByteString::from("r1")));
    }

    #[tokio::test]
    async fn test_request_without_response_topic() {
        let (transport, engine) = engine();
        let calls = Arc::new(Mutex::new(0usize));
        let c = calls.clone();
        engine
            .register("noop", move |p: Value| {
                *c.lock() += 1;
                p
            })
            .unwrap();
        let mut req = request("r1", "noop");
        req.properties.response_topic = None;
        transport.deliver(req).await;
        assert_eq!(*calls.lock(), 1);
        assert!(transport.published().is_empty());
    }
}
