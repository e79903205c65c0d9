//! In-process broker and client implementing [`Transport`].
//!
//! Messages published by one client are routed to every connected client holding
//! a matching subscription, and then to the routes attached on that client.
//! Delivery happens inline on the publishing task, so a request, its handler and
//! the reply all complete within one `publish` call.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;

use mqrpc_codec::{Publish, QoS};

use crate::topic::TopicFilter;
use crate::transport::{Inbound, Lifecycle, LifecycleListener, ListenerId, RouteHandler, Transport};
use crate::Result;

type ClientId = u64;

/// Shared routing table for a set of [`MemoryTransport`] clients
#[derive(Clone, Default)]
pub struct MemoryBroker {
    clients: Arc<Mutex<BTreeMap<ClientId, Weak<ClientInner>>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryBroker {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// A new client attached to this broker, initially disconnected
    pub fn client(&self) -> MemoryTransport {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::new(ClientInner { id, broker: Some(self.clone()), state: Mutex::new(ClientState::default()) });
        self.clients.lock().insert(id, Arc::downgrade(&inner));
        MemoryTransport { inner }
    }

    #[inline]
    pub fn client_count(&self) -> usize {
        self.clients.lock().values().filter(|c| c.strong_count() > 0).count()
    }

    /// Subscription filters grouped by client id
    pub fn subscriptions(&self) -> HashMap<u64, Vec<String>> {
        self.clients
            .lock()
            .iter()
            .filter_map(|(id, c)| c.upgrade().map(|c| (*id, c.state.lock().subscriptions.keys().cloned().collect())))
            .collect()
    }

    async fn forward(&self, publish: &Publish) {
        let targets = {
            let mut clients = self.clients.lock();
            clients.retain(|_, c| c.strong_count() > 0);
            clients.values().filter_map(Weak::upgrade).filter(|c| c.is_subscribed(&publish.topic)).collect::<Vec<_>>()
        };
        for target in targets {
            log::debug!("{} forward to client {}", publish.topic, target.id);
            target.dispatch(publish.clone()).await;
        }
    }
}

struct Route {
    pattern: String,
    filter: TopicFilter,
    handler: RouteHandler,
}

#[derive(Default)]
struct ClientState {
    connected: bool,
    subscriptions: BTreeMap<String, (TopicFilter, QoS)>,
    routes: Vec<Route>,
    listeners: BTreeMap<ListenerId, LifecycleListener>,
    next_listener: ListenerId,
    published: Vec<Publish>,
    fail_publish: usize,
    fail_subscribe: usize,
    subscribe_delay: Option<Duration>,
    subscribe_count: usize,
}

struct ClientInner {
    id: ClientId,
    broker: Option<MemoryBroker>,
    state: Mutex<ClientState>,
}

impl ClientInner {
    #[inline]
    fn is_subscribed(&self, topic: &str) -> bool {
        let state = self.state.lock();
        state.connected && state.subscriptions.values().any(|(f, _)| f.matches_str(topic))
    }

    async fn dispatch(&self, publish: Publish) {
        let matched = {
            let state = self.state.lock();
            state
                .routes
                .iter()
                .filter_map(|r| {
                    r.filter.capture(&publish.topic).map(|params| (r.pattern.clone(), params, r.handler.clone()))
                })
                .collect::<Vec<_>>()
        };
        if matched.is_empty() {
            log::debug!("client {} no route for {}", self.id, publish.topic);
        }
        for (route, params, handler) in matched {
            handler(Inbound { route, params, publish: publish.clone() }).await;
        }
    }

    fn notify(&self, event: Lifecycle) {
        let listeners = self.state.lock().listeners.values().cloned().collect::<Vec<_>>();
        for listener in listeners {
            listener(event);
        }
    }
}

/// In-memory [`Transport`] with a publish log and fault injection
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<ClientInner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A client without a broker, publishes are only recorded
    pub fn new() -> Self {
        Self { inner: Arc::new(ClientInner { id: 0, broker: None, state: Mutex::new(ClientState::default()) }) }
    }

    /// Marks the client connected and notifies lifecycle listeners
    pub fn connect(&self) {
        self.inner.state.lock().connected = true;
        log::debug!("client {} connected", self.inner.id);
        self.inner.notify(Lifecycle::Connect);
    }

    /// Marks the client disconnected, drops its subscriptions and notifies lifecycle listeners
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            state.connected = false;
            state.subscriptions.clear();
        }
        log::debug!("client {} closed", self.inner.id);
        self.inner.notify(Lifecycle::Close);
    }

    /// Delivers `publish` to this client's routes as if it arrived from the broker
    pub async fn deliver(&self, publish: Publish) {
        self.inner.dispatch(publish).await
    }

    #[inline]
    pub fn published(&self) -> Vec<Publish> {
        self.inner.state.lock().published.clone()
    }

    #[inline]
    pub fn last_published(&self) -> Option<Publish> {
        self.inner.state.lock().published.last().cloned()
    }

    #[inline]
    pub fn clear_published(&self) {
        self.inner.state.lock().published.clear()
    }

    #[inline]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.state.lock().subscriptions.keys().cloned().collect()
    }

    /// Number of subscribe calls received, including failed ones
    #[inline]
    pub fn subscribe_count(&self) -> usize {
        self.inner.state.lock().subscribe_count
    }

    #[inline]
    pub fn route_count(&self) -> usize {
        self.inner.state.lock().routes.len()
    }

    #[inline]
    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// The next publish fails with a transport error
    #[inline]
    pub fn fail_next_publish(&self) {
        self.inner.state.lock().fail_publish += 1;
    }

    /// The next subscribe fails with a transport error
    #[inline]
    pub fn fail_next_subscribe(&self) {
        self.inner.state.lock().fail_subscribe += 1;
    }

    /// Every subscribe waits `delay` before it settles
    #[inline]
    pub fn set_subscribe_delay(&self, delay: Option<Duration>) {
        self.inner.state.lock().subscribe_delay = delay;
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    #[inline]
    fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    async fn publish(&self, publish: Publish) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if !state.connected {
                return Err(anyhow!("client is not connected"));
            }
            if state.fail_publish > 0 {
                state.fail_publish -= 1;
                return Err(anyhow!("publish to {} failed", publish.topic));
            }
            state.published.push(publish.clone());
        }
        if let Some(broker) = self.inner.broker.as_ref() {
            broker.forward(&publish).await;
        }
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
        let delay = {
            let mut state = self.inner.state.lock();
            state.subscribe_count += 1;
            state.subscribe_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let topic_filter: TopicFilter = filter.parse()?;
        let mut state = self.inner.state.lock();
        if !state.connected {
            return Err(anyhow!("client is not connected"));
        }
        if state.fail_subscribe > 0 {
            state.fail_subscribe -= 1;
            return Err(anyhow!("subscribe to {filter} failed"));
        }
        state.subscriptions.insert(filter.to_owned(), (topic_filter, qos));
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.inner.state.lock().subscriptions.remove(filter);
        Ok(())
    }

    fn attach_route(&self, pattern: &str, handler: RouteHandler) -> Result<()> {
        let filter: TopicFilter = pattern.parse()?;
        let mut state = self.inner.state.lock();
        state.routes.retain(|r| r.pattern != pattern);
        state.routes.push(Route { pattern: pattern.to_owned(), filter, handler });
        Ok(())
    }

    fn detach_route(&self, pattern: &str) {
        self.inner.state.lock().routes.retain(|r| r.pattern != pattern);
    }

    fn on(&self, listener: LifecycleListener) -> ListenerId {
        let mut state = self.inner.state.lock();
        state.next_listener += 1;
        let id = state.next_listener;
        state.listeners.insert(id, listener);
        id
    }

    fn off(&self, id: ListenerId) {
        self.inner.state.lock().listeners.remove(&id);
    }
}
