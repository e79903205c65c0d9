//! The pub/sub client contract the engine is written against.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use mqrpc_codec::{Publish, QoS};

use crate::topic::TopicParams;
use crate::Result;

/// A message delivered to an attached route
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Pattern of the route the message was dispatched to
    pub route: String,
    /// Named wildcard captures of the route pattern
    pub params: TopicParams,
    pub publish: Publish,
}

pub type RouteHandler = Arc<dyn Fn(Inbound) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Connect,
    Close,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Connect => f.write_str("connect"),
            Lifecycle::Close => f.write_str("close"),
        }
    }
}

pub type LifecycleListener = Arc<dyn Fn(Lifecycle) + Send + Sync>;

pub type ListenerId = u64;

/// Publish/subscribe client with pattern routing and lifecycle notifications.
///
/// Implementations must allow concurrent publishes, and lifecycle listeners
/// are called without any transport lock held.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    /// Resolves once the broker acknowledged the message at its QoS
    async fn publish(&self, publish: Publish) -> Result<()>;

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()>;

    async fn unsubscribe(&self, filter: &str) -> Result<()>;

    /// Dispatches inbound messages whose topic matches `pattern` to `handler`.
    /// The pattern may use named wildcards, see [`crate::topic::TopicFilter`].
    fn attach_route(&self, pattern: &str, handler: RouteHandler) -> Result<()>;

    fn detach_route(&self, pattern: &str);

    fn on(&self, listener: LifecycleListener) -> ListenerId;

    fn off(&self, id: ListenerId);
}
