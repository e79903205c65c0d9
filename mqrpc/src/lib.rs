#![deny(unsafe_code)]

//! Request/response RPC over an MQTT v5 style publish/subscribe transport
//!
//! ## Core Features:
//! - **Correlated Calls**: [`RpcEngine::send`] publishes a request carrying a fresh
//!   correlation id and resolves with the matching reply
//! - **Inbound Requests**: handlers registered per method, served at most once per
//!   correlation id under at-least-once redelivery
//! - **Lifecycle Tracking**: re-subscribes the inbound topic on every connect and
//!   fails every pending call on close
//! - **Service Facade**: agent topics plus room notifications re-emitted as local events
//! - **Conference Client**: typed room, rtc and message calls of the conference backend
//! - **Event Client**: typed room, event, state and edition calls of the event backend
//! - **Deadlines**: [`race_with_timeout`] and [`wait_for_event`] for bounded waits
//! - **In-memory Transport**: [`MemoryBroker`] / [`MemoryTransport`] for tests and demos
//!
//! ## Usage Examples:
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use mqrpc::{race_with_timeout, MemoryBroker, RpcEngine, RpcError};
//! use serde_json::{json, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mqrpc::Result<()> {
//! let broker = MemoryBroker::new();
//! let (client, server) = (broker.client(), broker.client());
//! client.connect();
//! server.connect();
//!
//! let callee = RpcEngine::builder(Arc::new(server), "svc/in", "svc/out").build()?;
//! callee.register("echo", |params: Value| params)?;
//! callee.ready().await?;
//!
//! let caller = RpcEngine::builder(Arc::new(client), "agent/in", "svc/in").build()?;
//! caller.ready().await?;
//!
//! let reply: Result<Value, RpcError> =
//!     race_with_timeout(caller.send("echo", json!({"a": 1})), Duration::from_secs(1), Some("echo")).await;
//! assert_eq!(reply?, json!({"a": 1}));
//! # Ok(())
//! # }
//! ```

pub mod conference;
pub mod error;
pub mod event;
pub mod event_service;
pub mod logger;
pub mod memory;
pub mod rpc;
pub mod service;
pub mod telemetry;
pub mod timeout;
pub mod topic;
pub mod transport;

pub use mqrpc_codec as codec;
pub use mqrpc_conf as conf;

pub use mqrpc_codec::{Codec, FnCodec, JsonCodec, Labels, QoS};

pub use self::conference::Conference;
pub use self::error::RpcError;
pub use self::event::{Event, EventBus, EventListener, EventSource};
pub use self::event_service::EventService;
pub use self::memory::{MemoryBroker, MemoryTransport};
pub use self::rpc::{AsyncHandler, Handler, Notification, RpcEngine, RpcEngineBuilder};
pub use self::service::{AgentTopics, Service, ServiceOptions};
pub use self::telemetry::Telemetry;
pub use self::timeout::{race_with_default_timeout, race_with_timeout, wait_for_event, DEFAULT_TIMEOUT};
pub use self::topic::{TopicError, TopicFilter, TopicParams};
pub use self::transport::{Inbound, Lifecycle, LifecycleListener, ListenerId, RouteHandler, Transport};

pub type Result<T> = anyhow::Result<T>;
