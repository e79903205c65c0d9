//! Fire-and-forget metric events on the agent's outbound topic.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use mqrpc_codec::{Codec, JsonCodec, Labels, Publish, PublishProperties, QoS};

use crate::service::AgentTopics;
use crate::transport::Transport;

pub const METRIC_LABEL: &str = "metric.create";

pub struct Telemetry {
    transport: Arc<dyn Transport>,
    topic_out: String,
    qos: QoS,
    codec: JsonCodec,
    labels: RwLock<Labels>,
}

impl Telemetry {
    #[inline]
    pub fn new(transport: Arc<dyn Transport>, agent_id: &str, app_name: &str) -> Self {
        Self::with_version(transport, agent_id, app_name, "v1")
    }

    pub fn with_version(transport: Arc<dyn Transport>, agent_id: &str, app_name: &str, api_version: &str) -> Self {
        let topic_out = AgentTopics::new(agent_id, app_name, api_version).topic_out;
        Self { transport, topic_out, qos: QoS::AtLeastOnce, codec: JsonCodec, labels: RwLock::new(Labels::default()) }
    }

    #[inline]
    pub fn topic_out(&self) -> &str {
        &self.topic_out
    }

    /// Publishes a `metric.create` event. Nothing is sent while disconnected and
    /// publish failures are only logged.
    pub async fn send(&self, params: &Value) {
        if !self.transport.is_connected() {
            log::debug!("{} disconnected, metric dropped", self.topic_out);
            return;
        }
        let properties = PublishProperties::event(METRIC_LABEL, &self.labels.read());
        let publish = Publish::new(self.topic_out.as_str(), self.codec.encode(params), properties).qos(self.qos);
        if let Err(e) = self.transport.publish(publish).await {
            log::warn!("{} metric publish failed, {e}", self.topic_out);
        }
    }

    #[inline]
    pub fn set_labels(&self, labels: Labels) {
        *self.labels.write() = labels;
    }

    #[inline]
    pub fn clear_labels(&self) {
        *self.labels.write() = Labels::default();
    }

    #[inline]
    pub fn labels(&self) -> Labels {
        self.labels.read().clone()
    }

    #[inline]
    pub fn destroy(&self) {
        self.clear_labels();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use bytestring::ByteString;
    use mqrpc_codec::header;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_metric() {
        let transport = MemoryTransport::new();
        let telemetry = Telemetry::new(Arc::new(transport.clone()), "a", "app");

        telemetry.send(&json!([{"metric": "x", "value": 1}])).await;
        assert!(transport.published().is_empty());

        transport.connect();
        telemetry.set_labels(Labels::default().app_label("web"));
        telemetry.send(&json!([{"metric": "x", "value": 1}])).await;

        let p = transport.last_published().unwrap();
        assert_eq!(p.topic, "agents/a/api/v1/out/app");
        assert_eq!(p.qos, QoS::AtLeastOnce);
        assert_eq!(p.properties.user_property(header::TYPE), Some(&ByteString::from("event")));
        assert_eq!(p.properties.user_property(header::LABEL), Some(&ByteString::from(METRIC_LABEL)));
        assert_eq!(p.properties.user_property(Labels::APP_LABEL), Some(&ByteString::from("web")));
        assert_eq!(JsonCodec.decode(&p.payload), json!([{"metric": "x", "value": 1}]));
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let transport = MemoryTransport::new();
        transport.connect();
        let telemetry = Telemetry::with_version(Arc::new(transport.clone()), "a", "app", "v2");
        transport.fail_next_publish();
        telemetry.send(&json!({})).await;
        assert!(transport.published().is_empty());

        telemetry.set_labels(Labels::default().scope("s"));
        telemetry.destroy();
        assert!(telemetry.labels().is_empty());
        assert_eq!(telemetry.topic_out(), "agents/a/api/v2/out/app");
    }
}
