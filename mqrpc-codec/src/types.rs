use std::fmt;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

pub type UserProperty = (ByteString, ByteString);
pub type UserProperties = Vec<UserProperty>;

/// Quality of Service
#[repr(u8)]
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QoS {
    /// At most once delivery
    AtMostOnce = 0,
    /// At least once delivery
    ///
    /// The transport may redeliver, every consumer of this crate has to tolerate duplicates.
    #[default]
    AtLeastOnce = 1,
    /// Exactly once delivery
    ExactlyOnce = 2,
}

impl QoS {
    #[inline]
    pub fn value(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(DecodeError::InvalidQoS(v)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(v: QoS) -> Self {
        v.value()
    }
}

/// The MQTT v5 publish properties the RPC framing relies on.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct PublishProperties {
    pub correlation_data: Option<Bytes>,
    pub response_topic: Option<ByteString>,
    pub user_properties: UserProperties,
}

impl PublishProperties {
    /// Last value for `key`, later entries override earlier ones.
    #[inline]
    pub fn user_property(&self, key: &str) -> Option<&ByteString> {
        self.user_properties.iter().rev().find(|(k, _)| &**k == key).map(|(_, v)| v)
    }

    /// The correlation data as a string id. Empty or non UTF-8 data counts as absent.
    #[inline]
    pub fn correlation_id(&self) -> Option<ByteString> {
        self.correlation_data
            .as_ref()
            .filter(|data| !data.is_empty())
            .and_then(|data| ByteString::try_from(data.clone()).ok())
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Publish {
    /// the information channel to which payload data is published.
    pub topic: ByteString,
    /// the level of assurance for delivery of an Application Message.
    pub qos: QoS,
    pub retain: bool,
    /// the Application Message that is being published.
    pub payload: Bytes,
    pub properties: PublishProperties,
}

impl Publish {
    #[inline]
    pub fn new<T: Into<ByteString>>(topic: T, payload: Bytes, properties: PublishProperties) -> Self {
        Self { topic: topic.into(), qos: QoS::default(), retain: false, payload, properties }
    }

    #[inline]
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }
}

impl fmt::Debug for Publish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publish")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("retain", &self.retain)
            .field("payload", &"<REDACTED>")
            .field("properties", &self.properties)
            .finish()
    }
}

/// Metadata merged into the header of every outgoing message.
///
/// Only the four recognized keys exist; unknown keys are dropped when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Labels {
    pub const APP_AUDIENCE: &'static str = "app_audience";
    pub const APP_LABEL: &'static str = "app_label";
    pub const APP_VERSION: &'static str = "app_version";
    pub const SCOPE: &'static str = "scope";

    #[inline]
    pub fn app_audience<T: Into<String>>(mut self, v: T) -> Self {
        self.app_audience = Some(v.into());
        self
    }

    #[inline]
    pub fn app_label<T: Into<String>>(mut self, v: T) -> Self {
        self.app_label = Some(v.into());
        self
    }

    #[inline]
    pub fn app_version<T: Into<String>>(mut self, v: T) -> Self {
        self.app_version = Some(v.into());
        self
    }

    #[inline]
    pub fn scope<T: Into<String>>(mut self, v: T) -> Self {
        self.scope = Some(v.into());
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.app_audience.is_none()
            && self.app_label.is_none()
            && self.app_version.is_none()
            && self.scope.is_none()
    }

    /// The set labels as header entries, unset ones are skipped.
    pub fn to_user_properties(&self) -> UserProperties {
        [
            (Self::APP_AUDIENCE, &self.app_audience),
            (Self::APP_LABEL, &self.app_label),
            (Self::APP_VERSION, &self.app_version),
            (Self::SCOPE, &self.scope),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (ByteString::from_static(k), ByteString::from(v.as_str()))))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos() {
        assert_eq!(QoS::try_from(1u8), Ok(QoS::AtLeastOnce));
        assert_eq!(QoS::try_from(3u8), Err(DecodeError::InvalidQoS(3)));
        assert_eq!(u8::from(QoS::ExactlyOnce), 2);
        assert_eq!(QoS::default(), QoS::AtLeastOnce);
    }

    #[test]
    fn test_user_property_last_wins() {
        let props = PublishProperties {
            user_properties: vec![
                (ByteString::from("type"), ByteString::from("request")),
                (ByteString::from("type"), ByteString::from("event")),
            ],
            ..Default::default()
        };
        assert_eq!(props.user_property("type"), Some(&ByteString::from("event")));
        assert!(props.user_property("method").is_none());
    }

    #[test]
    fn test_correlation_id() {
        let mut props = PublishProperties::default();
        assert_eq!(props.correlation_id(), None);
        props.correlation_data = Some(Bytes::new());
        assert_eq!(props.correlation_id(), None);
        props.correlation_data = Some(Bytes::from_static(&[0xff, 0xfe]));
        assert_eq!(props.correlation_id(), None);
        props.correlation_data = Some(Bytes::from_static(b"abc"));
        assert_eq!(props.correlation_id(), Some(ByteString::from("abc")));
    }

    #[test]
    fn test_labels() {
        let labels = Labels::default().scope("s").app_version("1.0");
        let props = labels.to_user_properties();
        assert_eq!(
            props,
            vec![
                (ByteString::from("app_version"), ByteString::from("1.0")),
                (ByteString::from("scope"), ByteString::from("s")),
            ]
        );
        assert!(Labels::default().to_user_properties().is_empty());
        assert!(Labels::default().is_empty());
    }

    #[test]
    fn test_labels_drop_unknown_keys() {
        let labels: Labels =
            serde_json::from_value(serde_json::json!({"scope": "s", "color": "blue"})).unwrap();
        assert_eq!(labels, Labels::default().scope("s"));
    }
}
