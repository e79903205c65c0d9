//! RPC framing carried in the publish header.
//!
//! Requests, responses and events are told apart by the `type` user property;
//! the remaining fields are interpreted per message type, see [`MessageKind`].

use bytes::Bytes;
use bytestring::ByteString;

use mqrpc_utils::timestamp_millis;

use crate::types::{Labels, PublishProperties, UserProperties};

pub const TYPE: &str = "type";
pub const METHOD: &str = "method";
pub const LABEL: &str = "label";
pub const STATUS: &str = "status";
pub const LOCAL_TIMESTAMP: &str = "local_timestamp";

pub const TYPE_REQUEST: &str = "request";
pub const TYPE_RESPONSE: &str = "response";
pub const TYPE_EVENT: &str = "event";

pub const STATUS_OK: &str = "200";

/// Response status, `None` when the header value is missing or not numeric.
pub type Status = Option<u16>;

#[inline]
pub fn is_success(status: Status) -> bool {
    matches!(status, Some(200..=299))
}

/// Classification of an inbound message by its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Request { correlation_id: ByteString, method: ByteString, response_topic: Option<ByteString> },
    Response { correlation_id: ByteString, status: Status },
    Event { label: ByteString },
    Unknown,
}

impl MessageKind {
    pub fn classify(props: &PublishProperties) -> Self {
        let typ = props.user_property(TYPE).map(|t| &**t);
        match typ {
            Some(TYPE_RESPONSE) => match props.correlation_id() {
                Some(correlation_id) => MessageKind::Response {
                    correlation_id,
                    status: props.user_property(STATUS).and_then(|s| s.trim().parse::<u16>().ok()),
                },
                None => MessageKind::Unknown,
            },
            Some(TYPE_REQUEST) => {
                match (props.user_property(METHOD).filter(|m| !m.is_empty()), props.correlation_id()) {
                    (Some(method), Some(correlation_id)) => MessageKind::Request {
                        correlation_id,
                        method: method.clone(),
                        response_topic: props.response_topic.clone(),
                    },
                    _ => MessageKind::Unknown,
                }
            }
            Some(TYPE_EVENT) => match props.user_property(LABEL) {
                Some(label) => MessageKind::Event { label: label.clone() },
                None => MessageKind::Unknown,
            },
            _ => MessageKind::Unknown,
        }
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageKind::Request { .. } => TYPE_REQUEST,
            MessageKind::Response { .. } => TYPE_RESPONSE,
            MessageKind::Event { .. } => TYPE_EVENT,
            MessageKind::Unknown => "unknown",
        }
    }
}

#[inline]
fn user_props(fields: &[(&'static str, &str)], labels: &Labels) -> UserProperties {
    let mut props: UserProperties = fields
        .iter()
        .map(|(k, v)| (ByteString::from_static(*k), ByteString::from(*v)))
        .collect();
    props.push((ByteString::from_static(LOCAL_TIMESTAMP), ByteString::from(timestamp_millis().to_string())));
    props.extend(labels.to_user_properties());
    props
}

impl PublishProperties {
    pub fn request(correlation_id: &str, response_topic: &str, method: &str, labels: &Labels) -> Self {
        PublishProperties {
            correlation_data: Some(Bytes::copy_from_slice(correlation_id.as_bytes())),
            response_topic: Some(ByteString::from(response_topic)),
            user_properties: user_props(&[(TYPE, TYPE_REQUEST), (METHOD, method)], labels),
        }
    }

    pub fn response(correlation_id: &str, labels: &Labels) -> Self {
        PublishProperties {
            correlation_data: Some(Bytes::copy_from_slice(correlation_id.as_bytes())),
            response_topic: None,
            user_properties: user_props(&[(TYPE, TYPE_RESPONSE), (STATUS, STATUS_OK)], labels),
        }
    }

    pub fn event(label: &str, labels: &Labels) -> Self {
        PublishProperties {
            correlation_data: None,
            response_topic: None,
            user_properties: user_props(&[(TYPE, TYPE_EVENT), (LABEL, label)], labels),
        }
    }
}
