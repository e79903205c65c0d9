#![deny(unsafe_code)]

//! Message envelope and payload codecs for request/response RPC over MQTT v5
//!
//! ## Core Features:
//! - **Envelope Types**: [`Publish`] with the v5 properties the RPC layer needs
//!   (correlation data, response topic, user properties)
//! - **Header Framing**: builders for request, response and event headers and
//!   [`MessageKind::classify`] for inbound messages
//! - **Pluggable Payload Codecs**: [`Codec`] trait, [`JsonCodec`] default and
//!   [`FnCodec`] for caller supplied encoder/decoder pairs
//! - **Labels**: the fixed set of descriptive keys merged into every outgoing header
//!

/// Error types for envelope interpretation
pub mod error;

/// Envelope types shared by every transport
pub mod types;

/// RPC header construction and classification
pub mod header;

/// Payload codecs
pub mod codec;

pub use codec::{Codec, FnCodec, JsonCodec};
pub use error::DecodeError;
pub use header::{MessageKind, Status};
pub use types::{Labels, Publish, PublishProperties, QoS, UserProperties, UserProperty};
