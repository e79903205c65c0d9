/// Errors raised while interpreting envelope fields
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid QoS value: {0}")]
    InvalidQoS(u8),
    #[error("Invalid status value: {0:?}")]
    InvalidStatus(String),
}
