use serde_json::Value;

use mqrpc_codec::Status;

/// Outcome of a failed call, handler registration or bounded wait
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The transport reported a publish or subscribe failure
    #[error("Transport error: {0}")]
    Transport(String),
    /// Local protocol or usage violation
    #[error("Service error: {0}")]
    Service(String),
    /// A deadline elapsed before the awaited operation settled
    #[error("Timeout error: {0}")]
    Timeout(String),
    /// The peer answered with a status outside [200, 300)
    #[error("Response error, status: {status:?}")]
    Response { status: Status, payload: Value },
}

impl RpcError {
    #[inline]
    pub fn transport<T: ToString>(msg: T) -> Self {
        RpcError::Transport(msg.to_string())
    }

    #[inline]
    pub fn service<T: ToString>(msg: T) -> Self {
        RpcError::Service(msg.to_string())
    }

    #[inline]
    pub fn timeout<T: ToString>(msg: T) -> Self {
        RpcError::Timeout(msg.to_string())
    }

    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }

    #[inline]
    pub fn is_service(&self) -> bool {
        matches!(self, RpcError::Service(_))
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout(_))
    }

    /// Status of a rejected response
    #[inline]
    pub fn status(&self) -> Status {
        match self {
            RpcError::Response { status, .. } => *status,
            _ => None,
        }
    }

    /// Decoded payload of a rejected response
    #[inline]
    pub fn payload(&self) -> Option<&Value> {
        match self {
            RpcError::Response { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// Lower-level transport failures keep their message
impl From<anyhow::Error> for RpcError {
    #[inline]
    fn from(e: anyhow::Error) -> Self {
        RpcError::Transport(e.to_string())
    }
}
