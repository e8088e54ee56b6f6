//! Status and error model for extension supervision.
//!
//! Every public supervision operation resolves to either a typed
//! [`ExtensionError`] or a wire-level [`ExtensionStatus`]. The two are
//! interchangeable: an error flattens to `{code, message}` and a
//! non-success status lifts back into an error, so transport peers only
//! ever see plain status codes.

use serde::{Deserialize, Serialize};

/// Route identifier assigned by the manager at registration time.
///
/// UUID 0 is reserved for the manager itself.
pub type RouteUuid = u64;

/// Well-known status codes shared across the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExtensionCode {
    /// Operation succeeded.
    Success = 0,
    /// Generic failure.
    Failed = 1,
    /// Reserved: a registration collided with a live extension name or
    /// registry item.
    Duplicate = 2,
}

impl ExtensionCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Wire-level operation status: `{code, message}` plus the UUID slot used
/// by registration replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionStatus {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub uuid: RouteUuid,
}

impl ExtensionStatus {
    pub fn new(code: ExtensionCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_i32(),
            message: message.into(),
            uuid: 0,
        }
    }

    pub fn success() -> Self {
        Self::new(ExtensionCode::Success, "OK")
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(ExtensionCode::Failed, message)
    }

    pub fn with_uuid(mut self, uuid: RouteUuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == ExtensionCode::Success.as_i32()
    }

    /// Lift a non-success status into an error, preserving the peer's code
    /// and message verbatim.
    pub fn into_result(self) -> Result<Self, ExtensionError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ExtensionError::Protocol {
                code: self.code,
                message: self.message,
            })
        }
    }
}

/// Errors surfaced by the extension supervision layer.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// Extensions are globally disabled by flag.
    #[error("Extensions disabled")]
    Disabled,

    /// Endpoint path missing, not writable, bad prefix, or not rebindable.
    #[error("{0}")]
    Endpoint(String),

    /// The bounded-wait prober exceeded its deadline.
    #[error("{0}")]
    Timeout(String),

    /// Connection refused, broken pipe, or any other client failure.
    #[error("Extension call failed: {0}")]
    Transport(String),

    /// The peer answered with a non-zero status.
    #[error("{message}")]
    Protocol { code: i32, message: String },

    /// Startup configuration problem, including a required extension that
    /// never appeared.
    #[error("{0}")]
    Config(String),

    /// Unreadable loadfile or a module load that did not fully succeed.
    #[error("{0}")]
    Autoload(String),
}

impl ExtensionError {
    /// The wire code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Protocol { code, .. } => *code,
            _ => ExtensionCode::Failed.as_i32(),
        }
    }

    /// Flatten into a wire status.
    pub fn to_status(&self) -> ExtensionStatus {
        ExtensionStatus {
            code: self.code(),
            message: self.to_string(),
            uuid: 0,
        }
    }
}

impl From<std::io::Error> for ExtensionError {
    fn from(err: std::io::Error) -> Self {
        ExtensionError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_error() {
        let status = ExtensionStatus::new(ExtensionCode::Duplicate, "Duplicate extension: probe-a");
        let err = status.clone().into_result().unwrap_err();
        assert_eq!(err.code(), ExtensionCode::Duplicate.as_i32());
        assert_eq!(err.to_status().message, status.message);
    }

    #[test]
    fn success_status_is_not_an_error() {
        assert!(ExtensionStatus::success().into_result().is_ok());
    }

    #[test]
    fn transport_errors_carry_the_call_failed_prefix() {
        let err = ExtensionError::Transport("connection refused".into());
        assert_eq!(err.to_string(), "Extension call failed: connection refused");
        assert_eq!(err.code(), 1);
    }

    #[test]
    fn register_reply_serializes_uuid() {
        let status = ExtensionStatus::success().with_uuid(42);
        let json = serde_json::to_string(&status).unwrap();
        let back: ExtensionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.uuid, 42);
        assert!(back.is_success());
    }
}
