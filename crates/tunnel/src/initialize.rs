//! The per-data-channel handshake: the remote side announces its
//! version and requested mode before the agent subprocess is started.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

/// Sent by the connecting side immediately after a data channel opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequestV1 {
    /// The connecting side's major protocol version.
    pub version_major: u32,
    /// The connecting side's minor protocol version.
    pub version_minor: u32,
    /// The agent mode to launch (must be non-empty).
    pub mode: String,
}

impl InitializeRequestV1 {
    /// Validates that `mode` is non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.mode.is_empty() {
            return Err(TunnelError::InvalidInitializeRequest(
                "mode must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sent in reply to an [`InitializeRequestV1`]; an empty `error`
/// signals success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResponseV1 {
    /// Empty on success; otherwise a human-readable failure reason.
    pub error: String,
}

impl InitializeResponseV1 {
    /// Builds a success response.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            error: String::new(),
        }
    }

    /// Builds a failure response carrying `message`.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    /// Whether this response indicates success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mode_is_invalid() {
        let request = InitializeRequestV1 {
            version_major: 1,
            version_minor: 0,
            mode: String::new(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn non_empty_mode_is_valid() {
        let request = InitializeRequestV1 {
            version_major: 1,
            version_minor: 0,
            mode: "agent".to_string(),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn response_ok_round_trip() {
        assert!(InitializeResponseV1::ok().is_ok());
        assert!(!InitializeResponseV1::failure("nope").is_ok());
    }
}
