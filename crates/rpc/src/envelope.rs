//! The per-message wire wrapper carrying either a payload or a
//! remote-side error.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope<T> {
    errored: bool,
    error: String,
    payload: Option<T>,
}

impl<T> Envelope<T> {
    pub(crate) fn ok(payload: T) -> Self {
        Self {
            errored: false,
            error: String::new(),
            payload: Some(payload),
        }
    }

    pub(crate) fn err(message: String) -> Self {
        Self {
            errored: true,
            error: message,
            payload: None,
        }
    }

    /// Consumes the envelope, producing the payload or the
    /// [`crate::RpcError::RemoteError`] it wrapped.
    pub(crate) fn into_result(self) -> crate::Result<T> {
        if self.errored {
            return Err(crate::RpcError::RemoteError(self.error));
        }
        Ok(self
            .payload
            .expect("non-errored envelope always carries a payload"))
    }
}
