//! Core error taxonomy.
//!
//! Typed kinds for everything the traffic and pricing layers need to branch
//! on; task-level glue still uses `anyhow` on top of these.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid market parameters: fee {fee_rate} + margin {margin_rate} leave no revenue share")]
    InvalidMarketParams { fee_rate: f64, margin_rate: f64 },

    /// 429 or 5xx that survived the controller's retry budget.
    #[error("transient remote error {status}: {body}")]
    TransientRemote { status: u16, body: String },

    /// Any other 4xx; surfaced immediately, never retried.
    #[error("remote rejected request with {status}: {body}")]
    PermanentRemote { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("missing data: {0}")]
    Data(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl CoreError {
    /// Classify a non-2xx remote status.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 || status >= 500 {
            CoreError::TransientRemote { status, body }
        } else {
            CoreError::PermanentRemote { status, body }
        }
    }

    /// Remote status to mirror on admin responses, when there is one.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            CoreError::TransientRemote { status, .. }
            | CoreError::PermanentRemote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            CoreError::from_status(429, String::new()),
            CoreError::TransientRemote { .. }
        ));
        assert!(matches!(
            CoreError::from_status(503, String::new()),
            CoreError::TransientRemote { .. }
        ));
        assert!(matches!(
            CoreError::from_status(404, String::new()),
            CoreError::PermanentRemote { status: 404, .. }
        ));
    }
}
