//! "What changed" facts a policy decides on.

use keeper_oracle::ProtocolOutcome;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChangeFacts {
    pub server_changed: bool,
    pub runtime_changed: bool,
    /// Set exactly when `runtime_changed` is.
    pub protocol: Option<ProtocolOutcome>,
}

impl ChangeFacts {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn server() -> Self {
        Self {
            server_changed: true,
            ..Self::default()
        }
    }

    pub fn runtime(protocol: ProtocolOutcome) -> Self {
        Self {
            server_changed: false,
            runtime_changed: true,
            protocol: Some(protocol),
        }
    }

    pub fn with_server(mut self) -> Self {
        self.server_changed = true;
        self
    }

    /// Protocol outcome of a changed runtime, `Unknown` when unset.
    pub fn runtime_protocol(&self) -> Option<ProtocolOutcome> {
        self.runtime_changed
            .then(|| self.protocol.unwrap_or(ProtocolOutcome::Unknown))
    }

    pub fn protocol_error(&self) -> bool {
        self.runtime_protocol() == Some(ProtocolOutcome::Error)
    }
}
