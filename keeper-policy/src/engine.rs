//! Strategy selection and the detection seam used by the supervisor.

use keeper_core::{BuildId, BuildIdentifiers, KeeperConfig, UpdateDecision};
use keeper_oracle::{BuildExtraction, RemoteRuntime, VersionOracle};
use serde::Serialize;

use crate::default;
use crate::error::PolicyError;
use crate::facts::ChangeFacts;
use crate::scheme::{self, Scheme};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Default { only_server_protocol_update: bool },
    Scheme(Scheme),
}

/// Turns [`ChangeFacts`] into an [`UpdateDecision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEngine {
    strategy: Strategy,
}

impl PolicyEngine {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub fn default_policy(only_server_protocol_update: bool) -> Self {
        Self::new(Strategy::Default {
            only_server_protocol_update,
        })
    }

    /// Compile `text`; any invalid line falls back to the default policy.
    pub fn with_scheme_text(text: &str, only_server_protocol_update: bool) -> Self {
        match scheme::compile(text) {
            Ok(scheme) => Self::new(Strategy::Scheme(scheme)),
            Err(err) => {
                tracing::warn!(error = %err, "scheme disabled, using default policy");
                Self::default_policy(only_server_protocol_update)
            }
        }
    }

    /// Scheme from `scheme_file` when configured and valid, otherwise the
    /// default policy.
    pub fn from_config(config: &KeeperConfig) -> Self {
        let fallback = config.only_server_protocol_update;
        let Some(file) = config.scheme_file.as_deref() else {
            return Self::default_policy(fallback);
        };
        let path = config.resolve(file);
        match scheme::compile_file(&path) {
            Ok(scheme) => {
                tracing::info!(path = %path.display(), rules = scheme.instructions().len(), "scheme loaded");
                Self::new(Strategy::Scheme(scheme))
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "scheme disabled, using default policy");
                Self::default_policy(fallback)
            }
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn evaluate(&self, facts: &ChangeFacts) -> UpdateDecision {
        match &self.strategy {
            Strategy::Default {
                only_server_protocol_update,
            } => default::decide(facts, *only_server_protocol_update),
            Strategy::Scheme(scheme) => scheme.evaluate(facts),
        }
    }
}

/// One detection cycle's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub decision: UpdateDecision,
    pub facts: ChangeFacts,
    /// Local identifiers as observed this cycle.
    pub local: BuildIdentifiers,
    pub remote_build: BuildId,
    pub remote_runtime_tag: String,
    pub note: String,
}

/// Capability the supervisor calls once per cycle, off its scheduler thread.
pub trait Detector: Send + Sync {
    fn detect(
        &self,
        confirmed_build: Option<&BuildId>,
        local_protocol: Option<&str>,
    ) -> Result<Evaluation, PolicyError>;
}

/// [`Detector`] backed by the real oracle.
#[derive(Debug, Clone)]
pub struct OracleDetector {
    oracle: VersionOracle,
    engine: PolicyEngine,
}

impl OracleDetector {
    pub fn new(oracle: VersionOracle, engine: PolicyEngine) -> Self {
        Self { oracle, engine }
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }
}

impl Detector for OracleDetector {
    fn detect(
        &self,
        confirmed_build: Option<&BuildId>,
        local_protocol: Option<&str>,
    ) -> Result<Evaluation, PolicyError> {
        let remote: BuildExtraction = self
            .oracle
            .resolve_remote_server_build()
            .ok_or_else(|| PolicyError::Undecidable("remote server build unavailable".to_string()))?;

        let local_build = confirmed_build
            .cloned()
            .or_else(|| self.oracle.installed_server_build());
        let local_runtime = self.oracle.detect_local_runtime_version();
        let runtime: RemoteRuntime = self
            .oracle
            .resolve_remote_runtime_release(&local_runtime, local_protocol)?;

        let server_changed = match &local_build {
            Some(local) => *local != remote.build,
            None => {
                tracing::warn!(remote = %remote.build, "no local build recorded; not treating server as changed");
                false
            }
        };
        let facts = ChangeFacts {
            server_changed,
            runtime_changed: runtime.changed(),
            protocol: runtime.protocol,
        };
        let decision = self.engine.evaluate(&facts);

        tracing::info!(
            local_build = ?local_build.as_ref().map(|b| b.0.as_str()),
            remote_build = %remote.build,
            confidence = ?remote.confidence,
            local_runtime = %local_runtime,
            remote_runtime = %runtime.tag,
            server = decision.update_server,
            runtime = decision.update_runtime,
            "detection cycle evaluated"
        );

        Ok(Evaluation {
            decision,
            facts,
            local: BuildIdentifiers {
                local_server_build: local_build,
                local_runtime_version: local_runtime,
                local_protocol: local_protocol.map(str::to_string),
                pending_remote_server_build: None,
            },
            remote_build: remote.build,
            remote_runtime_tag: runtime.tag,
            note: runtime.note,
        })
    }
}
