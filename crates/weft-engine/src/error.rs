//! Error types for weft-engine.
//!
//! [`EngineError`] covers failures that reject an operation or abort a whole
//! pass. [`ProviderError`] is what a provider's computation can fail with;
//! it is recorded on the failing identifier and never aborts a pass.

use thiserror::Error;

use weft_core::{CoreError, EntityRef, Identifier, ProviderKind};

/// Errors produced by engine and registry operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A provider of this kind is already registered.
    #[error("provider already registered: {kind}")]
    DuplicateProvider { kind: ProviderKind },

    /// No provider of this kind is registered.
    #[error("provider not registered: {kind}")]
    UnknownProvider { kind: ProviderKind },

    /// Identifiers kept deferring (or kept being revisited) past the retry
    /// ceiling. The pass was aborted; items committed before the abort stay
    /// valid.
    #[error("deferral ceiling of {ceiling} retries exceeded; implicated: {}", render_ids(.implicated))]
    DeferralCeilingExceeded {
        ceiling: u32,
        implicated: Vec<Identifier>,
    },

    /// Engine configuration could not be parsed.
    #[error("invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A declaration or item could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single provider computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// A dependency this computation read is itself invalid.
    #[error("upstream {upstream} is invalid")]
    UpstreamFailed { upstream: Identifier },

    /// The computation read an identifier whose kind has no provider.
    #[error("no provider registered for {kind} (needed for {id})")]
    NoProvider { kind: ProviderKind, id: Identifier },

    /// The entity has no declaration.
    #[error("no declaration for {entity}")]
    MissingDeclaration { entity: EntityRef },

    /// A dependency-graph rule was violated (for example, a hard read that
    /// would close a hard cycle).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A payload could not be read or written.
    #[error("payload of {id}: {message}")]
    Payload { id: Identifier, message: String },

    /// Provider-specific failure.
    #[error("{id}: {reason}")]
    Invalid { id: Identifier, reason: String },
}

impl ProviderError {
    pub fn invalid(id: &Identifier, reason: impl Into<String>) -> Self {
        ProviderError::Invalid {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    pub fn payload(id: &Identifier, err: serde_json::Error) -> Self {
        ProviderError::Payload {
            id: id.clone(),
            message: err.to_string(),
        }
    }
}

fn render_ids(ids: &[Identifier]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
