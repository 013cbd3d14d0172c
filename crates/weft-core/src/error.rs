//! Core error types for weft-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the identifier, item and dependency-graph model.

use thiserror::Error;

use crate::id::Identifier;

/// Core errors produced by the weft-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Registering a hard edge would close a cycle made only of hard edges.
    /// `path` starts and ends at `upstream`.
    #[error("hard dependency cycle: {upstream} -> {downstream} would close {}", render_path(.path))]
    HardCycle {
        upstream: Identifier,
        downstream: Identifier,
        path: Vec<Identifier>,
    },

    /// An identifier string did not follow `MID:<kind>#<location>?<entity>`.
    #[error("malformed identifier '{input}': {reason}")]
    MalformedIdentifier { input: String, reason: String },

    /// A draft was committed under an identifier other than its own.
    #[error("item draft for {actual} committed as {expected}")]
    IdentifierMismatch {
        expected: Identifier,
        actual: Identifier,
    },
}

fn render_path(path: &[Identifier]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
