//! Engine configuration.

use serde::{Deserialize, Serialize};

use weft_core::LocationTag;

use crate::error::EngineError;

/// Options controlling recomputation passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times one identifier may be re-entered within a single pass
    /// after its first computation (deferral retries and cycle revisits).
    /// Exceeding it aborts the pass.
    pub retry_ceiling: u32,

    /// Location used for identifiers when a change names none.
    pub default_location: LocationTag,

    /// Whether reachable-but-unaffected identifiers are listed in
    /// [`PassReport::skipped`](crate::PassReport::skipped).
    pub report_unchanged: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            retry_ceiling: 8,
            default_location: LocationTag::default(),
            report_unchanged: false,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON configuration; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    /// Maximum number of compute invocations per identifier per pass.
    pub fn max_invocations(&self) -> u32 {
        self.retry_ceiling.saturating_add(1)
    }
}
