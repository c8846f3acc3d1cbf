//! Engine configuration.

use crate::parser::DecoderOptions;
use serde::{Deserialize, Serialize};

/// Default bound on nested frames (calls and structured blocks together).
pub const DEFAULT_MAX_CALL_DEPTH: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frame-stack bound; exceeding it is a runtime error, not a host overflow.
    pub max_call_depth: usize,
    /// Refuse to call exported functions whose signature mentions `i64`.
    pub check_for_i64_in_signature: bool,
    pub decoder: DecoderOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            check_for_i64_in_signature: false,
            decoder: DecoderOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Reads a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_call_depth, 300);
        assert!(!config.check_for_i64_in_signature);
        assert!(!config.decoder.ignore_code_section);
    }

    #[test]
    fn partial_json() {
        let config = EngineConfig::from_json(r#"{"max_call_depth": 50, "decoder": {"dump": true}}"#).unwrap();
        assert_eq!(config.max_call_depth, 50);
        assert!(config.decoder.dump);
        assert!(!config.check_for_i64_in_signature);
    }

    #[test]
    fn rejects_bad_json() {
        assert!(EngineConfig::from_json(r#"{"max_call_depth": "deep"}"#).is_err());
    }
}
