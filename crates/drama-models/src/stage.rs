//! Pipeline stage identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One named step of the content pipeline that can fail and be retried.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Scouting drama seeds from social platforms
    Scout,
    /// Script generation via the language-model API
    ScriptGeneration,
    /// Voiceover audio synthesis
    Voiceover,
    /// Asset (stock footage/image) download
    AssetFetch,
    /// Handoff packaging for downstream editing
    Handoff,
    /// Video upload to the hosting platform
    Upload,
}

impl Stage {
    /// All stages, in pipeline order. Dispatch passes iterate in this order.
    pub const ALL: [Stage; 6] = [
        Stage::Scout,
        Stage::ScriptGeneration,
        Stage::Voiceover,
        Stage::AssetFetch,
        Stage::Handoff,
        Stage::Upload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scout => "scout",
            Stage::ScriptGeneration => "script_generation",
            Stage::Voiceover => "voiceover",
            Stage::AssetFetch => "asset_fetch",
            Stage::Handoff => "handoff",
            Stage::Upload => "upload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unrecognized stage name.
#[derive(Debug, Clone, Error)]
#[error("unknown stage: {0}")]
pub struct UnknownStageError(pub String);

impl FromStr for Stage {
    type Err = UnknownStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scout" => Ok(Stage::Scout),
            "script_generation" => Ok(Stage::ScriptGeneration),
            "voiceover" => Ok(Stage::Voiceover),
            "asset_fetch" => Ok(Stage::AssetFetch),
            "handoff" => Ok(Stage::Handoff),
            "upload" => Ok(Stage::Upload),
            other => Err(UnknownStageError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_roundtrip() {
        for stage in Stage::ALL {
            let parsed: Stage = stage.as_str().parse().unwrap();
            assert_eq!(parsed, stage);
        }
    }

    #[test]
    fn test_stage_serde_snake_case() {
        let json = serde_json::to_string(&Stage::ScriptGeneration).unwrap();
        assert_eq!(json, "\"script_generation\"");
    }

    #[test]
    fn test_unknown_stage() {
        assert!("thumbnailer".parse::<Stage>().is_err());
    }
}
