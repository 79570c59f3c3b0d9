//! Workflow phases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Discrete stage of a task's workflow.
///
/// ```text
/// idle → coding → testing → documentation → ready → commit → release → ready_to_complete → idle
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Coding,
    Testing,
    Documentation,
    Ready,
    Commit,
    Release,
    ReadyToComplete,
}

impl Phase {
    pub const ALL: [Self; 8] = [
        Self::Idle,
        Self::Coding,
        Self::Testing,
        Self::Documentation,
        Self::Ready,
        Self::Commit,
        Self::Release,
        Self::ReadyToComplete,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Coding => "coding",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Ready => "ready",
            Self::Commit => "commit",
            Self::Release => "release",
            Self::ReadyToComplete => "ready_to_complete",
        }
    }

    /// Human-readable name.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Coding => "Coding",
            Self::Testing => "Testing",
            Self::Documentation => "Documentation",
            Self::Ready => "Ready for commit check",
            Self::Commit => "Commit and push",
            Self::Release => "Release",
            Self::ReadyToComplete => "Ready to complete",
        }
    }

    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("unknown phase '{s}'"))
    }
}

// Snapshots written by other tools may carry phases this build does not
// know; those load as idle instead of failing the whole file.
impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        if raw.is_empty() {
            return Ok(Self::Idle);
        }
        Ok(raw.parse().unwrap_or_else(|e| {
            tracing::warn!("{e}; treating as idle");
            Self::Idle
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serde_names() {
        assert_eq!(serde_json::to_string(&Phase::ReadyToComplete).unwrap(), "\"ready_to_complete\"");
        let phase: Phase = serde_json::from_str("\"documentation\"").unwrap();
        assert_eq!(phase, Phase::Documentation);
    }

    #[test]
    fn test_unknown_phase_loads_idle() {
        let phase: Phase = serde_json::from_str("\"deploying\"").unwrap();
        assert_eq!(phase, Phase::Idle);
        let phase: Phase = serde_json::from_str("null").unwrap();
        assert_eq!(phase, Phase::Idle);
    }

    #[test]
    fn test_parse_accepts_kebab_case() {
        assert_eq!("ready-to-complete".parse::<Phase>(), Ok(Phase::ReadyToComplete));
        assert!("shipping".parse::<Phase>().is_err());
    }
}
