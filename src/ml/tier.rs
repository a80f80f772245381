use std::fmt;

use serde::Serialize;

/// Qualitative reading of a predicted probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityTier {
    High,
    Moderate,
    Low,
}

impl AvailabilityTier {
    /// | Probability   | Tier     |
    /// |---------------|----------|
    /// | >= 0.70       | high     |
    /// | [0.40, 0.70)  | moderate |
    /// | < 0.40        | low      |
    pub fn from_probability(p: f64) -> Self {
        match p {
            p if p >= 0.70 => AvailabilityTier::High,
            p if p >= 0.40 => AvailabilityTier::Moderate,
            _ => AvailabilityTier::Low,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AvailabilityTier::High => "high",
            AvailabilityTier::Moderate => "moderate",
            AvailabilityTier::Low => "low",
        }
    }

    /// Traffic-light marker used in console output.
    pub fn marker(&self) -> &'static str {
        match self {
            AvailabilityTier::High => "🟢",
            AvailabilityTier::Moderate => "🟡",
            AvailabilityTier::Low => "🔴",
        }
    }
}

impl fmt::Display for AvailabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
