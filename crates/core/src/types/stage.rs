use serde::{Deserialize, Serialize};

/// A blocking stage of the per-job pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Claiming,
    Fetching,
    Executing,
    Hashing,
    Reporting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Claiming => "claiming",
            Stage::Fetching => "fetching",
            Stage::Executing => "executing",
            Stage::Hashing => "hashing",
            Stage::Reporting => "reporting",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
