//! The allow-list of directory sites.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// A directory site the engine is permitted to scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Target {
    #[serde(rename = "jameda.de")]
    Jameda,
    #[serde(rename = "doctolib.de")]
    Doctolib,
}

impl Target {
    /// Every supported target, in a stable order.
    pub const ALL: [Target; 2] = [Target::Jameda, Target::Doctolib];

    /// Host name used as the target's identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Jameda => "jameda.de",
            Target::Doctolib => "doctolib.de",
        }
    }

    /// Base URL for search requests.
    pub fn base_url(&self) -> &'static str {
        match self {
            Target::Jameda => "https://www.jameda.de",
            Target::Doctolib => "https://www.doctolib.de",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let host = normalized.strip_prefix("www.").unwrap_or(&normalized);
        Target::ALL
            .into_iter()
            .find(|t| t.as_str() == host)
            .ok_or_else(|| EngineError::UnsupportedTarget(s.to_string()))
    }
}
