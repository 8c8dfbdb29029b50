//! Differential-expression method selection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Minimum samples per group for replicate-sensitive methods
pub const MIN_REPLICATES: usize = 3;

/// Differential-expression method applied to the quantified counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeMethod {
    #[serde(rename = "edgeR")]
    EdgeR,
    #[serde(rename = "DESeq2")]
    DESeq2,
    #[serde(rename = "ballgown")]
    Ballgown,
}

impl DeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeMethod::EdgeR => "edgeR",
            DeMethod::DESeq2 => "DESeq2",
            DeMethod::Ballgown => "ballgown",
        }
    }

    /// Count-based dispersion methods need biological replicates
    pub fn is_replicate_sensitive(&self) -> bool {
        matches!(self, DeMethod::EdgeR | DeMethod::DESeq2)
    }

    /// Parse a comma-joined method list such as `edgeR,DESeq2`
    pub fn parse_list(s: &str) -> Result<Vec<DeMethod>> {
        let mut methods = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let method: DeMethod = part.parse()?;
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        if methods.is_empty() {
            return Err(Error::Config("No differential-expression method given".to_string()));
        }
        Ok(methods)
    }
}

impl fmt::Display for DeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "edger" => Ok(DeMethod::EdgeR),
            "deseq2" | "deseq" => Ok(DeMethod::DESeq2),
            "ballgown" => Ok(DeMethod::Ballgown),
            _ => Err(Error::Config(format!(
                "Unknown differential-expression method: {} (expected edgeR, DESeq2 or ballgown)",
                s
            ))),
        }
    }
}
