//! Tier errors

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Storage layer an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Local,
    Distributed,
    Persistent,
    Fallback,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Local => "local",
            Tier::Distributed => "distributed",
            Tier::Persistent => "persistent",
            Tier::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum TierError {
    #[error("{tier} tier unavailable: {reason}")]
    Unavailable { tier: Tier, reason: String },

    #[error("{tier} tier timed out after {after:?}")]
    Timeout { tier: Tier, after: Duration },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl TierError {
    pub fn unavailable(tier: Tier, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            tier,
            reason: reason.into(),
        }
    }

    /// The tier may recover on its own; degrade or retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    /// Only configuration errors may abort the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<serde_json::Error> for TierError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type TierResult<T> = Result<T, TierError>;
