// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Candidate and mode names end up as directory names and chart labels, so
//! they are validated once at construction and trusted afterwards.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum length of a candidate, mode or session name.
const MAX_NAME_LEN: usize = 64;

fn validate_name(field: &'static str, name: String) -> Result<String, ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidFieldValue {
            field,
            value: name,
            reason: "Name cannot be empty".to_string(),
        });
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ConfigError::InvalidFieldValue {
            field,
            value: name.clone(),
            reason: format!("Name too long: {} chars (max {})", name.len(), MAX_NAME_LEN),
        });
    }

    // Names become path components: no separators, no leading dot
    if name.starts_with('.')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::InvalidFieldValue {
            field,
            value: name,
            reason: "Name must contain only ASCII alphanumerics, '-', '_' and '.', \
                     and must not start with '.'"
                .to_string(),
        });
    }

    Ok(name)
}

macro_rules! validated_name {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new name with validation.
            pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
                validate_name($field, name.into()).map(Self)
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ConfigError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> Self {
                name.0
            }
        }
    };
}

validated_name!(
    /// Name of a benchmarked TLS implementation, e.g. `s2n-tls`.
    CandidateName,
    "candidate"
);

validated_name!(
    /// Name of a workload variant, e.g. `pair`.
    ModeName,
    "mode"
);

validated_name!(
    /// Identifier of one benchmark session; names the session directory.
    SessionId,
    "session"
);

impl SessionId {
    /// Session id derived from a timestamp, e.g. `20251016T093000Z`.
    pub fn from_time(time: DateTime<Utc>) -> Self {
        Self(time.format("%Y%m%dT%H%M%SZ").to_string())
    }

    /// Session id for the current instant.
    pub fn now() -> Self {
        Self::from_time(Utc::now())
    }
}

/// Unit of the profiler's time axis (massif `time_unit`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// Instructions executed (`i`).
    #[default]
    Instructions,
    /// Wall-clock milliseconds (`ms`).
    Milliseconds,
    /// Bytes allocated and deallocated (`B`).
    Bytes,
}

impl TimeUnit {
    /// Parse the massif header spelling.
    pub fn from_massif(value: &str) -> Option<Self> {
        match value.trim() {
            "i" => Some(Self::Instructions),
            "ms" => Some(Self::Milliseconds),
            "B" => Some(Self::Bytes),
            _ => None,
        }
    }

    /// Short axis label.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Instructions => "instructions",
            Self::Milliseconds => "ms",
            Self::Bytes => "bytes allocated",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_candidate_name_valid() {
        assert!(CandidateName::new("s2n-tls").is_ok());
        assert!(CandidateName::new("rustls").is_ok());
        assert!(CandidateName::new("openssl_3.0").is_ok());
    }

    #[test]
    fn test_candidate_name_invalid() {
        assert!(CandidateName::new("").is_err());
        assert!(CandidateName::new("a".repeat(65)).is_err());
        assert!(CandidateName::new("../etc").is_err());
        assert!(CandidateName::new("s2n tls").is_err());
        assert!(CandidateName::new(".hidden").is_err());
    }

    #[test]
    fn test_mode_name_serde_validates() {
        let ok: Result<ModeName, _> = serde_json::from_str(r#""pair""#);
        assert_eq!(ok.unwrap().as_str(), "pair");

        let bad: Result<ModeName, _> = serde_json::from_str(r#""a/b""#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_session_id_from_time() {
        let time = Utc.with_ymd_and_hms(2025, 10, 16, 9, 30, 0).unwrap();
        assert_eq!(SessionId::from_time(time).as_str(), "20251016T093000Z");
    }

    #[test]
    fn test_time_unit_from_massif() {
        assert_eq!(TimeUnit::from_massif("i"), Some(TimeUnit::Instructions));
        assert_eq!(TimeUnit::from_massif(" ms "), Some(TimeUnit::Milliseconds));
        assert_eq!(TimeUnit::from_massif("B"), Some(TimeUnit::Bytes));
        assert_eq!(TimeUnit::from_massif("s"), None);
    }
}
