//! Column roles and subroles

use serde::{Deserialize, Serialize};

/// The role a column plays in a data frame.
///
/// Every column belongs to exactly one role group; the role decides which
/// preprocessors touch it and how the feature learner may use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Categorical,
    Discrete,
    JoinKey,
    Numerical,
    Target,
    Text,
    TimeStamp,
    UnusedFloat,
    UnusedString,
}

impl Role {
    /// The name used in user-facing messages and command payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Categorical => "categorical",
            Role::Discrete => "discrete",
            Role::JoinKey => "join_key",
            Role::Numerical => "numerical",
            Role::Target => "target",
            Role::Text => "text",
            Role::TimeStamp => "time_stamp",
            Role::UnusedFloat => "unused_float",
            Role::UnusedString => "unused_string",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained inclusion/exclusion markers on a column.
///
/// Subroles never change the role group; they narrow which components are
/// allowed to consume the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subrole {
    EmailOnly,
    SubstringOnly,
    ExcludePreprocessors,
    ExcludeCategoryTrimmer,
    ExcludeImputation,
    ExcludeSeasonal,
    ExcludeMapping,
    ExcludeTextFieldSplitter,
    ExcludeFeatureLearners,
}

impl Subrole {
    /// Whether a column carrying this subrole must be skipped by every
    /// preprocessor.
    pub fn excludes_all_preprocessors(&self) -> bool {
        matches!(
            self,
            Subrole::ExcludePreprocessors | Subrole::EmailOnly | Subrole::SubstringOnly
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        let json = serde_json::to_string(&Role::JoinKey).unwrap();
        assert_eq!(json, "\"join_key\"");
        let back: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Role::JoinKey);
    }

    #[test]
    fn test_subrole_exclusion() {
        assert!(Subrole::EmailOnly.excludes_all_preprocessors());
        assert!(!Subrole::ExcludeSeasonal.excludes_all_preprocessors());
    }
}
