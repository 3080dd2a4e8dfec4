//! Warnings produced during fitting

use serde::{Deserialize, Serialize};

use crate::dependency::{Fingerprint, Tracker};

/// A recoverable data issue surfaced to the client instead of failing the
/// fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub warning_type: String,
    pub message: String,
}

impl Warning {
    pub fn new(warning_type: &str, message: String) -> Self {
        Self {
            warning_type: warning_type.to_string(),
            message,
        }
    }

    /// A column produced only constant or empty derived output.
    pub fn constant_column(table: &str, column: &str) -> Self {
        Self::new(
            "COLUMN SHOULD BE UNUSED",
            format!(
                "Column '{}' in table '{}' generates only constant values and was skipped.",
                column, table
            ),
        )
    }
}

/// Caches the warnings generated for one fit so a cache-hit refit can
/// replay them to the client.
pub type WarningTracker = Tracker<Vec<Warning>>;

/// Builds the fingerprint under which a fit's warnings are tracked.
pub fn warnings_fingerprint(dependencies: Vec<Fingerprint>) -> Fingerprint {
    Fingerprint::Preprocessor {
        marker: "Warnings".to_string(),
        params: serde_json::Value::Null,
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_warning_message_names_table_and_column() {
        let warning = Warning::constant_column("orders", "month( ts )");
        assert!(warning.message.contains("orders"));
        assert!(warning.message.contains("month( ts )"));
    }

    #[test]
    fn test_tracker_replays_warnings() {
        let tracker = WarningTracker::new();
        let fp = warnings_fingerprint(vec![]);
        tracker.add(&fp, Arc::new(vec![Warning::constant_column("t", "c")]));
        let replayed = tracker.retrieve(&fp).unwrap();
        assert_eq!(replayed.len(), 1);
    }
}
