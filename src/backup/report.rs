//! Restore reporting: the error accumulator and the final report.

use serde::{Deserialize, Serialize};

/// Labeled non-fatal failures collected across a best-effort operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorAccumulator {
    errors: Vec<String>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure as `"<label>: <error>"`.
    pub fn record(&mut self, label: impl AsRef<str>, error: impl std::fmt::Display) {
        let entry = format!("{}: {}", label.as_ref(), error);
        tracing::warn!(error = entry.as_str(), "[Backup] Entity operation failed");
        self.errors.push(entry);
    }

    /// Append every failure collected by another accumulator.
    pub fn extend(&mut self, other: ErrorAccumulator) {
        self.errors.extend(other.errors);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.errors.iter()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.errors
    }
}

/// Outcome of one restore. Returned to the caller, never persisted.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub snapshot_id: String,
    pub snapshot_name: String,
    pub roles_created: usize,
    pub channels_created: usize,
    pub emojis_created: usize,
    pub roles_deleted: usize,
    pub channels_deleted: usize,
    pub emojis_deleted: usize,
    pub messages_restored: usize,
    /// Messages not replayed: unmapped channel, empty payload or send failure.
    pub messages_skipped: usize,
    pub errors: Vec<String>,
}

impl RestoreReport {
    /// Whether every entity was restored without a recorded failure.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_formats_label() {
        let mut errors = ErrorAccumulator::new();
        errors.record("Role \"Mods\"", "403: Missing Permissions");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.iter().next().unwrap(),
            "Role \"Mods\": 403: Missing Permissions"
        );
    }

    #[test]
    fn test_extend_preserves_order() {
        let mut a = ErrorAccumulator::new();
        a.record("a", "1");
        let mut b = ErrorAccumulator::new();
        b.record("b", "2");
        a.extend(b);
        assert_eq!(a.into_vec(), vec!["a: 1".to_string(), "b: 2".to_string()]);
    }

    #[test]
    fn test_report_serialization() {
        let report = RestoreReport {
            roles_created: 3,
            errors: vec!["x: y".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rolesCreated"], 3);
        assert_eq!(json["messagesRestored"], 0);
        assert!(!report.is_clean());
    }
}
