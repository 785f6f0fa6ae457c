use serde::{Deserialize, Serialize};

// ─── Issue codes ──────────────────────────────────────────────────────────────

/// An `…ExtraData` record with no dedicated reader was skipped by byte count.
pub const UNKNOWN_EXTRA_DATA: &str = "UNKNOWN_EXTRA_DATA";
/// A reference points outside the record array or at the wrong record kind.
pub const DANGLING_REFERENCE: &str = "DANGLING_REFERENCE";
/// Per-vertex or per-triangle data disagrees with the vertex count.
pub const GEOMETRY_INCONSISTENCY: &str = "GEOMETRY_INCONSISTENCY";
/// A spatial record is reachable along more than one path.
pub const SHARED_NODE: &str = "SHARED_NODE";
/// A clip start marker has no matching stop marker.
pub const UNMATCHED_TEXT_KEY: &str = "UNMATCHED_TEXT_KEY";

/// Severity level used by validation issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single non-fatal finding produced while decoding or converting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    /// Build a warning and log it.
    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        log::warn!("[{code}] {message}");
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message,
        }
    }

    /// Build an informational issue and log it.
    pub fn info(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        log::info!("[{code}] {message}");
        Self {
            severity: Severity::Info,
            code: code.to_string(),
            message,
        }
    }
}

/// Count issues carrying `code`.
pub fn count_code(issues: &[ValidationIssue], code: &str) -> usize {
    issues.iter().filter(|issue| issue.code == code).count()
}
