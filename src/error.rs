use thiserror::Error;

use crate::stream::FormatVersion;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Fatal decode failures. No partially decoded record array escapes once one
/// of these is returned.
pub enum DecodeError {
    /// Unrecognized product prefix, unparseable version string, or a
    /// redundant version field that disagrees with the header line.
    #[error("malformed header: {reason}")]
    MalformedHeader {
        /// Human-readable description of what was wrong.
        reason: String,
    },

    /// Header parsed fine but names a format generation this decoder does
    /// not understand.
    #[error("unsupported format version {version}")]
    UnsupportedVersion {
        /// Version extracted from the header line.
        version: FormatVersion,
    },

    /// The byte stream desynchronized: a read ran past the end, a string or
    /// list length was out of bounds, or a record tag was unknown.
    #[error("corrupt format at byte {offset}: {reason}")]
    CorruptFormat {
        /// Cursor position where the problem was detected.
        offset: usize,
        /// Human-readable description of what was wrong.
        reason: String,
    },
}

impl DecodeError {
    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        DecodeError::CorruptFormat {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::MalformedHeader {
            reason: reason.into(),
        }
    }

    /// Prefix a corrupt-format reason with the record being decoded.
    pub(crate) fn in_record(self, index: usize, tag: &str) -> Self {
        match self {
            DecodeError::CorruptFormat { offset, reason } => DecodeError::CorruptFormat {
                offset,
                reason: format!("record {index} ({tag}): {reason}"),
            },
            other => other,
        }
    }
}
