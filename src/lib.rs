//! NetImmerse/Gamebryo model decoder.
//!
//! Decodes 4.0.0.2 through 4.2.2.0 model files into a record graph and
//! converts them into a target-frame scene with skeletal rigs, animation
//! clips, collision shapes and optional decimated meshes.

pub mod collision;
pub mod convert;
pub mod error;
pub mod issue;
pub mod logging;
pub mod pipeline;
pub mod records;
pub mod settings;
pub mod simplify;
pub mod stream;

pub use error::DecodeError;
pub use issue::{Severity, ValidationIssue};
pub use logging::{ResultExt, init_logging};
pub use pipeline::{DecodePool, ModelOutput, PipelineOptions, decode_and_convert};
pub use records::{RecordGraph, RecordRef, decode};
