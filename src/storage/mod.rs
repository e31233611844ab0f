//! Storage layer.
//!
//! Everything rulewright persists lives under a per-project store directory
//! as JSON documents written by temp-file-then-rename:
//! - **Pipeline output**: analysis results, cross-session patterns, suggestion sets
//! - **Bookkeeping**: the audit log of analyzed sessions
//! - **Apply trail**: append-only history, pre-edit backups

pub mod atomic;
mod audit;
mod filesystem;
mod traits;

pub use atomic::{TEMP_PREFIX, atomic_write, write_json_atomic};
pub use audit::{AuditLog, SessionAudit};
pub use filesystem::FileStore;
pub use traits::PipelineStore;
