//! Durable state for the risk-control plane.
//!
//! Every shared file is written by atomic replace (write temp, then rename)
//! so a concurrently polling process never reads a partial file:
//! - `atomic`: replace / create-if-absent primitives
//! - `crisis_log`: capped JSON array of crisis events
//! - `audit`: timestamped JSON + markdown run reports
//! - `jsonl`: append-only JSON Lines writer with daily rotation
//! - `history`: trade history store backed by a JSON file

pub mod atomic;
pub mod audit;
pub mod crisis_log;
pub mod error;
pub mod history;
pub mod jsonl;

pub use atomic::{
    backup_path, create_new_atomic, read_json, write_atomic, write_json_atomic,
    write_json_with_backup,
};
pub use audit::{AuditReportPaths, AuditReportWriter};
pub use crisis_log::{CrisisLog, DEFAULT_CRISIS_LOG_CAPACITY};
pub use error::{PersistenceError, PersistenceResult};
pub use history::JsonTradeHistory;
pub use jsonl::JsonLinesWriter;
