//! Append-only JSON-lines audit store for traffic crossing the gate.
//!
//! Every message the proxy forwards is described by an [`AuditRecord`]:
//! which link it crossed, the method, the raw payload, and whatever session
//! id and user/agent text could be pulled out of it. Records are serialised
//! as one newline-terminated JSON object each and appended to a log file,
//! producing a [JSON Lines](https://jsonlines.org/) stream.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditRecord, AuditSink, AuditStore, Direction};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::open("audit.jsonl").await?;
//!
//! sink.write(AuditRecord::request(
//!     Direction::UpstreamToDownstream,
//!     "initialize",
//!     serde_json::json!({"protocolVersion": 1}),
//! ))
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{AuditRecord, Direction};
pub use sink::{AuditSink, AuditStore};
pub use writer::{AuditWriteError, AuditWriter};
