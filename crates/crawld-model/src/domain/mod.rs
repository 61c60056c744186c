mod kv;
pub use kv::KeyValue;

mod job_env;
pub use job_env::JobEnv;

mod job_id;
pub use job_id::JobId;

mod job_request;
pub use job_request::JobRequest;

mod job_info;
pub use job_info::{FinishedJob, RunningJob, SPAWN_FAILED_EXIT_CODE};

mod job_state;
pub use job_state::JobState;

mod listing;
pub use listing::{DaemonStatus, JobListing, PendingJob};

/// Project namespace.
///
/// Case-sensitive and otherwise opaque; each project owns one pending queue.
pub type Project = String;

/// Structured payload stored in a priority queue.
///
/// Null, bool, number, string, ordered list or string-keyed map.
/// Map key order is preserved.
pub type Document = serde_json::Value;

/// Scheduling priority. Higher values pop first.
pub type Priority = f64;

/// Priority used when the caller does not give one.
pub const DEFAULT_PRIORITY: Priority = 0.0;
