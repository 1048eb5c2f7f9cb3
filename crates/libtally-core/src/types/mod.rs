pub mod event;
pub mod record;
pub mod repo_id;

pub use event::{Event, EventSource, EventStatus};
pub use record::{parse_time_arg, CommitKind, ExportRecord, CSV_SCHEMA_VERSION, SHORT_HASH_LEN};
pub use repo_id::{RepoId, RepoIdError};
