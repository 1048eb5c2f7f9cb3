pub mod types;
pub mod hash;
pub mod store;
pub mod config;
pub mod export;
pub mod schedule;
pub mod lock;
pub mod tail;
pub mod error;

pub use error::TallyError;
pub use types::{CommitKind, Event, EventSource, EventStatus, ExportRecord, RepoId, RepoIdError};
pub use store::{EventFilter, EventStore, StoreStats};
pub use config::{Config, SyncState, TrackingRegistry, load_config, save_config};
pub use export::{export_pending, CommitMeta, ExportOutcome, MetadataSource, RecordBuilder};
pub use lock::ExportLock;
pub use tail::Tailer;
