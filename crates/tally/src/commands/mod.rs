pub mod export;
pub mod init;
pub mod list;
pub mod migrate;
pub mod purge;
pub mod record;
pub mod stats;
pub mod track;
pub mod watch;
