pub mod backups;
pub mod dump;
pub mod pg_tools;
pub mod process;
pub mod reconcile;
pub mod restore;
pub mod snapshot;

pub use backups::{BackupService, BackupSettings};
