//! Storage drivers behind one uniform contract.
//!
//! - **DiskStorageDriver**: files under a project directory (single server)
//! - **DatabaseStorageDriver**: SQLite rows plus a revision log (cluster-safe)
//!
//! Keeping both behind [`StorageDriver`] lets a scope move from disk to
//! database storage without touching calling code. Paths handed to a driver
//! are already normalized by the scope: forward slashes, no `.` segments.
//!
//! # Custom Drivers
//!
//! ```ignore
//! use ghostfs::driver::StorageDriver;
//!
//! struct S3Driver { /* ... */ }
//! impl StorageDriver for S3Driver { /* ... */ }
//! ```

mod backend;
mod database;
mod disk;
mod listing;
mod types;

pub use backend::StorageDriver;
pub use database::DatabaseStorageDriver;
pub use disk::DiskStorageDriver;
pub use types::{FileRevision, ListingOptions};

