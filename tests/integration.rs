//! Integration test runner for ghostfs.
//!
//! Every test builds a [`common::TestGhost`] over a temporary project
//! directory and a SQLite file inside it.
//!
//! Run tests with:
//! ```bash
//! cargo test --test integration
//! ```

#[path = "common.rs"]
mod common;

pub use common::TestGhost;


// Export, import and revision promotion
#[path = "export_tests.rs"]
mod export_tests;
