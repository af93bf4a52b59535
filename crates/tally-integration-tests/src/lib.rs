//! Integration test crate for the points ledger.
//!
//! This crate has no library code. It only contains integration tests that
//! drive flows across several workspace crates against one database.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p tally-integration-tests
//! ```
