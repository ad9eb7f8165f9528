//! Transaction Integration Tests
//!
//! Lifecycle, isolation between sessions, configuration and version
//! reclamation.

#[path = "../common/mod.rs"]
mod common;

mod isolation;
mod lifecycle;
mod reclaim;
