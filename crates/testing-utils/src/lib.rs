//! # Harvester Testing Utils
//!
//! Shared testing utilities for the harvester workspace: recording mocks
//! for the cron driver, storage and scripts, plus builders for test data.
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! harvester-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
