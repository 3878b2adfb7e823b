//! Shared fixtures and the TestWorld harness for revtrace integration
//! tests. Test-only: panics on setup failure are fine here.

pub mod fixtures;
mod world;

pub use world::{TestWorld, TestWorldBuilder};
