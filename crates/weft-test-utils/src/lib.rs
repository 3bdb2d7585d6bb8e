//! Mock boundaries and workflow fixtures shared by Weft's tests.

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
