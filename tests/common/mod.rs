//! Common test utilities for feed-mirror integration tests

#[allow(dead_code)]
pub mod fakes;
#[allow(dead_code)]
pub mod fixtures;

pub use fakes::*;
#[allow(unused_imports)]
pub use fixtures::*;
