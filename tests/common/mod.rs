//! Common test utilities for catalog-extract integration tests

#[allow(dead_code)]
pub mod remote;

#[allow(unused_imports)]
pub use remote::*;
