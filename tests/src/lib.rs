//! Shared harness for the container-backed integration tests.

pub mod mocks;
pub mod setup;
