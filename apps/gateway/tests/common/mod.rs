//! Common test utilities for gateway integration tests
//!
//! This module provides shared test infrastructure for integration tests,
//! including hub configuration fixtures and an in-memory test client.

#![allow(unused_imports)]

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
