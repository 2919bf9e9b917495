//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - A multi-server mock cluster over in-memory stores
//! - A flaky store wrapper for transient failure injection
//! - CouchDB testcontainer setup

#![allow(dead_code)] // Each test binary uses a different subset

pub mod containers;
pub mod mock_couch;

pub use containers::*;
pub use mock_couch::*;
