//! Shared storage integration tests.
//!
//! Tests the registry store interfaces against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod assignment_store_tests;
pub mod module_store_tests;
pub mod transaction_store_tests;
