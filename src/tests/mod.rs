//! Consolidated test modules.
//!
//! End-to-end tests that drive the gateway through real HTTP adapters,
//! parameterized across vendors.
