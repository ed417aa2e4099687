//! Candidate resolution.
//!
//! Turns an optional feature name into the ordered list of providers a
//! request will walk: the feature's bound provider first, then every other
//! enabled provider by descending priority, ties broken by id.

mod resolver;

pub use resolver::*;
