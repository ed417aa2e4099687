//! JSON-mode output validation.
//!
//! Validation is advisory: the generated text is always returned unchanged
//! and violations are reported alongside it as warnings.
//!
//! Structural checks against the caller's JSON schema need the
//! `response-validation` feature. Without it only "is this JSON at all"
//! is checked.

mod schema;

pub use schema::{ValidationError, extract_json_payload, validate_output};
