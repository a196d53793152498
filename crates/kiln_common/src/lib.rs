//! Shared foundational types used across the kiln build engine.
//!
//! This crate provides content hashing for content-addressed storage and
//! option digests, plus the path normalization rules every other crate relies
//! on to key build state by input-root-relative paths.

#![warn(missing_docs)]

pub mod hash;
pub mod paths;

pub use hash::{ContentHash, ParseContentHashError};
pub use paths::{normalize_key, replace_extension, to_slash};
