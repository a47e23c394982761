//! # dirmap-core
//!
//! Core types and utilities shared by the dirmap directory mapping layer.
//!
//! This crate provides the semantic entry model, LDAP result codes, and the error type used by
//! every dirmap crate.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result-code aware fault reporting
//! - [`result_code`] - LDAP result codes with their canonical names
//! - [`entry`] - Attribute names, values, and entries as plain associative data

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod entry;
pub mod error;
pub mod result_code;

// Re-export commonly used types
pub use entry::{AttributeName, AttributeValue, Entry, Value};
pub use error::{Error, Result};
pub use result_code::ResultCode;
