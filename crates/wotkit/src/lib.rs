//! The document model shared by every component that talks to a
//! Web of Things device.
//!
//! This crate provides APIs to:
//!
//! - Resolve shorthand identifiers, such as `m3lite:Door`, into fully-qualified
//!   IRIs through the prefix table declared in the `@context` of a
//!   Thing Description.
//! - Decode a Thing Description, or a bulletin board embedding several of
//!   them, into an immutable in-memory model. Every semantic `@type` is
//!   resolved while decoding, so a description with dangling prefixes is
//!   rejected upfront.
//! - Turn the untyped JSON type descriptors of properties, actions and
//!   events into a tagged union of scalar, one-of and object schemas, and
//!   validate concrete values against them.
//!
//! No networking happens here: fetching descriptions, reading properties or
//! subscribing to events lives in the controller crate.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Thing Descriptions, their interaction descriptors and bulletin boards.
pub mod description;
/// Error management.
pub mod error;
/// Prefix tables and IRI resolution.
pub mod namespace;
/// The `{"value": ...}` envelope exchanged with devices.
pub mod payload;
/// Typed data schemas and value validation.
pub mod schema;

pub use error::{Error, ErrorKind, Result};

#[cfg(test)]
pub(crate) fn parse<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
