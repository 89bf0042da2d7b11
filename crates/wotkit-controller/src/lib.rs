//! The `wotkit-controller` library crate resolves, invokes and supervises
//! Web of Things devices across a network.
//!
//! Devices are described by `wotkit` thing descriptions. On top of them,
//! this crate provides:
//!
//! - A `HTTP` client for descriptions, properties, actions and event
//!   subscriptions
//! - Interaction lookups by semantic type, where types are compared through
//!   a semantic equivalence oracle
//! - A capability matcher deriving action inputs from semantic rules
//! - Failure detectors and a host scanner finding replacement devices
//! - An orchestrator binding the devices of a door alarm scenario and
//!   replacing them when they fail
//!
//! Every long-lived activity runs on its own `tokio` task and can be
//! invalidated at any time.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The `HTTP` client used to talk to devices.
pub mod client;
/// Orchestrator configuration.
pub mod config;
/// Discovery of devices among a pool of candidate hosts.
pub mod discovery;
/// Error management.
pub mod error;
/// Liveness probes and failure detectors.
pub mod failure;
/// Derivation of action inputs from semantic rules.
pub mod matcher;
/// Semantic equivalence oracles.
pub mod oracle;
/// The door alarm orchestrator.
pub mod orchestrator;
/// Event subscriptions.
pub mod subscription;
/// Remote devices along with their interactions.
pub mod thing;
