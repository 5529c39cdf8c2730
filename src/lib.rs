#![cfg_attr(docsrs, feature(doc_cfg))]
//! # jbdbms_lib
//!
//! This crate provides a library for reading telemetry from JBD BMS (Battery
//! Management System) packs over their Bluetooth LE serial service.
//! It covers the frame protocol, the derived telemetry model and an
//! asynchronous session client.
//!
//! ## Features
//!
//! This crate uses a feature-based system to keep dependencies minimal.
//! The protocol and telemetry modules are always available; enable the
//! client features for device communication.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `jbdbms` command-line tool and pulls in `bluest` and `serde`.
//!
//! ### Client Features
//! - `async-client`: Enables the transport-generic session client using `tokio`.
//! - `bluest-async`: Enables the Bluetooth LE transport using the `bluest` crate (implies `async-client`).
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for serializing telemetry.
//! - `bin-dependencies`: Enables all features required by the `jbdbms` binary executable.

/// Contains error types for the library.
mod error;
/// Defines the JBD frame protocol and payload decoding.
pub mod protocol;
/// Derived telemetry model built from decoded payloads.
pub mod telemetry;

pub use error::Error;

/// Asynchronous session client, generic over the transport.
#[cfg_attr(docsrs, doc(cfg(feature = "async-client")))]
#[cfg(feature = "async-client")]
pub mod client;

/// Bluetooth LE transport backed by the `bluest` crate.
#[cfg_attr(docsrs, doc(cfg(feature = "bluest-async")))]
#[cfg(feature = "bluest-async")]
pub mod bluest_async;
