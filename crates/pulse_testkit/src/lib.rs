//! # Pulse Testkit
//!
//! Test utilities for pulse files.
//!
//! This crate provides:
//! - Test fixtures and pulse file helpers
//! - Property-based test generators using proptest
//! - Cross-crate integration test helpers pairing local and remote
//!   sessions
//!
//! ## Usage
//!
//! ```rust
//! use pulse_core::PulseAccess;
//! use pulse_testkit::prelude::*;
//!
//! with_temp_pulse(|session| {
//!     scenarios::write_equilibrium(session, 10);
//!     let ip = session
//!         .get_all("equilibrium", "global_quantities/ip", "time")
//!         .unwrap();
//!     assert_eq!(ip.len(), 10);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
