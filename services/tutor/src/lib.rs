//! Lingua Service Library Crate
//!
//! Configuration loading and the interactive lesson driver. The `lingua`
//! binary is a thin wrapper that wires these to stdio.

pub mod config;
pub mod driver;
