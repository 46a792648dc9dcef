//! Core abstractions for the VQ-CPC crate
//!
//! # Modules
//!
//! - `error`: Structured error handling shared by every component

pub mod error;

pub use error::{Result, VqcpcError};
