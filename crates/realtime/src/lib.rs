//! # Realtime Core
//!
//! Core modules for the Realtime platform: the shared error taxonomy and the
//! provider seams used to reach the fleet backend.

mod error;
mod provider;

pub use crate::error::*;
pub use crate::provider::*;
