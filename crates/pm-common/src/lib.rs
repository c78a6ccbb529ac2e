//! Power-cycle common types and errors.
//!
//! This crate provides the foundational types shared by the pm-core
//! library and binary:
//! - The power-management operation under test
//! - The campaign error taxonomy with stable categories

pub mod error;
pub mod operation;

pub use error::{Error, ErrorCategory, Result};
pub use operation::Operation;
