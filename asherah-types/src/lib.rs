//! Asherah Types
//!
//! Shared type definitions for envelope key records and data row records.

pub mod envelope;
pub mod data_row;
pub mod error;

pub use envelope::*;
pub use data_row::*;
pub use error::*;
