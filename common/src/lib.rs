//! SimpleBank Common Types
//!
//! This crate contains shared types used across the SimpleBank ledger,
//! including row identifiers, currencies and the ledger error taxonomy.

pub mod identifiers;
pub mod monetary;
pub mod error;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
