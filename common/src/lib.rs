//! Cambio Common Types
//!
//! Shared types used across the Cambio FX engine: the currency catalog,
//! currency codes and pairs, banker's rounding, identifiers and
//! time helpers.

pub mod currency;
pub mod error;
pub mod identifiers;
pub mod monetary;
pub mod time;

pub use currency::*;
pub use error::*;
pub use identifiers::*;
pub use monetary::*;
pub use time::*;
