//! Ratewise Common Types
//!
//! Currency codes, rate tables and the error taxonomy shared by the rate
//! cache, the conversion engine and the simulator.

pub mod currency;
pub mod error;
pub mod rates;

pub use currency::*;
pub use error::*;
pub use rates::*;
