//! PostgreSQL statements for the record store. Identifiers come from the registry only; values are always parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
