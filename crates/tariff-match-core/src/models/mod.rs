//! Domain models for tariff code resolution.

mod catalog;
mod resolution;
mod retail;

pub use catalog::*;
pub use resolution::*;
pub use retail::*;
