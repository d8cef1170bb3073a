//! Assistant prompts and response extraction for tariff code resolution.
//!
//! This crate covers the text side of the external classification assistant:
//! building the prompts for batch tariff code suggestion and retail name
//! disambiguation, and extracting structured answers from chat replies.
//! Transport lives in `tariff-match-core`.

pub mod prompts;
pub mod extraction;

pub use extraction::*;
pub use prompts::*;
