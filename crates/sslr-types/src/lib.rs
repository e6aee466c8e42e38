#![forbid(unsafe_code)]
#![doc = "Common error types and algorithm identifiers for the sslr protocol engine."]

pub mod algorithm;
pub mod error;

pub use algorithm::*;
pub use error::*;
