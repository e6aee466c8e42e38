#![forbid(unsafe_code)]
#![doc = "Cipher and digest provider objects for the sslr protocol engine."]

// Core traits
pub mod provider;

// Hash algorithms
pub mod hash;

// MAC algorithms
pub mod hmac;

// Symmetric ciphers
pub mod cipher;

pub use provider::{Digest, SymmetricCipher};
